//! Provider capability interface.

use super::{ModelDescriptor, ModelResponse, PromptPayload, ResponseChunk};
use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Why a provider call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    Timeout,
    RateLimited,
    Network,
    /// 5xx or overloaded.
    Server,
    Authentication,
    MalformedRequest,
    /// The candidate lacks a capability the request needs.
    Unsupported,
    Other,
}

impl FailureClass {
    /// Transient failures are retried on the same candidate.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureClass::Timeout
                | FailureClass::RateLimited
                | FailureClass::Network
                | FailureClass::Server
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Timeout => "timeout",
            FailureClass::RateLimited => "rate_limit",
            FailureClass::Network => "network",
            FailureClass::Server => "server_error",
            FailureClass::Authentication => "auth_error",
            FailureClass::MalformedRequest => "malformed_request",
            FailureClass::Unsupported => "unsupported",
            FailureClass::Other => "unknown",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{class}: {message}")]
pub struct ProviderError {
    pub class: FailureClass,
    pub message: String,
}

impl ProviderError {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

/// Lazy, finite stream of response chunks. Not restartable.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = std::result::Result<ResponseChunk, ProviderError>> + Send>>;

/// A model reachable over the network.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// The model this provider serves.
    fn descriptor(&self) -> &ModelDescriptor;

    /// Send a request and wait for the complete answer.
    async fn invoke(&self, payload: &PromptPayload) -> std::result::Result<ModelResponse, ProviderError>;

    /// Send a request and stream the answer.
    async fn invoke_streaming(
        &self,
        payload: &PromptPayload,
    ) -> std::result::Result<ChunkStream, ProviderError>;
}

/// Builds providers for descriptors.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn ModelProvider>>;
}
