//! Model routing over interchangeable chat-completion providers.
//!
//! Every generation step names a logical role ("chat", "outline", "transcript-writer").
//! The [`ModelManager`] resolves the role to an ordered list of [`ModelDescriptor`]s and
//! tries each candidate under a [`RetryPolicy`] and a per-model [`TokenBucket`] until one
//! succeeds.

mod manager;
mod openai;
mod provider;
mod rate_limit;
mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::{CallOptions, CandidateFailure, ModelManager, ResponseStream};
pub use openai::{OpenAiProvider, OpenAiProviderFactory};
pub use provider::{ChunkStream, FailureClass, ModelProvider, ProviderError, ProviderFactory};
pub use rate_limit::{RateLimitTimeout, TokenBucket};
pub use retry::RetryPolicy;

use crate::error::{NotebookError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Logical role to candidate models, in configured order.
pub type RoutingTable = BTreeMap<String, Vec<ModelDescriptor>>;

/// Something a model is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Chat,
    LongContext,
    /// Reliable JSON object output.
    StructuredOutput,
}

/// Token-bucket parameters for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Burst size.
    pub capacity: u32,
    /// Tokens restored per second.
    pub refill_per_second: f64,
}

/// One routable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Key into the configured providers.
    pub provider: String,
    pub model: String,
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,
    /// Lower ranks are tried first.
    #[serde(default)]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

fn default_capabilities() -> Vec<Capability> {
    vec![Capability::Chat]
}

impl ModelDescriptor {
    /// Parse a `provider/model` reference, as given on the command line.
    ///
    /// Explicitly chosen models are assumed to support every capability.
    pub fn parse(spec: &str) -> Result<Self> {
        let (provider, model) = spec
            .split_once('/')
            .filter(|(p, m)| !p.trim().is_empty() && !m.trim().is_empty())
            .ok_or_else(|| {
                NotebookError::InvalidInput(format!(
                    "model must be given as provider/model, got '{}'",
                    spec
                ))
            })?;

        Ok(Self {
            provider: provider.trim().to_string(),
            model: model.trim().to_string(),
            capabilities: vec![
                Capability::Chat,
                Capability::LongContext,
                Capability::StructuredOutput,
            ],
            priority: 0,
            rate_limit: None,
        })
    }

    /// Stable identifier, `provider/model`.
    pub fn id(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Expected shape of the model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// A single JSON object.
    Json,
}

/// Provider-independent request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PromptPayload {
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub response_format: ResponseFormat,
}

impl PromptPayload {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::Json;
        self
    }

    /// Capability a candidate must have to serve this payload.
    pub fn required_capability(&self) -> Option<Capability> {
        match self.response_format {
            ResponseFormat::Json => Some(Capability::StructuredOutput),
            ResponseFormat::Text => None,
        }
    }
}

/// A complete model answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    /// Descriptor id of the model that produced it.
    pub model: String,
}

/// One piece of a streamed answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseChunk {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor() {
        let d = ModelDescriptor::parse("ollama/llama3.1:8b").unwrap();
        assert_eq!(d.provider, "ollama");
        assert_eq!(d.model, "llama3.1:8b");
        assert_eq!(d.id(), "ollama/llama3.1:8b");
        assert!(d.supports(Capability::StructuredOutput));

        assert!(ModelDescriptor::parse("gpt-4o").is_err());
        assert!(ModelDescriptor::parse("/gpt-4o").is_err());
        assert!(ModelDescriptor::parse("openai/").is_err());
    }

    #[test]
    fn test_descriptor_defaults_from_toml() {
        let d: ModelDescriptor = toml::from_str("provider = \"openai\"\nmodel = \"gpt-4o\"").unwrap();
        assert_eq!(d.capabilities, vec![Capability::Chat]);
        assert_eq!(d.priority, 0);
        assert!(d.rate_limit.is_none());
    }

    #[test]
    fn test_json_payload_requires_structured_output() {
        let payload = PromptPayload::new(vec![Message::user("hi")]);
        assert_eq!(payload.required_capability(), None);
        assert_eq!(
            payload.json().required_capability(),
            Some(Capability::StructuredOutput)
        );
    }
}
