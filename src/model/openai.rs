//! OpenAI and OpenAI-compatible chat completion providers.

use super::provider::{ChunkStream, FailureClass, ModelProvider, ProviderError, ProviderFactory};
use super::{Message, MessageRole, ModelDescriptor, ModelResponse, PromptPayload, ResponseChunk, ResponseFormat};
use crate::config::{ProviderKind, ProviderSettings};
use crate::error::{NotebookError, Result};
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    ResponseFormat as OpenAiResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::{future, TryStreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Provider backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    descriptor: ModelDescriptor,
}

impl OpenAiProvider {
    /// Create a provider for `descriptor` using the given endpoint settings.
    pub fn new(descriptor: ModelDescriptor, settings: &ProviderSettings) -> Result<Self> {
        let base_url = match (&settings.base_url, settings.kind) {
            (Some(url), _) => url.clone(),
            (None, ProviderKind::OpenAi) => OPENAI_API_BASE.to_string(),
            (None, ProviderKind::OpenAiCompatible) => {
                return Err(NotebookError::Config(format!(
                    "provider '{}' is openai_compatible and needs a base_url",
                    descriptor.provider
                )))
            }
        };

        let api_key = match &settings.api_key_env {
            Some(var) => std::env::var(var).unwrap_or_else(|_| {
                warn!("{} is not set; calls to {} will fail authentication", var, descriptor.id());
                String::new()
            }),
            None => String::new(),
        };

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| NotebookError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
            descriptor,
        })
    }

    fn build_request(&self, payload: &PromptPayload, stream: bool) -> std::result::Result<CreateChatCompletionRequest, ProviderError> {
        let messages = payload
            .messages
            .iter()
            .map(to_request_message)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.descriptor.model).messages(messages);
        if let Some(temperature) = payload.temperature {
            args.temperature(temperature);
        }
        if let Some(max_tokens) = payload.max_tokens {
            args.max_completion_tokens(max_tokens);
        }
        if payload.response_format == ResponseFormat::Json {
            args.response_format(OpenAiResponseFormat::JsonObject);
        }
        if stream {
            args.stream(true);
        }

        args.build()
            .map_err(|e| ProviderError::new(FailureClass::MalformedRequest, e.to_string()))
    }
}

fn to_request_message(message: &Message) -> std::result::Result<ChatCompletionRequestMessage, ProviderError> {
    let malformed = |e: OpenAIError| ProviderError::new(FailureClass::MalformedRequest, e.to_string());
    let content = message.content.clone();
    Ok(match message.role {
        MessageRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()
            .map_err(malformed)?
            .into(),
        MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map_err(malformed)?
            .into(),
        MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()
            .map_err(malformed)?
            .into(),
    })
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self, payload), fields(model = %self.descriptor.id()))]
    async fn invoke(&self, payload: &PromptPayload) -> std::result::Result<ModelResponse, ProviderError> {
        let request = self.build_request(payload, false)?;
        let response = self.client.chat().create(request).await.map_err(classify_error)?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| ProviderError::new(FailureClass::Other, "Empty response from model"))?
            .clone();

        debug!("Received {} chars from {}", text.len(), self.descriptor.id());
        Ok(ModelResponse {
            text,
            model: self.descriptor.id(),
        })
    }

    #[instrument(skip(self, payload), fields(model = %self.descriptor.id()))]
    async fn invoke_streaming(&self, payload: &PromptPayload) -> std::result::Result<ChunkStream, ProviderError> {
        let request = self.build_request(payload, true)?;
        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(classify_error)?;

        let chunks = stream
            .map_err(classify_error)
            .map_ok(|response| ResponseChunk {
                text: response
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.clone())
                    .unwrap_or_default(),
            })
            .try_filter(|chunk| future::ready(!chunk.text.is_empty()));

        Ok(Box::pin(chunks))
    }
}

/// Map a client error onto a failure class.
fn classify_error(err: OpenAIError) -> ProviderError {
    let message = err.to_string();
    let class = match &err {
        OpenAIError::Reqwest(e) if e.is_timeout() => FailureClass::Timeout,
        OpenAIError::Reqwest(e) if e.is_connect() => FailureClass::Network,
        OpenAIError::Reqwest(e) => match e.status() {
            Some(status) => classify_status(status.as_u16()),
            None => classify_message(&message),
        },
        OpenAIError::InvalidArgument(_) => FailureClass::MalformedRequest,
        _ => classify_message(&message),
    };
    ProviderError::new(class, message)
}

fn classify_status(status: u16) -> FailureClass {
    match status {
        408 => FailureClass::Timeout,
        429 => FailureClass::RateLimited,
        401 | 403 => FailureClass::Authentication,
        400 | 404 | 413 | 422 => FailureClass::MalformedRequest,
        500..=599 => FailureClass::Server,
        _ => FailureClass::Other,
    }
}

/// Classify from the error text when no status code is available.
fn classify_message(message: &str) -> FailureClass {
    let lower = message.to_lowercase();

    // Quota exhaustion reports as 429 but does not recover by waiting
    if lower.contains("insufficient_quota") || lower.contains("billing") {
        return FailureClass::Other;
    }
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
        return FailureClass::RateLimited;
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return FailureClass::Timeout;
    }
    if lower.contains("server_error")
        || lower.contains("overloaded")
        || lower.contains("internal server error")
        || lower.contains("service unavailable")
        || lower.contains("bad gateway")
    {
        return FailureClass::Server;
    }
    if lower.contains("invalid_api_key")
        || lower.contains("unauthorized")
        || lower.contains("authentication")
        || lower.contains("permission")
    {
        return FailureClass::Authentication;
    }
    if lower.contains("invalid_request") || lower.contains("context_length") {
        return FailureClass::MalformedRequest;
    }
    if lower.contains("connection") || lower.contains("network") || lower.contains("reset by peer") {
        return FailureClass::Network;
    }
    FailureClass::Other
}

/// Builds [`OpenAiProvider`]s from the configured provider endpoints.
pub struct OpenAiProviderFactory {
    providers: BTreeMap<String, ProviderSettings>,
}

impl OpenAiProviderFactory {
    pub fn new(providers: BTreeMap<String, ProviderSettings>) -> Self {
        Self { providers }
    }
}

impl ProviderFactory for OpenAiProviderFactory {
    fn build(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn ModelProvider>> {
        let settings = self.providers.get(&descriptor.provider).ok_or_else(|| {
            NotebookError::Config(format!("unknown provider '{}'", descriptor.provider))
        })?;
        Ok(Arc::new(OpenAiProvider::new(descriptor.clone(), settings)?))
    }
}
