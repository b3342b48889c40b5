//! Scripted providers for exercising routing and the generation pipelines.

use super::provider::{ChunkStream, ModelProvider, ProviderError, ProviderFactory};
use super::{
    Capability, ModelDescriptor, ModelManager, ModelResponse, PromptPayload, RateLimit,
    ResponseChunk, RetryPolicy,
};
use crate::error::{NotebookError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Responder = Arc<dyn Fn(&PromptPayload, usize) -> std::result::Result<String, ProviderError> + Send + Sync>;
type Delay = Arc<dyn Fn(&PromptPayload) -> Duration + Send + Sync>;

/// Provider whose answers come from a closure. Clones share the call counter.
#[derive(Clone)]
pub struct FakeProvider {
    descriptor: ModelDescriptor,
    respond: Responder,
    delay: Delay,
    calls: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn with_fn<F>(id: &str, respond: F) -> Self
    where
        F: Fn(&PromptPayload, usize) -> std::result::Result<String, ProviderError> + Send + Sync + 'static,
    {
        let descriptor = ModelDescriptor::parse(id).expect("test descriptor");
        Self {
            descriptor,
            respond: Arc::new(respond),
            delay: Arc::new(|_| Duration::ZERO),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn replying(id: &str, text: &str) -> Self {
        let text = text.to_string();
        Self::with_fn(id, move |_, _| Ok(text.clone()))
    }

    /// Answers in order; the last outcome repeats once the script runs out.
    pub fn scripted(id: &str, outcomes: Vec<std::result::Result<String, ProviderError>>) -> Self {
        Self::with_fn(id, move |_, call| {
            outcomes[call.min(outcomes.len() - 1)].clone()
        })
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.descriptor.priority = priority;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.descriptor.capabilities = capabilities;
        self
    }

    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.descriptor.rate_limit = Some(limit);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_fn(move |_| delay)
    }

    pub fn with_delay_fn<F>(mut self, delay: F) -> Self
    where
        F: Fn(&PromptPayload) -> Duration + Send + Sync + 'static,
    {
        self.delay = Arc::new(delay);
        self
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, payload: &PromptPayload) -> std::result::Result<String, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = (self.delay)(payload);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.respond)(payload, call)
    }
}

#[async_trait]
impl ModelProvider for FakeProvider {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, payload: &PromptPayload) -> std::result::Result<ModelResponse, ProviderError> {
        Ok(ModelResponse {
            text: self.answer(payload).await?,
            model: self.descriptor.id(),
        })
    }

    async fn invoke_streaming(&self, payload: &PromptPayload) -> std::result::Result<ChunkStream, ProviderError> {
        let text = self.answer(payload).await?;
        let chunks: Vec<_> = text
            .split_inclusive(' ')
            .map(|piece| Ok(ResponseChunk { text: piece.to_string() }))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

pub struct FakeFactory {
    providers: HashMap<String, FakeProvider>,
}

impl FakeFactory {
    pub fn new(fakes: Vec<FakeProvider>) -> Self {
        Self {
            providers: fakes.into_iter().map(|f| (f.descriptor.id(), f)).collect(),
        }
    }
}

impl ProviderFactory for FakeFactory {
    fn build(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn ModelProvider>> {
        self.providers
            .get(&descriptor.id())
            .map(|p| Arc::new(p.clone()) as Arc<dyn ModelProvider>)
            .ok_or_else(|| NotebookError::Config(format!("unknown provider '{}'", descriptor.provider)))
    }
}

/// Manager routing each role to the given fakes.
pub fn manager_with(routes: Vec<(&str, Vec<FakeProvider>)>, retry: RetryPolicy) -> ModelManager {
    let mut routing = BTreeMap::new();
    let mut providers = HashMap::new();
    for (role, fakes) in routes {
        let descriptors = fakes.iter().map(|f| f.descriptor.clone()).collect();
        for fake in fakes {
            providers.insert(fake.descriptor.id(), fake);
        }
        routing.insert(role.to_string(), descriptors);
    }
    ModelManager::new(&routing, Arc::new(FakeFactory { providers }), retry).expect("test manager")
}
