//! Role-based routing with retry, fallback and rate limiting.

use super::provider::{FailureClass, ModelProvider, ProviderError, ProviderFactory};
use super::rate_limit::TokenBucket;
use super::retry::RetryPolicy;
use super::{ModelDescriptor, ModelResponse, PromptPayload, ResponseChunk, RoutingTable};
use crate::config::Settings;
use crate::error::{NotebookError, Result};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// Streamed response as seen by callers of the manager.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseChunk>> + Send>>;

/// Per-call limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Abandon the call, without further retries or candidates, once this passes.
    pub deadline: Option<Instant>,
    /// Longest wait for rate-limit capacity on one candidate.
    pub acquire_timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            deadline: None,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl CallOptions {
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now. A zero timeout, or one too large to represent,
    /// means no deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            return self;
        }
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Rate-limit wait for this attempt and whether the deadline is what bounds it.
    fn acquire_window(&self) -> (Duration, bool) {
        match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining <= self.acquire_timeout {
                    (remaining, true)
                } else {
                    (self.acquire_timeout, false)
                }
            }
            None => (self.acquire_timeout, false),
        }
    }
}

/// Why one routing candidate was given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    /// Descriptor id.
    pub model: String,
    pub attempts: u32,
    pub class: FailureClass,
    pub message: String,
}

impl std::fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} after {} attempt{}): {}",
            self.model,
            self.class,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.message
        )
    }
}

#[derive(Clone)]
struct Candidate {
    descriptor: ModelDescriptor,
    provider: Arc<dyn ModelProvider>,
    bucket: Option<Arc<TokenBucket>>,
}

/// Routes generation requests to providers.
pub struct ModelManager {
    routes: HashMap<String, Vec<Candidate>>,
    /// Every candidate known by descriptor id, for override lookups.
    known: HashMap<String, Candidate>,
    overrides: Mutex<HashMap<String, Candidate>>,
    factory: Arc<dyn ProviderFactory>,
    retry: RetryPolicy,
}

impl ModelManager {
    /// Build the routing table. Candidates of each role are ordered by priority.
    pub fn new(
        routing: &RoutingTable,
        factory: Arc<dyn ProviderFactory>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let mut known: HashMap<String, Candidate> = HashMap::new();
        let mut routes = HashMap::new();

        for (role, descriptors) in routing {
            let mut ordered = descriptors.clone();
            ordered.sort_by_key(|d| d.priority);

            let mut candidates = Vec::with_capacity(ordered.len());
            for descriptor in ordered {
                let id = descriptor.id();
                let candidate = match known.get(&id) {
                    Some(existing) => Candidate {
                        descriptor,
                        ..existing.clone()
                    },
                    None => {
                        let candidate = build_candidate(factory.as_ref(), descriptor)?;
                        known.insert(id, candidate.clone());
                        candidate
                    }
                };
                candidates.push(candidate);
            }
            routes.insert(role.clone(), candidates);
        }

        info!(
            "Model routing ready: {} roles, {} models",
            routes.len(),
            known.len()
        );

        Ok(Self {
            routes,
            known,
            overrides: Mutex::new(HashMap::new()),
            factory,
            retry,
        })
    }

    /// Build from application settings, using OpenAI-compatible providers.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let factory = Arc::new(super::OpenAiProviderFactory::new(settings.providers.clone()));
        Self::new(&settings.routing, factory, settings.retry.policy())
    }

    /// Roles with at least one candidate.
    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        roles.sort_unstable();
        roles
    }

    /// Candidate descriptor ids for a role, in the order they are tried.
    pub fn candidates_for(&self, role: &str) -> Vec<String> {
        self.routes
            .get(role)
            .map(|c| c.iter().map(|c| c.descriptor.id()).collect())
            .unwrap_or_default()
    }

    fn resolve(&self, role: &str, override_model: Option<&ModelDescriptor>) -> Result<Vec<Candidate>> {
        if let Some(descriptor) = override_model {
            let id = descriptor.id();
            if let Some(candidate) = self.known.get(&id) {
                return Ok(vec![candidate.clone()]);
            }
            let mut overrides = self.overrides.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(candidate) = overrides.get(&id) {
                return Ok(vec![candidate.clone()]);
            }
            let candidate = build_candidate(self.factory.as_ref(), descriptor.clone())?;
            overrides.insert(id, candidate.clone());
            return Ok(vec![candidate]);
        }

        self.routes
            .get(role)
            .cloned()
            .ok_or_else(|| NotebookError::Config(format!("no models routed for role '{}'", role)))
    }

    /// Generate a complete response for `role`.
    ///
    /// Candidates are tried in order. Transient failures are retried on the same
    /// candidate per the retry policy; permanent failures move on immediately.
    #[instrument(skip(self, payload, override_model, options), fields(role = %role))]
    pub async fn invoke(
        &self,
        role: &str,
        payload: &PromptPayload,
        override_model: Option<&ModelDescriptor>,
        options: &CallOptions,
    ) -> Result<ModelResponse> {
        self.route(role, payload, override_model, options, |provider| async move {
            provider.invoke(payload).await
        })
        .await
    }

    /// Open a streamed response for `role`. Returns the serving model's id with the stream.
    ///
    /// Retry and fallback apply to opening the stream. Errors after the first chunk are
    /// surfaced as stream items and never restart the stream.
    #[instrument(skip(self, payload, override_model, options), fields(role = %role))]
    pub async fn invoke_streaming(
        &self,
        role: &str,
        payload: &PromptPayload,
        override_model: Option<&ModelDescriptor>,
        options: &CallOptions,
    ) -> Result<(String, ResponseStream)> {
        let (model, stream) = self
            .route(role, payload, override_model, options, |provider| async move {
                let model = provider.descriptor().id();
                provider.invoke_streaming(payload).await.map(|s| (model, s))
            })
            .await?;

        let role = role.to_string();
        let served_by = model.clone();
        let chunks = stream.map(move |item| {
            item.map_err(|e| NotebookError::ExternalService {
                role: role.clone(),
                failures: vec![CandidateFailure {
                    model: model.clone(),
                    attempts: 1,
                    class: e.class,
                    message: format!("stream interrupted: {}", e.message),
                }],
            })
        });
        Ok((served_by, Box::pin(chunks)))
    }

    async fn route<T, F, Fut>(
        &self,
        role: &str,
        payload: &PromptPayload,
        override_model: Option<&ModelDescriptor>,
        options: &CallOptions,
        call: F,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn ModelProvider>) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let candidates = self.resolve(role, override_model)?;
        let required = payload.required_capability();
        let mut failures = Vec::new();

        for (idx, candidate) in candidates.iter().enumerate() {
            let id = candidate.descriptor.id();

            if let Some(capability) = required {
                if !candidate.descriptor.supports(capability) {
                    info!("skipping {} for role {}: lacks {:?}", id, role, capability);
                    failures.push(CandidateFailure {
                        model: id,
                        attempts: 0,
                        class: FailureClass::Unsupported,
                        message: format!("missing capability {:?}", capability),
                    });
                    continue;
                }
            }

            match self.attempt(role, candidate, options, &call).await? {
                Ok(value) => {
                    if idx > 0 {
                        info!(
                            "fallback_triggered=true, role={}, from={}, to={}, attempt={}",
                            role,
                            candidates[0].descriptor.id(),
                            id,
                            idx + 1
                        );
                    }
                    return Ok(value);
                }
                Err(failure) => {
                    warn!(
                        "model {} failed for role {} (class={}, attempts={}): {}",
                        failure.model, role, failure.class, failure.attempts, failure.message
                    );
                    failures.push(failure);
                }
            }
        }

        Err(NotebookError::ExternalService {
            role: role.to_string(),
            failures,
        })
    }

    /// Run one candidate under the retry policy.
    ///
    /// The outer error is a deadline cancellation that aborts routing; the inner one is
    /// a candidate failure that lets routing continue.
    async fn attempt<T, F, Fut>(
        &self,
        role: &str,
        candidate: &Candidate,
        options: &CallOptions,
        call: &F,
    ) -> Result<std::result::Result<T, CandidateFailure>>
    where
        F: Fn(Arc<dyn ModelProvider>) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let id = candidate.descriptor.id();
        let cancelled = || NotebookError::Cancelled {
            stage: format!("{} via {}", role, id),
        };
        let mut attempts = 0;

        loop {
            if options.is_expired() {
                return Err(cancelled());
            }
            attempts += 1;

            if let Some(bucket) = &candidate.bucket {
                let (window, deadline_bound) = options.acquire_window();
                if let Err(e) = bucket.acquire(window).await {
                    if deadline_bound {
                        return Err(cancelled());
                    }
                    return Ok(Err(CandidateFailure {
                        model: id.clone(),
                        attempts,
                        class: FailureClass::RateLimited,
                        message: e.to_string(),
                    }));
                }
            }

            let outcome = match options.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, call(candidate.provider.clone())).await {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(cancelled()),
                },
                None => call(candidate.provider.clone()).await,
            };

            match outcome {
                Ok(value) => return Ok(Ok(value)),
                Err(e) if e.class.is_transient() && attempts < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempts);
                    if options
                        .deadline
                        .is_some_and(|d| Instant::now().checked_add(delay).map_or(true, |at| at >= d))
                    {
                        return Err(cancelled());
                    }
                    warn!(
                        "model {} transient error (attempt {}/{}), backing off {:?}: {}",
                        id, attempts, self.retry.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Ok(Err(CandidateFailure {
                        model: id.clone(),
                        attempts,
                        class: e.class,
                        message: e.message,
                    }))
                }
            }
        }
    }
}

fn build_candidate(factory: &dyn ProviderFactory, descriptor: ModelDescriptor) -> Result<Candidate> {
    let provider = factory.build(&descriptor)?;
    let bucket = descriptor
        .rate_limit
        .as_ref()
        .map(|limit| Arc::new(TokenBucket::new(limit)));
    Ok(Candidate {
        descriptor,
        provider,
        bucket,
    })
}
