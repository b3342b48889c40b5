//! Turn-taking over a thread: context, generation, write-ahead checkpoint.

use super::checkpoint::{CheckpointStore, CheckpointToken};
use super::thread::ThreadState;
use super::TurnPhase;
use crate::config::{ChatSettings, Prompts, ROLE_CHAT};
use crate::context::{format_context_for_prompt, ContextAssembler, ContextConfig};
use crate::error::{NotebookError, Result};
use crate::knowledge::KnowledgeStore;
use crate::model::{CallOptions, Message, ModelDescriptor, ModelManager, ModelResponse, PromptPayload};
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Drives conversation turns. One turn may be in flight per thread.
pub struct ConversationOrchestrator {
    knowledge: Arc<dyn KnowledgeStore>,
    assembler: ContextAssembler,
    models: Arc<ModelManager>,
    checkpoints: Arc<dyn CheckpointStore>,
    prompts: Prompts,
    settings: ChatSettings,
    turns: Mutex<HashMap<String, TurnPhase>>,
}

/// The part of a stored checkpoint needed to detect stale writers.
#[derive(Deserialize)]
struct StoredCheckpoint {
    checkpoint: Option<CheckpointToken>,
}

/// Marks a thread busy for the duration of one turn.
struct TurnGuard<'a> {
    turns: &'a Mutex<HashMap<String, TurnPhase>>,
    thread_id: String,
}

impl TurnGuard<'_> {
    fn set(&self, phase: TurnPhase) {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        turns.insert(self.thread_id.clone(), phase);
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        turns.remove(&self.thread_id);
    }
}

impl ConversationOrchestrator {
    pub fn new(
        knowledge: Arc<dyn KnowledgeStore>,
        models: Arc<ModelManager>,
        checkpoints: Arc<dyn CheckpointStore>,
        prompts: Prompts,
        settings: ChatSettings,
    ) -> Self {
        Self {
            assembler: ContextAssembler::new(knowledge.clone()),
            knowledge,
            models,
            checkpoints,
            prompts,
            settings,
            turns: Mutex::new(HashMap::new()),
        }
    }

    /// Call limits from the chat settings.
    pub fn default_call_options(&self) -> CallOptions {
        CallOptions::default()
            .with_acquire_timeout(Duration::from_secs(self.settings.acquire_timeout_secs))
            .with_timeout(Duration::from_secs(self.settings.turn_deadline_secs))
    }

    /// Open a new, empty thread on a notebook.
    #[instrument(skip(self, context_config, model_override))]
    pub async fn start_thread(
        &self,
        notebook_id: &str,
        context_config: ContextConfig,
        model_override: Option<ModelDescriptor>,
    ) -> Result<ThreadState> {
        let notebook = self.knowledge.get_notebook(notebook_id).await?;
        if notebook.archived {
            return Err(NotebookError::NotFound(format!("notebook {} is archived", notebook_id)));
        }

        let state = ThreadState {
            thread_id: Uuid::new_v4().to_string(),
            notebook_id: notebook.id,
            notebook_name: notebook.name,
            messages: Vec::new(),
            context: None,
            context_config,
            model_override,
            checkpoint: None,
        };
        debug!("Started thread {}", state.thread_id);
        Ok(state)
    }

    /// Load a thread from its last checkpoint.
    #[instrument(skip(self))]
    pub async fn resume(&self, thread_id: &str) -> Result<ThreadState> {
        let blob = self
            .checkpoints
            .get(thread_id)
            .await?
            .ok_or_else(|| NotebookError::NotFound(format!("thread {}", thread_id)))?;

        let state: ThreadState = serde_json::from_str(&blob).map_err(|e| {
            NotebookError::Database(format!("corrupt checkpoint for thread {}: {}", thread_id, e))
        })?;

        match &state.checkpoint {
            Some(token) if token.matches(&state.messages) => {
                info!("Resumed thread {} at {} messages", thread_id, state.messages.len());
                Ok(state)
            }
            _ => Err(NotebookError::Database(format!(
                "checkpoint for thread {} does not match its stored history",
                thread_id
            ))),
        }
    }

    /// Current phase of a thread. `Idle` when no turn is in flight.
    pub fn phase(&self, thread_id: &str) -> TurnPhase {
        let turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        turns.get(thread_id).copied().unwrap_or(TurnPhase::Idle)
    }

    /// Run one turn: append `message`, generate the answer and checkpoint the result.
    ///
    /// `state` is never modified. On failure the caller's state, and the stored checkpoint,
    /// are still the last committed ones.
    #[instrument(skip(self, state, message, options), fields(thread_id = %state.thread_id))]
    pub async fn advance(
        &self,
        state: &ThreadState,
        message: &str,
        options: &CallOptions,
    ) -> Result<(ThreadState, ModelResponse)> {
        let guard = self.begin_turn(&state.thread_id)?;

        let result = async {
            let (mut next, payload) = self.prepare(&guard, state, message).await?;
            guard.set(TurnPhase::Generating);
            let response = self
                .models
                .invoke(ROLE_CHAT, &payload, next.model_override.as_ref(), options)
                .await?;
            self.commit(&mut next, &response).await?;
            Ok::<_, NotebookError>((next, response))
        }
        .await;

        self.finish(&guard, result)
    }

    /// Like [`advance`](Self::advance), forwarding each chunk of the answer as it arrives.
    ///
    /// The turn commits only once the stream has ended; an interrupted stream fails the
    /// turn and nothing is recorded.
    #[instrument(skip(self, state, message, options, on_chunk), fields(thread_id = %state.thread_id))]
    pub async fn advance_streaming<F>(
        &self,
        state: &ThreadState,
        message: &str,
        options: &CallOptions,
        mut on_chunk: F,
    ) -> Result<(ThreadState, ModelResponse)>
    where
        F: FnMut(&str) + Send,
    {
        let guard = self.begin_turn(&state.thread_id)?;

        let result = async {
            let (mut next, payload) = self.prepare(&guard, state, message).await?;
            guard.set(TurnPhase::Generating);
            let (model, mut stream) = self
                .models
                .invoke_streaming(ROLE_CHAT, &payload, next.model_override.as_ref(), options)
                .await?;

            let mut text = String::new();
            loop {
                let item = match options.deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, stream.next())
                        .await
                        .map_err(|_| NotebookError::Cancelled {
                            stage: format!("{} streaming via {}", ROLE_CHAT, model),
                        })?,
                    None => stream.next().await,
                };
                match item {
                    Some(chunk) => {
                        let chunk = chunk?;
                        on_chunk(&chunk.text);
                        text.push_str(&chunk.text);
                    }
                    None => break,
                }
            }

            let response = ModelResponse { text, model };
            self.commit(&mut next, &response).await?;
            Ok::<_, NotebookError>((next, response))
        }
        .await;

        self.finish(&guard, result)
    }

    fn begin_turn(&self, thread_id: &str) -> Result<TurnGuard<'_>> {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        if turns.contains_key(thread_id) {
            return Err(NotebookError::Conflict(thread_id.to_string()));
        }
        turns.insert(thread_id.to_string(), TurnPhase::AssemblingContext);
        Ok(TurnGuard {
            turns: &self.turns,
            thread_id: thread_id.to_string(),
        })
    }

    /// Append the user message, refresh context if needed and build the payload.
    async fn prepare(
        &self,
        guard: &TurnGuard<'_>,
        state: &ThreadState,
        message: &str,
    ) -> Result<(ThreadState, PromptPayload)> {
        if message.trim().is_empty() {
            return Err(NotebookError::InvalidInput("message is empty".to_string()));
        }

        self.ensure_current(state).await?;

        let mut next = state.clone();
        next.messages.push(Message::user(message));

        guard.set(TurnPhase::AssemblingContext);
        if next.needs_context() {
            let bundle = self
                .assembler
                .assemble(&next.notebook_id, &next.context_config)
                .await?;
            next.context = Some(bundle);
        }

        let payload = self.build_payload(&next);
        Ok((next, payload))
    }

    fn build_payload(&self, state: &ThreadState) -> PromptPayload {
        let mut vars = HashMap::new();
        vars.insert("notebook".to_string(), state.notebook_name.clone());
        let mut system = self.prompts.render_with_custom(&self.prompts.chat.system, &vars);

        if let Some(bundle) = state.context.as_ref().filter(|b| !b.is_empty()) {
            vars.insert("context".to_string(), format_context_for_prompt(bundle));
            system.push_str("\n\n");
            system.push_str(&self.prompts.render_with_custom(&self.prompts.chat.context, &vars));
        }

        let mut messages = Vec::with_capacity(state.messages.len() + 1);
        messages.push(Message::system(system));
        messages.extend(state.messages.iter().cloned());

        PromptPayload::new(messages).with_temperature(self.settings.temperature)
    }

    /// Reject a state whose checkpoint is not the one currently stored for its thread.
    async fn ensure_current(&self, state: &ThreadState) -> Result<()> {
        let stored = match self.checkpoints.get(&state.thread_id).await? {
            Some(blob) => {
                serde_json::from_str::<StoredCheckpoint>(&blob)
                    .map_err(|e| {
                        NotebookError::Database(format!(
                            "corrupt checkpoint for thread {}: {}",
                            state.thread_id, e
                        ))
                    })?
                    .checkpoint
            }
            None => None,
        };

        if stored != state.checkpoint {
            warn!(
                "Thread {} moved on to {} since this state was loaded",
                state.thread_id,
                stored.as_ref().map_or("nothing", |t| t.as_str())
            );
            return Err(NotebookError::StaleThread(state.thread_id.clone()));
        }
        Ok(())
    }

    /// Append the answer, issue a new token and persist before the caller sees the answer.
    async fn commit(&self, next: &mut ThreadState, response: &ModelResponse) -> Result<()> {
        self.ensure_current(next).await?;
        next.messages.push(Message::assistant(response.text.clone()));
        next.checkpoint = Some(CheckpointToken::compute(&next.messages));

        let blob = serde_json::to_string(&*next)?;
        self.checkpoints.put(&next.thread_id, &blob).await
    }

    fn finish<T>(&self, guard: &TurnGuard<'_>, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                guard.set(TurnPhase::Committed);
                info!("Committed turn on thread {}", guard.thread_id);
            }
            Err(e) => {
                guard.set(TurnPhase::Failed);
                warn!(
                    "Turn on thread {} failed, committed history kept: {}",
                    guard.thread_id, e
                );
            }
        }
        result
    }
}
