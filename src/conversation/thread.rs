use super::checkpoint::CheckpointToken;
use crate::context::{ContextBundle, ContextConfig};
use crate::model::{Message, ModelDescriptor};
use serde::{Deserialize, Serialize};

/// State of one conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    pub thread_id: String,
    pub notebook_id: String,
    /// Display name of the notebook, used in the system prompt.
    pub notebook_name: String,
    /// Committed history: user and assistant messages only.
    pub messages: Vec<Message>,
    /// Context from the previous turn. Rebuilt after a resume.
    #[serde(skip)]
    pub context: Option<ContextBundle>,
    pub context_config: ContextConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<ModelDescriptor>,
    /// Issued when a turn commits.
    pub checkpoint: Option<CheckpointToken>,
}

impl ThreadState {
    /// Number of completed question/answer exchanges.
    pub fn turn_count(&self) -> usize {
        self.messages.len() / 2
    }

    /// Whether the cached context must be rebuilt before the next turn.
    pub fn needs_context(&self) -> bool {
        self.context
            .as_ref()
            .map_or(true, |bundle| bundle.is_stale(&self.notebook_id, &self.context_config))
    }

    pub fn last_answer(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::model::MessageRole::Assistant)
            .map(|m| m.content.as_str())
    }
}
