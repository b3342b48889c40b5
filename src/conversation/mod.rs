//! Grounded conversation threads.
//!
//! A thread moves through `Idle → AssemblingContext → Generating → Committed` for each
//! turn, or ends the turn in `Failed` leaving the previously committed history untouched.
//! Every committed turn is checkpointed before the answer is returned, so a thread can be
//! resumed with exactly the history the caller last saw.

mod checkpoint;
mod orchestrator;
mod thread;

pub use checkpoint::{CheckpointStore, CheckpointToken};
pub use orchestrator::ConversationOrchestrator;
pub use thread::ThreadState;

pub use crate::model::{Message, MessageRole};

use serde::{Deserialize, Serialize};

/// Where a thread is in its current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    AssemblingContext,
    Generating,
    Committed,
    Failed,
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnPhase::Idle => "idle",
            TurnPhase::AssemblingContext => "assembling_context",
            TurnPhase::Generating => "generating",
            TurnPhase::Committed => "committed",
            TurnPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}
