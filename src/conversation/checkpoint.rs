//! Checkpoint tokens and the checkpoint store contract.

use crate::error::Result;
use crate::model::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Durable storage for serialized thread state.
///
/// Writes must survive a process restart before `put` returns.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, thread_id: &str, state_blob: &str) -> Result<()>;

    async fn get(&self, thread_id: &str) -> Result<Option<String>>;
}

/// Fingerprint of a thread's message history: `<message count>-<sha256 of the messages>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointToken(String);

impl CheckpointToken {
    pub fn compute(messages: &[Message]) -> Self {
        let mut hasher = Sha256::new();
        for message in messages {
            // Role and content are length-prefixed so boundaries cannot shift between messages
            let role = message.role.as_str();
            hasher.update((role.len() as u64).to_le_bytes());
            hasher.update(role.as_bytes());
            hasher.update((message.content.len() as u64).to_le_bytes());
            hasher.update(message.content.as_bytes());
        }
        Self(format!("{}-{}", messages.len(), hex::encode(hasher.finalize())))
    }

    /// Whether this token was issued for exactly this history.
    pub fn matches(&self, messages: &[Message]) -> bool {
        *self == Self::compute(messages)
    }

    /// Number of messages covered by the token.
    pub fn message_count(&self) -> Option<usize> {
        self.0.split_once('-').and_then(|(n, _)| n.parse().ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckpointToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<Message> {
        vec![Message::user("What is in here?"), Message::assistant("Three sources.")]
    }

    #[test]
    fn test_token_is_deterministic() {
        let a = CheckpointToken::compute(&history());
        let b = CheckpointToken::compute(&history());
        assert_eq!(a, b);
        assert_eq!(a.message_count(), Some(2));
        assert!(a.as_str().starts_with("2-"));
    }

    #[test]
    fn test_token_detects_changes() {
        let token = CheckpointToken::compute(&history());

        let mut edited = history();
        edited[1].content.push('!');
        assert!(!token.matches(&edited));

        let mut truncated = history();
        truncated.pop();
        assert!(!token.matches(&truncated));

        assert!(token.matches(&history()));
    }

    #[test]
    fn test_token_distinguishes_message_boundaries() {
        let split = vec![Message::user("ab"), Message::user("c")];
        let joined = vec![Message::user("a"), Message::user("bc")];
        assert_ne!(CheckpointToken::compute(&split), CheckpointToken::compute(&joined));
    }
}
