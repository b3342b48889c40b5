//! Storage backends for knowledge, checkpoints and episodes.
//!
//! Both backends implement [`KnowledgeStore`](crate::knowledge::KnowledgeStore),
//! [`CheckpointStore`](crate::conversation::CheckpointStore) and
//! [`EpisodeStore`](crate::podcast::EpisodeStore).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
