//! In-memory store.
//!
//! Useful for testing and for embedding the generation core in another process.

use crate::conversation::CheckpointStore;
use crate::error::{NotebookError, Result};
use crate::knowledge::{assembly_order, KnowledgeItem, KnowledgeStore, Notebook};
use crate::podcast::{EpisodeStore, PodcastEpisode};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    notebooks: HashMap<String, Notebook>,
    items: HashMap<String, KnowledgeItem>,
    checkpoints: HashMap<String, String>,
    episodes: HashMap<String, PodcastEpisode>,
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add or replace a notebook.
    pub fn insert_notebook(&self, notebook: Notebook) {
        self.write().notebooks.insert(notebook.id.clone(), notebook);
    }

    /// Add or replace a knowledge item.
    pub fn insert_item(&self, item: KnowledgeItem) {
        self.write().items.insert(item.id.clone(), item);
    }

    /// Set the archival flag of an item. Returns false if the item is unknown.
    pub fn archive_item(&self, item_id: &str, archived: bool) -> bool {
        match self.write().items.get_mut(item_id) {
            Some(item) => {
                item.archived = archived;
                true
            }
            None => false,
        }
    }

    pub fn episode_count(&self) -> usize {
        self.read().episodes.len()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn get_notebook(&self, notebook_id: &str) -> Result<Notebook> {
        self.read()
            .notebooks
            .get(notebook_id)
            .cloned()
            .ok_or_else(|| NotebookError::NotFound(format!("notebook {}", notebook_id)))
    }

    async fn list_items(&self, notebook_id: &str, include_archived: bool) -> Result<Vec<KnowledgeItem>> {
        let tables = self.read();
        if !tables.notebooks.contains_key(notebook_id) {
            return Err(NotebookError::NotFound(format!("notebook {}", notebook_id)));
        }

        let mut items: Vec<KnowledgeItem> = tables
            .items
            .values()
            .filter(|i| i.notebook_id == notebook_id && (include_archived || !i.archived))
            .cloned()
            .collect();
        items.sort_by(assembly_order);
        Ok(items)
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn put(&self, thread_id: &str, state_blob: &str) -> Result<()> {
        self.write()
            .checkpoints
            .insert(thread_id.to_string(), state_blob.to_string());
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<String>> {
        Ok(self.read().checkpoints.get(thread_id).cloned())
    }
}

#[async_trait]
impl EpisodeStore for MemoryStore {
    async fn save_episode(&self, episode: &PodcastEpisode) -> Result<()> {
        self.write()
            .episodes
            .insert(episode.id.clone(), episode.clone());
        Ok(())
    }

    async fn get_episode(&self, episode_id: &str) -> Result<Option<PodcastEpisode>> {
        Ok(self.read().episodes.get(episode_id).cloned())
    }
}
