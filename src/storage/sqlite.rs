//! SQLite-backed store.
//!
//! Notebooks and knowledge items are written by the surrounding application; this store
//! reads them, and owns the checkpoint and episode tables.

use crate::conversation::CheckpointStore;
use crate::error::{NotebookError, Result};
use crate::knowledge::{assembly_order, KnowledgeItem, KnowledgeKind, KnowledgeStore, Notebook};
use crate::podcast::{EpisodeStore, PodcastEpisode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS notebooks (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        archived INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS knowledge_items (
        id TEXT PRIMARY KEY,
        notebook_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        title TEXT,
        content TEXT NOT NULL,
        archived INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_knowledge_items_notebook ON knowledge_items(notebook_id);

    CREATE TABLE IF NOT EXISTS checkpoints (
        thread_id TEXT PRIMARY KEY,
        state_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS episodes (
        id TEXT PRIMARY KEY,
        notebook_id TEXT NOT NULL,
        status TEXT NOT NULL,
        episode_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_episodes_notebook ON episodes(notebook_id);
"#;

/// SQLite-based store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| NotebookError::Database(format!("Failed to acquire lock: {}", e)))
    }

    /// Add or replace a notebook.
    pub fn insert_notebook(&self, notebook: &Notebook) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT OR REPLACE INTO notebooks (id, name, description, archived, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                notebook.id,
                notebook.name,
                notebook.description,
                notebook.archived,
                notebook.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Add or replace a knowledge item.
    pub fn insert_item(&self, item: &KnowledgeItem) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT OR REPLACE INTO knowledge_items
            (id, notebook_id, kind, title, content, archived, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                item.id,
                item.notebook_id,
                item.kind.as_str(),
                item.title,
                item.content,
                item.archived,
                item.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Notebooks, newest first.
    pub fn list_notebooks(&self, include_archived: bool) -> Result<Vec<Notebook>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, description, archived, created_at
            FROM notebooks
            WHERE archived = 0 OR ?1
            ORDER BY created_at DESC, id
            "#,
        )?;

        let rows = stmt.query_map(params![include_archived], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut notebooks = Vec::new();
        for row in rows {
            let (id, name, description, archived, created_at) = row?;
            notebooks.push(Notebook {
                id,
                name,
                description,
                archived,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(notebooks)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| NotebookError::Database(format!("Invalid timestamp '{}': {}", value, e)))
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    #[instrument(skip(self))]
    async fn get_notebook(&self, notebook_id: &str) -> Result<Notebook> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, description, archived, created_at FROM notebooks WHERE id = ?1",
                params![notebook_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let (id, name, description, archived, created_at) =
            row.ok_or_else(|| NotebookError::NotFound(format!("notebook {}", notebook_id)))?;

        Ok(Notebook {
            id,
            name,
            description,
            archived,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    #[instrument(skip(self))]
    async fn list_items(&self, notebook_id: &str, include_archived: bool) -> Result<Vec<KnowledgeItem>> {
        let conn = self.conn()?;

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM notebooks WHERE id = ?1)",
            params![notebook_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(NotebookError::NotFound(format!("notebook {}", notebook_id)));
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT id, notebook_id, kind, title, content, archived, created_at
            FROM knowledge_items
            WHERE notebook_id = ?1 AND (archived = 0 OR ?2)
            "#,
        )?;

        let rows = stmt.query_map(params![notebook_id, include_archived], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, notebook_id, kind, title, content, archived, created_at) = row?;
            let kind: KnowledgeKind = kind.parse().map_err(NotebookError::Database)?;
            items.push(KnowledgeItem {
                id,
                notebook_id,
                kind,
                title,
                content,
                archived,
                created_at: parse_timestamp(&created_at)?,
            });
        }

        // Timestamps sort correctly only as parsed values
        items.sort_by(assembly_order);
        debug!("Loaded {} items for notebook {}", items.len(), notebook_id);
        Ok(items)
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    #[instrument(skip(self, state_blob))]
    async fn put(&self, thread_id: &str, state_blob: &str) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO checkpoints (thread_id, state_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(thread_id) DO UPDATE SET state_json = ?2, updated_at = ?3
            "#,
            params![thread_id, state_blob, Utc::now().to_rfc3339()],
        )?;
        debug!("Stored checkpoint for thread {}", thread_id);
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<String>> {
        let blob = self
            .conn()?
            .query_row(
                "SELECT state_json FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob)
    }
}

#[async_trait]
impl EpisodeStore for SqliteStore {
    #[instrument(skip(self, episode), fields(episode_id = %episode.id, status = %episode.status))]
    async fn save_episode(&self, episode: &PodcastEpisode) -> Result<()> {
        let json = serde_json::to_string(episode)?;
        self.conn()?.execute(
            r#"
            INSERT OR REPLACE INTO episodes (id, notebook_id, status, episode_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                episode.id,
                episode.notebook_id,
                episode.status.as_str(),
                json,
                episode.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_episode(&self, episode_id: &str) -> Result<Option<PodcastEpisode>> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT episode_json FROM episodes WHERE id = ?1",
                params![episode_id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| {
            serde_json::from_str(&j).map_err(|e| {
                NotebookError::Database(format!("Corrupt episode {}: {}", episode_id, e))
            })
        })
        .transpose()
    }
}
