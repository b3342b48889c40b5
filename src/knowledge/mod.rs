//! Read-only view of a notebook's accumulated knowledge.
//!
//! Sources, notes and source insights are all treated as [`KnowledgeItem`]s that differ
//! only by their [`KnowledgeKind`]. Persistence belongs to the surrounding application;
//! this module defines the contract the generation core reads through.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Semantic label of a knowledge item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeKind {
    /// Extracted insight derived from a source.
    Insight,
    /// Note written by the user or saved from a conversation.
    Note,
    /// Raw ingested source text.
    Source,
}

impl KnowledgeKind {
    /// Position in context assembly order. Denser material comes first.
    pub fn rank(self) -> u8 {
        match self {
            KnowledgeKind::Insight => 0,
            KnowledgeKind::Note => 1,
            KnowledgeKind::Source => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KnowledgeKind::Insight => "insight",
            KnowledgeKind::Note => "note",
            KnowledgeKind::Source => "source",
        }
    }
}

impl std::str::FromStr for KnowledgeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insight" | "source_insight" => Ok(KnowledgeKind::Insight),
            "note" => Ok(KnowledgeKind::Note),
            "source" => Ok(KnowledgeKind::Source),
            _ => Err(format!("Unknown knowledge kind: {}", s)),
        }
    }
}

impl std::fmt::Display for KnowledgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notebook: a named collection of knowledge items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub id: String,
    pub name: String,
    pub description: String,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Notebook {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            archived: false,
            created_at: Utc::now(),
        }
    }
}

/// A source, note or insight belonging to a notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub notebook_id: String,
    pub kind: KnowledgeKind,
    /// Display title, when the item has one.
    pub title: Option<String>,
    pub content: String,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeItem {
    pub fn new(
        id: impl Into<String>,
        notebook_id: impl Into<String>,
        kind: KnowledgeKind,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            notebook_id: notebook_id.into(),
            kind,
            title: None,
            content: content.into(),
            archived: false,
            created_at,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Assembly order: by kind rank, newest first within a kind, id as tie-breaker.
pub fn assembly_order(a: &KnowledgeItem, b: &KnowledgeItem) -> Ordering {
    a.kind
        .rank()
        .cmp(&b.kind.rank())
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Read access to notebooks and their knowledge items.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Fetch a notebook. Fails with `NotFound` for unknown identifiers.
    async fn get_notebook(&self, notebook_id: &str) -> Result<Notebook>;

    /// List a notebook's items in [`assembly_order`].
    async fn list_items(&self, notebook_id: &str, include_archived: bool)
        -> Result<Vec<KnowledgeItem>>;
}
