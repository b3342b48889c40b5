//! Bounded grounding context built from notebook knowledge.
//!
//! The [`ContextAssembler`] selects excerpts from a notebook's knowledge items under a
//! character budget. The resulting [`ContextBundle`] is built fresh for each request and
//! never persisted outside of a conversation checkpoint.

mod assembler;

pub use assembler::ContextAssembler;

use crate::knowledge::KnowledgeKind;
use serde::{Deserialize, Serialize};

/// Which knowledge kinds are eligible for the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Insights, notes and raw sources.
    #[default]
    FullText,
    /// Derived material only: insights and notes.
    SummaryOnly,
    /// Extracted insights only.
    InsightsOnly,
}

impl SelectionMode {
    pub fn includes(self, kind: KnowledgeKind) -> bool {
        match self {
            SelectionMode::FullText => true,
            SelectionMode::SummaryOnly => kind != KnowledgeKind::Source,
            SelectionMode::InsightsOnly => kind == KnowledgeKind::Insight,
        }
    }
}

impl std::str::FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "full_text" | "full" => Ok(SelectionMode::FullText),
            "summary_only" | "summary" => Ok(SelectionMode::SummaryOnly),
            "insights_only" | "insights" => Ok(SelectionMode::InsightsOnly),
            _ => Err(format!("Unknown selection mode: {}", s)),
        }
    }
}

/// Context selection options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub mode: SelectionMode,
    /// Maximum number of excerpts.
    pub max_items: usize,
    /// Total character budget across all excerpts.
    pub max_chars: usize,
    /// Longest excerpt taken from a single item.
    pub excerpt_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            mode: SelectionMode::FullText,
            max_items: 20,
            max_chars: 12_000,
            excerpt_chars: 2_000,
        }
    }
}

/// Excerpt of one knowledge item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Excerpt {
    /// Identifier of the knowledge item this text was taken from.
    pub item_id: String,
    pub kind: KnowledgeKind,
    pub title: Option<String>,
    pub text: String,
    /// Whether `text` was cut short of the item's full content.
    pub truncated: bool,
}

impl Excerpt {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Ordered excerpts selected for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub notebook_id: String,
    pub config: ContextConfig,
    pub excerpts: Vec<Excerpt>,
    /// Characters consumed by `excerpts`.
    pub used_chars: usize,
}

impl ContextBundle {
    pub fn empty(notebook_id: impl Into<String>, config: ContextConfig) -> Self {
        Self {
            notebook_id: notebook_id.into(),
            config,
            excerpts: Vec::new(),
            used_chars: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.excerpts.is_empty()
    }

    pub fn budget_chars(&self) -> usize {
        self.config.max_chars
    }

    /// Whether this bundle was built for a different notebook or configuration.
    pub fn is_stale(&self, notebook_id: &str, config: &ContextConfig) -> bool {
        self.notebook_id != notebook_id || &self.config != config
    }
}

/// Format a bundle for inclusion in a prompt.
pub fn format_context_for_prompt(bundle: &ContextBundle) -> String {
    bundle
        .excerpts
        .iter()
        .map(|excerpt| {
            let title = excerpt
                .title
                .as_ref()
                .map(|t| format!(" {}", t))
                .unwrap_or_default();
            let marker = if excerpt.truncated { "\n[...]" } else { "" };
            format!(
                "---\n[{}:{}]{}\n{}{}\n---",
                excerpt.kind, excerpt.item_id, title, excerpt.text, marker
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
