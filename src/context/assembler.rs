//! Greedy, budget-bounded excerpt selection.

use super::{ContextBundle, ContextConfig, Excerpt};
use crate::error::{NotebookError, Result};
use crate::knowledge::KnowledgeStore;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Builds context bundles from a knowledge store.
pub struct ContextAssembler {
    store: Arc<dyn KnowledgeStore>,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }

    /// Assemble a bundle for a notebook.
    ///
    /// Items are visited insights first, then notes, then sources, newest first within
    /// each kind. Each item contributes at most `excerpt_chars` characters and is cut
    /// rather than skipped when the remaining budget is smaller. Selection stops once
    /// `max_items` excerpts are taken or `max_chars` is used up.
    #[instrument(skip(self, config), fields(mode = ?config.mode, max_chars = config.max_chars))]
    pub async fn assemble(&self, notebook_id: &str, config: &ContextConfig) -> Result<ContextBundle> {
        let notebook = self.store.get_notebook(notebook_id).await?;
        if notebook.archived {
            return Err(NotebookError::NotFound(format!(
                "notebook {} is archived",
                notebook_id
            )));
        }

        let items = self.store.list_items(notebook_id, false).await?;
        let mut bundle = ContextBundle::empty(notebook_id, config.clone());

        for item in items.iter().filter(|i| config.mode.includes(i.kind)) {
            if bundle.excerpts.len() >= config.max_items {
                break;
            }
            let remaining = config.max_chars.saturating_sub(bundle.used_chars);
            if remaining == 0 {
                break;
            }

            let limit = config.excerpt_chars.min(remaining);
            let (text, truncated) = truncate_chars(item.content.trim(), limit);
            if text.is_empty() {
                continue;
            }

            bundle.used_chars += text.chars().count();
            bundle.excerpts.push(Excerpt {
                item_id: item.id.clone(),
                kind: item.kind,
                title: item.title.clone(),
                text,
                truncated,
            });
        }

        debug!(
            "Assembled {} excerpts ({} of {} chars) for notebook {}",
            bundle.excerpts.len(),
            bundle.used_chars,
            config.max_chars,
            notebook_id
        );

        Ok(bundle)
    }
}

/// Take at most `limit` characters. Returns the text and whether anything was cut.
fn truncate_chars(text: &str, limit: usize) -> (String, bool) {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SelectionMode;
    use crate::knowledge::{KnowledgeItem, KnowledgeKind, Notebook};
    use crate::storage::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn seeded_store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.insert_notebook(Notebook::new("nb", "Climate"));
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        store.insert_item(KnowledgeItem::new(
            "s1",
            "nb",
            KnowledgeKind::Source,
            "a".repeat(300),
            t0,
        ));
        store.insert_item(KnowledgeItem::new(
            "s2",
            "nb",
            KnowledgeKind::Source,
            "b".repeat(300),
            t0 + Duration::hours(1),
        ));
        store.insert_item(KnowledgeItem::new(
            "s3",
            "nb",
            KnowledgeKind::Source,
            "c".repeat(300),
            t0 + Duration::hours(2),
        ));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_three_sources_respect_budget() {
        let store = seeded_store();
        let assembler = ContextAssembler::new(store);
        let config = ContextConfig {
            mode: SelectionMode::FullText,
            max_items: 10,
            max_chars: 500,
            excerpt_chars: 400,
        };

        let bundle = assembler.assemble("nb", &config).await.unwrap();
        let total: usize = bundle.excerpts.iter().map(|e| e.char_len()).sum();
        assert!(total <= 500);
        assert_eq!(total, bundle.used_chars);

        // Newest source first, second one cut to fit the remaining budget
        assert_eq!(bundle.excerpts[0].item_id, "s3");
        assert!(!bundle.excerpts[0].truncated);
        assert_eq!(bundle.excerpts[1].item_id, "s2");
        assert_eq!(bundle.excerpts[1].char_len(), 200);
        assert!(bundle.excerpts[1].truncated);
        assert_eq!(bundle.excerpts.len(), 2);
    }

    #[tokio::test]
    async fn test_budget_never_exceeded() {
        let store = seeded_store();
        let assembler = ContextAssembler::new(store);

        for budget in [0, 1, 7, 299, 300, 301, 650, 899, 900, 5000] {
            for excerpt_chars in [1, 50, 300, 1000] {
                let config = ContextConfig {
                    mode: SelectionMode::FullText,
                    max_items: 10,
                    max_chars: budget,
                    excerpt_chars,
                };
                let bundle = assembler.assemble("nb", &config).await.unwrap();
                let total: usize = bundle.excerpts.iter().map(|e| e.char_len()).sum();
                assert!(total <= budget, "budget {} excerpt {}", budget, excerpt_chars);
                assert!(bundle.excerpts.iter().all(|e| e.char_len() <= excerpt_chars));
            }
        }
    }

    #[tokio::test]
    async fn test_deterministic() {
        let store = seeded_store();
        let assembler = ContextAssembler::new(store);
        let config = ContextConfig::default();

        let first = assembler.assemble("nb", &config).await.unwrap();
        let second = assembler.assemble("nb", &config).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_kind_order_and_modes() {
        let store = seeded_store();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.insert_item(KnowledgeItem::new("n1", "nb", KnowledgeKind::Note, "note", t));
        store.insert_item(KnowledgeItem::new("i1", "nb", KnowledgeKind::Insight, "insight", t));
        let assembler = ContextAssembler::new(store);

        let full = assembler.assemble("nb", &ContextConfig::default()).await.unwrap();
        let ids: Vec<&str> = full.excerpts.iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(ids, vec!["i1", "n1", "s3", "s2", "s1"]);

        let summary = ContextConfig {
            mode: SelectionMode::SummaryOnly,
            ..ContextConfig::default()
        };
        let bundle = assembler.assemble("nb", &summary).await.unwrap();
        assert_eq!(bundle.excerpts.len(), 2);

        let insights = ContextConfig {
            mode: SelectionMode::InsightsOnly,
            ..ContextConfig::default()
        };
        let bundle = assembler.assemble("nb", &insights).await.unwrap();
        assert_eq!(bundle.excerpts.len(), 1);
        assert_eq!(bundle.excerpts[0].item_id, "i1");
    }

    #[tokio::test]
    async fn test_max_items() {
        let assembler = ContextAssembler::new(seeded_store());
        let config = ContextConfig {
            max_items: 1,
            ..ContextConfig::default()
        };
        let bundle = assembler.assemble("nb", &config).await.unwrap();
        assert_eq!(bundle.excerpts.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_notebook_gives_empty_bundle() {
        let store = MemoryStore::new();
        store.insert_notebook(Notebook::new("empty", "Nothing yet"));
        let assembler = ContextAssembler::new(Arc::new(store));

        let bundle = assembler.assemble("empty", &ContextConfig::default()).await.unwrap();
        assert!(bundle.is_empty());
        assert_eq!(bundle.used_chars, 0);
    }

    #[tokio::test]
    async fn test_unknown_and_archived_notebooks() {
        let store = MemoryStore::new();
        let mut archived = Notebook::new("old", "Old");
        archived.archived = true;
        store.insert_notebook(archived);
        let assembler = ContextAssembler::new(Arc::new(store));

        let err = assembler.assemble("missing", &ContextConfig::default()).await.unwrap_err();
        assert!(matches!(err, NotebookError::NotFound(_)));
        let err = assembler.assemble("old", &ContextConfig::default()).await.unwrap_err();
        assert!(matches!(err, NotebookError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_archived_items_skipped() {
        let store = seeded_store();
        let mut hidden = KnowledgeItem::new(
            "i-hidden",
            "nb",
            KnowledgeKind::Insight,
            "secret",
            Utc::now(),
        );
        hidden.archived = true;
        store.insert_item(hidden);
        let assembler = ContextAssembler::new(store);

        let bundle = assembler.assemble("nb", &ContextConfig::default()).await.unwrap();
        assert!(bundle.excerpts.iter().all(|e| e.item_id != "i-hidden"));
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        let (text, cut) = truncate_chars("héllo wörld", 4);
        assert_eq!(text, "héll");
        assert!(cut);
        let (text, cut) = truncate_chars("abc", 3);
        assert_eq!(text, "abc");
        assert!(!cut);
    }
}
