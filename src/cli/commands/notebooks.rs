//! Notebooks command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::engine::Engine;
use crate::knowledge::KnowledgeStore;
use anyhow::Result;

/// List notebooks in the configured database.
pub async fn run_notebooks(include_archived: bool, settings: Settings) -> Result<()> {
    let engine = Engine::new(settings)?;

    match engine.store().list_notebooks(include_archived) {
        Ok(notebooks) => {
            if notebooks.is_empty() {
                Output::info("No notebooks in the database yet.");
                return Ok(());
            }

            Output::header(&format!("Notebooks ({})", notebooks.len()));
            println!();
            let knowledge = engine.knowledge();
            for notebook in &notebooks {
                let items = knowledge.list_items(&notebook.id, false).await?.len();
                let archived = if notebook.archived { ", archived" } else { "" };
                Output::list_item(&format!(
                    "{} ({}, {} items{})",
                    notebook.name, notebook.id, items, archived
                ));
            }
        }
        Err(e) => {
            Output::error(&format!("Failed to list notebooks: {}", e));
            return Err(e.into());
        }
    }

    Ok(())
}
