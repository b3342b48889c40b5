//! Pre-flight checks before generation.
//!
//! Validates that the providers an operation will route to are reachable
//! with credentials before any model call is made.

use crate::config::{Settings, ROLE_CHAT, ROLE_OUTLINE, ROLE_TRANSCRIPT_WRITER};
use crate::error::{NotebookError, Result};
use crate::model::ModelDescriptor;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Chat needs the providers routed for the chat role.
    Chat,
    /// Podcasts need the outline and transcript-writer providers.
    Podcast,
}

impl Operation {
    fn roles(self) -> &'static [&'static str] {
        match self {
            Operation::Chat => &[ROLE_CHAT],
            Operation::Podcast => &[ROLE_OUTLINE, ROLE_TRANSCRIPT_WRITER],
        }
    }
}

/// Run pre-flight checks for the given operation.
///
/// With a model override only that model's provider is checked.
pub fn check(
    operation: Operation,
    settings: &Settings,
    model_override: Option<&ModelDescriptor>,
) -> Result<()> {
    let providers = match model_override {
        Some(descriptor) => {
            let provider = settings.providers.get(&descriptor.provider).ok_or_else(|| {
                NotebookError::Config(format!("unknown provider '{}'", descriptor.provider))
            })?;
            vec![(descriptor.provider.as_str(), provider)]
        }
        None => settings.providers_for_roles(operation.roles()),
    };

    for (id, provider) in providers {
        if let Some(var) = &provider.api_key_env {
            check_api_key(id, var)?;
        }
    }
    Ok(())
}

/// Check that a provider's API key variable is set.
fn check_api_key(provider: &str, var: &str) -> Result<()> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(()),
        Ok(_) => Err(NotebookError::Config(format!(
            "{} is empty (required by provider '{}'). Set it with: export {}='...'",
            var, provider, var
        ))),
        Err(_) => Err(NotebookError::Config(format!(
            "{} not set (required by provider '{}'). Set it with: export {}='...'",
            var, provider, var
        ))),
    }
}
