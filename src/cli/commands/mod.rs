//! CLI command implementations.

mod chat;
mod config;
mod notebooks;
mod podcast;

pub use chat::run_chat;
pub use config::run_config;
pub use notebooks::run_notebooks;
pub use podcast::run_podcast;

use crate::cli::Output;
use crate::error::NotebookError;
use crate::model::ModelDescriptor;

/// Parse an optional `provider/model` flag.
fn parse_model(model: Option<&str>) -> anyhow::Result<Option<ModelDescriptor>> {
    match model {
        Some(spec) => match ModelDescriptor::parse(spec) {
            Ok(descriptor) => Ok(Some(descriptor)),
            Err(e) => {
                Output::error(&e.to_string());
                Err(e.into())
            }
        },
        None => Ok(None),
    }
}

/// Report a failed generation and whether earlier results are still usable.
fn report_failure(action: &str, error: &NotebookError) {
    Output::error(&format!("{}: {}", action, error));
    if error.prior_state_intact() {
        Output::info("Previously saved state is unchanged.");
    }
}
