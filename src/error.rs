//! Error types for notebook-ai.

use crate::model::CandidateFailure;
use thiserror::Error;

/// Library-level error type for generation operations.
#[derive(Error, Debug)]
pub enum NotebookError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("All model candidates for role '{role}' failed: {}", describe_failures(.failures))]
    ExternalService {
        role: String,
        failures: Vec<CandidateFailure>,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Thread {0} already has a turn in progress")]
    Conflict(String),

    #[error("Thread {0} has newer turns than this state; resume it and retry")]
    StaleThread(String),

    #[error("Deadline elapsed during {stage}")]
    Cancelled { stage: String },

    #[error("Podcast episode {episode_id} failed during {stage}: {source}")]
    Podcast {
        episode_id: String,
        stage: String,
        #[source]
        source: Box<NotebookError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl From<rusqlite::Error> for NotebookError {
    fn from(e: rusqlite::Error) -> Self {
        NotebookError::Database(e.to_string())
    }
}

impl NotebookError {
    /// Whether the state that existed before the failing operation is still valid.
    ///
    /// Every error path leaves committed thread history and stored episodes untouched,
    /// except a podcast stage failure, which invalidates only the episode being generated.
    pub fn prior_state_intact(&self) -> bool {
        !matches!(self, NotebookError::Podcast { .. })
    }
}

fn describe_failures(failures: &[CandidateFailure]) -> String {
    if failures.is_empty() {
        return "no candidates configured".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for notebook-ai operations.
pub type Result<T> = std::result::Result<T, NotebookError>;
