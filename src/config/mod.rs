//! Configuration module for notebook-ai.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{ChatPrompts, PodcastPrompts, Prompts};
pub use settings::{
    ChatSettings, GeneralSettings, PodcastSettings, PromptSettings, ProviderKind,
    ProviderSettings, RetrySettings, Settings, StorageSettings, ROLE_CHAT, ROLE_OUTLINE,
    ROLE_TRANSCRIPT_WRITER,
};
