//! Wiring for the generation core.
//!
//! Builds the store, the model manager and both pipelines from [`Settings`].

use crate::config::{Prompts, Settings};
use crate::conversation::ConversationOrchestrator;
use crate::error::Result;
use crate::knowledge::KnowledgeStore;
use crate::model::{ModelManager, OpenAiProviderFactory, ProviderFactory};
use crate::podcast::PodcastPipeline;
use crate::storage::SqliteStore;
use std::sync::Arc;
use tracing::info;

/// Owns every long-lived component.
pub struct Engine {
    settings: Settings,
    store: Arc<SqliteStore>,
    models: Arc<ModelManager>,
    conversations: ConversationOrchestrator,
    podcasts: PodcastPipeline,
}

impl Engine {
    /// Open the configured database and route models to OpenAI-compatible endpoints.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;

        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let store = Arc::new(SqliteStore::new(&settings.sqlite_path())?);
        let factory = Arc::new(OpenAiProviderFactory::new(settings.providers.clone()));

        Self::with_components(settings, prompts, store, factory)
    }

    /// Build with a caller-supplied store and provider factory.
    pub fn with_components(
        settings: Settings,
        prompts: Prompts,
        store: Arc<SqliteStore>,
        factory: Arc<dyn ProviderFactory>,
    ) -> Result<Self> {
        let models = Arc::new(ModelManager::new(
            &settings.routing,
            factory,
            settings.retry.policy(),
        )?);

        let conversations = ConversationOrchestrator::new(
            store.clone(),
            models.clone(),
            store.clone(),
            prompts.clone(),
            settings.chat.clone(),
        );
        let podcasts = PodcastPipeline::new(
            store.clone(),
            models.clone(),
            store.clone(),
            prompts,
            settings.podcast.clone(),
        )?;

        info!("Engine ready with roles: {}", models.roles().join(", "));

        Ok(Self {
            settings,
            store,
            models,
            conversations,
            podcasts,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Knowledge reads as a trait object.
    pub fn knowledge(&self) -> Arc<dyn KnowledgeStore> {
        self.store.clone() as Arc<dyn KnowledgeStore>
    }

    /// The SQLite store, for notebook listings and seeding.
    pub fn store(&self) -> Arc<SqliteStore> {
        self.store.clone()
    }

    pub fn models(&self) -> Arc<ModelManager> {
        self.models.clone()
    }

    pub fn conversations(&self) -> &ConversationOrchestrator {
        &self.conversations
    }

    pub fn podcasts(&self) -> &PodcastPipeline {
        &self.podcasts
    }
}
