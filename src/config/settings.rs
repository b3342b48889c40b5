//! Configuration settings for notebook-ai.

use crate::context::ContextConfig;
use crate::error::{NotebookError, Result};
use crate::model::{Capability, ModelDescriptor, RateLimit, RetryPolicy, RoutingTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Role used for conversational answers.
pub const ROLE_CHAT: &str = "chat";
/// Role used to plan podcast discussion beats.
pub const ROLE_OUTLINE: &str = "outline";
/// Role used to write individual podcast transcript segments.
pub const ROLE_TRANSCRIPT_WRITER: &str = "transcript-writer";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub storage: StorageSettings,
    pub providers: BTreeMap<String, ProviderSettings>,
    pub routing: RoutingTable,
    pub retry: RetrySettings,
    pub context: ContextConfig,
    pub chat: ChatSettings,
    pub podcast: PodcastSettings,
    pub prompts: PromptSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert("openai".to_string(), ProviderSettings::default());
        providers.insert(
            "ollama".to_string(),
            ProviderSettings {
                kind: ProviderKind::OpenAiCompatible,
                base_url: Some("http://localhost:11434/v1".to_string()),
                api_key_env: None,
                timeout_secs: 300,
            },
        );

        let openai = |model: &str, priority: u32, capabilities: Vec<Capability>| ModelDescriptor {
            provider: "openai".to_string(),
            model: model.to_string(),
            capabilities,
            priority,
            rate_limit: Some(RateLimit {
                capacity: 10,
                refill_per_second: 2.0,
            }),
        };
        let all = || {
            vec![
                Capability::Chat,
                Capability::LongContext,
                Capability::StructuredOutput,
            ]
        };

        let mut routing = BTreeMap::new();
        routing.insert(
            ROLE_CHAT.to_string(),
            vec![openai("gpt-4o-mini", 0, all()), openai("gpt-4o", 1, all())],
        );
        routing.insert(ROLE_OUTLINE.to_string(), vec![openai("gpt-4o", 0, all())]);
        routing.insert(
            ROLE_TRANSCRIPT_WRITER.to_string(),
            vec![openai("gpt-4o-mini", 0, all()), openai("gpt-4o", 1, all())],
        );

        Self {
            general: GeneralSettings::default(),
            storage: StorageSettings::default(),
            providers,
            routing,
            retry: RetrySettings::default(),
            context: ContextConfig::default(),
            chat: ChatSettings::default(),
            podcast: PodcastSettings::default(),
            prompts: PromptSettings::default(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.notebook-ai".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Persistence settings for the knowledge, checkpoint and episode stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path to the SQLite database.
    pub sqlite_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.notebook-ai/notebook.db".to_string(),
        }
    }
}

/// Wire protocol spoken by a provider endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum ProviderKind {
    /// api.openai.com.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Any endpoint implementing the OpenAI chat completions API (Ollama, vLLM, ...).
    #[serde(rename = "openai_compatible", alias = "openai-compatible")]
    OpenAiCompatible,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "openai_compatible" | "openai-compatible" | "compatible" => {
                Ok(ProviderKind::OpenAiCompatible)
            }
            _ => Err(format!("Unknown provider kind: {}", s)),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::OpenAiCompatible => write!(f, "openai_compatible"),
        }
    }
}

/// Connection settings for one model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// Endpoint override. None uses the provider's public endpoint.
    pub base_url: Option<String>,
    /// Environment variable holding the API key. None for keyless local endpoints.
    pub api_key_env: Option<String>,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            base_url: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_secs: 300,
        }
    }
}

/// Retry policy applied to each routing candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per candidate, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Randomize each backoff delay.
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

/// Conversation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub temperature: f32,
    /// Longest wait for rate-limit capacity before moving to the next candidate.
    pub acquire_timeout_secs: u64,
    /// Overall deadline for one turn. 0 disables it.
    pub turn_deadline_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            acquire_timeout_secs: 30,
            turn_deadline_secs: 0,
        }
    }
}

/// Podcast pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodcastSettings {
    /// Beats drafted concurrently.
    pub max_concurrent_segments: usize,
    /// Attempts per transcript segment before the episode fails.
    pub segment_attempts: u32,
    /// Segment target used when the caller does not supply one.
    pub default_segment_target: usize,
    pub temperature: f32,
    pub acquire_timeout_secs: u64,
    /// Overall deadline for one episode. 0 disables it.
    pub episode_deadline_secs: u64,
    /// Context selection used to ground episodes.
    pub context: ContextConfig,
}

impl Default for PodcastSettings {
    fn default() -> Self {
        Self {
            max_concurrent_segments: 3,
            segment_attempts: 2,
            default_segment_target: 12,
            temperature: 0.9,
            acquire_timeout_secs: 60,
            episode_deadline_secs: 0,
            context: ContextConfig {
                max_chars: 24_000,
                ..ContextConfig::default()
            },
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Settings::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| NotebookError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations the model manager and pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(NotebookError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.podcast.max_concurrent_segments == 0 {
            return Err(NotebookError::Config(
                "podcast.max_concurrent_segments must be at least 1".to_string(),
            ));
        }
        if self.podcast.segment_attempts == 0 {
            return Err(NotebookError::Config(
                "podcast.segment_attempts must be at least 1".to_string(),
            ));
        }

        for (role, candidates) in &self.routing {
            if candidates.is_empty() {
                return Err(NotebookError::Config(format!(
                    "routing.{} has no model candidates",
                    role
                )));
            }
            for descriptor in candidates {
                if !self.providers.contains_key(&descriptor.provider) {
                    return Err(NotebookError::Config(format!(
                        "routing.{} references unknown provider '{}'",
                        role, descriptor.provider
                    )));
                }
                if let Some(limit) = &descriptor.rate_limit {
                    if limit.capacity == 0 || limit.refill_per_second <= 0.0 {
                        return Err(NotebookError::Config(format!(
                            "rate limit for {} must have positive capacity and refill rate",
                            descriptor.id()
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notebook-ai")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.storage.sqlite_path)
    }

    /// Providers referenced by at least one routing role.
    pub fn routed_providers(&self) -> Vec<(&str, &ProviderSettings)> {
        let roles: Vec<&str> = self.routing.keys().map(String::as_str).collect();
        self.providers_for_roles(&roles)
    }

    /// Providers referenced by the given routing roles.
    pub fn providers_for_roles(&self, roles: &[&str]) -> Vec<(&str, &ProviderSettings)> {
        let mut seen = std::collections::BTreeSet::new();
        for candidates in roles.iter().filter_map(|r| self.routing.get(*r)) {
            for descriptor in candidates {
                seen.insert(descriptor.provider.as_str());
            }
        }
        seen.into_iter()
            .filter_map(|id| self.providers.get(id).map(|p| (id, p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert!(settings.routing.contains_key(ROLE_CHAT));
        assert!(settings.routing.contains_key(ROLE_OUTLINE));
        assert!(settings.routing.contains_key(ROLE_TRANSCRIPT_WRITER));
        assert_eq!(settings.retry.max_attempts, 3);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut settings = Settings::default();
        settings.routing.insert(
            ROLE_CHAT.to_string(),
            vec![ModelDescriptor::parse("mystery/model-x").unwrap()],
        );
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("unknown provider 'mystery'"));
    }

    #[test]
    fn test_empty_role_rejected() {
        let mut settings = Settings::default();
        settings.routing.insert(ROLE_OUTLINE.to_string(), vec![]);
        assert!(matches!(settings.validate(), Err(NotebookError::Config(_))));
    }

    #[test]
    fn test_toml_round_trip_keeps_routing() {
        let settings = Settings::default();
        let text = toml::to_string_pretty(&settings).unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(
            parsed.routing[ROLE_CHAT][0].id(),
            settings.routing[ROLE_CHAT][0].id()
        );
        assert_eq!(parsed.podcast.max_concurrent_segments, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: Settings = toml::from_str(
            r#"
            [retry]
            max_attempts = 5

            [providers.local]
            kind = "openai_compatible"
            base_url = "http://localhost:8080/v1"

            [[routing.chat]]
            provider = "local"
            model = "qwen2"
            capabilities = ["chat"]
            "#,
        )
        .unwrap();

        assert_eq!(parsed.retry.max_attempts, 5);
        assert_eq!(parsed.retry.base_delay_ms, 500);
        assert_eq!(parsed.routing["chat"][0].id(), "local/qwen2");
        assert_eq!(parsed.providers["local"].kind, ProviderKind::OpenAiCompatible);
        parsed.validate().unwrap();
    }

    #[test]
    fn test_provider_kind_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: ProviderKind,
        }
        let parse = |text: &str| toml::from_str::<Wrapper>(text).map(|w| w.kind);

        assert_eq!(parse("kind = \"openai\"").unwrap(), ProviderKind::OpenAi);
        assert_eq!(
            parse("kind = \"openai_compatible\"").unwrap(),
            ProviderKind::OpenAiCompatible
        );
        assert_eq!(
            parse("kind = \"openai-compatible\"").unwrap(),
            ProviderKind::OpenAiCompatible
        );
        assert!(parse("kind = \"open_ai\"").is_err());

        // Written configs read back with the same names
        let text = toml::to_string_pretty(&Settings::default()).unwrap();
        assert!(text.contains("kind = \"openai\""));
        assert!(text.contains("kind = \"openai_compatible\""));
    }

    #[test]
    fn test_routed_providers() {
        let settings = Settings::default();
        let routed: Vec<&str> = settings.routed_providers().iter().map(|(id, _)| *id).collect();
        assert_eq!(routed, vec!["openai"]);

        let mut settings = Settings::default();
        settings.routing.insert(
            ROLE_OUTLINE.to_string(),
            vec![ModelDescriptor::parse("ollama/llama3").unwrap()],
        );
        let outline: Vec<&str> = settings
            .providers_for_roles(&[ROLE_OUTLINE])
            .iter()
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(outline, vec!["ollama"]);
    }
}
