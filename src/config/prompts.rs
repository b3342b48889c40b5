//! Prompt templates for notebook-ai.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").ok());

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Prompts {
    pub chat: ChatPrompts,
    pub podcast: PodcastPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for grounded conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatPrompts {
    /// Base instructions, always sent.
    pub system: String,
    /// Appended to the system prompt when the notebook supplied context.
    pub context: String,
}

impl Default for ChatPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a research assistant helping the user explore the material collected in their notebook "{{notebook}}".

Guidelines:
- Ground your answers in the notebook material provided below
- Cite sources by their bracketed reference, e.g. [source:abc123]
- If the material does not cover the question, say so clearly before answering from general knowledge
- Remember previous questions in the conversation for follow-ups
- Be concise but thorough"#
                .to_string(),

            context: r#"Notebook material (insights first, then notes, then raw sources):

{{context}}"#
                .to_string(),
        }
    }
}

/// Prompts for podcast outlining and transcript writing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodcastPrompts {
    pub outline_system: String,
    pub outline_user: String,
    pub segment_system: String,
    pub segment_user: String,
}

impl Default for PodcastPrompts {
    fn default() -> Self {
        Self {
            outline_system: r#"You are a podcast producer. You turn research material into a clear, engaging episode outline made of discussion beats.

Each beat covers one idea from the material. Beats flow logically from an opening hook to a closing takeaway. Never invent facts that are not in the material.

Respond with JSON only."#
                .to_string(),

            outline_user: r#"Plan an episode with {{beat_count}} discussion beats.

Speakers: {{speakers}}
Style: {{style}}

Material:
{{context}}

Return JSON of the form:
{"beats": [{"title": "...", "summary": "...", "talking_points": ["..."], "speakers": ["Name", "Name"]}]}

"speakers" is optional and lists who talks in that beat, in order."#
                .to_string(),

            segment_system: r#"You write natural, spoken podcast dialogue. You write only the words of the speaker you are given, with no stage directions, no speaker label and no markdown.

Stay faithful to the beat and to the research material. Keep each contribution to a few sentences."#
                .to_string(),

            segment_user: r#"Episode style: {{style}}

Speaker: {{speaker}}
Persona: {{persona}}
Tone: {{tone}}

Current beat: {{beat_title}}
{{beat_summary}}
Talking points:
{{talking_points}}

Previous line:
{{previous}}

Write {{speaker}}'s next contribution."#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let chat_path = custom_path.join("chat.toml");
            if chat_path.exists() {
                let content = std::fs::read_to_string(&chat_path)?;
                prompts.chat = toml::from_str(&content)?;
            }

            let podcast_path = custom_path.join("podcast.toml");
            if podcast_path.exists() {
                let content = std::fs::read_to_string(&podcast_path)?;
                prompts.podcast = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    ///
    /// Placeholders are substituted in one pass, so values are inserted verbatim even
    /// when they contain `{{...}}` themselves. Unknown placeholders are left as written.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let Some(placeholder) = PLACEHOLDER.as_ref() else {
            return template.to_string();
        };
        placeholder
            .replace_all(template, |caps: &Captures| match vars.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}
