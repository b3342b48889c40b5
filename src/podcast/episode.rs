use super::profile::{EpisodeProfile, SpeakerProfile};
use crate::error::{NotebookError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Pending,
    Outlining,
    Drafting,
    Assembling,
    Completed,
    Failed,
}

impl EpisodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EpisodeStatus::Completed | EpisodeStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EpisodeStatus::Pending => "pending",
            EpisodeStatus::Outlining => "outlining",
            EpisodeStatus::Drafting => "drafting",
            EpisodeStatus::Assembling => "assembling",
            EpisodeStatus::Completed => "completed",
            EpisodeStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discussion beat from the outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub talking_points: Vec<String>,
    /// Speaker names in the order they talk, when the outline specifies it.
    #[serde(default)]
    pub speakers: Vec<String>,
}

/// One speaker's contribution at one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Position in the episode, unique and contiguous from 0.
    pub sequence_index: usize,
    pub beat_index: usize,
    /// Name of the [`SpeakerProfile`] speaking.
    pub speaker: String,
    pub text: String,
}

/// A generated, or generating, podcast episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodcastEpisode {
    pub id: String,
    pub notebook_id: String,
    pub profile: EpisodeProfile,
    pub speakers: Vec<SpeakerProfile>,
    pub status: EpisodeStatus,
    #[serde(default)]
    pub beats: Vec<Beat>,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    /// Final script, set once the episode completes.
    pub transcript: Option<String>,
    /// `<stage>: <detail>` when the episode failed.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PodcastEpisode {
    pub fn new(notebook_id: impl Into<String>, profile: EpisodeProfile, speakers: Vec<SpeakerProfile>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            notebook_id: notebook_id.into(),
            profile,
            speakers,
            status: EpisodeStatus::Pending,
            beats: Vec::new(),
            segments: Vec::new(),
            transcript: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `status`. Terminal episodes never change again.
    pub fn transition(&mut self, status: EpisodeStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(NotebookError::InvalidInput(format!(
                "episode {} is already {}",
                self.id, self.status
            )));
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the episode failed at `stage`. Partial segments and transcript are discarded.
    pub fn fail(&mut self, stage: &str, detail: &str) {
        if self.status.is_terminal() {
            return;
        }
        self.status = EpisodeStatus::Failed;
        self.error = Some(format!("{}: {}", stage, detail));
        self.segments.clear();
        self.transcript = None;
        self.updated_at = Utc::now();
    }

    /// Render segments as `Name: text` blocks in sequence order.
    pub fn render_transcript(&self) -> String {
        let mut ordered: Vec<&TranscriptSegment> = self.segments.iter().collect();
        ordered.sort_by_key(|s| s.sequence_index);
        ordered
            .iter()
            .map(|s| format!("{}: {}", s.speaker, s.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Storage for episodes.
#[async_trait]
pub trait EpisodeStore: Send + Sync {
    /// Insert or replace an episode.
    async fn save_episode(&self, episode: &PodcastEpisode) -> Result<()>;

    async fn get_episode(&self, episode_id: &str) -> Result<Option<PodcastEpisode>>;
}
