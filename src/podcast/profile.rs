use crate::error::{NotebookError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Most speakers an episode can have.
pub const MAX_SPEAKERS: usize = 4;

/// A podcast voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerProfile {
    pub name: String,
    /// Who the speaker is: background, voice, point of view.
    pub persona: String,
    /// How the speaker talks.
    pub tone: String,
}

impl SpeakerProfile {
    pub fn new(name: impl Into<String>, persona: impl Into<String>, tone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona: persona.into(),
            tone: tone.into(),
        }
    }

    /// Built-in speakers, for callers that do not supply their own.
    ///
    /// Returns as many as requested, up to [`MAX_SPEAKERS`].
    pub fn defaults(count: usize) -> Vec<SpeakerProfile> {
        let roster = [
            SpeakerProfile::new(
                "Alex",
                "Host who guides the conversation and asks the questions a curious listener would ask",
                "warm, upbeat, conversational",
            ),
            SpeakerProfile::new(
                "Sam",
                "Expert who has read all the material and explains it with concrete examples",
                "clear, thoughtful, precise",
            ),
            SpeakerProfile::new(
                "Jordan",
                "Skeptic who questions assumptions and looks for what the material leaves out",
                "direct, probing, good-humoured",
            ),
            SpeakerProfile::new(
                "Riley",
                "Practitioner who connects ideas to everyday consequences",
                "grounded, friendly, practical",
            ),
        ];
        roster.into_iter().take(count.min(MAX_SPEAKERS)).collect()
    }
}

/// Shape of an episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeProfile {
    pub name: String,
    pub speaker_count: usize,
    /// Total transcript segments to write across all beats.
    pub segment_target: usize,
    /// Free-form style instructions.
    pub style: String,
}

impl EpisodeProfile {
    pub fn new(speaker_count: usize, segment_target: usize) -> Self {
        Self {
            name: "default".to_string(),
            speaker_count,
            segment_target,
            style: "An informative, engaging conversation for a general audience".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    /// Number of discussion beats to ask the outline for.
    pub fn beat_count(&self) -> usize {
        let per_beat = self.speaker_count.max(1);
        self.segment_target.div_ceil(per_beat).clamp(1, self.segment_target.max(1))
    }

    /// Check the profile against the speakers supplied for the episode.
    pub fn validate(&self, speakers: &[SpeakerProfile]) -> Result<()> {
        if speakers.is_empty() || speakers.len() > MAX_SPEAKERS {
            return Err(NotebookError::InvalidInput(format!(
                "an episode needs between 1 and {} speakers, got {}",
                MAX_SPEAKERS,
                speakers.len()
            )));
        }
        if self.speaker_count != speakers.len() {
            return Err(NotebookError::InvalidInput(format!(
                "episode profile '{}' expects {} speakers but {} were supplied",
                self.name,
                self.speaker_count,
                speakers.len()
            )));
        }
        if self.segment_target == 0 {
            return Err(NotebookError::InvalidInput(
                "segment target must be at least 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for speaker in speakers {
            let name = speaker.name.trim();
            if name.is_empty() {
                return Err(NotebookError::InvalidInput("speaker name is empty".to_string()));
            }
            if !names.insert(name.to_lowercase()) {
                return Err(NotebookError::InvalidInput(format!(
                    "speaker name '{}' is used twice",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_count_bounds() {
        let none: Vec<SpeakerProfile> = Vec::new();
        let err = EpisodeProfile::new(0, 6).validate(&none).unwrap_err();
        assert!(matches!(err, NotebookError::InvalidInput(_)));

        let mut five = SpeakerProfile::defaults(4);
        five.push(SpeakerProfile::new("Extra", "guest", "calm"));
        let err = EpisodeProfile::new(5, 6).validate(&five).unwrap_err();
        assert!(matches!(err, NotebookError::InvalidInput(_)));

        for n in 1..=MAX_SPEAKERS {
            assert!(EpisodeProfile::new(n, 6).validate(&SpeakerProfile::defaults(n)).is_ok());
        }
    }

    #[test]
    fn test_profile_must_match_speakers() {
        let speakers = SpeakerProfile::defaults(2);
        assert!(EpisodeProfile::new(3, 6).validate(&speakers).is_err());
        assert!(EpisodeProfile::new(2, 0).validate(&speakers).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let speakers = vec![
            SpeakerProfile::new("Alex", "host", "warm"),
            SpeakerProfile::new("alex", "guest", "dry"),
        ];
        assert!(EpisodeProfile::new(2, 4).validate(&speakers).is_err());
    }

    #[test]
    fn test_beat_count() {
        assert_eq!(EpisodeProfile::new(2, 12).beat_count(), 6);
        assert_eq!(EpisodeProfile::new(3, 10).beat_count(), 4);
        assert_eq!(EpisodeProfile::new(4, 2).beat_count(), 1);
        assert_eq!(EpisodeProfile::new(1, 3).beat_count(), 3);
    }

    #[test]
    fn test_defaults_capped() {
        assert_eq!(SpeakerProfile::defaults(2).len(), 2);
        assert_eq!(SpeakerProfile::defaults(9).len(), MAX_SPEAKERS);
    }
}
