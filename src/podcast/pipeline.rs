//! Outline, draft and assemble a podcast episode.

use super::episode::{Beat, EpisodeStatus, EpisodeStore, PodcastEpisode, TranscriptSegment};
use super::profile::{EpisodeProfile, SpeakerProfile};
use crate::config::{PodcastSettings, Prompts, ROLE_OUTLINE, ROLE_TRANSCRIPT_WRITER};
use crate::context::{format_context_for_prompt, ContextAssembler};
use crate::error::{NotebookError, Result};
use crate::knowledge::KnowledgeStore;
use crate::model::{CallOptions, Message, ModelDescriptor, ModelManager, PromptPayload};
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// One speaker turn, fixed before drafting starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedTurn {
    pub sequence_index: usize,
    pub beat_index: usize,
    /// Index into the episode's speakers.
    pub speaker: usize,
}

/// Distribute `target` turns over `beats` and assign speakers.
///
/// Every beat gets at least one turn and earlier beats take the remainder. A beat follows
/// the speaker order named in the outline when every name matches a speaker; otherwise
/// speakers rotate round-robin across the episode. Returns turns grouped per beat, with
/// sequence indices contiguous from 0.
pub fn plan_turns(beats: &[Beat], speakers: &[SpeakerProfile], target: usize) -> Vec<Vec<PlannedTurn>> {
    if beats.is_empty() || speakers.is_empty() {
        return Vec::new();
    }

    let per_beat = (target / beats.len()).max(1);
    let extra = target.saturating_sub(per_beat * beats.len());
    let mut sequence_index = 0;
    let mut rotation = 0;

    beats
        .iter()
        .enumerate()
        .map(|(beat_index, beat)| {
            let turns = per_beat + usize::from(beat_index < extra);
            let order = speaker_order(beat, speakers);

            (0..turns)
                .map(|turn| {
                    let speaker = match &order {
                        Some(order) => order[turn % order.len()],
                        None => {
                            rotation += 1;
                            (rotation - 1) % speakers.len()
                        }
                    };
                    sequence_index += 1;
                    PlannedTurn {
                        sequence_index: sequence_index - 1,
                        beat_index,
                        speaker,
                    }
                })
                .collect()
        })
        .collect()
}

fn speaker_order(beat: &Beat, speakers: &[SpeakerProfile]) -> Option<Vec<usize>> {
    if beat.speakers.is_empty() {
        return None;
    }
    beat.speakers
        .iter()
        .map(|name| {
            speakers
                .iter()
                .position(|s| s.name.trim().eq_ignore_ascii_case(name.trim()))
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OutlineDocument {
    Wrapped { beats: Vec<Beat> },
    Bare(Vec<Beat>),
}

/// A transcript segment that could not be written.
#[derive(Debug)]
struct SegmentFailure {
    turn: PlannedTurn,
    speaker: String,
    attempts: u32,
    error: NotebookError,
}

impl std::fmt::Display for SegmentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "beat {} segment {} ({}) failed after {} attempt{}: {}",
            self.turn.beat_index + 1,
            self.turn.sequence_index,
            self.speaker,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.error
        )
    }
}

/// Everything a segment task needs, shared across beats.
struct DraftRequest<'a> {
    episode: &'a PodcastEpisode,
    model_override: Option<&'a ModelDescriptor>,
    options: &'a CallOptions,
}

/// Generates podcast episodes.
pub struct PodcastPipeline {
    knowledge: Arc<dyn KnowledgeStore>,
    assembler: ContextAssembler,
    models: Arc<ModelManager>,
    episodes: Arc<dyn EpisodeStore>,
    prompts: Prompts,
    settings: PodcastSettings,
    fence_regex: Regex,
}

impl PodcastPipeline {
    pub fn new(
        knowledge: Arc<dyn KnowledgeStore>,
        models: Arc<ModelManager>,
        episodes: Arc<dyn EpisodeStore>,
        prompts: Prompts,
        settings: PodcastSettings,
    ) -> Result<Self> {
        let fence_regex = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```")
            .map_err(|e| NotebookError::Config(format!("Invalid outline pattern: {}", e)))?;

        Ok(Self {
            assembler: ContextAssembler::new(knowledge.clone()),
            knowledge,
            models,
            episodes,
            prompts,
            settings,
            fence_regex,
        })
    }

    /// Call limits from the podcast settings.
    pub fn default_call_options(&self) -> CallOptions {
        CallOptions::default()
            .with_acquire_timeout(Duration::from_secs(self.settings.acquire_timeout_secs))
            .with_timeout(Duration::from_secs(self.settings.episode_deadline_secs))
    }

    /// Load a stored episode.
    pub async fn episode(&self, episode_id: &str) -> Result<PodcastEpisode> {
        self.episodes
            .get_episode(episode_id)
            .await?
            .ok_or_else(|| NotebookError::NotFound(format!("episode {}", episode_id)))
    }

    /// Generate an episode for a notebook.
    ///
    /// Invalid profiles and unknown notebooks fail before an episode is created. After
    /// that, every status change is saved, and a stage failure leaves the episode stored
    /// as `failed` and returns [`NotebookError::Podcast`].
    #[instrument(skip(self, profile, speakers, model_override, options), fields(speakers = speakers.len()))]
    pub async fn generate(
        &self,
        notebook_id: &str,
        profile: &EpisodeProfile,
        speakers: &[SpeakerProfile],
        model_override: Option<&ModelDescriptor>,
        options: &CallOptions,
    ) -> Result<PodcastEpisode> {
        profile.validate(speakers)?;

        let notebook = self.knowledge.get_notebook(notebook_id).await?;
        if notebook.archived {
            return Err(NotebookError::NotFound(format!("notebook {} is archived", notebook_id)));
        }

        let mut episode = PodcastEpisode::new(notebook_id, profile.clone(), speakers.to_vec());
        self.episodes.save_episode(&episode).await?;
        info!("Generating episode {} for notebook {}", episode.id, notebook_id);

        match self.run(&mut episode, &notebook.name, model_override, options).await {
            Ok(()) => {
                info!(
                    "Episode {} completed with {} segments",
                    episode.id,
                    episode.segments.len()
                );
                Ok(episode)
            }
            Err((stage, error, detail)) => {
                warn!("Episode {} failed during {}: {}", episode.id, stage, detail);
                episode.fail(stage, &detail);
                if let Err(e) = self.episodes.save_episode(&episode).await {
                    warn!("Could not record failure of episode {}: {}", episode.id, e);
                }
                Err(NotebookError::Podcast {
                    episode_id: episode.id,
                    stage: stage.to_string(),
                    source: Box::new(error),
                })
            }
        }
    }

    /// Run the stages. Errors carry the failed stage and a detail for the episode record.
    async fn run(
        &self,
        episode: &mut PodcastEpisode,
        notebook_name: &str,
        model_override: Option<&ModelDescriptor>,
        options: &CallOptions,
    ) -> std::result::Result<(), (&'static str, NotebookError, String)> {
        let stage_error = |stage: &'static str| move |e: NotebookError| {
            let detail = e.to_string();
            (stage, e, detail)
        };

        // Outlining
        self.enter(episode, EpisodeStatus::Outlining)
            .await
            .map_err(stage_error("outlining"))?;
        let beats = self
            .outline(episode, notebook_name, model_override, options)
            .await
            .map_err(stage_error("outlining"))?;
        episode.beats = beats;

        // Drafting
        self.enter(episode, EpisodeStatus::Drafting)
            .await
            .map_err(stage_error("drafting"))?;
        let request = DraftRequest {
            episode: &*episode,
            model_override,
            options,
        };
        let segments = self.draft(&request).await.map_err(|failure| {
            let detail = failure.to_string();
            ("drafting", failure.error, detail)
        })?;
        episode.segments = segments;

        // Assembling
        self.enter(episode, EpisodeStatus::Assembling)
            .await
            .map_err(stage_error("assembling"))?;
        episode.segments.sort_by_key(|s| s.sequence_index);
        if let Some((position, segment)) = episode
            .segments
            .iter()
            .enumerate()
            .find(|(i, s)| s.sequence_index != *i)
        {
            return Err(stage_error("assembling")(NotebookError::InvalidInput(format!(
                "segment sequence broken at position {}: found index {}",
                position, segment.sequence_index
            ))));
        }
        episode.transcript = Some(episode.render_transcript());
        self.enter(episode, EpisodeStatus::Completed)
            .await
            .map_err(stage_error("assembling"))?;

        Ok(())
    }

    /// Persist the episode at `status`, then adopt it. A failed save leaves `episode` as it was.
    async fn enter(&self, episode: &mut PodcastEpisode, status: EpisodeStatus) -> Result<()> {
        let mut staged = episode.clone();
        staged.transition(status)?;
        self.episodes.save_episode(&staged).await?;
        debug!("Episode {} is {}", staged.id, status);
        *episode = staged;
        Ok(())
    }

    async fn outline(
        &self,
        episode: &PodcastEpisode,
        notebook_name: &str,
        model_override: Option<&ModelDescriptor>,
        options: &CallOptions,
    ) -> Result<Vec<Beat>> {
        let context = self
            .assembler
            .assemble(&episode.notebook_id, &self.settings.context)
            .await?;
        if context.is_empty() {
            warn!("Notebook {} has no usable material for episode {}", episode.notebook_id, episode.id);
        }

        let profile = &episode.profile;
        let speakers = episode
            .speakers
            .iter()
            .map(|s| format!("{} ({})", s.name, s.persona))
            .collect::<Vec<_>>()
            .join(", ");

        let mut vars = HashMap::new();
        vars.insert("notebook".to_string(), notebook_name.to_string());
        vars.insert("beat_count".to_string(), profile.beat_count().to_string());
        vars.insert("speakers".to_string(), speakers);
        vars.insert("style".to_string(), profile.style.clone());
        vars.insert("context".to_string(), format_context_for_prompt(&context));

        let payload = PromptPayload::new(vec![
            Message::system(self.prompts.render_with_custom(&self.prompts.podcast.outline_system, &vars)),
            Message::user(self.prompts.render_with_custom(&self.prompts.podcast.outline_user, &vars)),
        ])
        .with_temperature(self.settings.temperature)
        .json();

        let response = self
            .models
            .invoke(ROLE_OUTLINE, &payload, model_override, options)
            .await?;

        let mut beats = self.parse_outline(&response.text)?;
        // Each beat needs at least one turn
        beats.truncate(profile.segment_target);
        info!("Outline for episode {} has {} beats", episode.id, beats.len());
        Ok(beats)
    }

    /// Parse the outline JSON, tolerating a markdown fence around it.
    fn parse_outline(&self, text: &str) -> Result<Vec<Beat>> {
        let json = match self.fence_regex.captures(text) {
            Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
            None => text.trim(),
        };

        let beats = match serde_json::from_str::<OutlineDocument>(json)? {
            OutlineDocument::Wrapped { beats } | OutlineDocument::Bare(beats) => beats,
        };

        let beats: Vec<Beat> = beats
            .into_iter()
            .filter(|b| !b.title.trim().is_empty() || !b.summary.trim().is_empty())
            .collect();
        if beats.is_empty() {
            return Err(NotebookError::InvalidInput("outline contains no beats".to_string()));
        }
        Ok(beats)
    }

    /// Draft all beats. Beats run concurrently, turns within a beat run in order.
    async fn draft(&self, request: &DraftRequest<'_>) -> std::result::Result<Vec<TranscriptSegment>, SegmentFailure> {
        let episode = request.episode;
        let plan = plan_turns(&episode.beats, &episode.speakers, episode.profile.segment_target);
        let planned: usize = plan.iter().map(Vec::len).sum();
        info!(
            "Drafting {} segments over {} beats (concurrency {})",
            planned,
            plan.len(),
            self.settings.max_concurrent_segments
        );

        let mut stream = stream::iter(plan)
            .map(|turns| self.draft_beat(request, turns))
            .buffer_unordered(self.settings.max_concurrent_segments.max(1));

        let mut segments = Vec::with_capacity(planned);
        while let Some(result) = stream.next().await {
            // Dropping the stream abandons the beats still in flight
            segments.extend(result?);
        }
        Ok(segments)
    }

    async fn draft_beat(
        &self,
        request: &DraftRequest<'_>,
        turns: Vec<PlannedTurn>,
    ) -> std::result::Result<Vec<TranscriptSegment>, SegmentFailure> {
        let mut segments: Vec<TranscriptSegment> = Vec::with_capacity(turns.len());

        for turn in turns {
            let previous = segments.last().map(|s| format!("{}: {}", s.speaker, s.text));
            let segment = self.draft_segment(request, turn, previous.as_deref()).await?;
            segments.push(segment);
        }

        if let Some(first) = segments.first() {
            debug!("Beat {} drafted ({} segments)", first.beat_index + 1, segments.len());
        }
        Ok(segments)
    }

    async fn draft_segment(
        &self,
        request: &DraftRequest<'_>,
        turn: PlannedTurn,
        previous: Option<&str>,
    ) -> std::result::Result<TranscriptSegment, SegmentFailure> {
        let episode = request.episode;
        let beat = &episode.beats[turn.beat_index];
        let speaker = &episode.speakers[turn.speaker];
        let payload = self.segment_payload(episode, beat, speaker, previous);
        let max_attempts = self.settings.segment_attempts.max(1);

        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = self
                .models
                .invoke(ROLE_TRANSCRIPT_WRITER, &payload, request.model_override, request.options)
                .await
                .and_then(|response| {
                    let text = clean_segment(&response.text, &speaker.name);
                    if text.is_empty() {
                        Err(NotebookError::InvalidInput(format!(
                            "{} returned an empty segment",
                            response.model
                        )))
                    } else {
                        Ok(text)
                    }
                });

            match outcome {
                Ok(text) => {
                    return Ok(TranscriptSegment {
                        sequence_index: turn.sequence_index,
                        beat_index: turn.beat_index,
                        speaker: speaker.name.clone(),
                        text,
                    })
                }
                Err(e @ NotebookError::Cancelled { .. }) => {
                    return Err(SegmentFailure {
                        turn,
                        speaker: speaker.name.clone(),
                        attempts,
                        error: e,
                    })
                }
                Err(e) if attempts < max_attempts => {
                    warn!(
                        "Segment {} (beat {}) attempt {}/{} failed: {}",
                        turn.sequence_index,
                        turn.beat_index + 1,
                        attempts,
                        max_attempts,
                        e
                    );
                }
                Err(e) => {
                    return Err(SegmentFailure {
                        turn,
                        speaker: speaker.name.clone(),
                        attempts,
                        error: e,
                    })
                }
            }
        }
    }

    fn segment_payload(
        &self,
        episode: &PodcastEpisode,
        beat: &Beat,
        speaker: &SpeakerProfile,
        previous: Option<&str>,
    ) -> PromptPayload {
        let talking_points = if beat.talking_points.is_empty() {
            "- (none)".to_string()
        } else {
            beat.talking_points
                .iter()
                .map(|p| format!("- {}", p))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut vars = HashMap::new();
        vars.insert("style".to_string(), episode.profile.style.clone());
        vars.insert("speaker".to_string(), speaker.name.clone());
        vars.insert("persona".to_string(), speaker.persona.clone());
        vars.insert("tone".to_string(), speaker.tone.clone());
        vars.insert("beat_title".to_string(), beat.title.clone());
        vars.insert("beat_summary".to_string(), beat.summary.clone());
        vars.insert("talking_points".to_string(), talking_points);
        vars.insert(
            "previous".to_string(),
            previous
                .unwrap_or("(none, this line opens the beat)")
                .to_string(),
        );

        PromptPayload::new(vec![
            Message::system(self.prompts.render_with_custom(&self.prompts.podcast.segment_system, &vars)),
            Message::user(self.prompts.render_with_custom(&self.prompts.podcast.segment_user, &vars)),
        ])
        .with_temperature(self.settings.temperature)
    }
}

/// Trim whitespace and a leading `Name:` label the model may have added.
fn clean_segment(text: &str, speaker: &str) -> String {
    let text = text.trim();
    let unlabelled = text
        .get(..speaker.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(speaker))
        .and_then(|_| text[speaker.len()..].trim_start().strip_prefix(':'))
        .unwrap_or(text);
    unlabelled.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{KnowledgeItem, KnowledgeKind, Notebook};
    use crate::model::testing::{manager_with, FakeProvider};
    use crate::model::{FailureClass, ProviderError, RetryPolicy};
    use crate::podcast::MAX_SPEAKERS;
    use crate::storage::MemoryStore;
    use chrono::Utc;
    use std::sync::Mutex;

    const OUTLINE: &str = r#"{"beats": [
        {"title": "Opening", "summary": "Why it matters", "talking_points": ["stakes"]},
        {"title": "Evidence", "summary": "What the data says", "talking_points": ["glaciers", "sea level"]},
        {"title": "Closing", "summary": "Takeaways", "talking_points": []}
    ]}"#;

    fn beat(title: &str, speakers: &[&str]) -> Beat {
        Beat {
            title: title.to_string(),
            summary: String::new(),
            talking_points: Vec::new(),
            speakers: speakers.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_notebook(Notebook::new("nb", "Climate"));
        store.insert_item(KnowledgeItem::new(
            "s1",
            "nb",
            KnowledgeKind::Source,
            "Glaciers lost mass every year since 1990.",
            Utc::now(),
        ));
        store
    }

    /// Pull a `Label: value` line out of the segment prompt.
    fn field(payload: &PromptPayload, label: &str) -> String {
        payload
            .messages
            .last()
            .and_then(|m| m.content.lines().find_map(|l| l.strip_prefix(label)))
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    fn pipeline(store: Arc<MemoryStore>, outline: FakeProvider, writer: FakeProvider) -> PodcastPipeline {
        let models = manager_with(
            vec![(ROLE_OUTLINE, vec![outline]), (ROLE_TRANSCRIPT_WRITER, vec![writer])],
            RetryPolicy::immediate(1),
        );
        PodcastPipeline::new(
            store.clone(),
            Arc::new(models),
            store,
            Prompts::default(),
            PodcastSettings::default(),
        )
        .unwrap()
    }

    fn echo_writer() -> FakeProvider {
        FakeProvider::with_fn("test/writer", |payload, _| {
            Ok(format!(
                "{} on {}",
                field(payload, "Speaker:"),
                field(payload, "Current beat:")
            ))
        })
    }

    #[test]
    fn test_plan_distributes_turns() {
        let beats = vec![beat("a", &[]), beat("b", &[]), beat("c", &[])];
        let speakers = SpeakerProfile::defaults(2);
        let plan = plan_turns(&beats, &speakers, 7);

        let sizes: Vec<usize> = plan.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 2, 2]);

        let flat: Vec<PlannedTurn> = plan.into_iter().flatten().collect();
        let indices: Vec<usize> = flat.iter().map(|t| t.sequence_index).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
        let rotation: Vec<usize> = flat.iter().map(|t| t.speaker).collect();
        assert_eq!(rotation, vec![0, 1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_plan_gives_every_beat_a_turn() {
        let beats = vec![beat("a", &[]), beat("b", &[]), beat("c", &[])];
        let plan = plan_turns(&beats, &SpeakerProfile::defaults(1), 2);
        assert!(plan.iter().all(|turns| !turns.is_empty()));
    }

    #[test]
    fn test_plan_follows_outline_speakers() {
        let speakers = SpeakerProfile::defaults(3);
        let beats = vec![beat("a", &["jordan", "Alex"]), beat("b", &["Alex", "Nobody"])];
        let plan = plan_turns(&beats, &speakers, 6);

        let first: Vec<usize> = plan[0].iter().map(|t| t.speaker).collect();
        assert_eq!(first, vec![2, 0, 2]);
        // Unknown name: falls back to rotation
        let second: Vec<usize> = plan[1].iter().map(|t| t.speaker).collect();
        assert_eq!(second, vec![0, 1, 2]);
    }

    #[test]
    fn test_parse_outline_variants() {
        let p = pipeline(store(), FakeProvider::replying("test/outline", ""), echo_writer());

        assert_eq!(p.parse_outline(OUTLINE).unwrap().len(), 3);

        let fenced = format!("Here you go:\n```json\n{}\n```", OUTLINE);
        assert_eq!(p.parse_outline(&fenced).unwrap().len(), 3);

        let bare = r#"[{"title": "Only"}]"#;
        assert_eq!(p.parse_outline(bare).unwrap()[0].title, "Only");

        assert!(p.parse_outline("not json").is_err());
        assert!(p.parse_outline(r#"{"beats": []}"#).is_err());
    }

    #[test]
    fn test_clean_segment() {
        assert_eq!(clean_segment("  Alex: Hello there ", "Alex"), "Hello there");
        assert_eq!(clean_segment("alex : Hi", "Alex"), "Hi");
        assert_eq!(clean_segment("Alexander is here", "Alex"), "Alexander is here");
        assert_eq!(clean_segment("Sam: not me", "Alex"), "Sam: not me");
    }

    #[tokio::test]
    async fn test_invalid_speaker_counts() {
        let store = store();
        let p = pipeline(store.clone(), FakeProvider::replying("test/outline", OUTLINE), echo_writer());

        for count in [0, 5] {
            let mut speakers = SpeakerProfile::defaults(count);
            if count > MAX_SPEAKERS {
                speakers.push(SpeakerProfile::new("Guest", "visitor", "curious"));
            }
            let err = p
                .generate("nb", &EpisodeProfile::new(count, 6), &speakers, None, &CallOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, NotebookError::InvalidInput(_)), "speakers={count}");
        }
        assert_eq!(store.episode_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_notebook() {
        let p = pipeline(store(), FakeProvider::replying("test/outline", OUTLINE), echo_writer());
        let err = p
            .generate(
                "missing",
                &EpisodeProfile::new(2, 6),
                &SpeakerProfile::defaults(2),
                None,
                &CallOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NotebookError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_transcript_order_independent_of_completion_order() {
        let completed = Arc::new(Mutex::new(Vec::new()));
        let log = completed.clone();
        let writer = FakeProvider::with_fn("test/writer", move |payload, _| {
            let beat = field(payload, "Current beat:");
            log.lock().unwrap().push(beat.clone());
            Ok(format!("{} on {}", field(payload, "Speaker:"), beat))
        })
        // Earlier beats are slower, so later beats finish first
        .with_delay_fn(|payload| match field(payload, "Current beat:").as_str() {
            "Opening" => Duration::from_millis(120),
            "Evidence" => Duration::from_millis(60),
            _ => Duration::from_millis(5),
        });

        let store = store();
        let p = pipeline(store.clone(), FakeProvider::replying("test/outline", OUTLINE), writer);
        let episode = p
            .generate(
                "nb",
                &EpisodeProfile::new(2, 6),
                &SpeakerProfile::defaults(2),
                None,
                &CallOptions::default(),
            )
            .await
            .unwrap();

        let order = completed.lock().unwrap().clone();
        assert_eq!(order.first().map(String::as_str), Some("Closing"));
        assert_eq!(order.last().map(String::as_str), Some("Opening"));

        assert_eq!(episode.status, EpisodeStatus::Completed);
        let indices: Vec<usize> = episode.segments.iter().map(|s| s.sequence_index).collect();
        assert_eq!(indices, (0..6).collect::<Vec<_>>());

        let expected = [
            "Alex: Alex on Opening",
            "Sam: Sam on Opening",
            "Alex: Alex on Evidence",
            "Sam: Sam on Evidence",
            "Alex: Alex on Closing",
            "Sam: Sam on Closing",
        ]
        .join("\n\n");
        assert_eq!(episode.transcript.as_deref(), Some(expected.as_str()));

        let stored = p.episode(&episode.id).await.unwrap();
        assert_eq!(stored, episode);
    }

    #[tokio::test]
    async fn test_segment_continuity_within_beat() {
        let previous = Arc::new(Mutex::new(Vec::new()));
        let log = previous.clone();
        let writer = FakeProvider::with_fn("test/writer", move |payload, _| {
            let prompt = &payload.messages.last().unwrap().content;
            let prev = prompt
                .split("Previous line:\n")
                .nth(1)
                .and_then(|rest| rest.lines().next())
                .unwrap_or_default()
                .to_string();
            log.lock().unwrap().push(prev);
            Ok(format!("line by {}", field(payload, "Speaker:")))
        });

        let outline = r#"{"beats": [{"title": "Only", "summary": "One beat"}]}"#;
        let p = pipeline(store(), FakeProvider::replying("test/outline", outline), writer);
        p.generate(
            "nb",
            &EpisodeProfile::new(2, 3),
            &SpeakerProfile::defaults(2),
            None,
            &CallOptions::default(),
        )
        .await
        .unwrap();

        let seen = previous.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].starts_with("(none"));
        assert_eq!(seen[1], "Alex: line by Alex");
        assert_eq!(seen[2], "Sam: line by Sam");
    }

    #[tokio::test]
    async fn test_segment_retried_in_place() {
        let writer = FakeProvider::scripted(
            "test/writer",
            vec![
                Err(ProviderError::new(FailureClass::Authentication, "flaky key")),
                Ok("recovered".to_string()),
            ],
        );
        let outline = r#"{"beats": [{"title": "Only"}]}"#;
        let p = pipeline(store(), FakeProvider::replying("test/outline", outline), writer.clone());

        let episode = p
            .generate(
                "nb",
                &EpisodeProfile::new(1, 2),
                &SpeakerProfile::defaults(1),
                None,
                &CallOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(episode.status, EpisodeStatus::Completed);
        assert_eq!(episode.segments.len(), 2);
        assert_eq!(writer.calls(), 3);
    }

    #[tokio::test]
    async fn test_repeated_segment_failure_fails_episode() {
        let writer = FakeProvider::with_fn("test/writer", |payload, _| {
            if field(payload, "Current beat:") == "Evidence" {
                Err(ProviderError::new(FailureClass::MalformedRequest, "rejected"))
            } else {
                Ok("fine".to_string())
            }
        });
        let store = store();
        let p = pipeline(store.clone(), FakeProvider::replying("test/outline", OUTLINE), writer);

        let err = p
            .generate(
                "nb",
                &EpisodeProfile::new(2, 6),
                &SpeakerProfile::defaults(2),
                None,
                &CallOptions::default(),
            )
            .await
            .unwrap_err();

        let episode_id = match &err {
            NotebookError::Podcast { episode_id, stage, source } => {
                assert_eq!(stage, "drafting");
                assert!(matches!(**source, NotebookError::ExternalService { .. }));
                episode_id.clone()
            }
            other => panic!("unexpected error: {other}"),
        };
        assert!(!err.prior_state_intact());

        let stored = p.episode(&episode_id).await.unwrap();
        assert_eq!(stored.status, EpisodeStatus::Failed);
        assert!(stored.transcript.is_none());
        assert!(stored.segments.is_empty());
        let detail = stored.error.unwrap();
        assert!(detail.starts_with("drafting: beat 2 segment 2"), "{detail}");
    }

    /// Episode store whose first save of a completed episode fails.
    struct FailingCompletion {
        inner: Arc<MemoryStore>,
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl EpisodeStore for FailingCompletion {
        async fn save_episode(&self, episode: &PodcastEpisode) -> Result<()> {
            if episode.status == EpisodeStatus::Completed
                && !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(NotebookError::Database("disk full".to_string()));
            }
            self.inner.save_episode(episode).await
        }

        async fn get_episode(&self, episode_id: &str) -> Result<Option<PodcastEpisode>> {
            self.inner.get_episode(episode_id).await
        }
    }

    #[tokio::test]
    async fn test_unsaved_completion_is_recorded_as_failed() {
        let store = store();
        let models = manager_with(
            vec![
                (ROLE_OUTLINE, vec![FakeProvider::replying("test/outline", OUTLINE)]),
                (ROLE_TRANSCRIPT_WRITER, vec![echo_writer()]),
            ],
            RetryPolicy::immediate(1),
        );
        let episodes = Arc::new(FailingCompletion {
            inner: store.clone(),
            failed: std::sync::atomic::AtomicBool::new(false),
        });
        let p = PodcastPipeline::new(
            store.clone(),
            Arc::new(models),
            episodes,
            Prompts::default(),
            PodcastSettings::default(),
        )
        .unwrap();

        let err = p
            .generate(
                "nb",
                &EpisodeProfile::new(2, 4),
                &SpeakerProfile::defaults(2),
                None,
                &CallOptions::default(),
            )
            .await
            .unwrap_err();

        let episode_id = match err {
            NotebookError::Podcast { episode_id, stage, source } => {
                assert_eq!(stage, "assembling");
                assert!(matches!(*source, NotebookError::Database(_)));
                episode_id
            }
            other => panic!("unexpected error: {other}"),
        };

        let stored = p.episode(&episode_id).await.unwrap();
        assert_eq!(stored.status, EpisodeStatus::Failed);
        assert!(stored.error.unwrap().starts_with("assembling: "));
        assert!(stored.transcript.is_none());
        assert!(stored.segments.is_empty());
    }

    #[tokio::test]
    async fn test_unusable_outline_fails_outlining() {
        let p = pipeline(store(), FakeProvider::replying("test/outline", "I cannot help"), echo_writer());
        let err = p
            .generate(
                "nb",
                &EpisodeProfile::new(2, 4),
                &SpeakerProfile::defaults(2),
                None,
                &CallOptions::default(),
            )
            .await
            .unwrap_err();

        match err {
            NotebookError::Podcast { episode_id, stage, .. } => {
                assert_eq!(stage, "outlining");
                let stored = p.episode(&episode_id).await.unwrap();
                assert_eq!(stored.status, EpisodeStatus::Failed);
                assert!(stored.error.unwrap().starts_with("outlining: "));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_fails_episode() {
        let writer = echo_writer().with_delay(Duration::from_millis(300));
        let p = pipeline(store(), FakeProvider::replying("test/outline", OUTLINE), writer);
        let options = CallOptions::default().with_timeout(Duration::from_millis(50));

        let err = p
            .generate("nb", &EpisodeProfile::new(2, 6), &SpeakerProfile::defaults(2), None, &options)
            .await
            .unwrap_err();
        match err {
            NotebookError::Podcast { episode_id, stage, source } => {
                assert_eq!(stage, "drafting");
                assert!(matches!(*source, NotebookError::Cancelled { .. }));
                let stored = p.episode(&episode_id).await.unwrap();
                assert_eq!(stored.status, EpisodeStatus::Failed);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_episode() {
        let p = pipeline(store(), FakeProvider::replying("test/outline", OUTLINE), echo_writer());
        assert!(matches!(p.episode("nope").await, Err(NotebookError::NotFound(_))));
    }
}
