//! Podcast command implementation.

use super::{parse_model, report_failure};
use crate::cli::output::content_preview;
use crate::cli::preflight::{self, Operation};
use crate::cli::{Output, PodcastAction};
use crate::config::Settings;
use crate::engine::Engine;
use crate::podcast::{EpisodeProfile, EpisodeStatus, PodcastEpisode, SpeakerProfile, MAX_SPEAKERS};
use anyhow::Result;

/// Run a podcast subcommand.
pub async fn run_podcast(action: &PodcastAction, settings: Settings) -> Result<()> {
    match action {
        PodcastAction::Generate {
            notebook_id,
            speakers,
            segments,
            model,
            style,
        } => generate(notebook_id, *speakers, *segments, model.as_deref(), style.as_deref(), settings).await,
        PodcastAction::Show { episode_id } => show(episode_id, settings).await,
    }
}

/// Default roster for `count` speakers. Counts past the supported maximum are padded
/// so that profile validation reports them.
fn roster(count: usize) -> Vec<SpeakerProfile> {
    let mut speakers = SpeakerProfile::defaults(count);
    for n in MAX_SPEAKERS..count {
        speakers.push(SpeakerProfile::new(format!("Guest {}", n + 1), "A guest", "curious"));
    }
    speakers
}

async fn generate(
    notebook_id: &str,
    speaker_count: usize,
    segments: Option<usize>,
    model: Option<&str>,
    style: Option<&str>,
    settings: Settings,
) -> Result<()> {
    let model_override = parse_model(model)?;

    if let Err(e) = preflight::check(Operation::Podcast, &settings, model_override.as_ref()) {
        Output::error(&e.to_string());
        return Err(e.into());
    }

    let target = segments.unwrap_or(settings.podcast.default_segment_target);
    let mut profile = EpisodeProfile::new(speaker_count, target);
    if let Some(style) = style {
        profile = profile.with_style(style);
    }
    let speakers = roster(speaker_count);

    let engine = Engine::new(settings)?;
    let pipeline = engine.podcasts();

    let spinner = Output::spinner(&format!(
        "Generating a {}-speaker episode ({} segments)...",
        speaker_count, target
    ));
    let result = pipeline
        .generate(
            notebook_id,
            &profile,
            &speakers,
            model_override.as_ref(),
            &pipeline.default_call_options(),
        )
        .await;
    spinner.finish_and_clear();

    match result {
        Ok(episode) => {
            print_episode(&episode);
            Output::success(&format!("Episode {} completed", episode.id));
            Ok(())
        }
        Err(e) => {
            report_failure("Failed to generate episode", &e);
            Err(e.into())
        }
    }
}

async fn show(episode_id: &str, settings: Settings) -> Result<()> {
    let engine = Engine::new(settings)?;
    match engine.podcasts().episode(episode_id).await {
        Ok(episode) => {
            print_episode(&episode);
            Ok(())
        }
        Err(e) => {
            Output::error(&e.to_string());
            Err(e.into())
        }
    }
}

fn print_episode(episode: &PodcastEpisode) {
    Output::header(&format!("Episode {}", episode.id));
    Output::kv("Notebook", &episode.notebook_id);
    Output::kv("Status", episode.status.as_str());
    Output::kv(
        "Speakers",
        &episode
            .speakers
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    );
    Output::kv("Created", &episode.created_at.format("%Y-%m-%d %H:%M").to_string());
    if let Some(error) = &episode.error {
        Output::kv("Error", error);
    }

    if !episode.beats.is_empty() {
        Output::header("Outline");
        for (i, beat) in episode.beats.iter().enumerate() {
            Output::list_item(&format!("{}. {}", i + 1, beat.title));
            if !beat.summary.is_empty() {
                println!("     {}", content_preview(&beat.summary, 100));
            }
        }
    }

    if episode.status == EpisodeStatus::Completed {
        Output::header("Transcript");
        println!();
        for segment in &episode.segments {
            Output::speaker_line(&segment.speaker, &segment.text);
        }
    }
}
