//! Multi-speaker podcast episodes generated from notebook knowledge.
//!
//! An episode moves `pending → outlining → drafting → assembling → completed`, or to
//! `failed` from any stage. Beats are drafted concurrently, but every segment's position
//! is fixed when the turns are planned, so the transcript order never depends on which
//! model call finishes first.

mod episode;
mod pipeline;
mod profile;

pub use episode::{Beat, EpisodeStatus, EpisodeStore, PodcastEpisode, TranscriptSegment};
pub use pipeline::{plan_turns, PlannedTurn, PodcastPipeline};
pub use profile::{EpisodeProfile, SpeakerProfile, MAX_SPEAKERS};
