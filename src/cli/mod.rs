//! CLI module for notebook-ai.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// notebook-ai - grounded chat and podcast generation over notebook knowledge
#[derive(Parser, Debug)]
#[command(name = "notebook-ai")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "NOTEBOOK_AI_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question grounded in a notebook
    Chat {
        /// Notebook to ground the answer in
        notebook_id: String,

        /// The question to ask
        question: String,

        /// Model to use instead of the chat routing, as provider/model
        #[arg(short, long)]
        model: Option<String>,

        /// Continue an existing thread
        #[arg(short, long)]
        thread: Option<String>,

        /// Print the answer as it is generated
        #[arg(short, long)]
        stream: bool,

        /// Knowledge to include (full_text, summary_only, insights_only)
        #[arg(long)]
        mode: Option<String>,
    },

    /// Generate and inspect podcast episodes
    Podcasts {
        #[command(subcommand)]
        action: PodcastAction,
    },

    /// List notebooks in the database
    Notebooks {
        /// Include archived notebooks
        #[arg(short, long)]
        all: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum PodcastAction {
    /// Generate an episode from a notebook
    Generate {
        /// Notebook to discuss
        notebook_id: String,

        /// Number of speakers (1-4)
        #[arg(short, long, default_value = "2")]
        speakers: usize,

        /// Number of transcript segments (defaults to podcast.default_segment_target)
        #[arg(long)]
        segments: Option<usize>,

        /// Model to use for every stage, as provider/model
        #[arg(short, long)]
        model: Option<String>,

        /// Free-form style direction for the writers
        #[arg(long)]
        style: Option<String>,
    },

    /// Show a stored episode
    Show {
        /// Episode ID
        episode_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the current configuration to the config file
    Init,
}
