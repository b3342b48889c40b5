//! notebook-ai - AI generation core for notebook knowledge
//!
//! Turns a notebook's sources, notes and insights into grounded conversational
//! answers and multi-speaker podcast episodes, routing every generation step to
//! interchangeable model providers with retry and fallback.
//!
//! # Architecture
//!
//! - `config` - Settings and prompt templates
//! - `knowledge` - Notebooks, knowledge items and the read-only store they come from
//! - `context` - Bounded context assembly
//! - `model` - Model routing, rate limiting, retry and providers
//! - `conversation` - Resumable, checkpointed conversation threads
//! - `podcast` - Outline, drafting and assembly of podcast episodes
//! - `storage` - SQLite and in-memory stores
//! - `engine` - Wiring of all of the above from [`config::Settings`]
//!
//! # Example
//!
//! ```rust,no_run
//! use notebook_ai::config::Settings;
//! use notebook_ai::context::ContextConfig;
//! use notebook_ai::engine::Engine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new(Settings::load()?)?;
//!     let chat = engine.conversations();
//!
//!     let thread = chat.start_thread("notebook-1", ContextConfig::default(), None).await?;
//!     let (thread, answer) = chat
//!         .advance(&thread, "What are the key findings?", &chat.default_call_options())
//!         .await?;
//!     println!("{}\n(thread {})", answer.text, thread.thread_id);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod knowledge;
pub mod model;
pub mod podcast;
pub mod storage;

pub use error::{NotebookError, Result};
