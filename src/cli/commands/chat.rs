//! Chat command implementation.

use super::{parse_model, report_failure};
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::context::SelectionMode;
use crate::engine::Engine;
use anyhow::Result;
use std::io::Write;

/// Run the chat command: one turn on a new or resumed thread.
pub async fn run_chat(
    notebook_id: &str,
    question: &str,
    model: Option<&str>,
    thread: Option<&str>,
    stream: bool,
    mode: Option<&str>,
    settings: Settings,
) -> Result<()> {
    let model_override = parse_model(model)?;
    let mode: Option<SelectionMode> = match mode {
        Some(m) => match m.parse() {
            Ok(mode) => Some(mode),
            Err(e) => {
                Output::error(&e);
                anyhow::bail!(e);
            }
        },
        None => None,
    };

    if let Err(e) = preflight::check(Operation::Chat, &settings, model_override.as_ref()) {
        Output::error(&e.to_string());
        return Err(e.into());
    }

    let engine = Engine::new(settings)?;
    let conversations = engine.conversations();

    let mut state = match thread {
        Some(thread_id) => {
            let state = conversations.resume(thread_id).await?;
            if state.notebook_id != notebook_id {
                let msg = format!(
                    "Thread {} belongs to notebook {}, not {}",
                    thread_id, state.notebook_id, notebook_id
                );
                Output::error(&msg);
                anyhow::bail!(msg);
            }
            state
        }
        None => {
            let mut config = engine.settings().context.clone();
            if let Some(mode) = mode {
                config.mode = mode;
            }
            conversations.start_thread(notebook_id, config, None).await?
        }
    };
    if let Some(mode) = mode {
        state.context_config.mode = mode;
    }
    if model_override.is_some() {
        state.model_override = model_override;
    }

    let options = conversations.default_call_options();
    let result = if stream {
        println!();
        let result = conversations
            .advance_streaming(&state, question, &options, |chunk| {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            })
            .await;
        println!("\n");
        result
    } else {
        let spinner = Output::spinner("Thinking...");
        let result = conversations.advance(&state, question, &options).await;
        spinner.finish_and_clear();
        if let Ok((_, response)) = &result {
            println!("\n{}\n", response.text);
        }
        result
    };

    match result {
        Ok((next, response)) => {
            Output::kv("Model", &response.model);
            Output::kv("Thread", &next.thread_id);
            Output::kv("Turns", &next.turn_count().to_string());
            Ok(())
        }
        Err(e) => {
            report_failure("Failed to generate answer", &e);
            Err(e.into())
        }
    }
}
