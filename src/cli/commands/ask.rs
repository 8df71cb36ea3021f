//! Ask command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::rag::{ChatQuery, ChatReply};
use anyhow::Result;
use futures::StreamExt;
use std::io::Write;

/// Run the ask command.
pub async fn run_ask(
    job_id: &str,
    question: &str,
    model: Option<String>,
    stream: bool,
    settings: Settings,
) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Ask, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'chatpye doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let orchestrator = Orchestrator::new(settings)?;

    let mut query = ChatQuery::for_job(job_id, question);
    if let Some(model) = model {
        query = query.with_model(model);
    }

    if stream {
        return ask_streaming(&orchestrator, &query).await;
    }

    let spinner = Output::spinner("Thinking...");
    match orchestrator.query().ask(&query).await {
        Ok(answer) => {
            spinner.finish_and_clear();
            println!("\n{}\n", answer.answer);
            Output::answer_meta(&answer.meta);
        }
        Err(e) => {
            spinner.finish_and_clear();
            Output::error(&format!("Failed to generate answer: {}", e));
            return Err(e.into());
        }
    }

    Ok(())
}

async fn ask_streaming(orchestrator: &Orchestrator, query: &ChatQuery) -> Result<()> {
    let reply = match orchestrator.query().ask_stream(query).await {
        Ok(reply) => reply,
        Err(e) => {
            Output::error(&format!("Failed to generate answer: {}", e));
            return Err(e.into());
        }
    };

    match reply {
        ChatReply::Cached(answer) => {
            println!("\n{}\n", answer.answer);
            Output::answer_meta(&answer.meta);
        }
        ChatReply::Streaming(mut answer) => {
            println!();
            let mut stdout = std::io::stdout();
            while let Some(fragment) = answer.fragments.next().await {
                match fragment {
                    Ok(text) => {
                        print!("{}", text);
                        stdout.flush()?;
                    }
                    Err(e) => {
                        println!();
                        Output::error(&format!("Generation stopped: {}", e));
                        return Err(e.into());
                    }
                }
            }
            println!("\n");
            Output::answer_meta(&answer.meta);
        }
    }

    Ok(())
}
