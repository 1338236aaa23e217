//! Subcommand: `flowmate chat` -- interactive chat loop.
//!
//! Every line is checked for a workflow trigger; matches start in the
//! background and report progress as events arrive, so `/cancel` works while
//! a run is still going.  Recent messages feed the detector as topics.

use std::collections::VecDeque;
use std::io::Write as _;

use anyhow::{Context, Result};
use flowmate_intent::Orchestrator;
use flowmate_kernel::Event;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

/// Number of earlier messages offered to the detector as topics.
const TOPIC_WINDOW: usize = 5;

/// Run the interactive chat loop.
pub async fn cmd_chat(orchestrator: &Orchestrator, user: &str) -> Result<()> {
    println!();
    println!("  Flowmate v{}", env!("CARGO_PKG_VERSION"));
    println!("  Describe what you need, or type /help.");
    println!();

    let mut events = orchestrator.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut topics: VecDeque<String> = VecDeque::with_capacity(TOPIC_WINDOW);

    prompt();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read input")? else {
                    break;
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    prompt();
                    continue;
                }
                if trimmed == "quit" || trimmed == "exit" {
                    info!("user requested exit");
                    break;
                }
                if let Some(command) = trimmed.strip_prefix('/') {
                    handle_command(orchestrator, user, command).await;
                } else {
                    handle_message(orchestrator, user, trimmed, &topics).await;
                    if topics.len() == TOPIC_WINDOW {
                        topics.pop_front();
                    }
                    topics.push_back(trimmed.to_string());
                }
                prompt();
            }
            event = events.recv() => match event {
                Ok(event) => report(orchestrator, &event).await,
                Err(RecvError::Lagged(missed)) => warn!(missed, "progress events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn handle_message(
    orchestrator: &Orchestrator,
    user: &str,
    message: &str,
    topics: &VecDeque<String>,
) {
    let topics: Vec<String> = topics.iter().cloned().collect();
    let Some(wf) = orchestrator.detect_trigger(message, &topics) else {
        println!("  (no workflow for that; try /help)");
        return;
    };

    match orchestrator.start_workflow(&wf.template, message, user).await {
        Ok(execution) => println!("  Starting {} [{}]", execution.template_name, execution.id),
        Err(e) => println!("  Could not start {}: {e}", wf.template.name),
    }
}

async fn handle_command(orchestrator: &Orchestrator, user: &str, command: &str) {
    let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
    match name {
        "status" => {
            let active = orchestrator.list_active(user).await;
            if active.is_empty() {
                println!("  No running workflows.");
            }
            for exec in active {
                println!("  {} {} ({})", exec.id, exec.template_name, exec.state);
            }
        }
        "show" => match arg.trim().parse::<Uuid>() {
            Ok(id) => match orchestrator.require_execution(&id).await {
                Ok(exec) => print!("{}", exec.summary()),
                Err(e) => println!("  {e}"),
            },
            Err(_) => println!("  usage: /show <execution-id>"),
        },
        "cancel" => match arg.trim().parse::<Uuid>() {
            Ok(id) if orchestrator.cancel_execution(&id).await => {
                println!("  Cancelling {id}; running steps will finish first.")
            }
            Ok(id) => println!("  {id} is not running."),
            Err(_) => println!("  usage: /cancel <execution-id>"),
        },
        "catalog" => {
            for wf in orchestrator.catalog().iter() {
                println!("  {} -- {}", wf.id(), wf.template.name);
            }
        }
        _ => {
            println!();
            println!("  Commands:");
            println!("    /status           - List your running workflows");
            println!("    /show <id>        - Show a workflow's steps");
            println!("    /cancel <id>      - Cancel a running workflow");
            println!("    /catalog          - List available workflows");
            println!("    quit / exit       - Leave the chat");
            println!();
        }
    }
}

async fn report(orchestrator: &Orchestrator, event: &Event) {
    match event {
        Event::StepFinished {
            step_id,
            status,
            attempts,
            ..
        } => {
            let retries = if *attempts > 1 {
                format!(" after {attempts} attempts")
            } else {
                String::new()
            };
            println!("\n  - {step_id}: {status}{retries}");
        }
        Event::ExecutionFinished { execution_id, .. } => {
            if let Some(exec) = orchestrator.get_execution(execution_id).await {
                println!();
                print!("{}", exec.summary());
            }
            prompt();
        }
        _ => {}
    }
}
