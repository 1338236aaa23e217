//! CLI entry point for Flowmate.
//!
//! This binary provides the `flowmate` command with subcommands for
//! inspecting the workflow catalog, checking trigger detection, and running
//! workflows against the demo plugins.

mod cli;
mod demo;
mod helpers;
mod repl;

use anyhow::{Context, Result};
use clap::Parser;
use flowmate_intent::{KeywordTriggerDetector, Orchestrator};
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::helpers::{build_orchestrator, init_tracing, load_config};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(&cli.config)?;
    let orchestrator = build_orchestrator(config)?;
    let _sweeper = orchestrator.spawn_sweeper();

    match cli.command {
        Commands::Catalog => cmd_catalog(&orchestrator),
        Commands::Detect { message, topics } => cmd_detect(&orchestrator, &message, &topics),
        Commands::Run {
            message,
            user,
            topics,
            json,
        } => cmd_run(&orchestrator, &message, &user, &topics, json).await,
        Commands::Chat { user } => repl::cmd_chat(&orchestrator, &user).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: catalog
// ---------------------------------------------------------------------------

fn cmd_catalog(orchestrator: &Orchestrator) -> Result<()> {
    let mut workflows: Vec<_> = orchestrator.catalog().iter().cloned().collect();
    workflows.sort_by(|a, b| a.id().cmp(b.id()));

    for wf in workflows {
        let tpl = &wf.template;
        let state = if tpl.active { "" } else { " (inactive)" };
        println!("{} -- {}{state}", tpl.id, tpl.name);
        if let Some(description) = &tpl.description {
            println!("  {description}");
        }
        println!("  phrases: {}", tpl.trigger.phrases.join(", "));
        for &idx in wf.plan.order() {
            let step = &tpl.steps[idx];
            let deps = if step.depends_on.is_empty() {
                String::new()
            } else {
                format!(" after {}", step.depends_on.join(", "))
            };
            let optional = if step.optional { " [optional]" } else { "" };
            println!("    {} -> {}{deps}{optional}", step.id, step.target);
        }
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: detect
// ---------------------------------------------------------------------------

fn cmd_detect(orchestrator: &Orchestrator, message: &str, topics: &[String]) -> Result<()> {
    let detector = KeywordTriggerDetector::new(
        orchestrator.catalog(),
        orchestrator.config().triggers.clone(),
    )
    .context("failed to build trigger detector")?;

    let mut scores = detector.score(message, topics);
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    for s in &scores {
        println!(
            "{:>6.2}  {}  (phrases {}, keywords {}{})",
            s.score,
            s.template_id,
            s.phrase_hits,
            s.keyword_hits,
            if s.topic_boosted { ", topic boost" } else { "" }
        );
    }

    match orchestrator.detect_trigger(message, topics) {
        Some(wf) => println!("\nselected: {}", wf.id()),
        None => println!("\nno workflow triggered"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(
    orchestrator: &Orchestrator,
    message: &str,
    user: &str,
    topics: &[String],
    json: bool,
) -> Result<()> {
    let Some(wf) = orchestrator.detect_trigger(message, topics) else {
        println!("No workflow matches that message.");
        return Ok(());
    };
    info!(template_id = %wf.id(), "workflow detected");

    let execution = orchestrator
        .run_workflow(&wf.template, message, user)
        .await
        .context("workflow was not started")?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&execution).context("failed to render execution")?;
        println!("{rendered}");
    } else {
        print!("{}", execution.summary());
    }
    Ok(())
}
