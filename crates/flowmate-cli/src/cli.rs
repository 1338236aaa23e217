//! CLI argument definitions for Flowmate.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Flowmate -- cross-plugin workflow orchestration.
#[derive(Parser)]
#[command(
    name = "flowmate",
    version,
    about = "Flowmate -- cross-plugin workflow orchestration",
    long_about = "Detects multi-step workflows in chat messages and runs them across \
                  productivity plugins with retries and partial success."
)]
pub struct Cli {
    /// Configuration file with `[engine]` and `[triggers]` sections.
    #[arg(long, short, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the registered workflow templates and their plans.
    Catalog,

    /// Show how a message scores against every workflow.
    Detect {
        /// The chat message to classify.
        message: String,

        /// Recent conversation topics (repeatable).
        #[arg(long = "topic", short)]
        topics: Vec<String>,
    },

    /// Detect and run a workflow against the demo plugins.
    Run {
        /// The chat message that should trigger a workflow.
        message: String,

        /// User the execution is attributed to.
        #[arg(long, short, default_value = "demo-user")]
        user: String,

        /// Recent conversation topics (repeatable).
        #[arg(long = "topic", short)]
        topics: Vec<String>,

        /// Print the final execution record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Interactive chat loop; earlier messages become topics for later ones.
    Chat {
        /// User the executions are attributed to.
        #[arg(long, short, default_value = "demo-user")]
        user: String,
    },
}
