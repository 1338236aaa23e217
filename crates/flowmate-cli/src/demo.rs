//! Demo plugins.
//!
//! Canned stand-ins for the productivity services the built-in workflows
//! call, so the CLI can run every workflow end to end without credentials.
//! Results have the same shape a real plugin would return: plain text for
//! `result` outputs, JSON objects where a step maps named fields.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use flowmate_kernel::{FnExecutor, StepError, StepExecutorRegistry, StepParams};
use serde_json::json;
use tracing::warn;

/// A registry with one demo executor per plugin the built-in catalog uses.
pub fn demo_registry() -> StepExecutorRegistry {
    let registry = StepExecutorRegistry::new();
    for executor in [
        meetings(),
        assistant(),
        tasks(),
        calendar(),
        notes(),
        mail(),
        files(),
        search(),
    ] {
        // Plugin names are distinct, so registration cannot collide.
        if let Err(e) = registry.register(executor) {
            warn!(error = %e, "demo executor not registered");
        }
    }
    registry
}

fn text(params: &StepParams, key: &str) -> String {
    match params.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn slug(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

fn meetings() -> FnExecutor {
    FnExecutor::new("meetings").function("get_transcript", |params| async move {
        let topic = text(&params, "topic");
        let subject = if topic.is_empty() {
            "team sync".to_string()
        } else {
            topic
        };
        Ok(format!(
            "Transcript: {subject}\n\
             Dana: the launch checklist is nearly done.\n\
             ACTION: finish the launch checklist\n\
             Lee: we still need numbers for the board.\n\
             ACTION: prepare the board metrics"
        ))
    })
}

fn assistant() -> FnExecutor {
    FnExecutor::new("assistant")
        .function("propose_tasks", |params| async move {
            let tasks: Vec<String> = text(&params, "transcript")
                .lines()
                .filter_map(|line| line.strip_prefix("ACTION:"))
                .map(|t| t.trim().to_string())
                .collect();
            Ok(json!({ "tasks": tasks }).to_string())
        })
        .function("draft_reply", |params| async move {
            let tone = text(&params, "tone");
            let opener = if tone == "formal" {
                "Dear colleague,"
            } else {
                "Hi there!"
            };
            let thread = text(&params, "thread");
            Ok(json!({
                "subject": "Following up",
                "body": format!("{opener}\n\nJust checking in on the thread below.\n\n{thread}"),
            })
            .to_string())
        })
        .function("summarize", |params| async move {
            let input = text(&params, "text");
            let lines: Vec<&str> = input.lines().filter(|l| !l.trim().is_empty()).collect();
            Ok(format!(
                "Digest of {} sources:\n{}",
                lines.len(),
                lines.join("\n")
            ))
        })
}

fn tasks() -> FnExecutor {
    FnExecutor::new("tasks")
        .function("create_batch", |params| async move {
            let raw = text(&params, "tasks");
            let items: Vec<String> = match serde_json::from_str(&raw) {
                Ok(items) => items,
                Err(e) => {
                    return Err(StepError::terminal(format!("tasks must be a JSON list: {e}")));
                }
            };
            let assignee = text(&params, "assignee");
            let owner = if assignee.is_empty() {
                "you".to_string()
            } else {
                assignee
            };
            Ok(format!("created {} tasks for {owner}", items.len()))
        })
        .function("list_completed", |params| async move {
            Ok(format!(
                "- Closed the Q3 budget review (since {})\n- Shipped onboarding flow",
                text(&params, "since")
            ))
        })
        .function("create", |params| async move {
            Ok(json!({ "id": format!("task-{}", slug(&text(&params, "title"))) }).to_string())
        })
        .function("create_list", |params| async move {
            Ok(json!({ "id": format!("list-{}", slug(&text(&params, "name"))) }).to_string())
        })
}

fn calendar() -> FnExecutor {
    FnExecutor::new("calendar")
        .function("list_events", |params| async move {
            Ok(format!(
                "{}: Planning\n{}: Retro",
                text(&params, "start"),
                text(&params, "end")
            ))
        })
        .function("create_event", |params| async move {
            Ok(json!({
                "id": format!(
                    "evt-{}-{}",
                    text(&params, "date"),
                    slug(&text(&params, "title"))
                ),
            })
            .to_string())
        })
}

fn notes() -> FnExecutor {
    FnExecutor::new("notes").function("create", |params| async move {
        Ok(json!({ "url": format!("https://notes.example/{}", slug(&text(&params, "title"))) })
            .to_string())
    })
}

fn mail() -> FnExecutor {
    FnExecutor::new("mail")
        .function("search", |params| async move {
            let from = text(&params, "from");
            Ok(format!("From: {from}\nSubject: Budget\n\nCould you send the revised numbers?"))
        })
        .function("send", |params| async move {
            let to = text(&params, "to");
            if to.is_empty() {
                return Err(StepError::terminal("no recipient"));
            }
            Ok(format!("sent \"{}\" to {to}", text(&params, "subject")))
        })
}

fn files() -> FnExecutor {
    FnExecutor::new("files")
        .function("create_folder", |params| async move {
            let id = format!("fld-{}", slug(&text(&params, "name")));
            Ok(json!({ "id": id, "url": format!("https://files.example/{id}") }).to_string())
        })
        .function("search", |params| async move {
            Ok(format!("drive: {}-overview.pdf", slug(&text(&params, "q"))))
        })
}

/// The search backend drops the first request it sees, so a run shows a
/// retry in action.
fn search() -> FnExecutor {
    let calls = Arc::new(AtomicU32::new(0));
    FnExecutor::new("search").function("query", move |params| {
        let calls = Arc::clone(&calls);
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StepError::transient("search backend warming up"));
            }
            let q = text(&params, "q");
            Ok(format!("intranet: {q} handbook\nintranet: {q} FAQ"))
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
