//! Integration tests for the flowmate-intent crate.
//!
//! These exercise the orchestrator's admission rules, event stream, time
//! limits and trigger selection against the built-in catalog.

use std::sync::Arc;
use std::time::Duration;

use flowmate_intent::builtin::{self, builtin_catalog};
use flowmate_intent::{
    ExecutionState, FlowmateConfig, IntentError, Orchestrator, StepErrorKind, StepStatus,
    StepTemplate, WorkflowCatalog, WorkflowTemplate,
};
use flowmate_kernel::{Event, FnExecutor, StepError, StepExecutorRegistry, StepParams};
use tokio::sync::Notify;

// ═══════════════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════════════

/// Executors for every function the built-in catalog references.
fn builtin_registry() -> StepExecutorRegistry {
    let registry = StepExecutorRegistry::new();
    let ok = |text: &'static str| {
        move |_: StepParams| async move { Ok::<_, StepError>(text.to_string()) }
    };
    registry
        .register(FnExecutor::new("meetings").function("get_transcript", ok("transcript")))
        .unwrap();
    registry
        .register(
            FnExecutor::new("assistant")
                .function("propose_tasks", ok(r#"{"tasks":["t"]}"#))
                .function(
                    "draft_reply",
                    ok(r#"{"subject":"Budget","body":"Thanks!"}"#),
                )
                .function("summarize", ok("digest")),
        )
        .unwrap();
    registry
        .register(
            FnExecutor::new("tasks")
                .function("create_batch", ok("created"))
                .function("list_completed", ok("done"))
                .function("create", ok("task"))
                .function("create_list", ok(r#"{"id":"list-1"}"#)),
        )
        .unwrap();
    registry
        .register(
            FnExecutor::new("calendar")
                .function("list_events", ok("events"))
                .function("create_event", ok(r#"{"id":"evt-1"}"#)),
        )
        .unwrap();
    registry
        .register(FnExecutor::new("notes").function("create", ok(r#"{"url":"https://notes/1"}"#)))
        .unwrap();
    registry
        .register(
            FnExecutor::new("mail")
                .function("search", ok("thread"))
                .function("send", ok("sent")),
        )
        .unwrap();
    registry
        .register(
            FnExecutor::new("files")
                .function(
                    "create_folder",
                    ok(r#"{"id":"f-1","url":"https://files/f-1"}"#),
                )
                .function("search", ok("files")),
        )
        .unwrap();
    registry
        .register(FnExecutor::new("search").function("query", ok("results")))
        .unwrap();
    registry
}

fn topics(items: &[&str]) -> Vec<String> {
    items.iter().map(|t| t.to_string()).collect()
}

fn gated_template() -> WorkflowTemplate {
    WorkflowTemplate::new("gated", "Gated")
        .step(StepTemplate::new("wait", "Wait", "gate", "wait"))
}

fn gated_registry(release: Arc<Notify>) -> StepExecutorRegistry {
    let registry = StepExecutorRegistry::new();
    registry
        .register(FnExecutor::new("gate").function("wait", move |_| {
            let release = Arc::clone(&release);
            async move {
                release.notified().await;
                Ok("released".to_string())
            }
        }))
        .unwrap();
    registry
}

// ═══════════════════════════════════════════════════════════════════════
//  Built-in catalog end to end
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn builtin_workflows_complete_against_stub_executors() {
    let orch = Orchestrator::new(
        builtin_catalog().unwrap(),
        builtin_registry(),
        FlowmateConfig::default(),
    )
    .unwrap();

    let cases = [
        ("meeting to tasks please", builtin::MEETING_TO_TASKS),
        ("do my weekly review", builtin::WEEKLY_REVIEW),
        ("follow up with bob@example.com about the budget", builtin::EMAIL_FOLLOW_UP),
        (
            "kick off a project about Apollo tomorrow with ann@example.com",
            builtin::PROJECT_KICKOFF,
        ),
        (
            "find and share \"pricing\" documents with cfo@example.com",
            builtin::RESEARCH_AND_SHARE,
        ),
    ];

    for (message, expected) in cases {
        let wf = orch
            .detect_trigger(message, &[])
            .unwrap_or_else(|| panic!("no workflow detected for {message:?}"));
        assert_eq!(wf.id(), expected, "wrong workflow for {message:?}");

        let exec = orch.run_workflow(&wf.template, message, "u1").await.unwrap();
        assert_eq!(
            exec.state,
            ExecutionState::Completed,
            "{message:?}:\n{}",
            exec.summary()
        );
    }
}

#[tokio::test]
async fn kickoff_without_topic_skips_dependent_steps() {
    let orch = Orchestrator::new(
        builtin_catalog().unwrap(),
        builtin_registry(),
        FlowmateConfig::default(),
    )
    .unwrap();
    let wf = orch.catalog().get(builtin::PROJECT_KICKOFF).unwrap();

    // No "about X", no date, no email: folder, plan, task list and meeting
    // all lack a required parameter.
    let exec = orch.run_workflow(&wf.template, "kick off", "u1").await.unwrap();
    assert_eq!(exec.state, ExecutionState::Failed);
    for step in &exec.steps {
        assert_eq!(step.status, StepStatus::Skipped, "{}", step.step_id);
    }
    let folder = exec.step("create_folder").unwrap();
    assert_eq!(folder.error_kind, Some(StepErrorKind::MissingPrecondition));
    assert!(folder.error.as_deref().unwrap().contains("name"));
}

// ═══════════════════════════════════════════════════════════════════════
//  Trigger detection
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn detection_is_deterministic_and_uses_topics() {
    let orch = Orchestrator::new(
        builtin_catalog().unwrap(),
        builtin_registry(),
        FlowmateConfig::default(),
    )
    .unwrap();

    assert!(orch.detect_trigger("hi, how are you?", &[]).is_none());
    assert!(orch.detect_trigger("send me a recap", &[]).is_none());

    let boosted = orch
        .detect_trigger("send me a recap", &topics(&["planning next week"]))
        .unwrap();
    assert_eq!(boosted.id(), builtin::WEEKLY_REVIEW);

    let first = orch.detect_trigger("weekly review", &[]).map(|w| w.id().to_string());
    for _ in 0..10 {
        let again = orch.detect_trigger("weekly review", &[]).map(|w| w.id().to_string());
        assert_eq!(again, first);
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Admission and events
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn per_user_cap_is_enforced() {
    let release = Arc::new(Notify::new());
    let mut config = FlowmateConfig::default();
    config.engine.max_active_per_user = 1;
    let tpl = gated_template();
    let orch = Orchestrator::new(
        WorkflowCatalog::from_templates([tpl.clone()]).unwrap(),
        gated_registry(Arc::clone(&release)),
        config,
    )
    .unwrap();

    let first = orch.start_workflow(&tpl, "go", "alice").await.unwrap();
    let err = orch.start_workflow(&tpl, "go", "alice").await.unwrap_err();
    assert!(matches!(
        err,
        IntentError::TooManyActiveExecutions { active: 1, limit: 1, .. }
    ));

    // Other users are unaffected.
    let other = orch.start_workflow(&tpl, "go", "bob").await.unwrap();
    assert_eq!(orch.list_active("alice").await.len(), 1);

    release.notify_waiters();
    for id in [first.id, other.id] {
        let done = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let exec = orch.get_execution(&id).await.unwrap();
                if exec.is_terminal() {
                    return exec;
                }
                // A waiter registered after the broadcast needs another nudge.
                release.notify_waiters();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(done.state, ExecutionState::Completed);
    }

    assert!(orch.start_workflow(&tpl, "again", "alice").await.is_ok());
    release.notify_waiters();
}

#[tokio::test]
async fn events_bracket_the_run() {
    let registry = StepExecutorRegistry::new();
    registry
        .register(FnExecutor::new("p").function("f", |_| async { Ok("x".to_string()) }))
        .unwrap();
    let tpl = WorkflowTemplate::new("t", "T")
        .step(StepTemplate::new("a", "A", "p", "f"))
        .step(StepTemplate::new("b", "B", "p", "f").depends_on("a"));
    let orch = Orchestrator::new(
        WorkflowCatalog::from_templates([tpl.clone()]).unwrap(),
        registry,
        FlowmateConfig::default(),
    )
    .unwrap();

    let mut rx = orch.subscribe();
    let exec = orch.run_workflow(&tpl, "go", "u1").await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.iter().all(|e| e.execution_id() == exec.id));
    assert!(matches!(
        events.first().map(|e| &**e),
        Some(Event::ExecutionStarted { .. })
    ));
    match events.last().map(|e| &**e) {
        Some(Event::ExecutionFinished { status, .. }) => assert_eq!(status, "completed"),
        other => panic!("unexpected last event: {other:?}"),
    }
    let finished: Vec<&str> = events
        .iter()
        .filter_map(|e| match &**e {
            Event::StepFinished { step_id, .. } => Some(step_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec!["a", "b"]);
}

// ═══════════════════════════════════════════════════════════════════════
//  Time limits
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn step_timeout_counts_as_transient_failure() {
    let registry = StepExecutorRegistry::new();
    registry
        .register(FnExecutor::new("slow").function("call", |_| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok("late".to_string())
        }))
        .unwrap();
    let tpl = WorkflowTemplate::new("slow", "Slow")
        .step(StepTemplate::new("call", "Call", "slow", "call").max_retries(1));
    let mut config = FlowmateConfig::default();
    config.engine.step_timeout_secs = 1;
    config.engine.base_retry_delay_ms = 1;
    let catalog = WorkflowCatalog::from_templates([tpl.clone()]).unwrap();
    let orch = Orchestrator::new(catalog, registry, config).unwrap();

    let exec = orch.run_workflow(&tpl, "go", "u1").await.unwrap();
    let step = exec.step("call").unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.attempts, 2, "timeouts are retried");
    assert_eq!(step.error_kind, Some(StepErrorKind::TransientStepFailure));
    assert!(step.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(exec.state, ExecutionState::Failed);
}

#[tokio::test]
async fn deadline_skips_steps_not_yet_started() {
    let registry = StepExecutorRegistry::new();
    registry
        .register(
            FnExecutor::new("p")
                .function("slow", |_| async {
                    tokio::time::sleep(Duration::from_millis(1_200)).await;
                    Ok("ok".to_string())
                })
                .function("fast", |_| async { Ok("ok".to_string()) }),
        )
        .unwrap();
    let tpl = WorkflowTemplate::new("t", "T")
        .step(StepTemplate::new("first", "First", "p", "slow"))
        .step(StepTemplate::new("second", "Second", "p", "fast").depends_on("first"));
    let mut config = FlowmateConfig::default();
    config.engine.execution_deadline_secs = 1;
    let catalog = WorkflowCatalog::from_templates([tpl.clone()]).unwrap();
    let orch = Orchestrator::new(catalog, registry, config).unwrap();

    let exec = orch.run_workflow(&tpl, "go", "u1").await.unwrap();
    assert_eq!(exec.step("first").unwrap().status, StepStatus::Succeeded);
    let second = exec.step("second").unwrap();
    assert_eq!(second.status, StepStatus::Skipped);
    assert_eq!(second.error_kind, Some(StepErrorKind::DeadlineExceeded));
    assert_eq!(exec.state, ExecutionState::PartiallyCompleted);
}

#[tokio::test]
async fn cleanup_purges_finished_runs_only() {
    let registry = StepExecutorRegistry::new();
    registry
        .register(FnExecutor::new("p").function("f", |_| async { Ok("x".to_string()) }))
        .unwrap();
    let tpl = WorkflowTemplate::new("t", "T").step(StepTemplate::new("a", "A", "p", "f"));
    let orch = Orchestrator::new(
        WorkflowCatalog::from_templates([tpl.clone()]).unwrap(),
        registry,
        FlowmateConfig::default(),
    )
    .unwrap();

    let exec = orch.run_workflow(&tpl, "go", "u1").await.unwrap();
    assert_eq!(orch.store().cleanup(Duration::from_secs(3600)).await, 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(orch.store().cleanup(Duration::from_millis(10)).await, 1);
    assert!(orch.get_execution(&exec.id).await.is_none());
}
