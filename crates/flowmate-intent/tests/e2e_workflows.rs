//! End-to-end workflow scenarios.
//!
//! Every test drives a real [`Orchestrator`] against in-process executors:
//! real tokio tasks, real waves, real retries with (short) backoff delays.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flowmate_intent::builtin;
use flowmate_intent::{
    ExecutionState, FlowmateConfig, Orchestrator, StepErrorKind, StepStatus, StepTemplate,
    WorkflowCatalog, WorkflowExecution, WorkflowTemplate,
};
use flowmate_kernel::{FnExecutor, StepError, StepExecutor, StepExecutorRegistry, StepParams};
use futures::future::{Ready, ready};
use tokio::sync::{Barrier, Mutex, Notify};
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════════════

fn fast_config() -> FlowmateConfig {
    let mut config = FlowmateConfig::default();
    config.engine.base_retry_delay_ms = 1;
    config.engine.max_retry_delay_ms = 4;
    config
}

fn orchestrator(
    templates: Vec<WorkflowTemplate>,
    registry: StepExecutorRegistry,
) -> Orchestrator {
    let catalog = WorkflowCatalog::from_templates(templates).expect("templates must register");
    Orchestrator::new(catalog, registry, fast_config()).expect("executors must cover the catalog")
}

async fn wait_terminal(orch: &Orchestrator, id: Uuid) -> WorkflowExecution {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(exec) = orch.get_execution(&id).await {
                if exec.is_terminal() {
                    return exec;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("execution must finish")
}

fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

/// Succeeds with `output` and counts its calls.
fn counted(
    counter: &Arc<AtomicU32>,
    output: &'static str,
) -> impl Fn(StepParams) -> Ready<Result<String, StepError>> + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        ready(Ok(output.to_string()))
    }
}

/// An executor whose only function waits for a release signal.
struct GatedExecutor {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl StepExecutor for GatedExecutor {
    fn plugin(&self) -> &str {
        "gate"
    }

    fn functions(&self) -> Vec<String> {
        vec!["wait".into()]
    }

    async fn invoke(&self, _function: &str, _params: &StepParams) -> Result<String, StepError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok("v1".into())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Meeting to Tasks
// ═══════════════════════════════════════════════════════════════════════

/// An empty transcript is not an error from the executor, but nothing
/// downstream can run on it: both dependents are skipped and the run fails.
#[tokio::test]
async fn meeting_to_tasks_with_empty_transcript_fails() {
    let proposed = counter();
    let created = counter();

    let registry = StepExecutorRegistry::new();
    registry
        .register(
            FnExecutor::new("meetings").function("get_transcript", |_| async { Ok(String::new()) }),
        )
        .unwrap();
    registry
        .register(
            FnExecutor::new("assistant")
                .function("propose_tasks", counted(&proposed, r#"{"tasks":["a"]}"#)),
        )
        .unwrap();
    registry
        .register(
            FnExecutor::new("tasks").function("create_batch", counted(&created, "2 tasks created")),
        )
        .unwrap();

    let orch = orchestrator(vec![builtin::meeting_to_tasks()], registry);
    let wf = orch
        .detect_trigger("turn my meeting into a task list", &[])
        .expect("meeting workflow must trigger");
    let exec = orch
        .run_workflow(&wf.template, "turn my meeting into a task list", "u1")
        .await
        .unwrap();

    assert_eq!(exec.state, ExecutionState::Failed);

    let transcript = exec.step("get_transcript").unwrap();
    assert_eq!(transcript.status, StepStatus::Failed);
    assert_eq!(
        transcript.error_kind,
        Some(StepErrorKind::MissingPrecondition)
    );
    assert_eq!(transcript.attempts, 1, "empty results are not retried");

    for id in ["propose_tasks", "create_tasks"] {
        let step = exec.step(id).unwrap();
        assert_eq!(step.status, StepStatus::Skipped, "{id} must be skipped");
        assert_eq!(step.error_kind, Some(StepErrorKind::MissingPrecondition));
        assert!(step.started_at.is_none());
    }
    assert_eq!(proposed.load(Ordering::SeqCst), 0);
    assert_eq!(created.load(Ordering::SeqCst), 0);
    assert!(!exec.context.contains_key("transcript"));
}

#[tokio::test]
async fn meeting_to_tasks_happy_path_threads_outputs() {
    let seen_tasks: Arc<Mutex<Option<StepParams>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&seen_tasks);

    let registry = StepExecutorRegistry::new();
    registry
        .register(FnExecutor::new("meetings").function("get_transcript", |_| async {
            Ok("Alice: ship the report by Friday".to_string())
        }))
        .unwrap();
    registry
        .register(FnExecutor::new("assistant").function("propose_tasks", |params| async move {
            let transcript = params["transcript"].as_str().unwrap_or_default().to_string();
            assert!(transcript.contains("ship the report"));
            Ok(r#"{"tasks":["Ship the report"]}"#.to_string())
        }))
        .unwrap();
    registry
        .register(FnExecutor::new("tasks").function("create_batch", move |params| {
            let capture = Arc::clone(&capture);
            async move {
                *capture.lock().await = Some(params);
                Ok("1 task created".to_string())
            }
        }))
        .unwrap();

    let orch = orchestrator(vec![builtin::meeting_to_tasks()], registry);
    let tpl = builtin::meeting_to_tasks();
    let exec = orch
        .run_workflow(&tpl, "meeting to tasks, assign to alice@example.com", "u1")
        .await
        .unwrap();

    assert_eq!(exec.state, ExecutionState::Completed, "{}", exec.summary());
    let params = seen_tasks.lock().await.clone().unwrap();
    assert_eq!(params["tasks"], r#"["Ship the report"]"#);
    assert_eq!(params["assignee"], "alice@example.com");
    assert_eq!(exec.context["created_tasks"], "1 task created");
}

// ═══════════════════════════════════════════════════════════════════════
//  Weekly Review
// ═══════════════════════════════════════════════════════════════════════

/// The two fetch steps meet at a two-party barrier, which only opens if they
/// run at the same time.  The note step must see both outputs.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn weekly_review_runs_fetches_concurrently_and_joins() {
    let barrier = Arc::new(Barrier::new(2));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let note_params: Arc<Mutex<Option<StepParams>>> = Arc::new(Mutex::new(None));

    let fetch = |output: &'static str| {
        let barrier = Arc::clone(&barrier);
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        move |_params: StepParams| {
            let barrier = Arc::clone(&barrier);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let joined = tokio::time::timeout(Duration::from_secs(2), barrier.wait()).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                match joined {
                    Ok(_) => Ok(output.to_string()),
                    Err(_) => Err(StepError::terminal("sibling fetch never ran concurrently")),
                }
            }
        }
    };

    let capture = Arc::clone(&note_params);
    let registry = StepExecutorRegistry::new();
    registry
        .register(
            FnExecutor::new("calendar").function("list_events", fetch("Standup (Mon), Demo (Thu)")),
        )
        .unwrap();
    registry
        .register(FnExecutor::new("tasks").function("list_completed", fetch("Shipped login page")))
        .unwrap();
    registry
        .register(FnExecutor::new("notes").function("create", move |params| {
            let capture = Arc::clone(&capture);
            async move {
                *capture.lock().await = Some(params);
                Ok(r#"{"url":"https://notes.example.com/42"}"#.to_string())
            }
        }))
        .unwrap();

    let orch = orchestrator(vec![builtin::weekly_review()], registry);
    let wf = orch.detect_trigger("time for my weekly review", &[]).unwrap();
    let exec = orch
        .run_workflow(&wf.template, "time for my weekly review", "u1")
        .await
        .unwrap();

    assert_eq!(exec.state, ExecutionState::Completed, "{}", exec.summary());
    assert_eq!(peak.load(Ordering::SeqCst), 2, "fetches must overlap");

    let events = exec.step("get_events").unwrap();
    let tasks = exec.step("get_completed_tasks").unwrap();
    let note = exec.step("create_summary_note").unwrap();
    assert!(note.started_at.unwrap() >= events.ended_at.unwrap());
    assert!(note.started_at.unwrap() >= tasks.ended_at.unwrap());

    let params = note_params.lock().await.clone().unwrap();
    let body = params["body"].as_str().unwrap();
    assert!(body.contains("Standup (Mon), Demo (Thu)"));
    assert!(body.contains("Shipped login page"));
    assert_eq!(exec.context["summary_url"], "https://notes.example.com/42");
}

// ═══════════════════════════════════════════════════════════════════════
//  Cancellation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cancel_after_first_step_stops_the_chain() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let later = counter();

    let registry = StepExecutorRegistry::new();
    registry
        .register(GatedExecutor {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        })
        .unwrap();
    registry
        .register(
            FnExecutor::new("work")
                .function("second", counted(&later, "v2"))
                .function("third", counted(&later, "v3")),
        )
        .unwrap();

    let tpl = WorkflowTemplate::new("chain", "Chain")
        .step(StepTemplate::new("one", "One", "gate", "wait").output("result", "first"))
        .step(
            StepTemplate::new("two", "Two", "work", "second")
                .param("input", "{{first}}")
                .depends_on("one"),
        )
        .step(StepTemplate::new("three", "Three", "work", "third").depends_on("two"));
    let orch = orchestrator(vec![tpl.clone()], registry);

    let exec = orch.start_workflow(&tpl, "go", "u1").await.unwrap();
    assert_eq!(exec.state, ExecutionState::Running);

    started.notified().await;
    assert!(orch.cancel_execution(&exec.id).await);
    release.notify_one();

    let done = wait_terminal(&orch, exec.id).await;
    assert_eq!(done.state, ExecutionState::Cancelled);
    assert_eq!(done.step("one").unwrap().status, StepStatus::Succeeded);
    for id in ["two", "three"] {
        let step = done.step(id).unwrap();
        assert_eq!(step.status, StepStatus::Skipped);
        assert_eq!(step.error_kind, Some(StepErrorKind::ExecutionCancelled));
        assert!(step.started_at.is_none(), "{id} must never start");
    }
    assert_eq!(done.context["first"], "v1", "step one's output is retained");
    assert_eq!(later.load(Ordering::SeqCst), 0);
    assert!(
        !orch.cancel_execution(&exec.id).await,
        "finished runs are not cancellable"
    );
}

// ═══════════════════════════════════════════════════════════════════════
//  Partial success
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn optional_failure_yields_partial_completion() {
    let enrich_calls = counter();
    let calls = Arc::clone(&enrich_calls);

    let registry = StepExecutorRegistry::new();
    registry
        .register(
            FnExecutor::new("crm")
                .function("fetch", |_| async { Ok("acme".to_string()) })
                .function("enrich", move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(StepError::transient("503 from upstream")) }
                })
                .function("publish", |params| async move {
                    let account = params["account"].as_str().unwrap_or_default();
                    Ok(format!("published {account}"))
                }),
        )
        .unwrap();

    let tpl = WorkflowTemplate::new("crm", "CRM")
        .step(StepTemplate::new("fetch", "Fetch", "crm", "fetch").output("result", "account"))
        .step(
            StepTemplate::new("enrich", "Enrich", "crm", "enrich")
                .depends_on("fetch")
                .output("result", "profile")
                .optional()
                .max_retries(2),
        )
        .step(
            StepTemplate::new("publish", "Publish", "crm", "publish")
                .param("account", "{{account}}")
                .optional_param("profile", "{{profile}}")
                .depends_on("enrich")
                .depends_on("fetch"),
        );
    let orch = orchestrator(vec![tpl.clone()], registry);
    let exec = orch.run_workflow(&tpl, "sync crm", "u1").await.unwrap();

    assert_eq!(exec.state, ExecutionState::PartiallyCompleted);
    let enrich = exec.step("enrich").unwrap();
    assert_eq!(enrich.status, StepStatus::Failed);
    assert_eq!(enrich.attempts, 3);
    assert_eq!(enrich.error_kind, Some(StepErrorKind::TransientStepFailure));
    assert_eq!(enrich_calls.load(Ordering::SeqCst), 3);

    let publish = exec.step("publish").unwrap();
    assert_eq!(publish.status, StepStatus::Succeeded);
    assert_eq!(publish.result.as_deref(), Some("published acme"));
    assert!(!publish.resolved_params.contains_key("profile"));
}

#[tokio::test]
async fn required_failure_skips_dependents_but_not_siblings() {
    let registry = StepExecutorRegistry::new();
    registry
        .register(
            FnExecutor::new("ops")
                .function("broken", |_| async {
                    Err(StepError::terminal("invalid folder name"))
                })
                .function("ok", |_| async { Ok("done".to_string()) }),
        )
        .unwrap();

    let tpl = WorkflowTemplate::new("branches", "Branches")
        .step(StepTemplate::new("a", "A", "ops", "broken").max_retries(3))
        .step(StepTemplate::new("b", "B", "ops", "ok").depends_on("a"))
        .step(StepTemplate::new("c", "C", "ops", "ok").depends_on("b").optional())
        .step(StepTemplate::new("d", "D", "ops", "ok"))
        .step(StepTemplate::new("e", "E", "ops", "ok").depends_on("d"));
    let orch = orchestrator(vec![tpl.clone()], registry);
    let exec = orch.run_workflow(&tpl, "go", "u1").await.unwrap();

    assert_eq!(exec.state, ExecutionState::PartiallyCompleted);

    let a = exec.step("a").unwrap();
    assert_eq!(a.status, StepStatus::Failed);
    assert_eq!(a.attempts, 1, "terminal failures are not retried");
    assert_eq!(a.error_kind, Some(StepErrorKind::TerminalStepFailure));

    for id in ["b", "c"] {
        let step = exec.step(id).unwrap();
        assert_eq!(step.status, StepStatus::Skipped);
        assert_eq!(step.error_kind, Some(StepErrorKind::DependencyFailed));
    }
    for id in ["d", "e"] {
        assert_eq!(exec.step(id).unwrap().status, StepStatus::Succeeded);
    }
    assert!(exec.summary().contains("[skipped] B: required step `a` did not succeed"));
}

#[tokio::test]
async fn terminal_failure_spends_no_retries() {
    let calls = counter();
    let seen = Arc::clone(&calls);
    let downstream = counter();

    let registry = StepExecutorRegistry::new();
    registry
        .register(
            FnExecutor::new("drive")
                .function("upload", move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    async { Err(StepError::terminal("403 permission denied")) }
                })
                .function("share", counted(&downstream, "shared")),
        )
        .unwrap();

    let tpl = WorkflowTemplate::new("upload", "Upload")
        .step(
            StepTemplate::new("upload", "Upload", "drive", "upload")
                .output("result", "file")
                .max_retries(3),
        )
        .step(
            StepTemplate::new("share", "Share", "drive", "share")
                .param("file", "{{file}}")
                .depends_on("upload"),
        );
    let orch = orchestrator(vec![tpl.clone()], registry);
    let exec = orch.run_workflow(&tpl, "upload it", "u1").await.unwrap();

    assert_eq!(exec.state, ExecutionState::Failed);
    let upload = exec.step("upload").unwrap();
    assert_eq!(upload.status, StepStatus::Failed);
    assert_eq!(upload.attempts, 1);
    assert!(upload.retry_delays_ms.is_empty());
    assert_eq!(upload.error_kind, Some(StepErrorKind::TerminalStepFailure));
    assert_eq!(upload.error.as_deref(), Some("403 permission denied"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let share = exec.step("share").unwrap();
    assert_eq!(share.status, StepStatus::Skipped);
    assert_eq!(share.error_kind, Some(StepErrorKind::DependencyFailed));
    assert_eq!(downstream.load(Ordering::SeqCst), 0);
}

/// A panicking executor fails its own step; the background run still
/// settles and frees the user's slot.
#[tokio::test]
async fn panicking_executor_fails_its_step() {
    let registry = StepExecutorRegistry::new();
    registry
        .register(
            FnExecutor::new("buggy")
                .function("explode", |params: StepParams| async move {
                    let rows: Vec<String> = Vec::new();
                    Ok(rows[params.len()].clone())
                })
                .function("ok", |_| async { Ok("fine".to_string()) }),
        )
        .unwrap();

    let tpl = WorkflowTemplate::new("buggy", "Buggy")
        .step(StepTemplate::new("explode", "Explode", "buggy", "explode").max_retries(2))
        .step(StepTemplate::new("after", "After", "buggy", "ok").depends_on("explode"))
        .step(StepTemplate::new("sibling", "Sibling", "buggy", "ok"));
    let mut config = fast_config();
    config.engine.max_active_per_user = 1;
    let catalog = WorkflowCatalog::from_templates([tpl.clone()]).unwrap();
    let orch = Orchestrator::new(catalog, registry, config).unwrap();

    let exec = orch.start_workflow(&tpl, "go", "u1").await.unwrap();
    let done = wait_terminal(&orch, exec.id).await;

    assert_eq!(
        done.state,
        ExecutionState::PartiallyCompleted,
        "{}",
        done.summary()
    );
    let explode = done.step("explode").unwrap();
    assert_eq!(explode.status, StepStatus::Failed);
    assert_eq!(explode.attempts, 1);
    assert_eq!(explode.error_kind, Some(StepErrorKind::TerminalStepFailure));
    assert!(explode.error.as_deref().unwrap().contains("index out of bounds"));
    assert_eq!(done.step("after").unwrap().status, StepStatus::Skipped);
    assert_eq!(done.step("sibling").unwrap().status, StepStatus::Succeeded);

    assert!(orch.list_active("u1").await.is_empty());
    let next = orch.start_workflow(&tpl, "again", "u1").await;
    assert!(next.is_ok(), "the user's slot must be free again");
}

// ═══════════════════════════════════════════════════════════════════════
//  Retry backoff
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn retry_delays_grow_then_plateau() {
    let calls = counter();
    let seen = Arc::clone(&calls);

    let registry = StepExecutorRegistry::new();
    registry
        .register(FnExecutor::new("flaky").function("call", move |_| {
            let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 5 {
                    Err(StepError::transient(format!("attempt {n} throttled")))
                } else {
                    Ok("finally".to_string())
                }
            }
        }))
        .unwrap();

    let tpl = WorkflowTemplate::new("flaky", "Flaky")
        .step(StepTemplate::new("call", "Call", "flaky", "call").max_retries(5));
    let mut config = fast_config();
    config.engine.base_retry_delay_ms = 5;
    config.engine.max_retry_delay_ms = 20;
    let catalog = WorkflowCatalog::from_templates([tpl.clone()]).unwrap();
    let orch = Orchestrator::new(catalog, registry, config).unwrap();

    let exec = orch.run_workflow(&tpl, "go", "u1").await.unwrap();
    let step = exec.step("call").unwrap();
    assert_eq!(step.status, StepStatus::Succeeded);
    assert_eq!(step.attempts, 5);
    assert_eq!(step.retry_delays_ms, vec![5, 10, 20, 20]);
    assert!(step.retry_delays_ms.windows(2).all(|w| w[0] <= w[1]));
    assert!(step.retry_delays_ms.iter().all(|&d| d <= 20));
}

// ═══════════════════════════════════════════════════════════════════════
//  Context propagation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn output_mapping_round_trips_into_later_params() {
    let received: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&received);

    let registry = StepExecutorRegistry::new();
    registry
        .register(
            FnExecutor::new("kv")
                .function("produce", |_| async {
                    Ok(r#"{"token":"v-7f3a","ttl":60}"#.to_string())
                })
                .function("consume", move |params| {
                    let capture = Arc::clone(&capture);
                    async move {
                        *capture.lock().await = params["value"].as_str().map(String::from);
                        Ok("ok".to_string())
                    }
                }),
        )
        .unwrap();

    let tpl = WorkflowTemplate::new("kv", "KV")
        .step(StepTemplate::new("a", "A", "kv", "produce").output("token", "key"))
        .step(
            StepTemplate::new("b", "B", "kv", "consume")
                .param("value", "{{key}}")
                .depends_on("a"),
        );
    let orch = orchestrator(vec![tpl.clone()], registry);
    let exec = orch.run_workflow(&tpl, "go", "u1").await.unwrap();

    assert_eq!(exec.state, ExecutionState::Completed);
    assert_eq!(received.lock().await.as_deref(), Some("v-7f3a"));
    assert_eq!(exec.step("b").unwrap().resolved_params["value"], "v-7f3a");
    assert_eq!(exec.context["key"], "v-7f3a");
}

// ═══════════════════════════════════════════════════════════════════════
//  Catalog validation
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn cyclic_template_never_reaches_the_catalog() {
    let cyclic = WorkflowTemplate::new("cyclic", "Cyclic")
        .step(StepTemplate::new("a", "A", "p", "f").depends_on("c"))
        .step(StepTemplate::new("b", "B", "p", "f").depends_on("a"))
        .step(StepTemplate::new("c", "C", "p", "f").depends_on("b"));

    let mut templates = builtin::builtin_templates();
    templates.push(cyclic.clone());
    let err = WorkflowCatalog::from_templates(templates).unwrap_err();
    assert!(err.is_configuration());

    let mut catalog = builtin::builtin_catalog().unwrap();
    assert!(catalog.register(cyclic).is_err());
    assert!(catalog.get("cyclic").is_none());
    assert_eq!(catalog.len(), 5);
}
