//! Integration tests for the flowmate-kernel crate.
//!
//! These tests exercise the executor registry, the phrase index and the
//! event bus through the public API only.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use flowmate_kernel::{
    Event, EventBus, FnExecutor, KernelError, PhraseIndex, StepError, StepExecutor,
    StepExecutorRegistry, StepParams,
};
use uuid::Uuid;

/// Executor that fails transiently a fixed number of times, then succeeds.
struct Flaky {
    failures_left: AtomicU32,
}

#[async_trait]
impl StepExecutor for Flaky {
    fn plugin(&self) -> &str {
        "flaky"
    }

    fn functions(&self) -> Vec<String> {
        vec!["ping".into()]
    }

    async fn invoke(&self, function: &str, params: &StepParams) -> Result<String, StepError> {
        assert_eq!(function, "ping");
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(StepError::transient("connection reset"));
        }
        let n = params.get("n").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(format!("pong {n}"))
    }
}

fn params(pairs: &[(&str, serde_json::Value)]) -> StepParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
//  Registry
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn registry_dispatches_trait_and_closure_executors() {
    let registry = StepExecutorRegistry::new();
    registry
        .register(Flaky {
            failures_left: AtomicU32::new(1),
        })
        .unwrap();
    registry
        .register(FnExecutor::new("echo").function("say", |p: StepParams| async move {
            Ok(p["text"].as_str().unwrap_or_default().to_uppercase())
        }))
        .unwrap();

    assert_eq!(registry.list_plugins(), vec!["echo", "flaky"]);

    let args = params(&[("n", serde_json::json!(3))]);
    let first = registry.invoke("flaky", "ping", &args).await.unwrap_err();
    assert!(first.is_retryable());
    assert_eq!(
        registry.invoke("flaky", "ping", &args).await.unwrap(),
        "pong 3"
    );

    let args = params(&[("text", serde_json::json!("hello"))]);
    assert_eq!(
        registry.invoke("echo", "say", &args).await.unwrap(),
        "HELLO"
    );
}

#[tokio::test]
async fn registry_lookup_failures_are_terminal() {
    let registry = StepExecutorRegistry::new();
    registry
        .register(FnExecutor::new("mail").function("send", |_| async { Ok(String::new()) }))
        .unwrap();

    assert!(matches!(
        registry.ensure_function("mail", "archive"),
        Err(KernelError::FunctionNotFound { .. })
    ));
    assert!(matches!(
        registry.ensure_function("calendar", "list"),
        Err(KernelError::ExecutorNotFound { .. })
    ));

    let err = registry
        .invoke("calendar", "list", &StepParams::new())
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.message().contains("calendar"));

    assert!(matches!(
        registry.register(FnExecutor::new("mail")),
        Err(KernelError::DuplicateExecutor { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_handles_concurrent_invocations() {
    let registry = StepExecutorRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    registry
        .register(FnExecutor::new("count").function("hit", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok("ok".to_string())
            }
        }))
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.invoke("count", "hit", &StepParams::new()).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "ok");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 32);
}

// ═══════════════════════════════════════════════════════════════════════
//  Phrase index
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn phrase_index_matches_whole_words_across_owners() {
    let index = PhraseIndex::new([
        ("weekly review", 0),
        ("review", 0),
        ("follow up", 1),
        ("kick off", 2),
    ])
    .unwrap();

    let hits = index.find("Please do my  Weekly   Review and follow up later");
    let owners: Vec<usize> = hits.iter().map(|m| m.owner).collect();
    assert_eq!(owners, vec![0, 0, 1]);
    assert_eq!(hits[0].phrase, "weekly review");

    // "kick offs" is not a whole-word match.
    assert!(index.find("two kick offs").is_empty());
    assert!(PhraseIndex::new(Vec::<(String, usize)>::new()).unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Event bus
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn event_bus_fans_out_to_every_subscriber() {
    let bus = EventBus::new(16);
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();
    let id = Uuid::now_v7();

    let receivers = bus.publish(Event::ExecutionFinished {
        execution_id: id,
        status: "completed".into(),
        timestamp: Utc::now(),
    });
    assert_eq!(receivers, 2);

    for rx in [&mut a, &mut b] {
        let event = rx.recv().await.unwrap();
        assert_eq!(event.execution_id(), id);
        assert!(event.is_final());
    }

    drop(a);
    drop(b);
    assert_eq!(
        bus.publish(Event::CancelRequested {
            execution_id: id,
            timestamp: Utc::now(),
        }),
        0
    );
}
