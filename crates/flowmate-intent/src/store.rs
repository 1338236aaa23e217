//! In-memory execution record store.
//!
//! Each execution lives in its own slot: an async `RwLock` around the record
//! plus the execution's [`CancellationToken`].  Slots are kept in a
//! [`DashMap`] keyed by execution id, so readers of one execution never wait
//! on writers of another, and writers are serialized per id only.
//!
//! Map references are never held across an `.await`: every operation clones
//! the slot `Arc` out of the map first and only then touches the lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::template::WorkflowExecution;

struct ExecutionSlot {
    record: RwLock<WorkflowExecution>,
    cancel: CancellationToken,
}

impl ExecutionSlot {
    fn new(execution: WorkflowExecution) -> Self {
        Self {
            record: RwLock::new(execution),
            cancel: CancellationToken::new(),
        }
    }
}

/// Concurrency-safe store of workflow executions.
///
/// Cloning is cheap and every clone shares the same records.
#[derive(Clone, Default)]
pub struct ExecutionStore {
    slots: Arc<DashMap<Uuid, Arc<ExecutionSlot>>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &Uuid) -> Option<Arc<ExecutionSlot>> {
        self.slots.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Insert or replace the record for `execution.id`.
    ///
    /// Replacing a record keeps the slot's cancellation token.
    #[instrument(
        skip(self, execution),
        fields(execution_id = %execution.id, state = %execution.state)
    )]
    pub async fn save(&self, execution: &WorkflowExecution) {
        let slot = Arc::clone(
            self.slots
                .entry(execution.id)
                .or_insert_with(|| Arc::new(ExecutionSlot::new(execution.clone())))
                .value(),
        );
        *slot.record.write().await = execution.clone();
    }

    /// A snapshot of the execution, if it exists.
    pub async fn get(&self, id: &Uuid) -> Option<WorkflowExecution> {
        let slot = self.slot(id)?;
        let record = slot.record.read().await;
        Some(record.clone())
    }

    /// Request cooperative cancellation.
    ///
    /// Returns `true` when the execution exists and has not finished yet.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &Uuid) -> bool {
        let Some(slot) = self.slot(id) else {
            debug!("cancel requested for unknown execution");
            return false;
        };
        if slot.record.read().await.is_terminal() {
            debug!("cancel requested for finished execution");
            return false;
        }
        slot.cancel.cancel();
        info!(execution_id = %id, "execution cancellation requested");
        true
    }

    /// The cancellation token of an execution.
    pub fn cancellation_token(&self, id: &Uuid) -> Option<CancellationToken> {
        self.slot(id).map(|s| s.cancel.clone())
    }

    /// Whether cancellation has been requested for the execution.
    pub fn is_cancelled(&self, id: &Uuid) -> bool {
        self.slot(id).is_some_and(|s| s.cancel.is_cancelled())
    }

    /// Non-terminal executions of `user_id`, oldest first.
    #[instrument(skip(self))]
    pub async fn list_active(&self, user_id: &str) -> Vec<WorkflowExecution> {
        let mut active = Vec::new();
        for slot in self.snapshot() {
            let record = slot.record.read().await;
            if record.user_id == user_id && !record.is_terminal() {
                active.push(record.clone());
            }
        }
        active.sort_by_key(|e| e.created_at);
        active
    }

    /// Number of non-terminal executions of `user_id`.
    pub async fn count_active(&self, user_id: &str) -> usize {
        let mut count = 0;
        for slot in self.snapshot() {
            let record = slot.record.read().await;
            if record.user_id == user_id && !record.is_terminal() {
                count += 1;
            }
        }
        count
    }

    /// Remove finished executions that ended more than `older_than` ago.
    ///
    /// Executions that are still pending or running are never removed.
    /// Returns the number of records removed.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let ids: Vec<Uuid> = self.slots.iter().map(|e| *e.key()).collect();
        let mut removed = 0;
        for id in ids {
            let Some(slot) = self.slot(&id) else {
                continue;
            };
            let expired = {
                let record = slot.record.read().await;
                record.is_terminal() && record.ended_at.is_some_and(|t| t < cutoff)
            };
            if expired && self.slots.remove(&id).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(
                removed,
                remaining = self.slots.len(),
                "expired executions purged"
            );
        }
        removed
    }

    /// Drop a record regardless of its state.
    pub fn remove(&self, id: &Uuid) -> bool {
        self.slots.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Spawn a background task that runs [`cleanup`](Self::cleanup) every
    /// `every` with the given retention.
    pub fn spawn_sweeper(&self, retention: Duration, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.cleanup(retention).await;
            }
        })
    }

    fn snapshot(&self) -> Vec<Arc<ExecutionSlot>> {
        self.slots.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

impl std::fmt::Debug for ExecutionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStore")
            .field("executions", &self.slots.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
