//! Execution event bus.
//!
//! The engine reports progress as [`Event`]s on an [`EventBus`], a thin
//! wrapper over [`tokio::sync::broadcast`].  A chat front-end subscribes and
//! streams step results to the user while the run is still going.
//!
//! Each event is allocated once and shared as [`Arc<Event>`] by every
//! subscriber.
//!
//! ```rust,no_run
//! # use flowmate_kernel::ipc::{EventBus, Event};
//! # async fn example() {
//! let bus = EventBus::new(256);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(Event::CancelRequested {
//!     execution_id: uuid::Uuid::now_v7(),
//!     timestamp: chrono::Utc::now(),
//! });
//!
//! let event = rx.recv().await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Progress of one workflow execution.
///
/// Statuses travel as their display strings so the kernel does not depend
/// on the workflow data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ExecutionStarted {
        execution_id: Uuid,
        template_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// One attempt of a step was handed to its executor.
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        /// 1-based.
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// A step reached `succeeded`, `failed` or `skipped`.
    StepFinished {
        execution_id: Uuid,
        step_id: String,
        status: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    CancelRequested {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// The execution reached a terminal state (e.g. `partially_completed`).
    ExecutionFinished {
        execution_id: Uuid,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::StepStarted { execution_id, .. }
            | Self::StepFinished { execution_id, .. }
            | Self::CancelRequested { execution_id, .. }
            | Self::ExecutionFinished { execution_id, .. } => *execution_id,
        }
    }

    /// Whether this is the last event published for its execution.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::ExecutionFinished { .. })
    }
}

/// Cloneable handle to a broadcast channel of [`Event`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Arc<Event>>>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    ///
    /// A subscriber that falls further behind gets
    /// [`broadcast::error::RecvError::Lagged`] and skips ahead.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publish to the current subscribers and return how many there were.
    /// Without subscribers the event is dropped.
    pub fn publish(&self, event: Event) -> usize {
        let execution_id = event.execution_id();
        match self.sender.send(Arc::new(event)) {
            Ok(n) => {
                tracing::trace!(%execution_id, receivers = n, "event published");
                n
            }
            Err(_) => 0,
        }
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
