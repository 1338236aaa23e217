//! Orchestrator facade.
//!
//! The [`Orchestrator`] is the single entry point a conversational front-end
//! talks to: detect a workflow in a message, start it, inspect it, cancel it.
//! It owns the catalog, the trigger detector, the execution engine and the
//! record store, and admits new executions subject to the per-user cap.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, Utc};
use flowmate_kernel::{Event, EventBus, StepExecutorRegistry};
use serde_json::json;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{RegisteredWorkflow, WorkflowCatalog};
use crate::config::FlowmateConfig;
use crate::engine::WorkflowEngine;
use crate::error::{IntentError, Result};
use crate::extract::extract_parameters;
use crate::store::ExecutionStore;
use crate::template::{ExecutionState, WorkflowExecution, WorkflowTemplate};
use crate::trigger::{KeywordTriggerDetector, TriggerDetector};

/// Facade over the workflow orchestration engine.
#[derive(Clone)]
pub struct Orchestrator {
    catalog: Arc<WorkflowCatalog>,
    detector: Arc<dyn TriggerDetector>,
    engine: WorkflowEngine,
    store: ExecutionStore,
    events: EventBus,
    config: Arc<FlowmateConfig>,
    /// Serializes the active-count check with the insert that follows it.
    admission: Arc<Mutex<()>>,
}

impl Orchestrator {
    /// Build an orchestrator.
    ///
    /// Fails with a configuration error when a catalog step targets a
    /// function no registered executor provides.
    pub fn new(
        catalog: WorkflowCatalog,
        registry: StepExecutorRegistry,
        config: FlowmateConfig,
    ) -> Result<Self> {
        catalog.validate_executors(&registry)?;
        let detector = KeywordTriggerDetector::new(&catalog, config.triggers.clone())?;

        let store = ExecutionStore::new();
        let events = EventBus::new(config.engine.event_capacity);
        let engine = WorkflowEngine::new(
            registry,
            store.clone(),
            events.clone(),
            config.engine.clone(),
        );

        info!(templates = catalog.len(), "workflow orchestrator ready");

        Ok(Self {
            catalog: Arc::new(catalog),
            detector: Arc::new(detector),
            engine,
            store,
            events,
            config: Arc::new(config),
            admission: Arc::new(Mutex::new(())),
        })
    }

    /// Replace the trigger detector.
    pub fn with_detector(mut self, detector: impl TriggerDetector + 'static) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    pub fn config(&self) -> &FlowmateConfig {
        &self.config
    }

    /// Find the workflow a message asks for, if any.
    pub fn detect_trigger(
        &self,
        message: &str,
        recent_topics: &[String],
    ) -> Option<Arc<RegisteredWorkflow>> {
        self.detector.detect(message, recent_topics)
    }

    /// Admit an execution and run it in the background.
    ///
    /// Returns the `Running` record immediately; poll
    /// [`get_execution`](Self::get_execution) or [`subscribe`](Self::subscribe)
    /// for progress.  If the run task dies, the record is settled as
    /// `Failed` so it stops counting against the user's cap.
    pub async fn start_workflow(
        &self,
        template: &WorkflowTemplate,
        message: &str,
        user_id: &str,
    ) -> Result<WorkflowExecution> {
        let (workflow, execution) = self.admit(template, message, user_id).await?;

        let engine = self.engine.clone();
        let record = execution.clone();
        let run = tokio::spawn(async move {
            engine.run(&workflow, record).await;
        });

        let engine = self.engine.clone();
        let execution_id = execution.id;
        tokio::spawn(async move {
            if let Err(err) = run.await {
                error!(execution_id = %execution_id, error = %err, "workflow run task died");
                engine
                    .abort(&execution_id, &format!("execution aborted: {err}"))
                    .await;
            }
        });
        Ok(execution)
    }

    /// Admit an execution and drive it to completion before returning.
    pub async fn run_workflow(
        &self,
        template: &WorkflowTemplate,
        message: &str,
        user_id: &str,
    ) -> Result<WorkflowExecution> {
        let (workflow, execution) = self.admit(template, message, user_id).await?;
        Ok(self.engine.run(&workflow, execution).await)
    }

    /// A snapshot of an execution.
    pub async fn get_execution(&self, execution_id: &Uuid) -> Option<WorkflowExecution> {
        self.store.get(execution_id).await
    }

    /// Like [`get_execution`](Self::get_execution), but a missing record is
    /// an error.
    pub async fn require_execution(&self, execution_id: &Uuid) -> Result<WorkflowExecution> {
        self.store
            .get(execution_id)
            .await
            .ok_or(IntentError::ExecutionNotFound {
                execution_id: *execution_id,
            })
    }

    /// Request cooperative cancellation.  Returns `true` when a running
    /// execution was found.
    pub async fn cancel_execution(&self, execution_id: &Uuid) -> bool {
        let cancelled = self.store.cancel(execution_id).await;
        if cancelled {
            self.events.publish(Event::CancelRequested {
                execution_id: *execution_id,
                timestamp: Utc::now(),
            });
        }
        cancelled
    }

    /// Non-terminal executions of `user_id`.
    pub async fn list_active(&self, user_id: &str) -> Vec<WorkflowExecution> {
        self.store.list_active(user_id).await
    }

    /// Subscribe to execution progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.events.subscribe()
    }

    /// Start the background task purging finished executions older than
    /// the configured retention.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let retention = self.config.engine.retention();
        let every = (retention / 4).max(Duration::from_secs(1));
        self.store.spawn_sweeper(retention, every)
    }

    async fn admit(
        &self,
        template: &WorkflowTemplate,
        message: &str,
        user_id: &str,
    ) -> Result<(Arc<RegisteredWorkflow>, WorkflowExecution)> {
        let workflow = self
            .catalog
            .get(&template.id)
            .ok_or_else(|| IntentError::TemplateNotFound {
                template_id: template.id.clone(),
            })?;
        if !workflow.template.active {
            return Err(IntentError::TemplateInactive {
                template_id: template.id.clone(),
            });
        }

        let mut context = extract_parameters(&workflow.template, message, server_today());
        context.insert("user_id".into(), json!(user_id));
        context.insert("user_message".into(), json!(message));

        let mut execution = WorkflowExecution::new(
            &workflow.template,
            workflow.plan.order(),
            user_id,
            message,
            context,
        );
        execution.state = ExecutionState::Running;
        execution.started_at = Some(Utc::now());

        let _admission = self.admission.lock().await;
        let limit = self.config.engine.max_active_per_user;
        if limit > 0 {
            let active = self.store.count_active(user_id).await;
            if active >= limit {
                warn!(user_id = %user_id, active, limit, "execution rejected, user at capacity");
                return Err(IntentError::TooManyActiveExecutions {
                    user_id: user_id.to_string(),
                    active,
                    limit,
                });
            }
        }
        self.store.save(&execution).await;

        info!(
            execution_id = %execution.id,
            template_id = %workflow.template.id,
            user_id = %user_id,
            "workflow execution admitted"
        );
        Ok((workflow, execution))
    }
}

/// Relative dates in messages resolve against the server's local calendar.
fn server_today() -> NaiveDate {
    Local::now().date_naive()
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("templates", &self.catalog.len())
            .field("store", &self.store)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
