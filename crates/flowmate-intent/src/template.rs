//! Workflow data model.
//!
//! Two families of types live here:
//!
//! - **Templates** ([`WorkflowTemplate`], [`StepTemplate`]) are immutable
//!   definitions registered in the catalog at startup.
//! - **Executions** ([`WorkflowExecution`], [`StepExecution`]) are the mutable
//!   per-run records the engine fills in and the record store keeps.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use flowmate_kernel::StepParams;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shared key/value context threaded through one execution.
pub type Context = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Address of a plugin capability: `plugin.function`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutorRef {
    /// The plugin that owns the function (e.g. "mail").
    pub plugin: String,
    /// The function to invoke (e.g. "search").
    pub function: String,
}

impl ExecutorRef {
    pub fn new(plugin: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            function: function.into(),
        }
    }
}

impl fmt::Display for ExecutorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.plugin, self.function)
    }
}

/// A step parameter: text with `{{key}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamTemplate {
    /// Template text, resolved against the execution context.
    pub template: String,
    /// A required parameter that resolves to blank text blocks the step.
    pub required: bool,
}

/// Phrases, keywords and domain nouns used to select a template from a
/// user message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Multi-word phrases; containment is the strongest signal.
    #[serde(default)]
    pub phrases: Vec<String>,
    /// Single words counted individually.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Domain nouns (e.g. "meeting") that boost the template when they
    /// appear in recent conversation topics.
    #[serde(default)]
    pub domains: Vec<String>,
}

impl TriggerSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phrases.extend(phrases.into_iter().map(Into::into));
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains.extend(domains.into_iter().map(Into::into));
        self
    }
}

/// A single step within a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTemplate {
    /// Unique id within the template.
    pub id: String,
    /// Human-readable name shown in progress reports.
    pub name: String,
    /// The capability this step invokes.
    pub target: ExecutorRef,
    /// Parameter name to template.
    #[serde(default)]
    pub params: BTreeMap<String, ParamTemplate>,
    /// Ids of steps that must reach a terminal state first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Output key to context key.  The output key `result` maps the raw
    /// result; any other key selects a field of a JSON-object result.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Failure of an optional step does not block its dependents.
    #[serde(default)]
    pub optional: bool,
    /// Retries after the first attempt for transient failures.
    #[serde(default)]
    pub max_retries: u32,
    /// Accept a blank result even though `outputs` is non-empty.
    #[serde(default)]
    pub allow_empty_result: bool,
}

impl StepTemplate {
    /// Create a required step with no parameters, dependencies or outputs.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        plugin: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            target: ExecutorRef::new(plugin, function),
            params: BTreeMap::new(),
            depends_on: Vec::new(),
            outputs: BTreeMap::new(),
            optional: false,
            max_retries: 0,
            allow_empty_result: false,
        }
    }

    /// Add a required parameter.
    pub fn param(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.params.insert(
            name.into(),
            ParamTemplate {
                template: template.into(),
                required: true,
            },
        );
        self
    }

    /// Add a parameter that may resolve to blank text.
    pub fn optional_param(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.params.insert(
            name.into(),
            ParamTemplate {
                template: template.into(),
                required: false,
            },
        );
        self
    }

    /// Declare a dependency on another step of the same template.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// Map an output key of this step's result into the shared context.
    pub fn output(mut self, output_key: impl Into<String>, context_key: impl Into<String>) -> Self {
        self.outputs.insert(output_key.into(), context_key.into());
        self
    }

    /// Mark the step optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn allow_empty_result(mut self) -> Self {
        self.allow_empty_result = true;
        self
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Unique identifier (e.g. "meeting-to-tasks").
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// How the template is selected from user messages.
    #[serde(default)]
    pub trigger: TriggerSpec,
    /// Steps in declaration order.
    pub steps: Vec<StepTemplate>,
    /// Default parameter values seeded into the context.
    #[serde(default)]
    pub defaults: BTreeMap<String, serde_json::Value>,
    /// Inactive templates are never triggered or started.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl WorkflowTemplate {
    /// Create an active template with no steps.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            trigger: TriggerSpec::default(),
            steps: Vec::new(),
            defaults: BTreeMap::new(),
            active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerSpec) -> Self {
        self.trigger = trigger;
        self
    }

    /// Append a step.
    pub fn step(mut self, step: StepTemplate) -> Self {
        self.steps.push(step);
        self
    }

    /// Add a default parameter value.
    pub fn default_param(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Look up a step by id.
    pub fn step_by_id(&self, id: &str) -> Option<&StepTemplate> {
        self.steps.iter().find(|s| s.id == id)
    }
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

/// Lifecycle state of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created, not yet picked up by the engine.
    Pending,
    /// The engine is driving the execution.
    Running,
    /// Every required step succeeded and no optional step failed.
    Completed,
    /// No step succeeded.
    Failed,
    /// Some steps failed or were skipped, at least one succeeded.
    PartiallyCompleted,
    /// Cancellation was observed between steps.
    Cancelled,
}

impl ExecutionState {
    /// Whether the execution has finished.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current execution state of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// A required parameter or upstream output was unavailable.
    MissingPrecondition,
    /// Retryable failures exhausted the retry budget.
    TransientStepFailure,
    /// The executor reported a non-retryable failure.
    TerminalStepFailure,
    /// A required upstream step failed.
    DependencyFailed,
    /// Cancellation was observed before the step started.
    ExecutionCancelled,
    /// The execution deadline passed before the step started.
    DeadlineExceeded,
}

impl StepErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingPrecondition => "missing_precondition",
            Self::TransientStepFailure => "transient_step_failure",
            Self::TerminalStepFailure => "terminal_step_failure",
            Self::DependencyFailed => "dependency_failed",
            Self::ExecutionCancelled => "execution_cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record of one step within one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// The step template id.
    pub step_id: String,
    /// Display name copied from the template.
    pub name: String,
    /// Whether the step was optional.
    pub optional: bool,
    pub status: StepStatus,
    /// Number of executor invocations made.
    pub attempts: u32,
    /// Executor result on success.
    pub result: Option<String>,
    /// Failure or skip reason.
    pub error: Option<String>,
    pub error_kind: Option<StepErrorKind>,
    /// Parameters as sent to the executor on the last attempt.
    #[serde(default)]
    pub resolved_params: StepParams,
    /// Backoff delays applied between attempts, in milliseconds.
    #[serde(default)]
    pub retry_delays_ms: Vec<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    /// A fresh pending record for `step`.
    pub fn pending(step: &StepTemplate) -> Self {
        Self {
            step_id: step.id.clone(),
            name: step.name.clone(),
            optional: step.optional,
            status: StepStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            error_kind: None,
            resolved_params: StepParams::new(),
            retry_delays_ms: Vec::new(),
            started_at: None,
            ended_at: None,
        }
    }
}

/// One runtime instance of a template being carried out for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique identifier (UUID v7).
    pub id: Uuid,
    pub template_id: String,
    pub template_name: String,
    pub state: ExecutionState,
    /// Step records in plan order.
    pub steps: Vec<StepExecution>,
    /// Shared context; grows as steps complete.
    pub context: Context,
    /// The user who triggered the execution.
    pub user_id: String,
    /// The message that triggered the execution.
    pub user_message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Create a pending execution whose step records follow `plan`
    /// (indices into `template.steps`).
    pub fn new(
        template: &WorkflowTemplate,
        plan: &[usize],
        user_id: impl Into<String>,
        user_message: impl Into<String>,
        context: Context,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            state: ExecutionState::Pending,
            steps: plan
                .iter()
                .map(|&i| StepExecution::pending(&template.steps[i]))
                .collect(),
            context,
            user_id: user_id.into(),
            user_message: user_message.into(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Look up a step record by step id.
    pub fn step(&self, step_id: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Count the step records in `status`.
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Render a plain-text, step-by-step report for the user.
    pub fn summary(&self) -> String {
        let mut out = format!("{}: {}\n", self.template_name, self.state);
        for step in &self.steps {
            let marker = match step.status {
                StepStatus::Succeeded => "[ok]",
                StepStatus::Failed => "[failed]",
                StepStatus::Skipped => "[skipped]",
                StepStatus::Pending => "[pending]",
                StepStatus::Running => "[running]",
            };
            out.push_str(&format!("  {marker} {}", step.name));
            if step.optional {
                out.push_str(" (optional)");
            }
            if step.attempts > 1 {
                out.push_str(&format!(" after {} attempts", step.attempts));
            }
            if let Some(error) = &step.error {
                out.push_str(&format!(": {error}"));
            }
            out.push('\n');
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
