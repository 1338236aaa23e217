//! Intent engine error types.
//!
//! All intent subsystems surface errors through [`IntentError`].  Each variant
//! carries enough context for callers to decide how to handle the failure.
//!
//! Step-level failures are not represented here: they are recorded on the
//! execution record (see [`crate::template::StepErrorKind`]).

use uuid::Uuid;

/// Unified error type for the intent engine.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    // -- Catalog errors ------------------------------------------------------
    /// A workflow template is malformed (cyclic, dangling dependency,
    /// duplicate ids, unknown executor).  Raised at registration time only.
    #[error("invalid workflow template `{template_id}`: {reason}")]
    Configuration { template_id: String, reason: String },

    /// The referenced template is not in the catalog.
    #[error("workflow template not found: {template_id}")]
    TemplateNotFound { template_id: String },

    // -- Execution errors ----------------------------------------------------
    /// The referenced execution does not exist in the record store.
    #[error("workflow execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: Uuid },

    /// The user already has the maximum number of active executions.
    #[error("user `{user_id}` already has {active} active workflow executions (limit {limit})")]
    TooManyActiveExecutions {
        user_id: String,
        active: usize,
        limit: usize,
    },

    /// The template exists but is switched off.
    #[error("workflow template `{template_id}` is inactive")]
    TemplateInactive { template_id: String },

    // -- Configuration file --------------------------------------------------
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`crate::config::FlowmateConfig`].
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the kernel crate.
    #[error("kernel error: {0}")]
    Kernel(#[from] flowmate_kernel::KernelError),
}

impl IntentError {
    /// Shorthand for a [`IntentError::Configuration`] error.
    pub fn configuration(template_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            template_id: template_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is a catalog configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// Convenience alias used throughout the intent crate.
pub type Result<T> = std::result::Result<T, IntentError>;
