//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

/// Unified error type for the Flowmate kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Registry errors ----------------------------------------------------
    /// No executor is registered for the given plugin.
    #[error("executor not found: {plugin}")]
    ExecutorNotFound {
        /// The plugin name that was looked up.
        plugin: String,
    },

    /// The plugin is registered but does not expose the requested function.
    #[error("function `{function}` is not exposed by plugin `{plugin}`")]
    FunctionNotFound { plugin: String, function: String },

    /// A plugin was registered twice under the same name.
    #[error("executor already registered: {plugin}")]
    DuplicateExecutor { plugin: String },

    // -- Router errors ------------------------------------------------------
    /// Building the internal automaton failed (e.g. invalid pattern).
    #[error("router build error: {reason}")]
    RouterBuildError { reason: String },
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
