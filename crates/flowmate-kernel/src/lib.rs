//! Flowmate kernel.
//!
//! This crate provides the foundational services the workflow orchestrator
//! is built on:
//!
//! - **[`registry`]** -- Concurrent step executor registry using [`DashMap`];
//!   the single outbound seam into productivity plugins.
//! - **[`router`]** -- Aho-Corasick phrase index used for trigger matching.
//! - **[`ipc`]** -- Publish/subscribe execution event bus backed by
//!   [`tokio::sync::broadcast`].
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.
//!
//! [`DashMap`]: dashmap::DashMap

pub mod error;
pub mod ipc;
pub mod registry;
pub mod router;

// Re-export the most commonly used types at the crate root for convenience.
pub use error::{KernelError, Result};
pub use ipc::{Event, EventBus};
pub use registry::{
    ExecutorInfo, FnExecutor, StepError, StepExecutor, StepExecutorRegistry, StepParams,
};
pub use router::{PhraseIndex, PhraseMatch};
