//! Step executor registry.
//!
//! Every productivity plugin (mail, calendar, tasks, files, search, ...)
//! plugs into the orchestrator through the [`StepExecutor`] trait.  The
//! registry maps a plugin name to its executor; a workflow step addresses a
//! capability as a `(plugin, function)` pair and the registry dispatches the
//! call.  Binding is explicit: executors are registered at startup and never
//! discovered at run time.
//!
//! Internally the registry is backed by [`DashMap`] which provides lock-free
//! concurrent reads and fine-grained write locking, making it safe to share
//! across tasks without a global `RwLock`.
//!
//! # Example
//!
//! ```rust
//! # use flowmate_kernel::registry::{FnExecutor, StepExecutorRegistry};
//! # async fn example() {
//! let registry = StepExecutorRegistry::new();
//! registry
//!     .register(FnExecutor::new("mail").function("send", |params| async move {
//!         Ok(format!("sent to {}", params["to"]))
//!     }))
//!     .unwrap();
//!
//! let mut params = serde_json::Map::new();
//! params.insert("to".into(), "bob@example.com".into());
//! let out = registry.invoke("mail", "send", &params).await.unwrap();
//! # }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Parameters handed to a step executor: parameter name to JSON value.
pub type StepParams = serde_json::Map<String, serde_json::Value>;

/// Failure reported by a step executor.
///
/// The distinction drives the retry policy: transient failures (network,
/// throttling, timeouts) are retried with backoff, terminal failures
/// (validation errors, missing resources) are not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case", tag = "kind", content = "message")]
pub enum StepError {
    /// A retryable failure.
    #[error("transient failure: {0}")]
    Transient(String),
    /// A non-retryable failure.
    #[error("terminal failure: {0}")]
    Terminal(String),
}

impl StepError {
    /// Build a retryable failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Build a non-retryable failure.
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal(message.into())
    }

    /// Whether the engine may retry after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The message without the classification prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Terminal(m) => m,
        }
    }
}

impl From<KernelError> for StepError {
    fn from(err: KernelError) -> Self {
        Self::Terminal(err.to_string())
    }
}

/// The capability contract every plugin implements.
///
/// `invoke` must be safe to call repeatedly with the same arguments; the
/// orchestrator retries transient failures without further coordination.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Unique plugin name (e.g. `"mail"`, `"calendar"`).
    fn plugin(&self) -> &str;

    /// Names of the functions this plugin exposes.
    fn functions(&self) -> Vec<String>;

    /// Execute `function` with the given parameters and return its result
    /// as text (often JSON).
    async fn invoke(
        &self,
        function: &str,
        params: &StepParams,
    ) -> std::result::Result<String, StepError>;
}

/// Metadata about a registered executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorInfo {
    /// Plugin name.
    pub plugin: String,
    /// Functions exposed by the plugin, sorted.
    pub functions: Vec<String>,
    /// When the executor was registered.
    pub registered_at: DateTime<Utc>,
}

struct RegisteredExecutor {
    executor: Arc<dyn StepExecutor>,
    info: ExecutorInfo,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent step executor registry backed by [`DashMap`].
///
/// The registry is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct StepExecutorRegistry {
    inner: Arc<DashMap<String, RegisteredExecutor>>,
}

impl StepExecutorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Register an executor under its plugin name.
    ///
    /// Registering the same plugin twice is rejected.
    pub fn register(&self, executor: impl StepExecutor + 'static) -> Result<()> {
        self.register_arc(Arc::new(executor))
    }

    /// Register an already shared executor.
    pub fn register_arc(&self, executor: Arc<dyn StepExecutor>) -> Result<()> {
        let plugin = executor.plugin().to_string();
        if self.inner.contains_key(&plugin) {
            return Err(KernelError::DuplicateExecutor { plugin });
        }

        let mut functions = executor.functions();
        functions.sort();

        tracing::info!(plugin = %plugin, functions = functions.len(), "executor registered");

        self.inner.insert(
            plugin.clone(),
            RegisteredExecutor {
                executor,
                info: ExecutorInfo {
                    plugin,
                    functions,
                    registered_at: Utc::now(),
                },
            },
        );
        Ok(())
    }

    /// Remove an executor from the registry.
    pub fn unregister(&self, plugin: &str) -> Option<ExecutorInfo> {
        let removed = self.inner.remove(plugin).map(|(_, entry)| entry.info);
        if removed.is_some() {
            tracing::info!(plugin = %plugin, "executor unregistered");
        }
        removed
    }

    /// Retrieve a snapshot of an executor's metadata.
    pub fn get(&self, plugin: &str) -> Result<ExecutorInfo> {
        self.inner
            .get(plugin)
            .map(|entry| entry.info.clone())
            .ok_or_else(|| KernelError::ExecutorNotFound {
                plugin: plugin.to_string(),
            })
    }

    /// Check that `plugin` is registered and exposes `function`.
    pub fn ensure_function(&self, plugin: &str, function: &str) -> Result<()> {
        let entry = self
            .inner
            .get(plugin)
            .ok_or_else(|| KernelError::ExecutorNotFound {
                plugin: plugin.to_string(),
            })?;

        if entry.info.functions.iter().any(|f| f == function) {
            Ok(())
        } else {
            Err(KernelError::FunctionNotFound {
                plugin: plugin.to_string(),
                function: function.to_string(),
            })
        }
    }

    /// Invoke `plugin.function` with the given parameters.
    ///
    /// A missing plugin or function is reported as a terminal [`StepError`]
    /// so callers handle it like any other non-retryable step failure.
    pub async fn invoke(
        &self,
        plugin: &str,
        function: &str,
        params: &StepParams,
    ) -> std::result::Result<String, StepError> {
        self.ensure_function(plugin, function)?;

        // Clone the Arc out of the map so no shard lock is held across the
        // await point.
        let executor = self
            .inner
            .get(plugin)
            .map(|entry| Arc::clone(&entry.executor))
            .ok_or_else(|| StepError::terminal(format!("executor not found: {plugin}")))?;

        tracing::trace!(plugin = %plugin, function = %function, "invoking step executor");
        executor.invoke(function, params).await
    }

    /// Return a list of all registered plugin names, sorted.
    pub fn list_plugins(&self) -> Vec<String> {
        let mut plugins: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        plugins.sort();
        plugins
    }

    /// Return the total number of registered executors.
    pub fn count(&self) -> usize {
        self.inner.len()
    }
}

impl Default for StepExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Closure-backed executor
// ---------------------------------------------------------------------------

/// Boxed future returned by a [`StepFn`].
pub type StepFuture = Pin<Box<dyn Future<Output = std::result::Result<String, StepError>> + Send>>;

/// An async function implementing one plugin function.
pub type StepFn = Arc<dyn Fn(StepParams) -> StepFuture + Send + Sync>;

/// A [`StepExecutor`] assembled from async closures, one per function.
///
/// Handy for wiring thin API clients and for tests.
pub struct FnExecutor {
    plugin: String,
    functions: BTreeMap<String, StepFn>,
}

impl FnExecutor {
    /// Create an executor for `plugin` with no functions.
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            functions: BTreeMap::new(),
        }
    }

    /// Add a function implemented by an async closure.
    pub fn function<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<String, StepError>> + Send + 'static,
    {
        let f: StepFn = Arc::new(move |params| Box::pin(f(params)));
        self.functions.insert(name.into(), f);
        self
    }
}

#[async_trait]
impl StepExecutor for FnExecutor {
    fn plugin(&self) -> &str {
        &self.plugin
    }

    fn functions(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    async fn invoke(
        &self,
        function: &str,
        params: &StepParams,
    ) -> std::result::Result<String, StepError> {
        let f = self.functions.get(function).ok_or_else(|| {
            StepError::terminal(format!(
                "function `{function}` is not exposed by plugin `{}`",
                self.plugin
            ))
        })?;
        f(params.clone()).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
