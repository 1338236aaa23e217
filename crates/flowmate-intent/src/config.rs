//! Orchestrator configuration.
//!
//! Settings live in the `[engine]` and `[triggers]` sections of
//! `config/default.toml`.  Every field has a default, so a missing file,
//! section or key falls back to the values below.  Environment variables
//! prefixed with `FLOWMATE_` override individual keys after the file is
//! read.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{IntentError, Result};

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowmateConfig {
    pub engine: EngineConfig,
    pub triggers: TriggerWeights,
}

/// Execution engine and record store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay before the first retry; doubled for each further retry.
    pub base_retry_delay_ms: u64,
    /// Upper bound for a single backoff delay.
    pub max_retry_delay_ms: u64,
    /// Timeout for a single executor invocation (0 disables it).
    pub step_timeout_secs: u64,
    /// Wall-clock budget for one execution (0 disables it).
    pub execution_deadline_secs: u64,
    /// Maximum concurrently active executions per user (0 disables it).
    pub max_active_per_user: usize,
    /// Age after which finished executions are purged by the sweeper.
    pub retention_secs: u64,
    /// Capacity of the execution event channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_retry_delay_ms: 500,
            max_retry_delay_ms: 10_000,
            step_timeout_secs: 60,
            execution_deadline_secs: 300,
            max_active_per_user: 4,
            retention_secs: 3_600,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn step_timeout(&self) -> Option<Duration> {
        (self.step_timeout_secs > 0).then(|| Duration::from_secs(self.step_timeout_secs))
    }

    pub fn execution_deadline(&self) -> Option<Duration> {
        (self.execution_deadline_secs > 0)
            .then(|| Duration::from_secs(self.execution_deadline_secs))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Weight table for keyword trigger detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerWeights {
    /// Score per trigger phrase contained in the message.
    pub phrase_weight: f64,
    /// Score per distinct keyword found in the message.
    pub keyword_weight: f64,
    /// Bonus when a recent topic mentions one of the template's domains.
    pub topic_boost: f64,
    /// Minimum total score for a template to be selected.
    pub min_score: f64,
}

impl Default for TriggerWeights {
    fn default() -> Self {
        Self {
            phrase_weight: 10.0,
            keyword_weight: 1.0,
            topic_boost: 1.5,
            min_score: 2.0,
        }
    }
}

impl FlowmateConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read configuration from `path`.
    ///
    /// A missing file yields the defaults; an unreadable or malformed file
    /// is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                debug!(path = %path.display(), "loading configuration");
                Self::from_toml(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file missing, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(IntentError::ConfigRead {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Apply `FLOWMATE_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply overrides from `(name, value)` pairs.  Unknown names are
    /// ignored; unparsable values are logged and ignored.
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix("FLOWMATE_") else {
                continue;
            };
            let applied = match key {
                "BASE_RETRY_DELAY_MS" => set(&mut self.engine.base_retry_delay_ms, &value),
                "MAX_RETRY_DELAY_MS" => set(&mut self.engine.max_retry_delay_ms, &value),
                "STEP_TIMEOUT_SECS" => set(&mut self.engine.step_timeout_secs, &value),
                "EXECUTION_DEADLINE_SECS" => {
                    set(&mut self.engine.execution_deadline_secs, &value)
                }
                "MAX_ACTIVE_PER_USER" => set(&mut self.engine.max_active_per_user, &value),
                "RETENTION_SECS" => set(&mut self.engine.retention_secs, &value),
                "EVENT_CAPACITY" => set(&mut self.engine.event_capacity, &value),
                "PHRASE_WEIGHT" => set(&mut self.triggers.phrase_weight, &value),
                "KEYWORD_WEIGHT" => set(&mut self.triggers.keyword_weight, &value),
                "TOPIC_BOOST" => set(&mut self.triggers.topic_boost, &value),
                "MIN_SCORE" => set(&mut self.triggers.min_score, &value),
                _ => continue,
            };
            if !applied {
                warn!(variable = %name, value = %value, "ignoring unparsable override");
            }
        }
    }
}

fn set<T: std::str::FromStr>(slot: &mut T, value: &str) -> bool {
    match value.trim().parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
