//! Controller configuration.

use crate::executor::{InlineExecutor, TaskExecutor};
use crate::problem::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

fn default_executor() -> Arc<dyn TaskExecutor> {
    Arc::new(InlineExecutor)
}

/// Configuration for a [`TransactionController`](crate::TransactionController).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Maximum problem severity a transaction tolerates when none is given.
    pub default_max_severity: Severity,

    /// How long a write-lock wait may last before it is logged as slow.
    pub lock_wait_warning: Duration,

    /// Executor handed to transactions created without an explicit one.
    #[serde(skip, default = "default_executor")]
    pub executor: Arc<dyn TaskExecutor>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_max_severity: Severity::Warning,
            lock_wait_warning: Duration::from_secs(5),
            executor: default_executor(),
        }
    }
}

impl ControllerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default maximum severity.
    #[must_use]
    pub fn default_max_severity(mut self, severity: Severity) -> Self {
        self.default_max_severity = severity;
        self
    }

    /// Sets the slow write-lock wait threshold.
    #[must_use]
    pub fn lock_wait_warning(mut self, threshold: Duration) -> Self {
        self.lock_wait_warning = threshold;
        self
    }

    /// Sets the default executor.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

impl fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("default_max_severity", &self.default_max_severity)
            .field("lock_wait_warning", &self.lock_wait_warning)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.default_max_severity, Severity::Warning);
        assert_eq!(config.lock_wait_warning, Duration::from_secs(5));
    }

    #[test]
    fn builder_pattern() {
        let config = ControllerConfig::new()
            .default_max_severity(Severity::Error)
            .lock_wait_warning(Duration::from_millis(250));

        assert_eq!(config.default_max_severity, Severity::Error);
        assert_eq!(config.lock_wait_warning, Duration::from_millis(250));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"default_max_severity":"Info"}"#).unwrap();
        assert_eq!(config.default_max_severity, Severity::Info);
        assert_eq!(config.lock_wait_warning, Duration::from_secs(5));
    }
}
