//! Engine-wide and per-call configuration (§10.3).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use wf_ast::node::ErrorConfig;

/// Engine-wide defaults, grounded on the teacher's own `runtime::RuntimeConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// §4.6's default semaphore capacity.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub default_retry: ErrorConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

fn default_max_concurrency() -> usize {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            default_timeout_ms: 0,
            default_retry: ErrorConfig::default(),
            persistence_path: None,
            log_path: None,
        }
    }
}

/// Per-call override of [`RuntimeConfig`] (§4.8.1's options list).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_retry_config: Option<ErrorConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

impl ExecuteOptions {
    /// Layer these per-call overrides over engine-wide defaults.
    pub fn resolve(&self, defaults: &RuntimeConfig) -> RuntimeConfig {
        RuntimeConfig {
            max_concurrency: self.max_concurrency.unwrap_or(defaults.max_concurrency),
            default_timeout_ms: self.timeout_ms.unwrap_or(defaults.default_timeout_ms),
            default_retry: self
                .default_retry_config
                .clone()
                .unwrap_or_else(|| defaults.default_retry.clone()),
            persistence_path: self
                .persistence_path
                .clone()
                .or_else(|| defaults.persistence_path.clone()),
            log_path: self.log_path.clone().or_else(|| defaults.log_path.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_options_override_defaults_selectively() {
        let defaults = RuntimeConfig { max_concurrency: 10, ..Default::default() };
        let options = ExecuteOptions { max_concurrency: Some(4), ..Default::default() };
        let resolved = options.resolve(&defaults);
        assert_eq!(resolved.max_concurrency, 4);
        assert_eq!(resolved.default_timeout_ms, defaults.default_timeout_ms);
    }

    #[test]
    fn default_runtime_config_matches_spec_default_concurrency() {
        assert_eq!(RuntimeConfig::default().max_concurrency, 10);
    }
}
