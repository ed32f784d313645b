//! Node types and definitions.
//!
//! A node is a tagged union keyed by its `type` string, which doubles as
//! (or maps directly to) the runtime key described in the external
//! interfaces section — `http:source`, `transform:template`,
//! `control:parallel`, `temporal:timeout`, `checkpoint`, and so on.
//! Structured sub-fields for control nodes (`cases`, `branches`,
//! `bodyNodeIds`, `collection`, `wait`, `merge`, ...) live inside the
//! same free-form `config` map as a data-flow node's config — the
//! executor's built-in control runtimes (`wf_core::runtime::builtin`) pick
//! the fields they need back out of it via `serde_json`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Source-map location, used only for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceLoc {
    pub line: u32,
    pub column: u32,
}

/// Backoff shape for retry delays (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

/// Per-node retry / fallback configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_kind")]
    pub backoff_kind: BackoffKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_node_id: Option<String>,
}

fn default_backoff_base_ms() -> u64 {
    0
}

fn default_backoff_kind() -> BackoffKind {
    BackoffKind::Fixed
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: default_backoff_base_ms(),
            backoff_kind: default_backoff_kind(),
            fallback_node_id: None,
        }
    }
}

/// A single node in a [`crate::workflow::WorkflowAst`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAst {
    pub id: String,
    /// Runtime key / node-type tag, e.g. `"transform:template"`.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLoc>,
    /// Explicit predecessor reference — the single most common dependency
    /// edge (§4.4 step 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_config: Option<ErrorConfig>,
    /// Free-form configuration: data-flow params for source/transform/sink
    /// nodes, or structured sub-fields for control nodes.
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl NodeAst {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            loc: None,
            input: None,
            error_config: None,
            config: Map::new(),
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    pub fn with_error_config(mut self, error_config: ErrorConfig) -> Self {
        self.error_config = Some(error_config);
        self
    }

    pub fn set_config(&mut self, key: impl Into<String>, value: Value) {
        self.config.insert(key.into(), value);
    }

    pub fn get_config(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// True for nodes whose runtime key starts with `control:` or is one
    /// of the other control-oriented keys named in §6 (`checkpoint`,
    /// `temporal:*`, `composition:*`).
    pub fn is_control_node(&self) -> bool {
        self.node_type.starts_with("control:")
            || self.node_type.starts_with("temporal:")
            || self.node_type.starts_with("composition:")
            || self.node_type == "checkpoint"
    }
}
