//! Evolution / feedback collector (§10.5, §6 "Side files").
//!
//! Mechanical read/write/compare only — what the numbers *mean* to a
//! broader scoring or profiling strategy is out of scope (§1). Every
//! operation here is best-effort: a missing or unreadable side file is
//! never an error, matching §6's "absence is never an error" contract.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wf_ast::execution::{ExecutionState, NodeStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetric {
    pub status: NodeStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub run_id: String,
    pub per_node: std::collections::HashMap<String, NodeMetric>,
    pub total_duration_ms: u64,
    pub wave_count: u32,
    pub recorded_at: DateTime<Utc>,
}

impl RunMetrics {
    pub fn from_state(state: &ExecutionState) -> Self {
        let per_node = state
            .node_results
            .iter()
            .map(|(id, r)| (id.clone(), NodeMetric { status: r.status, duration_ms: r.duration_ms }))
            .collect();
        let total_duration_ms = state
            .completed_at
            .map(|end| (end - state.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        Self {
            run_id: state.run_id.clone(),
            per_node,
            total_duration_ms,
            wave_count: state.current_wave + 1,
            recorded_at: Utc::now(),
        }
    }
}

/// Comparison against a prior baseline. `regressed` is a coarse signal —
/// total duration grew — not a statistically rigorous verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineComparison {
    pub regressed: bool,
    pub delta_ms: i64,
}

fn side_file(workflow_path: &Path, suffix: &str) -> PathBuf {
    let mut name = workflow_path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `W.metrics.json`. Errors are logged and swallowed by the caller's
/// convention — this returns `Result` so a caller that does want to know
/// still can, but nothing upstream treats a failure here as fatal.
pub async fn write_metrics(workflow_path: &Path, metrics: &RunMetrics) -> std::io::Result<()> {
    let path = side_file(workflow_path, ".metrics.json");
    let json = serde_json::to_vec_pretty(metrics).unwrap_or_default();
    tokio::fs::write(path, json).await
}

/// Read `W.baseline.json` and compare against `metrics`. Returns `None` if
/// the baseline is absent or unreadable — never an error.
pub async fn compare_to_baseline(workflow_path: &Path, metrics: &RunMetrics) -> Option<BaselineComparison> {
    let path = side_file(workflow_path, ".baseline.json");
    let bytes = tokio::fs::read(&path).await.ok()?;
    let baseline: RunMetrics = serde_json::from_slice(&bytes).ok()?;
    let delta_ms = metrics.total_duration_ms as i64 - baseline.total_duration_ms as i64;
    Some(BaselineComparison { regressed: delta_ms > 0, delta_ms })
}

/// Append one entry to `W.feedback.json` (a JSON array on disk). Creates
/// the file if absent; a corrupt existing file is treated as empty rather
/// than surfacing an error, consistent with the best-effort contract.
pub async fn append_feedback(workflow_path: &Path, metrics: &RunMetrics) -> std::io::Result<()> {
    let path = side_file(workflow_path, ".feedback.json");
    let mut entries: Vec<RunMetrics> = match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    entries.push(metrics.clone());
    let json = serde_json::to_vec_pretty(&entries).unwrap_or_default();
    tokio::fs::write(path, json).await
}
