//! Checkpoint persistence and resume (§4.14, §6 "Persisted state").
//!
//! `PersistedState` is a separate wire-format type rather than a derive on
//! `ExecutionState` itself: `nodeResults` serializes as an array of
//! `[id, result]` pairs (§6), and `secrets` is never written at all, both of
//! which need an explicit codec rather than `ExecutionState`'s own
//! `#[serde(skip)]`-based `Serialize`/`Deserialize`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use wf_ast::execution::{ContextTable, ExecutionState, ExecutionStatus, NodeResult};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub workflow_id: String,
    pub run_id: String,
    pub status: ExecutionStatus,
    pub current_wave: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub node_results: Vec<(String, NodeResult)>,
    pub global_context: ContextTable,
    pub phase_context: ContextTable,
    pub node_context: ContextTable,
    pub config: ContextTable,
}

impl From<&ExecutionState> for PersistedState {
    fn from(state: &ExecutionState) -> Self {
        Self {
            workflow_id: state.workflow_id.clone(),
            run_id: state.run_id.clone(),
            status: state.status,
            current_wave: state.current_wave,
            started_at: state.started_at,
            completed_at: state.completed_at,
            node_results: state
                .node_results
                .iter()
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect(),
            global_context: state.global_context.clone(),
            phase_context: state.phase_context.clone(),
            node_context: state.node_context.clone(),
            config: state.config.clone(),
        }
    }
}

impl PersistedState {
    /// Reconstruct an `ExecutionState`. `secrets` is never part of the
    /// persisted document; the caller supplies a fresh overlay (possibly
    /// empty) at load time, per §6's "config and secrets may be overridden
    /// at load time" and "the loader strips any ambient secrets".
    pub fn into_state(self, secrets: HashMap<String, String>) -> ExecutionState {
        ExecutionState {
            workflow_id: self.workflow_id,
            run_id: self.run_id,
            status: self.status,
            current_wave: self.current_wave,
            started_at: self.started_at,
            completed_at: self.completed_at,
            node_results: self.node_results.into_iter().collect(),
            global_context: self.global_context,
            phase_context: self.phase_context,
            node_context: self.node_context,
            config: self.config,
            secrets,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CheckpointError {
    #[error("failed to read checkpoint at {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to write checkpoint at {path}: {source}")]
    Write { path: String, #[source] source: std::io::Error },
    #[error("failed to decode checkpoint: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Persist `state` as JSON to `path` (best-effort from the caller's
/// perspective — errors are still returned, but §4.8.1 step 6 treats the
/// overall persistence step as swallow-and-log at the call site).
pub async fn save(path: &Path, state: &ExecutionState) -> Result<(), CheckpointError> {
    let persisted = PersistedState::from(state);
    let json = serde_json::to_vec_pretty(&persisted)?;
    tokio::fs::write(path, json).await.map_err(|source| CheckpointError::Write {
        path: path.display().to_string(),
        source,
    })
}

pub async fn load(path: &Path, secrets: HashMap<String, String>) -> Result<ExecutionState, CheckpointError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| CheckpointError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let persisted: PersistedState = serde_json::from_slice(&bytes)?;
    Ok(persisted.into_state(secrets))
}

/// §4.14: a checkpoint is resumable if it exists and its persisted status
/// is `failed` or `cancelled`.
pub async fn can_resume(path: &Path) -> bool {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<PersistedState>(&bytes) {
            Ok(persisted) => {
                matches!(persisted.status, ExecutionStatus::Failed | ExecutionStatus::Cancelled)
            }
            Err(_) => false,
        },
        Err(_) => false,
    }
}

/// Trim a plan's waves for resume (§4.14): keep only waves whose number is
/// `>= state.current_wave`, and within the first retained wave drop node
/// ids that already recorded a success.
pub fn trim_waves_for_resume(
    waves: &[wf_ast::execution::Wave],
    state: &ExecutionState,
) -> Vec<wf_ast::execution::Wave> {
    let mut retained: Vec<wf_ast::execution::Wave> = waves
        .iter()
        .filter(|w| w.wave_number >= state.current_wave)
        .cloned()
        .collect();

    if let Some(first) = retained.first_mut() {
        first.node_ids.retain(|id| {
            !matches!(
                state.node_results.get(id).map(|r| r.status),
                Some(wf_ast::execution::NodeStatus::Success)
            )
        });
    }

    retained.retain(|w| !w.node_ids.is_empty());
    retained
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wf_ast::execution::Wave;

    #[test]
    fn persisted_round_trips_node_results_as_pairs() {
        let mut state = ExecutionState::new("wf-1");
        state.record_success("a", NodeResult::success(serde_json::json!(1), Utc::now(), 5));
        let persisted = PersistedState::from(&state);
        let restored = persisted.into_state(HashMap::new());
        assert_eq!(restored.node_results.len(), 1);
        assert!(restored.secrets.is_empty());
    }

    #[test]
    fn trim_waves_drops_completed_waves_and_nodes() {
        let mut state = ExecutionState::new("wf-1");
        state.current_wave = 1;
        state.record_success("a", NodeResult::success(serde_json::json!(1), Utc::now(), 1));
        let waves = vec![
            Wave { wave_number: 0, node_ids: vec!["a".into()] },
            Wave { wave_number: 1, node_ids: vec!["a".into(), "b".into()] },
            Wave { wave_number: 2, node_ids: vec!["c".into()] },
        ];
        let trimmed = trim_waves_for_resume(&waves, &state);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].node_ids, vec!["b".to_string()]);
        assert_eq!(trimmed[1].node_ids, vec!["c".to_string()]);
    }
}
