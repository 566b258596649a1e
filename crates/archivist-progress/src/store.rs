//! Progress Store.
//!
//! A single table keyed by `recording_id`, with every mutation going
//! through a conditional `WHERE stage_state = from_state` update. The
//! schema/DDL of a real backing relational store is out of scope for this
//! repository's core; `InMemoryProgressStore` plays that role here behind
//! the `ProgressStore` trait so a real table-backed implementation can be
//! dropped in without touching any caller.

use std::collections::HashMap;

use archivist_core::model::{PipelineProgress, Recording, StageState};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};

/// Contract for the Progress Store. All mutation happens via
/// compare-and-swap so that two coordinators sharing a backing store
/// cannot both advance the same recording past a stage.
pub trait ProgressStore: Send + Sync {
    /// Atomic compare-and-swap on `stage_state`. Returns `true` iff the row
    /// existed in `from_state` and was updated to `to_state`.
    fn claim(&self, recording_id: &str, from_state: StageState, to_state: StageState) -> bool;

    /// Creates a `discovered` row if absent; otherwise returns the existing row.
    fn upsert(&self, recording: &Recording) -> PipelineProgress;

    /// Marks a recording failed and increments the attempt counter for its
    /// current stage.
    fn mark_failed(&self, recording_id: &str, reason: &str);

    /// Authoritative query; never served from a cache.
    fn list_by_state(&self, state: StageState, limit: usize) -> Vec<PipelineProgress>;

    /// Fetches a single row, if present.
    fn get(&self, recording_id: &str) -> Option<PipelineProgress>;

    /// Operator action: resets a `failed` row back to `discovered` so it
    /// will be retried by the next run. The automatic run never does this
    /// on its own.
    fn reset_failed(&self, recording_id: &str) -> bool;
}

/// In-process, mutex-guarded implementation of the Progress Store.
#[derive(Default)]
pub struct InMemoryProgressStore {
    rows: Mutex<HashMap<String, PipelineProgress>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage_key(state: StageState) -> &'static str {
        match state {
            StageState::Discovered => "discovered",
            StageState::Downloaded => "downloaded",
            StageState::Transcribing => "transcribing",
            StageState::Transcribed => "transcribed",
            StageState::Persisted => "persisted",
            StageState::Failed => "failed",
        }
    }
}

impl ProgressStore for InMemoryProgressStore {
    fn claim(&self, recording_id: &str, from_state: StageState, to_state: StageState) -> bool {
        let mut rows = self.rows.lock();
        match rows.get_mut(recording_id) {
            Some(row) if row.stage_state == from_state => {
                row.stage_state = to_state;
                row.updated_at = Utc::now();
                info!(recording_id, ?from_state, ?to_state, "claimed stage transition");
                true
            }
            Some(row) => {
                warn!(
                    recording_id,
                    actual = ?row.stage_state,
                    expected = ?from_state,
                    "claim rejected: state mismatch"
                );
                false
            }
            None => {
                warn!(recording_id, "claim rejected: no progress row");
                false
            }
        }
    }

    fn upsert(&self, recording: &Recording) -> PipelineProgress {
        let mut rows = self.rows.lock();
        rows.entry(recording.recording_id.clone())
            .or_insert_with(|| PipelineProgress::new_discovered(&recording.recording_id))
            .clone()
    }

    fn mark_failed(&self, recording_id: &str, reason: &str) {
        let mut rows = self.rows.lock();
        if let Some(row) = rows.get_mut(recording_id) {
            let stage_key = Self::stage_key(row.stage_state).to_string();
            *row.attempts_per_stage.entry(stage_key).or_insert(0) += 1;
            row.stage_state = StageState::Failed;
            row.updated_at = Utc::now();
            warn!(recording_id, reason, "recording marked failed");
        }
    }

    fn list_by_state(&self, state: StageState, limit: usize) -> Vec<PipelineProgress> {
        let rows = self.rows.lock();
        rows.values()
            .filter(|row| row.stage_state == state)
            .take(limit)
            .cloned()
            .collect()
    }

    fn get(&self, recording_id: &str) -> Option<PipelineProgress> {
        self.rows.lock().get(recording_id).cloned()
    }

    fn reset_failed(&self, recording_id: &str) -> bool {
        let mut rows = self.rows.lock();
        match rows.get_mut(recording_id) {
            Some(row) if row.stage_state == StageState::Failed => {
                row.stage_state = StageState::Discovered;
                row.updated_at = Utc::now();
                info!(recording_id, "operator reset failed recording to discovered");
                true
            }
            _ => false,
        }
    }
}
