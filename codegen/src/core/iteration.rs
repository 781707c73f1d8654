//! Iteration bookkeeping between conversational turns.
//!
//! Pure functions: the caller supplies the timestamp and ids so the same
//! inputs always produce the same accumulated state.

use chrono::{DateTime, Utc};

use crate::core::types::{
    Accumulated, GenerationResult, IterationCounts, UploadHistory, UploadHistoryEntry,
};

/// Metadata recorded alongside a completed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMeta {
    pub generation_id: String,
    pub upload_id: String,
    pub tab_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Compute the iteration number for the turn that just completed.
///
/// Service-reported counters win over the local counter; without both counters
/// the local counter advances by one.
pub fn next_iteration_number(previous: u32, counts: IterationCounts) -> u32 {
    match counts.both() {
        Some((remaining, total)) => total.saturating_sub(remaining),
        None => previous.saturating_add(1),
    }
}

/// Insert a history entry unless one already exists for the generation id.
///
/// Returns `true` when a new entry was recorded.
pub fn record_history(
    history: &mut UploadHistory,
    meta: &HistoryMeta,
    result: &GenerationResult,
) -> bool {
    if history.contains_key(&meta.generation_id) {
        return false;
    }
    history.insert(
        meta.generation_id.clone(),
        UploadHistoryEntry {
            recorded_at: meta.recorded_at,
            upload_id: meta.upload_id.clone(),
            new_files: result.new_files.clone(),
            deleted_files: result.deleted_files.clone(),
            tab_id: meta.tab_id.clone(),
        },
    );
    true
}

/// Fold a generation result into the next accumulated state.
pub fn advance_iteration(
    previous: &Accumulated,
    result: GenerationResult,
    meta: &HistoryMeta,
) -> Accumulated {
    let mut upload_history = previous.upload_history.clone();
    record_history(&mut upload_history, meta, &result);

    Accumulated {
        iteration: next_iteration_number(previous.iteration, result.counts),
        counts: result.counts,
        new_files: result.new_files,
        deleted_files: result.deleted_files,
        references: result.references,
        upload_history,
    }
}
