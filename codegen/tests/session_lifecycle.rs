//! Multi-turn session tests driving `SessionEngine` through full
//! Prepare → Generate cycles against a scripted service.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use codegen::error::{ErrorCode, SessionError};
use codegen::io::apply::apply_changes;
use codegen::io::config::{PollConfig, UploadConfig};
use codegen::session::{PrepareState, SessionConfig, SessionEngine, TurnInput, TurnState};
use codegen::test_support::{
    CountingSleeper, ScriptedService, TestWorkspace, complete_with_counts, status,
};

fn engine(max_attempts: u32) -> SessionEngine {
    SessionEngine::new(
        PollConfig {
            max_attempts,
            delay_ms: 5_000,
        },
        UploadConfig::default(),
    )
    .with_sleeper(Arc::new(CountingSleeper::default()))
}

/// Three turns: generate, cancel, generate again.
///
/// Checks that iteration numbers follow the service counters, that the
/// cancelled turn clears only the deltas, and that each completed generation
/// lands in the upload history exactly once.
#[tokio::test]
async fn turns_accumulate_history_across_cancellation() {
    let workspace = TestWorkspace::new().expect("workspace");
    workspace.write("src/lib.rs", "pub fn a() {}\n").expect("write");
    let cancel = CancellationToken::new();
    let service = Arc::new(
        ScriptedService::new()
            .with_statuses(vec![
                status("IN_PROGRESS"),
                complete_with_counts(4, 5),
                status("IN_PROGRESS"),
                status("IN_PROGRESS"),
                complete_with_counts(2, 5),
            ])
            // Turn 2 is cancelled as its first status query (call 3) returns.
            .cancel_after_status_calls(3, cancel.clone())
            .with_archive(json!({
                "new_file_contents": { "src/b.rs": "pub fn b() {}\n" },
                "deleted_files": [],
            }))
            .with_archive(json!({
                "new_file_contents": { "src/c.rs": "pub fn c() {}\n" },
                "deleted_files": ["src/lib.rs"],
                "references": [{ "license_name": "MIT", "repository": "demo/c" }],
            })),
    );
    let engine = engine(10);
    let state = PrepareState::initial(SessionConfig::new(
        "conv-1",
        vec![workspace.root()],
        service.clone(),
    ));

    let first = engine
        .run_turn(&state, &TurnInput::new("add b"))
        .await
        .expect("turn 1");
    assert_eq!(first.accumulated.iteration, 1);
    assert_eq!(first.accumulated.new_files.len(), 1);
    assert_eq!(first.accumulated.upload_history.len(), 1);

    let second = engine
        .run_turn(&first, &TurnInput::new("never mind").with_cancel(cancel))
        .await
        .expect("turn 2");
    assert!(second.accumulated.new_files.is_empty());
    assert_eq!(second.accumulated.iteration, 1);
    assert_eq!(second.accumulated.upload_history.len(), 1);

    let third = engine
        .run_turn(&second, &TurnInput::new("add c, drop lib"))
        .await
        .expect("turn 3");
    assert_eq!(third.accumulated.iteration, 3);
    assert_eq!(third.accumulated.new_files.len(), 1);
    assert_eq!(third.accumulated.deleted_files.len(), 1);
    assert_eq!(third.accumulated.references.len(), 1);
    assert_eq!(third.accumulated.upload_history.len(), 2);

    let submissions = service.submissions();
    assert_eq!(submissions.len(), 3);
    assert_eq!(submissions[0].upload_id, "upload-1");
    assert_eq!(submissions[2].upload_id, "upload-3");
    assert_eq!(
        third.config.last_generation_id.as_deref(),
        Some(submissions[2].generation_id.as_str())
    );

    let accumulated = &third.accumulated;
    let summary = apply_changes(&accumulated.new_files, &accumulated.deleted_files).expect("apply");
    assert_eq!(summary.written, 1);
    assert_eq!(summary.deleted, 1);
    assert!(workspace.path().join("src/c.rs").exists());
    assert!(!workspace.path().join("src/lib.rs").exists());
}

/// Polling that never completes ends with a timeout after exactly the budget,
/// and the caller can retry the same Generate state.
#[tokio::test]
async fn timeout_then_retry_from_same_state() {
    let workspace = TestWorkspace::new().expect("workspace");
    let service = Arc::new(
        ScriptedService::new()
            .with_statuses(vec![
                status("IN_PROGRESS"),
                status("IN_PROGRESS"),
                status("IN_PROGRESS"),
                complete_with_counts(2, 5),
            ])
            .with_archive(json!({ "new_file_contents": { "done.txt": "ok" } })),
    );
    let engine = engine(3);
    let input = TurnInput::new("slow request");
    let prepare = TurnState::initial(SessionConfig::new(
        "conv-1",
        vec![workspace.root()],
        service.clone(),
    ));

    let generate = engine.advance(&prepare, &input).await.expect("prepare");
    let err = engine.advance(&generate, &input).await.unwrap_err();
    assert_eq!(err, SessionError::GenerationTimeout { attempts: 3 });
    assert_eq!(service.status_calls(), 3);

    let next = engine.advance(&generate, &input).await.expect("retry");
    assert_eq!(next.phase(), "prepare");
    assert_eq!(next.accumulated().iteration, 3);
}

/// A retry of a timed-out Generate state runs under the retrying turn's
/// cancellation handle, not the one the state was prepared with.
#[tokio::test]
async fn timed_out_generation_retried_under_new_cancelled_turn() {
    let workspace = TestWorkspace::new().expect("workspace");
    let service = Arc::new(ScriptedService::new().with_statuses(vec![
        status("IN_PROGRESS"),
        status("IN_PROGRESS"),
    ]));
    let engine = engine(2);
    let prepare_input = TurnInput::new("slow request");
    let prepare = TurnState::initial(SessionConfig::new(
        "conv-1",
        vec![workspace.root()],
        service.clone(),
    ));
    let generate = engine.advance(&prepare, &prepare_input).await.expect("prepare");
    let err = engine.advance(&generate, &prepare_input).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::GenerationTimeout);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let next = engine
        .advance(&generate, &TurnInput::new("slow request").with_cancel(cancel))
        .await
        .expect("cancelled retry");

    assert_eq!(next.phase(), "prepare");
    assert_eq!(next.accumulated().iteration, 0);
    assert_eq!(service.submissions().len(), 1);
    assert_eq!(service.status_calls(), 2);
}

/// A terminal service failure surfaces with its kind and detail and leaves the
/// accumulated state untouched.
#[tokio::test]
async fn generation_failure_keeps_previous_results() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut failed = status("PREDICT_FAILED");
    failed.detail = Some("request could not be planned".to_string());
    let service = Arc::new(
        ScriptedService::new()
            .with_statuses(vec![complete_with_counts(4, 5), failed])
            .with_archive(json!({ "new_file_contents": { "a.txt": "a" } })),
    );
    let engine = engine(10);
    let state = PrepareState::initial(SessionConfig::new(
        "conv-1",
        vec![workspace.root()],
        service,
    ));

    let first = engine
        .run_turn(&state, &TurnInput::new("one"))
        .await
        .expect("turn 1");
    let err = engine
        .run_turn(&first, &TurnInput::new("two"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::PredictFailed);
    assert_eq!(err.service_message(), Some("request could not be planned"));
    assert!(!err.is_retryable());
    assert_eq!(first.accumulated.iteration, 1);
    assert_eq!(first.accumulated.new_files.len(), 1);
}

/// Entries whose paths escape the workspace are skipped, not fatal.
#[tokio::test]
async fn unsafe_archive_entries_are_skipped() {
    let workspace = TestWorkspace::new().expect("workspace");
    let service = Arc::new(
        ScriptedService::new()
            .with_statuses(vec![complete_with_counts(0, 1)])
            .with_archive(json!({
                "new_file_contents": { "../escape.txt": "x", "ok.txt": "y" },
                "deleted_files": ["/etc/passwd"],
            })),
    );
    let state = PrepareState::initial(SessionConfig::new(
        "conv-1",
        vec![workspace.root()],
        service,
    ));

    let next = engine(5)
        .run_turn(&state, &TurnInput::new("go"))
        .await
        .expect("turn");

    assert_eq!(next.accumulated.new_files.len(), 1);
    assert_eq!(next.accumulated.new_files[0].archive_path, "ok.txt");
    assert!(next.accumulated.deleted_files.is_empty());
}
