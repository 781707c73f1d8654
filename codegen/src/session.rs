//! Session state machine: one Prepare → Generate round trip per user turn.
//!
//! States are immutable values. [`SessionEngine::advance`] borrows the current
//! state and returns a new one, so a failed phase leaves the caller holding the
//! last good state, ready to retry the same phase.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::iteration::{HistoryMeta, advance_iteration};
use crate::core::types::{Accumulated, GenerationResult, WorkspaceRoot};
use crate::error::SessionError;
use crate::io::config::{EngineConfig, PollConfig, UploadConfig};
use crate::io::service::{GenerationRequest, GenerationService};
use crate::io::sink::{
    NoProgress, ProgressSink, TelemetryEvent, TelemetrySink, TracingTelemetry, TurnResult,
};
use crate::poll::{PollOutcome, Poller, Sleeper, TokioSleeper};
use crate::reconcile::reconcile;
use crate::upload::prepare_and_upload;

/// Target scheme used when the caller does not pick one.
pub const DEFAULT_SCHEME: &str = "preview";

/// Per-conversation configuration, replaced (never mutated) as turns progress.
#[derive(Clone)]
pub struct SessionConfig {
    pub conversation_id: String,
    /// Most recent workspace upload, superseded every turn.
    pub upload_id: Option<String>,
    pub workspace_roots: Vec<WorkspaceRoot>,
    pub service: Arc<dyn GenerationService>,
    /// Most recently completed generation; `None` before the first one.
    pub last_generation_id: Option<String>,
}

impl SessionConfig {
    pub fn new(
        conversation_id: impl Into<String>,
        workspace_roots: Vec<WorkspaceRoot>,
        service: Arc<dyn GenerationService>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            upload_id: None,
            workspace_roots,
            service,
            last_generation_id: None,
        }
    }

    pub fn with_upload_id(&self, upload_id: impl Into<String>) -> Self {
        Self {
            upload_id: Some(upload_id.into()),
            ..self.clone()
        }
    }

    pub fn with_last_generation(&self, generation_id: impl Into<String>) -> Self {
        Self {
            last_generation_id: Some(generation_id.into()),
            ..self.clone()
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("conversation_id", &self.conversation_id)
            .field("upload_id", &self.upload_id)
            .field("workspace_roots", &self.workspace_roots)
            .field("last_generation_id", &self.last_generation_id)
            .finish_non_exhaustive()
    }
}

/// Caller input for one turn. Both phases of the turn receive the same input.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub message: String,
    /// Originating tab; defaults to the conversation id in history entries.
    pub tab_id: Option<String>,
    /// Turn-scoped cancellation; a new turn should bring a new token.
    pub cancel: CancellationToken,
    /// Scheme attached to reconciled file descriptors.
    pub scheme: String,
}

impl TurnInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            tab_id: None,
            cancel: CancellationToken::new(),
            scheme: DEFAULT_SCHEME.to_string(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_tab(mut self, tab_id: impl Into<String>) -> Self {
        self.tab_id = Some(tab_id.into());
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }
}

/// Waiting for the workspace to be snapshotted and uploaded.
#[derive(Debug, Clone)]
pub struct PrepareState {
    pub config: SessionConfig,
    pub accumulated: Accumulated,
}

impl PrepareState {
    /// Empty state for a new conversation (iteration 0).
    pub fn initial(config: SessionConfig) -> Self {
        Self {
            config,
            accumulated: Accumulated::default(),
        }
    }
}

/// Upload done; waiting for the generation to be submitted and finish.
///
/// The upload to generate from is `config.upload_id`. Cancellation is not part
/// of the state: each call takes it from its [`TurnInput`].
#[derive(Debug, Clone)]
pub struct GenerateState {
    pub config: SessionConfig,
    pub accumulated: Accumulated,
    pub generation_id: String,
}

/// The current phase of a conversation.
#[derive(Debug, Clone)]
pub enum TurnState {
    Prepare(PrepareState),
    Generate(GenerateState),
}

impl TurnState {
    pub fn initial(config: SessionConfig) -> Self {
        Self::Prepare(PrepareState::initial(config))
    }

    pub fn config(&self) -> &SessionConfig {
        match self {
            Self::Prepare(state) => &state.config,
            Self::Generate(state) => &state.config,
        }
    }

    pub fn accumulated(&self) -> &Accumulated {
        match self {
            Self::Prepare(state) => &state.accumulated,
            Self::Generate(state) => &state.accumulated,
        }
    }

    pub fn phase(&self) -> &'static str {
        match self {
            Self::Prepare(_) => "prepare",
            Self::Generate(_) => "generate",
        }
    }
}

/// Drives conversations through their turns.
///
/// The engine is stateless between calls; every conversation's state lives in
/// the [`TurnState`] values the caller holds.
pub struct SessionEngine {
    poll: PollConfig,
    upload: UploadConfig,
    sleeper: Arc<dyn Sleeper>,
    progress: Arc<dyn ProgressSink>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SessionEngine {
    pub fn new(poll: PollConfig, upload: UploadConfig) -> Self {
        Self {
            poll,
            upload,
            sleeper: Arc::new(TokioSleeper),
            progress: Arc::new(NoProgress),
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.poll.clone(), cfg.upload.clone())
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Open a conversation with the service and return its initial state.
    pub async fn start_conversation(
        &self,
        service: Arc<dyn GenerationService>,
        workspace_roots: Vec<WorkspaceRoot>,
    ) -> Result<PrepareState> {
        let conversation_id = service
            .create_conversation()
            .await
            .context("create conversation")?;
        info!(%conversation_id, "conversation started");
        Ok(PrepareState::initial(SessionConfig::new(
            conversation_id,
            workspace_roots,
            service,
        )))
    }

    /// Run the phase for `state` and return the state that follows it.
    pub async fn advance(
        &self,
        state: &TurnState,
        input: &TurnInput,
    ) -> Result<TurnState, SessionError> {
        match state {
            TurnState::Prepare(prepare) => {
                self.prepare(prepare).await.map(TurnState::Generate)
            }
            TurnState::Generate(generate) => {
                self.generate(generate, input).await.map(TurnState::Prepare)
            }
        }
    }

    /// Run both phases of one user turn.
    pub async fn run_turn(
        &self,
        state: &PrepareState,
        input: &TurnInput,
    ) -> Result<PrepareState, SessionError> {
        let generate = self.prepare(state).await?;
        self.generate(&generate, input).await
    }

    #[instrument(skip_all, fields(conversation_id = %state.config.conversation_id))]
    async fn prepare(&self, state: &PrepareState) -> Result<GenerateState, SessionError> {
        let upload_id =
            prepare_and_upload(&state.config, &self.upload, self.telemetry.as_ref()).await?;
        Ok(GenerateState {
            config: state.config.with_upload_id(upload_id),
            accumulated: state.accumulated.clone(),
            generation_id: Uuid::new_v4().to_string(),
        })
    }

    #[instrument(
        skip_all,
        fields(conversation_id = %state.config.conversation_id, generation_id = %state.generation_id)
    )]
    async fn generate(
        &self,
        state: &GenerateState,
        input: &TurnInput,
    ) -> Result<PrepareState, SessionError> {
        let config = &state.config;
        if input.cancel.is_cancelled() {
            info!("turn cancelled before submission");
            return Ok(self.cancelled(state, None));
        }
        let Some(upload_id) = config.upload_id.clone() else {
            let err = SessionError::GenerationSubmitFailed {
                message: "no workspace upload to generate from".to_string(),
            };
            return Err(self.failed(state, err));
        };

        let submitted = config
            .service
            .submit_generation(&GenerationRequest {
                conversation_id: config.conversation_id.clone(),
                generation_id: state.generation_id.clone(),
                upload_id: upload_id.clone(),
                message: input.message.clone(),
            })
            .await
            .map_err(|err| SessionError::GenerationSubmitFailed {
                message: format!("{err:#}"),
            });
        if let Err(err) = submitted {
            return Err(self.failed(state, err));
        }

        let poller = Poller {
            service: config.service.as_ref(),
            sleeper: self.sleeper.as_ref(),
            progress: self.progress.as_ref(),
            settings: &self.poll,
        };
        let outcome = poller
            .poll_until_terminal(&config.conversation_id, &state.generation_id, &input.cancel)
            .await;
        let (counts, attempts) = match outcome {
            Ok(PollOutcome::Complete { counts, attempts }) => (counts, attempts),
            Ok(PollOutcome::Cancelled { attempts }) => {
                info!(attempts, "turn cancelled while polling");
                return Ok(self.cancelled(state, Some(attempts)));
            }
            Err(err) => return Err(self.failed(state, err)),
        };

        let contents = match reconcile(
            config.service.as_ref(),
            &config.conversation_id,
            &input.scheme,
            &config.workspace_roots,
        )
        .await
        {
            Ok(contents) => contents,
            Err(err) => return Err(self.failed(state, err)),
        };

        let meta = HistoryMeta {
            generation_id: state.generation_id.clone(),
            upload_id,
            tab_id: input
                .tab_id
                .clone()
                .unwrap_or_else(|| config.conversation_id.clone()),
            recorded_at: Utc::now(),
        };
        let accumulated = advance_iteration(
            &state.accumulated,
            GenerationResult {
                new_files: contents.new_files,
                deleted_files: contents.deleted_files,
                references: contents.references,
                counts,
            },
            &meta,
        );

        info!(
            iteration = accumulated.iteration,
            files = accumulated.new_files.len(),
            deleted = accumulated.deleted_files.len(),
            skipped = contents.skipped.len(),
            "generation complete"
        );
        self.telemetry.record(TelemetryEvent::GenerationFinished {
            conversation_id: config.conversation_id.clone(),
            generation_id: state.generation_id.clone(),
            result: TurnResult::Succeeded,
            code: None,
            iteration: accumulated.iteration,
            files_generated: accumulated.new_files.len(),
            files_deleted: accumulated.deleted_files.len(),
            poll_attempts: Some(attempts),
        });

        Ok(PrepareState {
            config: config.with_last_generation(state.generation_id.clone()),
            accumulated,
        })
    }

    fn cancelled(&self, state: &GenerateState, attempts: Option<u32>) -> PrepareState {
        self.telemetry.record(TelemetryEvent::GenerationFinished {
            conversation_id: state.config.conversation_id.clone(),
            generation_id: state.generation_id.clone(),
            result: TurnResult::Cancelled,
            code: None,
            iteration: state.accumulated.iteration,
            files_generated: 0,
            files_deleted: 0,
            poll_attempts: attempts,
        });
        PrepareState {
            config: state.config.clone(),
            accumulated: state.accumulated.without_deltas(),
        }
    }

    fn failed(&self, state: &GenerateState, err: SessionError) -> SessionError {
        warn!(code = %err.code(), error = %err, "generation phase failed");
        self.telemetry.record(TelemetryEvent::GenerationFinished {
            conversation_id: state.config.conversation_id.clone(),
            generation_id: state.generation_id.clone(),
            result: TurnResult::Failed,
            code: Some(err.code().as_str()),
            iteration: state.accumulated.iteration,
            files_generated: 0,
            files_deleted: 0,
            poll_attempts: None,
        });
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_support::{
        CountingSleeper, RecordingTelemetry, ScriptedService, TestWorkspace, complete_with_counts,
        status,
    };
    use serde_json::json;

    fn engine(telemetry: Arc<RecordingTelemetry>) -> SessionEngine {
        SessionEngine::new(
            PollConfig {
                max_attempts: 5,
                delay_ms: 10,
            },
            UploadConfig::default(),
        )
        .with_sleeper(Arc::new(CountingSleeper::default()))
        .with_telemetry(telemetry)
    }

    fn prepared(service: Arc<ScriptedService>, workspace: &TestWorkspace) -> PrepareState {
        PrepareState::initial(SessionConfig::new(
            "conv-1",
            vec![workspace.root()],
            service,
        ))
    }

    async fn into_generate(
        engine: &SessionEngine,
        state: &PrepareState,
        input: &TurnInput,
    ) -> GenerateState {
        match engine
            .advance(&TurnState::Prepare(state.clone()), input)
            .await
            .expect("prepare")
        {
            TurnState::Generate(generate) => generate,
            TurnState::Prepare(_) => panic!("expected generate state"),
        }
    }

    #[tokio::test]
    async fn prepare_uploads_and_moves_to_generate() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace.write("src/main.rs", "fn main() {}\n").expect("write");
        let service = Arc::new(ScriptedService::new());
        let engine = engine(Arc::new(RecordingTelemetry::default()));
        let state = prepared(service.clone(), &workspace);

        let generate = into_generate(&engine, &state, &TurnInput::new("add a cli")).await;

        assert_eq!(generate.config.upload_id.as_deref(), Some("upload-1"));
        assert!(!generate.generation_id.is_empty());
        assert_eq!(service.uploads().len(), 1);
        assert_eq!(state.config.upload_id, None);
    }

    #[tokio::test]
    async fn each_prepare_gets_a_fresh_generation_id() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = Arc::new(ScriptedService::new());
        let engine = engine(Arc::new(RecordingTelemetry::default()));
        let state = prepared(service, &workspace);
        let input = TurnInput::new("go");

        let first = into_generate(&engine, &state, &input).await;
        let second = into_generate(&engine, &state, &input).await;

        assert_ne!(first.generation_id, second.generation_id);
        assert_ne!(first.config.upload_id, second.config.upload_id);
    }

    #[tokio::test]
    async fn completed_generation_returns_to_prepare_with_results() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = Arc::new(
            ScriptedService::new()
                .with_statuses(vec![status("IN_PROGRESS"), complete_with_counts(2, 5)])
                .with_archive(json!({ "new_file_contents": { "src/lib.rs": "pub fn f() {}" } })),
        );
        let telemetry = Arc::new(RecordingTelemetry::default());
        let engine = engine(telemetry.clone());
        let input = TurnInput::new("add f").with_tab("tab-7");

        let next = engine
            .run_turn(&prepared(service.clone(), &workspace), &input)
            .await
            .expect("turn");

        assert_eq!(next.accumulated.iteration, 3);
        assert_eq!(next.accumulated.new_files.len(), 1);
        assert!(next.accumulated.new_files[0].uri().starts_with("preview:"));
        let submitted = service.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].message, "add f");
        assert_eq!(
            next.config.last_generation_id.as_deref(),
            Some(submitted[0].generation_id.as_str())
        );
        let entry = &next.accumulated.upload_history[&submitted[0].generation_id];
        assert_eq!(entry.tab_id, "tab-7");
        assert_eq!(entry.upload_id, "upload-1");
        assert!(telemetry.events().iter().any(|event| matches!(
            event,
            TelemetryEvent::GenerationFinished {
                result: TurnResult::Succeeded,
                iteration: 3,
                poll_attempts: Some(2),
                ..
            }
        )));
    }

    #[tokio::test]
    async fn cancelled_before_submission_skips_the_service() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = Arc::new(ScriptedService::new());
        let engine = engine(Arc::new(RecordingTelemetry::default()));
        let cancel = CancellationToken::new();
        let input = TurnInput::new("go").with_cancel(cancel.clone());
        let generate = into_generate(&engine, &prepared(service.clone(), &workspace), &input).await;
        cancel.cancel();

        let next = engine
            .advance(&TurnState::Generate(generate), &input)
            .await
            .expect("cancelled turn");

        assert_eq!(next.phase(), "prepare");
        assert!(service.submissions().is_empty());
        assert_eq!(service.status_calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_clears_deltas_but_keeps_history() {
        let workspace = TestWorkspace::new().expect("workspace");
        let cancel = CancellationToken::new();
        let service = Arc::new(
            ScriptedService::new()
                .with_statuses(vec![complete_with_counts(4, 5), status("IN_PROGRESS")])
                .with_archive(json!({ "new_file_contents": { "a.txt": "a" } }))
                .cancel_after_status_calls(2, cancel.clone()),
        );
        let telemetry = Arc::new(RecordingTelemetry::default());
        let engine = engine(telemetry.clone());

        let first = engine
            .run_turn(&prepared(service.clone(), &workspace), &TurnInput::new("one"))
            .await
            .expect("first turn");
        let second = engine
            .run_turn(&first, &TurnInput::new("two").with_cancel(cancel))
            .await
            .expect("cancelled turn");

        assert!(second.accumulated.new_files.is_empty());
        assert_eq!(second.accumulated.iteration, first.accumulated.iteration);
        assert_eq!(second.accumulated.upload_history, first.accumulated.upload_history);
        assert_eq!(second.config.last_generation_id, first.config.last_generation_id);
        assert!(telemetry.events().iter().any(|event| matches!(
            event,
            TelemetryEvent::GenerationFinished {
                result: TurnResult::Cancelled,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn submit_failure_leaves_generate_state_retryable() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = Arc::new(
            ScriptedService::new()
                .fail_submit("throttled")
                .with_statuses(vec![complete_with_counts(0, 1)])
                .with_archive(json!({ "new_file_contents": {} })),
        );
        let telemetry = Arc::new(RecordingTelemetry::default());
        let engine = engine(telemetry.clone());
        let input = TurnInput::new("go");
        let generate = into_generate(&engine, &prepared(service.clone(), &workspace), &input).await;
        let state = TurnState::Generate(generate);

        let err = engine.advance(&state, &input).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::GenerationSubmitFailed);
        assert!(err.is_retryable());
        assert!(telemetry.events().iter().any(|event| matches!(
            event,
            TelemetryEvent::GenerationFinished {
                result: TurnResult::Failed,
                code: Some("generation_submit_failed"),
                ..
            }
        )));

        let next = engine.advance(&state, &input).await.expect("retry");
        assert_eq!(next.accumulated().iteration, 1);
        assert_eq!(service.submissions().len(), 1);
    }

    #[tokio::test]
    async fn retry_honours_the_retrying_turns_cancel_token() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = Arc::new(
            ScriptedService::new()
                .fail_submit("throttled")
                .with_statuses(vec![complete_with_counts(0, 1)])
                .with_archive(json!({ "new_file_contents": { "a.txt": "a" } })),
        );
        let engine = engine(Arc::new(RecordingTelemetry::default()));
        let first = TurnInput::new("go");
        let generate = into_generate(&engine, &prepared(service.clone(), &workspace), &first).await;
        let state = TurnState::Generate(generate);
        engine.advance(&state, &first).await.unwrap_err();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let retry = TurnInput::new("go").with_cancel(cancel);
        let next = engine.advance(&state, &retry).await.expect("cancelled retry");

        assert_eq!(next.phase(), "prepare");
        assert!(next.accumulated().new_files.is_empty());
        assert!(service.submissions().is_empty());
        assert_eq!(service.status_calls(), 0);
    }

    #[tokio::test]
    async fn generate_uses_the_input_it_is_given() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = Arc::new(
            ScriptedService::new()
                .with_statuses(vec![complete_with_counts(1, 2)])
                .with_archive(json!({ "new_file_contents": { "a.txt": "a" } })),
        );
        let engine = engine(Arc::new(RecordingTelemetry::default()));
        let prepare_input = TurnInput::new("first wording");
        let generate =
            into_generate(&engine, &prepared(service.clone(), &workspace), &prepare_input).await;
        prepare_input.cancel.cancel();

        let generate_input = TurnInput::new("second wording")
            .with_tab("tab-2")
            .with_scheme("apply");
        let next = engine
            .advance(&TurnState::Generate(generate), &generate_input)
            .await
            .expect("generate");

        let submitted = service.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].message, "second wording");
        assert_eq!(submitted[0].upload_id, "upload-1");
        let accumulated = next.accumulated();
        assert!(accumulated.new_files[0].uri().starts_with("apply:"));
        assert_eq!(
            accumulated.upload_history[&submitted[0].generation_id].tab_id,
            "tab-2"
        );
    }

    #[tokio::test]
    async fn generate_without_an_upload_is_rejected() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = Arc::new(ScriptedService::new());
        let engine = engine(Arc::new(RecordingTelemetry::default()));
        let state = TurnState::Generate(GenerateState {
            config: prepared(service.clone(), &workspace).config,
            accumulated: Accumulated::default(),
            generation_id: "gen-1".to_string(),
        });

        let err = engine.advance(&state, &TurnInput::new("go")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::GenerationSubmitFailed);
        assert!(service.submissions().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_keeps_prepare_state() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = Arc::new(ScriptedService::new().fail_upload("bucket unavailable"));
        let engine = engine(Arc::new(RecordingTelemetry::default()));
        let state = TurnState::Prepare(prepared(service, &workspace));

        let err = engine.advance(&state, &TurnInput::new("go")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UploadFailed);
        assert!(err.to_string().contains("bucket unavailable"));
        assert_eq!(state.phase(), "prepare");
    }

    #[tokio::test]
    async fn start_conversation_uses_service_id() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = Arc::new(ScriptedService::new().with_conversation_id("conv-42"));
        let engine = engine(Arc::new(RecordingTelemetry::default()));

        let state = engine
            .start_conversation(service, vec![workspace.root()])
            .await
            .expect("start");

        assert_eq!(state.config.conversation_id, "conv-42");
        assert_eq!(state.accumulated, Accumulated::default());
    }
}
