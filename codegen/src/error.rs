//! Error type surfaced by session phases.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::core::types::FailureKind;

/// Stable, machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UploadFailed,
    GenerationSubmitFailed,
    GenerationTimeout,
    PredictFailed,
    DebateFailed,
    GenerationFailed,
    ProtocolError,
    StatusQueryFailed,
    ArchiveFetchFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UploadFailed => "upload_failed",
            Self::GenerationSubmitFailed => "generation_submit_failed",
            Self::GenerationTimeout => "generation_timeout",
            Self::PredictFailed => "predict_failed",
            Self::DebateFailed => "debate_failed",
            Self::GenerationFailed => "generation_failed",
            Self::ProtocolError => "protocol_error",
            Self::StatusQueryFailed => "status_query_failed",
            Self::ArchiveFetchFailed => "archive_fetch_failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a Prepare or Generate phase.
///
/// No next state is produced when a phase fails; the caller keeps its previous
/// state and may retry the same phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("workspace upload failed: {message}")]
    UploadFailed { message: String },

    #[error("generation request rejected: {message}")]
    GenerationSubmitFailed { message: String },

    #[error("generation did not finish after {attempts} status checks")]
    GenerationTimeout { attempts: u32 },

    #[error("generation {kind}{}", detail_suffix(.detail))]
    GenerationFailed {
        kind: FailureKind,
        detail: Option<String>,
    },

    #[error("unrecognized generation status '{status}'")]
    ProtocolError { status: String },

    #[error("generation status query failed: {message}")]
    StatusQueryFailed { message: String },

    #[error("result archive unavailable: {message}")]
    ArchiveFetchFailed { message: String },
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(": {detail}"),
        None => String::new(),
    }
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UploadFailed { .. } => ErrorCode::UploadFailed,
            Self::GenerationSubmitFailed { .. } => ErrorCode::GenerationSubmitFailed,
            Self::GenerationTimeout { .. } => ErrorCode::GenerationTimeout,
            Self::GenerationFailed { kind, .. } => match kind {
                FailureKind::PredictFailed => ErrorCode::PredictFailed,
                FailureKind::DebateFailed => ErrorCode::DebateFailed,
                FailureKind::Failed => ErrorCode::GenerationFailed,
            },
            Self::ProtocolError { .. } => ErrorCode::ProtocolError,
            Self::StatusQueryFailed { .. } => ErrorCode::StatusQueryFailed,
            Self::ArchiveFetchFailed { .. } => ErrorCode::ArchiveFetchFailed,
        }
    }

    /// Message provided by the remote service, when there is one.
    pub fn service_message(&self) -> Option<&str> {
        match self {
            Self::GenerationFailed { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// True when re-running the turn may succeed ("try again"), false when the
    /// request itself cannot be fulfilled.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::GenerationFailed { .. } | Self::ProtocolError { .. }
        )
    }

    pub(crate) fn upload(err: &anyhow::Error) -> Self {
        Self::UploadFailed {
            message: format!("{err:#}"),
        }
    }
}
