//! Shared deterministic types for session core logic.
//!
//! These types define stable contracts between the poller, the reconciler and
//! the iteration coordinator. They hold no I/O handles and serialize to stable
//! JSON so intermediate states can be inspected or replayed.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status reported by the remote service for one generation.
///
/// Unknown wire values are preserved in [`GenerationStatus::Unrecognized`] so
/// the poller can fail fast with the offending value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GenerationStatus {
    InProgress,
    PredictReady,
    Complete,
    PredictFailed,
    DebateFailed,
    Failed,
    Unrecognized(String),
}

impl GenerationStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "IN_PROGRESS" => Self::InProgress,
            "PREDICT_READY" => Self::PredictReady,
            "COMPLETE" => Self::Complete,
            "PREDICT_FAILED" => Self::PredictFailed,
            "DEBATE_FAILED" => Self::DebateFailed,
            "FAILED" => Self::Failed,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::PredictReady => "PREDICT_READY",
            Self::Complete => "COMPLETE",
            Self::PredictFailed => "PREDICT_FAILED",
            Self::DebateFailed => "DEBATE_FAILED",
            Self::Failed => "FAILED",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// True for statuses that keep the poller going.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::InProgress | Self::PredictReady)
    }

    /// Failure sub-kind for terminal failure statuses.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::PredictFailed => Some(FailureKind::PredictFailed),
            Self::DebateFailed => Some(FailureKind::DebateFailed),
            Self::Failed => Some(FailureKind::Failed),
            _ => None,
        }
    }
}

impl From<String> for GenerationStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<GenerationStatus> for String {
    fn from(status: GenerationStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-kind of a service-reported terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PredictFailed,
    DebateFailed,
    Failed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PredictFailed => "predict_failed",
            Self::DebateFailed => "debate_failed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Iteration counters reported by the service after a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IterationCounts {
    pub remaining: Option<u32>,
    pub total: Option<u32>,
}

impl IterationCounts {
    pub fn new(remaining: u32, total: u32) -> Self {
        Self {
            remaining: Some(remaining),
            total: Some(total),
        }
    }

    /// Both counters, when the service reported both.
    pub fn both(&self) -> Option<(u32, u32)> {
        Some((self.remaining?, self.total?))
    }
}

/// A workspace root folder participating in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRoot {
    /// Stable name used as the path prefix in multi-root snapshots.
    pub name: String,
    pub path: PathBuf,
}

impl WorkspaceRoot {
    /// Build a root named after the last path component.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string());
        Self { name, path }
    }

    /// Build roots for several folders, suffixing repeated names (`src`,
    /// `src-2`, ...) so every root keeps a distinct archive prefix.
    pub fn from_paths<I, P>(paths: I) -> Vec<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut roots: Vec<Self> = Vec::new();
        for path in paths {
            let mut root = Self::from_path(path);
            let base = root.name.clone();
            let mut n = 2;
            while roots.iter().any(|other| other.name == root.name) {
                root.name = format!("{base}-{n}");
                n += 1;
            }
            roots.push(root);
        }
        roots
    }
}

/// A generated file, resolved against a workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    /// Path as it appeared in the result archive.
    pub archive_path: String,
    /// Path relative to `root`.
    pub relative_path: PathBuf,
    /// Name of the workspace root the file belongs to.
    pub root: String,
    /// Resolved on-disk location.
    pub path: PathBuf,
    pub content: String,
    /// Target scheme chosen by the caller (e.g. `preview`, `apply`).
    pub scheme: String,
    /// Set by the caller when the user declines this change.
    #[serde(default)]
    pub rejected: bool,
}

impl NewFile {
    pub fn uri(&self) -> String {
        format!("{}:{}", self.scheme, self.path.display())
    }
}

/// A file the generation asked to delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedFile {
    pub archive_path: String,
    pub relative_path: PathBuf,
    pub root: String,
    pub path: PathBuf,
    pub scheme: String,
    #[serde(default)]
    pub rejected: bool,
}

/// Span inside generated content that a reference applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSpan {
    pub start: u64,
    pub end: u64,
}

/// Provenance metadata for a generated snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReference {
    pub license_name: Option<String>,
    pub repository: Option<String>,
    pub url: Option<String>,
    pub information: Option<String>,
    pub span: Option<ContentSpan>,
}

/// Everything one successful Generate phase produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerationResult {
    pub new_files: Vec<NewFile>,
    pub deleted_files: Vec<DeletedFile>,
    pub references: Vec<CodeReference>,
    pub counts: IterationCounts,
}

/// Per-generation upload record, keyed by generation id in [`UploadHistory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadHistoryEntry {
    pub recorded_at: DateTime<Utc>,
    pub upload_id: String,
    pub new_files: Vec<NewFile>,
    pub deleted_files: Vec<DeletedFile>,
    /// Originating tab, falling back to the conversation id.
    pub tab_id: String,
}

/// Append-only upload history keyed by generation id.
pub type UploadHistory = BTreeMap<String, UploadHistoryEntry>;

/// Artifacts carried from one turn to the next.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Accumulated {
    pub new_files: Vec<NewFile>,
    pub deleted_files: Vec<DeletedFile>,
    pub references: Vec<CodeReference>,
    pub upload_history: UploadHistory,
    /// Iteration number of the last completed turn (0 before the first).
    pub iteration: u32,
    pub counts: IterationCounts,
}

impl Accumulated {
    /// Same counters and history, with the per-turn deltas cleared.
    pub fn without_deltas(&self) -> Self {
        Self {
            new_files: Vec::new(),
            deleted_files: Vec::new(),
            references: Vec::new(),
            upload_history: self.upload_history.clone(),
            iteration: self.iteration,
            counts: self.counts,
        }
    }
}
