//! Apply reconciled file changes to the workspace.

use std::fs;
use std::io::ErrorKind;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::core::types::{DeletedFile, NewFile};

/// Counts of changes written by [`apply_changes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ApplySummary {
    pub written: usize,
    pub deleted: usize,
    /// Descriptors skipped because the caller rejected them.
    pub rejected: usize,
}

/// Write new files (creating parent directories) and remove deleted files.
///
/// Rejected descriptors are left untouched. Deleting a file that is already
/// gone is not an error.
pub fn apply_changes(
    new_files: &[NewFile],
    deleted_files: &[DeletedFile],
) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();

    for file in new_files {
        if file.rejected {
            summary.rejected += 1;
            continue;
        }
        if let Some(parent) = file.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&file.path, &file.content)
            .with_context(|| format!("write {}", file.path.display()))?;
        debug!(path = %file.path.display(), "wrote generated file");
        summary.written += 1;
    }

    for file in deleted_files {
        if file.rejected {
            summary.rejected += 1;
            continue;
        }
        match fs::remove_file(&file.path) {
            Ok(()) => summary.deleted += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %file.path.display(), "file already removed");
            }
            Err(err) => {
                return Err(err).with_context(|| format!("remove {}", file.path.display()));
            }
        }
    }

    info!(
        written = summary.written,
        deleted = summary.deleted,
        rejected = summary.rejected,
        "applied changes"
    );
    Ok(summary)
}
