//! Workspace snapshots packaged for upload.
//!
//! A snapshot is a JSON document listing every included file with its archive
//! path (see [`crate::core::path`]) and base64-encoded content. Files are
//! walked in sorted order so identical workspaces yield identical blobs and
//! checksums.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::path::{archive_path_for, check_root_names};
use crate::core::types::WorkspaceRoot;
use crate::io::config::UploadConfig;

const SNAPSHOT_VERSION: u32 = 1;

/// Encoded workspace snapshot ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub blob: Vec<u8>,
    /// Base64-encoded SHA-256 of `blob`.
    pub checksum: String,
    pub file_count: usize,
    /// Files left out because they exceeded `max_file_bytes`.
    pub oversized: usize,
}

#[derive(Serialize)]
struct SnapshotDocument {
    version: u32,
    files: Vec<SnapshotFile>,
}

#[derive(Serialize)]
struct SnapshotFile {
    path: String,
    content: String,
}

/// Base64-encoded SHA-256 digest.
pub fn checksum(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    STANDARD.encode(digest)
}

/// Walk every root and encode the included files into one blob.
#[instrument(skip_all, fields(roots = roots.len()))]
pub fn build_snapshot(roots: &[WorkspaceRoot], cfg: &UploadConfig) -> Result<Snapshot> {
    if roots.is_empty() {
        return Err(anyhow!("no workspace roots to snapshot"));
    }
    let excludes = build_excludes(&cfg.exclude)?;
    check_root_names(roots).map_err(|reason| anyhow!(reason))?;

    let mut files = Vec::new();
    let mut oversized = 0usize;
    for (index, root) in roots.iter().enumerate() {
        if !root.path.is_dir() {
            return Err(anyhow!(
                "workspace root {} is not a directory",
                root.path.display()
            ));
        }
        let walker = WalkDir::new(&root.path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let pruned = entry.depth() > 0
                    && entry.file_type().is_dir()
                    && entry
                        .path()
                        .strip_prefix(&root.path)
                        .is_ok_and(|relative| excludes_subtree(&excludes, relative));
                !pruned
            });
        for entry in walker {
            let entry = entry.with_context(|| format!("walk {}", root.path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&root.path)
                .with_context(|| format!("relativize {}", entry.path().display()))?;
            if excludes.is_match(relative) {
                continue;
            }
            let size = entry
                .metadata()
                .with_context(|| format!("stat {}", entry.path().display()))?
                .len();
            if size > cfg.max_file_bytes {
                warn!(path = %entry.path().display(), size, "skipping oversized file");
                oversized += 1;
                continue;
            }
            let bytes =
                fs::read(entry.path()).with_context(|| format!("read {}", entry.path().display()))?;
            files.push(SnapshotFile {
                path: archive_path_for(roots, index, relative),
                content: STANDARD.encode(bytes),
            });
        }
    }

    let file_count = files.len();
    let blob = serde_json::to_vec(&SnapshotDocument {
        version: SNAPSHOT_VERSION,
        files,
    })
    .context("encode snapshot")?;
    if blob.len() as u64 > cfg.max_bytes {
        return Err(anyhow!(
            "snapshot is {} bytes, above the {} byte limit",
            blob.len(),
            cfg.max_bytes
        ));
    }

    debug!(file_count, bytes = blob.len(), oversized, "snapshot built");
    Ok(Snapshot {
        checksum: checksum(&blob),
        blob,
        file_count,
        oversized,
    })
}

/// True when every path below the directory `relative` is excluded, so the
/// walk can skip it without reading it.
fn excludes_subtree(excludes: &GlobSet, relative: &Path) -> bool {
    excludes.is_match(relative) || excludes.is_match(relative.join("**"))
}

fn build_excludes(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("exclude pattern '{pattern}'"))?);
    }
    builder.build().context("build exclude set")
}
