//! Mapping between archive paths and workspace roots.
//!
//! Archive paths are `/`-separated. With a single root they are relative to
//! that root; with several roots the first segment names the root. The same
//! convention is used when building snapshots and when resolving results.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::core::types::WorkspaceRoot;

/// An archive path resolved against a workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub root: String,
    pub relative_path: PathBuf,
    pub path: PathBuf,
}

/// Build the archive path for `relative` under `roots[root_index]`.
pub fn archive_path_for(roots: &[WorkspaceRoot], root_index: usize, relative: &Path) -> String {
    let rel = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    if roots.len() > 1 {
        format!("{}/{}", roots[root_index].name, rel)
    } else {
        rel
    }
}

/// Check that multi-root workspaces give every root a distinct name.
///
/// Root names are archive prefixes; two roots sharing one would make every
/// entry under that prefix ambiguous.
pub fn check_root_names(roots: &[WorkspaceRoot]) -> Result<(), String> {
    if roots.len() < 2 {
        return Ok(());
    }
    let mut seen = HashSet::new();
    for root in roots {
        if !seen.insert(root.name.as_str()) {
            return Err(format!(
                "workspace root name '{}' is used by more than one root",
                root.name
            ));
        }
    }
    Ok(())
}

/// Resolve an archive path to an on-disk location.
///
/// Rejects empty, absolute and parent-escaping paths, and multi-root paths
/// whose prefix does not name a known root.
pub fn resolve_archive_path(
    roots: &[WorkspaceRoot],
    archive_path: &str,
) -> Result<ResolvedPath, String> {
    if archive_path.starts_with('/') || archive_path.contains('\\') {
        return Err(format!("unsupported archive path '{archive_path}'"));
    }
    let mut segments = Vec::new();
    for segment in archive_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(format!("archive path escapes root '{archive_path}'")),
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err("empty archive path".to_string());
    }

    let (root, rest) = match roots {
        [] => return Err("no workspace roots".to_string()),
        [only] => (only, segments.as_slice()),
        many => {
            let prefix = segments[0];
            let root = many
                .iter()
                .find(|root| root.name == prefix)
                .ok_or_else(|| format!("unknown workspace root '{prefix}' in '{archive_path}'"))?;
            (root, &segments[1..])
        }
    };
    if rest.is_empty() {
        return Err(format!("archive path names a root only '{archive_path}'"));
    }

    let relative_path: PathBuf = rest.iter().collect();
    Ok(ResolvedPath {
        root: root.name.clone(),
        path: root.path.join(&relative_path),
        relative_path,
    })
}
