//! Decoding of generation result archives into file change descriptors.
//!
//! The archive is a JSON document:
//!
//! ```json
//! {
//!   "new_file_contents": { "src/lib.rs": "..." },
//!   "deleted_files": ["old.rs"],
//!   "references": [{ "license_name": "MIT", "repository": "...", "url": "...",
//!                    "recommendation_content_span": { "start": 0, "end": 10 } }]
//! }
//! ```
//!
//! Parsing is lenient per entry: a malformed entry is skipped and reported
//! back with its reason, while a document that is not a JSON object is an
//! error. Logging the skips is left to the caller.

use serde::Deserialize;
use serde_json::Value;

use crate::core::path::{check_root_names, resolve_archive_path};
use crate::core::types::{CodeReference, ContentSpan, DeletedFile, NewFile, WorkspaceRoot};

/// Descriptors produced from one archive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveContents {
    pub new_files: Vec<NewFile>,
    pub deleted_files: Vec<DeletedFile>,
    pub references: Vec<CodeReference>,
    /// Entries dropped by the lenient parser.
    pub skipped: Vec<SkippedEntry>,
}

/// An archive entry that produced no descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Archive path, or the section name for section-level problems.
    pub entry: String,
    pub reason: String,
}

impl SkippedEntry {
    fn new(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            reason: reason.into(),
        }
    }
}

impl ArchiveContents {
    /// Number of file descriptors actually produced.
    pub fn produced(&self) -> usize {
        self.new_files.len() + self.deleted_files.len()
    }
}

#[derive(Deserialize)]
struct RawReference {
    license_name: Option<String>,
    repository: Option<String>,
    url: Option<String>,
    information: Option<String>,
    recommendation_content_span: Option<ContentSpan>,
}

/// Decode `bytes` and resolve every entry against `roots` under `scheme`.
///
/// Output lists are sorted by archive path, so the result does not depend on
/// the key order inside the archive.
pub fn decode_archive(
    bytes: &[u8],
    roots: &[WorkspaceRoot],
    scheme: &str,
) -> Result<ArchiveContents, String> {
    let doc: Value =
        serde_json::from_slice(bytes).map_err(|err| format!("parse result archive: {err}"))?;
    let Value::Object(doc) = doc else {
        return Err("result archive is not a JSON object".to_string());
    };
    check_root_names(roots)?;

    let mut contents = ArchiveContents::default();

    match doc.get("new_file_contents") {
        Some(Value::Object(files)) => {
            for (archive_path, content) in files {
                let Some(content) = content.as_str() else {
                    let skipped = SkippedEntry::new(archive_path, "file content is not a string");
                    contents.skipped.push(skipped);
                    continue;
                };
                match resolve_archive_path(roots, archive_path) {
                    Ok(resolved) => contents.new_files.push(NewFile {
                        archive_path: archive_path.clone(),
                        relative_path: resolved.relative_path,
                        root: resolved.root,
                        path: resolved.path,
                        content: content.to_string(),
                        scheme: scheme.to_string(),
                        rejected: false,
                    }),
                    Err(reason) => contents
                        .skipped
                        .push(SkippedEntry::new(archive_path, reason)),
                }
            }
        }
        Some(_) => contents
            .skipped
            .push(SkippedEntry::new("new_file_contents", "section is not an object")),
        None => {}
    }

    match doc.get("deleted_files") {
        Some(Value::Array(paths)) => {
            for entry in paths {
                let Some(archive_path) = entry.as_str() else {
                    let reason = format!("non-string entry {entry}");
                    contents
                        .skipped
                        .push(SkippedEntry::new("deleted_files", reason));
                    continue;
                };
                match resolve_archive_path(roots, archive_path) {
                    Ok(resolved) => contents.deleted_files.push(DeletedFile {
                        archive_path: archive_path.to_string(),
                        relative_path: resolved.relative_path,
                        root: resolved.root,
                        path: resolved.path,
                        scheme: scheme.to_string(),
                        rejected: false,
                    }),
                    Err(reason) => contents
                        .skipped
                        .push(SkippedEntry::new(archive_path, reason)),
                }
            }
        }
        Some(_) => contents
            .skipped
            .push(SkippedEntry::new("deleted_files", "section is not an array")),
        None => {}
    }

    if let Some(Value::Array(references)) = doc.get("references") {
        for entry in references {
            match RawReference::deserialize(entry) {
                Ok(raw) => contents.references.push(CodeReference {
                    license_name: raw.license_name,
                    repository: raw.repository,
                    url: raw.url,
                    information: raw.information,
                    span: raw.recommendation_content_span,
                }),
                Err(err) => contents
                    .skipped
                    .push(SkippedEntry::new("references", err.to_string())),
            }
        }
    }

    contents
        .new_files
        .sort_by(|a, b| a.archive_path.cmp(&b.archive_path));
    contents
        .deleted_files
        .sort_by(|a, b| a.archive_path.cmp(&b.archive_path));
    // Duplicate deletions collapse to one descriptor.
    contents
        .deleted_files
        .dedup_by(|a, b| a.archive_path == b.archive_path);

    Ok(contents)
}
