//! Fetch a completed generation's result archive and map it to file changes.

use tracing::{info, instrument, warn};

use crate::core::archive::{ArchiveContents, decode_archive};
use crate::core::types::WorkspaceRoot;
use crate::error::SessionError;
use crate::io::service::GenerationService;

/// Fetch and decode the conversation's result archive.
///
/// Performs no writes. Fetch errors and undecodable archives surface as
/// [`SessionError::ArchiveFetchFailed`]; malformed entries are skipped, logged
/// and listed in [`ArchiveContents::skipped`].
#[instrument(skip(service, roots), fields(roots = roots.len()))]
pub async fn reconcile(
    service: &dyn GenerationService,
    conversation_id: &str,
    scheme: &str,
    roots: &[WorkspaceRoot],
) -> Result<ArchiveContents, SessionError> {
    let bytes = service
        .fetch_result_archive(conversation_id)
        .await
        .map_err(|err| SessionError::ArchiveFetchFailed {
            message: format!("{err:#}"),
        })?;
    let contents = decode_archive(&bytes, roots, scheme)
        .map_err(|message| SessionError::ArchiveFetchFailed { message })?;
    for skip in &contents.skipped {
        warn!(entry = %skip.entry, reason = %skip.reason, "skipping archive entry");
    }
    info!(
        produced = contents.produced(),
        skipped = contents.skipped.len(),
        references = contents.references.len(),
        "result archive reconciled"
    );
    Ok(contents)
}
