//! Prepare phase: snapshot the workspace and upload it.

use std::time::Instant;

use anyhow::{Context, anyhow};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::SessionError;
use crate::io::config::UploadConfig;
use crate::io::service::UploadUrlRequest;
use crate::io::sink::{TelemetryEvent, TelemetrySink};
use crate::io::snapshot::build_snapshot;
use crate::session::SessionConfig;

/// Snapshot `config.workspace_roots`, upload the blob and return the new
/// upload id.
///
/// Failures are reported as [`SessionError::UploadFailed`] and never retried
/// here.
#[instrument(skip_all, fields(conversation_id = %config.conversation_id))]
pub async fn prepare_and_upload(
    config: &SessionConfig,
    settings: &UploadConfig,
    telemetry: &dyn TelemetrySink,
) -> Result<String, SessionError> {
    let start = Instant::now();
    if config.workspace_roots.is_empty() {
        return Err(SessionError::upload(&anyhow!("no workspace roots configured")));
    }

    let roots = config.workspace_roots.clone();
    let settings = settings.clone();
    let snapshot = tokio::task::spawn_blocking(move || build_snapshot(&roots, &settings))
        .await
        .context("snapshot task")
        .and_then(|built| built)
        .map_err(|err| SessionError::upload(&err))?;

    let location = config
        .service
        .create_upload_url(&UploadUrlRequest {
            conversation_id: config.conversation_id.clone(),
            checksum: snapshot.checksum.clone(),
            content_length: snapshot.blob.len() as u64,
            upload_token: Uuid::new_v4().to_string(),
        })
        .await
        .map_err(|err| SessionError::upload(&err.context("create upload url")))?;

    let bytes = snapshot.blob.len() as u64;
    config
        .service
        .upload_blob(&location, &snapshot.checksum, snapshot.blob)
        .await
        .map_err(|err| SessionError::upload(&err))?;

    info!(upload_id = %location.upload_id, bytes, files = snapshot.file_count, "workspace uploaded");
    telemetry.record(TelemetryEvent::UploadCompleted {
        conversation_id: config.conversation_id.clone(),
        upload_id: location.upload_id.clone(),
        bytes,
        files: snapshot.file_count,
        duration: start.elapsed(),
    });
    Ok(location.upload_id)
}
