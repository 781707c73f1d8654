//! Test doubles for the generation service, sleeper and sinks, plus a
//! temporary workspace builder.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::core::types::{GenerationStatus, WorkspaceRoot};
use crate::io::service::{
    GenerationRequest, GenerationService, StatusReport, UploadLocation, UploadUrlRequest,
};
use crate::io::sink::{TelemetryEvent, TelemetrySink};
use crate::poll::Sleeper;

/// Build a status report for `status` with no detail or counts.
pub fn status(raw: &str) -> StatusReport {
    StatusReport::new(GenerationStatus::parse(raw))
}

/// Build a `COMPLETE` report carrying iteration counts.
pub fn complete_with_counts(remaining: u32, total: u32) -> StatusReport {
    let mut report = StatusReport::new(GenerationStatus::Complete);
    report.remaining_iterations = Some(remaining);
    report.total_iterations = Some(total);
    report
}

/// Upload blob captured by [`ScriptedService::upload_blob`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    pub upload_id: String,
    pub checksum: String,
    pub blob: Vec<u8>,
}

#[derive(Default)]
struct Failures {
    upload: Option<String>,
    submit: Option<String>,
    status: Option<String>,
    archive: Option<String>,
}

/// In-memory [`GenerationService`] that replays scripted responses.
///
/// Status reports are consumed in order across all generations. Archives are
/// consumed in order too, except the last one, which is returned for every
/// later fetch. Each `fail_*` method fails only the next matching call.
pub struct ScriptedService {
    conversation_id: String,
    statuses: Mutex<VecDeque<StatusReport>>,
    archives: Mutex<VecDeque<Vec<u8>>>,
    failures: Mutex<Failures>,
    cancel_after: Option<(u32, CancellationToken)>,
    status_calls: AtomicU32,
    upload_counter: AtomicU32,
    upload_requests: Mutex<Vec<UploadUrlRequest>>,
    uploads: Mutex<Vec<UploadedBlob>>,
    submissions: Mutex<Vec<GenerationRequest>>,
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedService {
    pub fn new() -> Self {
        Self {
            conversation_id: "conv-1".to_string(),
            statuses: Mutex::new(VecDeque::new()),
            archives: Mutex::new(VecDeque::new()),
            failures: Mutex::new(Failures::default()),
            cancel_after: None,
            status_calls: AtomicU32::new(0),
            upload_counter: AtomicU32::new(0),
            upload_requests: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: &str) -> Self {
        self.conversation_id = conversation_id.to_string();
        self
    }

    pub fn with_statuses(self, statuses: Vec<StatusReport>) -> Self {
        lock(&self.statuses).extend(statuses);
        self
    }

    pub fn with_archive(self, archive: serde_json::Value) -> Self {
        let bytes = serde_json::to_vec(&archive).unwrap_or_default();
        self.with_raw_archive(bytes)
    }

    pub fn with_raw_archive(self, bytes: Vec<u8>) -> Self {
        lock(&self.archives).push_back(bytes);
        self
    }

    pub fn fail_upload(self, message: &str) -> Self {
        lock(&self.failures).upload = Some(message.to_string());
        self
    }

    pub fn fail_submit(self, message: &str) -> Self {
        lock(&self.failures).submit = Some(message.to_string());
        self
    }

    pub fn fail_status(self, message: &str) -> Self {
        lock(&self.failures).status = Some(message.to_string());
        self
    }

    pub fn fail_archive(self, message: &str) -> Self {
        lock(&self.failures).archive = Some(message.to_string());
        self
    }

    /// Cancel `token` as the `calls`-th status query returns.
    pub fn cancel_after_status_calls(mut self, calls: u32, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn upload_requests(&self) -> Vec<UploadUrlRequest> {
        lock(&self.upload_requests).clone()
    }

    pub fn uploads(&self) -> Vec<UploadedBlob> {
        lock(&self.uploads).clone()
    }

    pub fn submissions(&self) -> Vec<GenerationRequest> {
        lock(&self.submissions).clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn create_conversation(&self) -> Result<String> {
        Ok(self.conversation_id.clone())
    }

    async fn create_upload_url(&self, request: &UploadUrlRequest) -> Result<UploadLocation> {
        lock(&self.upload_requests).push(request.clone());
        let n = self.upload_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(UploadLocation {
            upload_id: format!("upload-{n}"),
            url: format!("memory://uploads/{n}"),
            headers: Default::default(),
        })
    }

    async fn upload_blob(
        &self,
        location: &UploadLocation,
        checksum: &str,
        blob: Vec<u8>,
    ) -> Result<()> {
        if let Some(message) = lock(&self.failures).upload.take() {
            bail!(message);
        }
        lock(&self.uploads).push(UploadedBlob {
            upload_id: location.upload_id.clone(),
            checksum: checksum.to_string(),
            blob,
        });
        Ok(())
    }

    async fn submit_generation(&self, request: &GenerationRequest) -> Result<()> {
        if let Some(message) = lock(&self.failures).submit.take() {
            bail!(message);
        }
        lock(&self.submissions).push(request.clone());
        Ok(())
    }

    async fn generation_status(
        &self,
        _conversation_id: &str,
        _generation_id: &str,
    ) -> Result<StatusReport> {
        let calls = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = lock(&self.failures).status.take() {
            bail!(message);
        }
        let report = lock(&self.statuses)
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted status left for call {calls}"))?;
        if let Some((after, token)) = &self.cancel_after
            && calls == *after
        {
            token.cancel();
        }
        Ok(report)
    }

    async fn fetch_result_archive(&self, _conversation_id: &str) -> Result<Vec<u8>> {
        if let Some(message) = lock(&self.failures).archive.take() {
            bail!(message);
        }
        let mut archives = lock(&self.archives);
        match archives.len() {
            0 => bail!("no scripted archive"),
            1 => Ok(archives[0].clone()),
            _ => Ok(archives.pop_front().unwrap_or_default()),
        }
    }
}

/// Sleeper that returns immediately and records requested durations.
#[derive(Default)]
pub struct CountingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl CountingSleeper {
    pub fn calls(&self) -> usize {
        lock(&self.slept).len()
    }

    pub fn total(&self) -> Duration {
        lock(&self.slept).iter().sum()
    }
}

#[async_trait]
impl Sleeper for CountingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.slept).push(duration);
        tokio::task::yield_now().await;
    }
}

/// Telemetry sink that keeps every event.
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        lock(&self.events).clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        lock(&self.events).push(event);
    }
}

/// Temporary directory used as a workspace root.
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn root(&self) -> WorkspaceRoot {
        WorkspaceRoot::from_path(self.temp.path())
    }

    /// Write `content` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.temp.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
