//! Observational sinks: progress text for the user and telemetry counters.
//!
//! Neither sink influences control flow. The engine calls them and moves on.

use std::time::Duration;

use tracing::info;

/// Receives human-readable progress while a generation is in flight.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message);
    }
}

/// Progress sink that discards every message.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _message: &str) {}
}

/// Result classification recorded once per Generate phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnResult {
    Succeeded,
    Cancelled,
    Failed,
}

/// Counters emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    UploadCompleted {
        conversation_id: String,
        upload_id: String,
        bytes: u64,
        files: usize,
        duration: Duration,
    },
    GenerationFinished {
        conversation_id: String,
        generation_id: String,
        result: TurnResult,
        /// Error code for failed generations.
        code: Option<&'static str>,
        iteration: u32,
        files_generated: usize,
        files_deleted: usize,
        /// Status checks made, when polling finished without an error.
        poll_attempts: Option<u32>,
    },
}

/// Receives engine telemetry.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Telemetry sink that forwards events to `tracing` at info level.
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::UploadCompleted {
                conversation_id,
                upload_id,
                bytes,
                files,
                duration,
            } => info!(
                target: "codegen::telemetry",
                %conversation_id,
                %upload_id,
                bytes,
                files,
                duration_ms = duration.as_millis() as u64,
                "upload completed"
            ),
            TelemetryEvent::GenerationFinished {
                conversation_id,
                generation_id,
                result,
                code,
                iteration,
                files_generated,
                files_deleted,
                poll_attempts,
            } => info!(
                target: "codegen::telemetry",
                %conversation_id,
                %generation_id,
                result = ?result,
                code = ?code,
                iteration,
                files_generated,
                files_deleted,
                poll_attempts = ?poll_attempts,
                "generation finished"
            ),
        }
    }
}
