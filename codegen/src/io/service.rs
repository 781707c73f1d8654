//! Remote generation service abstraction.
//!
//! The [`GenerationService`] trait decouples session orchestration from the
//! transport. [`crate::io::http::HttpGenerationService`] talks to the real
//! service; tests use scripted services that return predetermined responses.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::types::{GenerationStatus, IterationCounts};

/// Parameters for requesting a short-lived upload location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadUrlRequest {
    pub conversation_id: String,
    /// Base64-encoded SHA-256 of the blob.
    pub checksum: String,
    pub content_length: u64,
    /// Fresh token identifying this upload attempt.
    pub upload_token: String,
}

/// Where and how to upload a snapshot blob.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadLocation {
    pub upload_id: String,
    pub url: String,
    /// Headers the upload request must carry.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A generation request for the current upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub conversation_id: String,
    pub generation_id: String,
    pub upload_id: String,
    pub message: String,
}

/// One status check result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusReport {
    pub status: GenerationStatus,
    /// Service detail for failures.
    #[serde(default)]
    pub detail: Option<String>,
    /// Human-readable progress text for in-flight generations.
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub remaining_iterations: Option<u32>,
    #[serde(default)]
    pub total_iterations: Option<u32>,
}

impl StatusReport {
    pub fn new(status: GenerationStatus) -> Self {
        Self {
            status,
            detail: None,
            progress: None,
            remaining_iterations: None,
            total_iterations: None,
        }
    }

    pub fn counts(&self) -> IterationCounts {
        IterationCounts {
            remaining: self.remaining_iterations,
            total: self.total_iterations,
        }
    }
}

/// Abstraction over the remote generation service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Open a new conversation and return its id.
    async fn create_conversation(&self) -> Result<String>;

    async fn create_upload_url(&self, request: &UploadUrlRequest) -> Result<UploadLocation>;

    /// Upload `blob` to `location`, sending the location's headers and `checksum`.
    async fn upload_blob(
        &self,
        location: &UploadLocation,
        checksum: &str,
        blob: Vec<u8>,
    ) -> Result<()>;

    async fn submit_generation(&self, request: &GenerationRequest) -> Result<()>;

    async fn generation_status(
        &self,
        conversation_id: &str,
        generation_id: &str,
    ) -> Result<StatusReport>;

    /// Fetch the raw result archive for the conversation's latest generation.
    async fn fetch_result_archive(&self, conversation_id: &str) -> Result<Vec<u8>>;
}
