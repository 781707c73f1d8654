//! HTTP/JSON client for the generation service.
//!
//! Routes (relative to the configured endpoint):
//!
//! | Operation | Request |
//! |---|---|
//! | create conversation | `POST /conversations` |
//! | upload location | `POST /conversations/{id}/uploads` |
//! | blob upload | `PUT {location.url}` |
//! | submit generation | `POST /conversations/{id}/generations` |
//! | status | `GET /conversations/{id}/generations/{generation}` |
//! | result archive | `GET /conversations/{id}/archive` |

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::io::config::ServiceConfig;
use crate::io::service::{
    GenerationRequest, GenerationService, StatusReport, UploadLocation, UploadUrlRequest,
};

/// Header carrying the blob checksum on upload.
pub const CHECKSUM_HEADER: &str = "x-checksum-sha256";

/// [`GenerationService`] backed by the service's HTTP API.
pub struct HttpGenerationService {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ConversationCreated {
    conversation_id: String,
}

impl HttpGenerationService {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Build a client from config, reading the token from `token_env` when set.
    pub fn from_config(cfg: &ServiceConfig) -> Result<Self> {
        let token = cfg
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|token| !token.trim().is_empty());
        Self::new(
            cfg.endpoint.clone(),
            token,
            Duration::from_secs(cfg.request_timeout_secs),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .with_context(|| format!("{what}: request failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{what}: service returned {status}: {}", body.trim()));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    #[instrument(skip_all)]
    async fn create_conversation(&self) -> Result<String> {
        let response = self
            .send(self.client.post(self.url("/conversations")), "create conversation")
            .await?;
        let created: ConversationCreated = response
            .json()
            .await
            .context("create conversation: decode response")?;
        debug!(conversation_id = %created.conversation_id, "conversation created");
        Ok(created.conversation_id)
    }

    #[instrument(
        skip_all,
        fields(conversation_id = %request.conversation_id, bytes = request.content_length)
    )]
    async fn create_upload_url(&self, request: &UploadUrlRequest) -> Result<UploadLocation> {
        let path = format!("/conversations/{}/uploads", request.conversation_id);
        let response = self
            .send(self.client.post(self.url(&path)).json(request), "create upload url")
            .await?;
        response
            .json()
            .await
            .context("create upload url: decode response")
    }

    #[instrument(skip_all, fields(upload_id = %location.upload_id, bytes = blob.len()))]
    async fn upload_blob(
        &self,
        location: &UploadLocation,
        checksum: &str,
        blob: Vec<u8>,
    ) -> Result<()> {
        // Presigned locations carry their own credentials; no bearer token.
        let mut request = self
            .client
            .put(&location.url)
            .header(CHECKSUM_HEADER, checksum)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in &location.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.body(blob).send().await.context("upload blob")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("upload blob: service returned {status}: {}", body.trim()));
        }
        Ok(())
    }

    #[instrument(
        skip_all,
        fields(conversation_id = %request.conversation_id, generation_id = %request.generation_id)
    )]
    async fn submit_generation(&self, request: &GenerationRequest) -> Result<()> {
        let path = format!("/conversations/{}/generations", request.conversation_id);
        self.send(self.client.post(self.url(&path)).json(request), "submit generation")
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn generation_status(
        &self,
        conversation_id: &str,
        generation_id: &str,
    ) -> Result<StatusReport> {
        let path = format!("/conversations/{conversation_id}/generations/{generation_id}");
        let response = self
            .send(self.client.get(self.url(&path)), "generation status")
            .await?;
        response
            .json()
            .await
            .context("generation status: decode response")
    }

    #[instrument(skip(self))]
    async fn fetch_result_archive(&self, conversation_id: &str) -> Result<Vec<u8>> {
        let path = format!("/conversations/{conversation_id}/archive");
        let response = self
            .send(self.client.get(self.url(&path)), "fetch result archive")
            .await?;
        let bytes = response
            .bytes()
            .await
            .context("fetch result archive: read body")?;
        Ok(bytes.to_vec())
    }
}
