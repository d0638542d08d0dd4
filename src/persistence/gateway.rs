use crate::error::RecorderError;
use crate::session::state::TranscriptSegment;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Supplies the bearer token for backend calls.
///
/// Implementations must fail with [`RecorderError::Unauthenticated`] when no
/// user session exists, before any network traffic happens.
#[async_trait::async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, RecorderError>;
}

/// Saves a finished recording to the backend.
///
/// All three operations are idempotent on the server, so a failed save can
/// be retried wholesale without duplicating data.
#[async_trait::async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Create an empty draft conversation and return its id.
    async fn create_draft(&self, source: &str) -> Result<String, RecorderError>;

    /// Attach transcript segments to a draft. A no-op for an empty slice.
    async fn append_segments(
        &self,
        conversation_id: &str,
        segments: &[TranscriptSegment],
    ) -> Result<(), RecorderError>;

    /// Mark the draft complete with its recorded duration.
    async fn finalize(
        &self,
        conversation_id: &str,
        duration_seconds: f64,
    ) -> Result<(), RecorderError>;
}

#[derive(Debug, Serialize)]
struct CreateDraftRequest<'a> {
    source: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateDraftResponse {
    conversation_id: String,
}

#[derive(Debug, Serialize)]
struct AppendSegmentsRequest<'a> {
    conversation_id: &'a str,
    segments: &'a [TranscriptSegment],
}

#[derive(Debug, Serialize)]
struct FinalizeRequest<'a> {
    conversation_id: &'a str,
    duration_seconds: f64,
}

/// HTTP implementation of the gateway.
pub struct HttpPersistenceGateway {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl HttpPersistenceGateway {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            tokens,
        }
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, RecorderError> {
        // Token first: an unauthenticated caller must fail before we touch
        // the network.
        let token = self.tokens.access_token().await?;
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| RecorderError::Persistence(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RecorderError::Persistence(format!(
                "{} returned {}: {}",
                path, status, body
            )));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl PersistenceGateway for HttpPersistenceGateway {
    async fn create_draft(&self, source: &str) -> Result<String, RecorderError> {
        let response = self
            .post_json("draft", &CreateDraftRequest { source })
            .await?;
        let parsed: CreateDraftResponse = response
            .json()
            .await
            .map_err(|e| RecorderError::Persistence(e.to_string()))?;
        info!("draft conversation created: {}", parsed.conversation_id);
        Ok(parsed.conversation_id)
    }

    async fn append_segments(
        &self,
        conversation_id: &str,
        segments: &[TranscriptSegment],
    ) -> Result<(), RecorderError> {
        if segments.is_empty() {
            debug!("no segments to append for {}", conversation_id);
            return Ok(());
        }
        self.post_json(
            "segments",
            &AppendSegmentsRequest {
                conversation_id,
                segments,
            },
        )
        .await?;
        debug!(
            "appended {} segments to {}",
            segments.len(),
            conversation_id
        );
        Ok(())
    }

    async fn finalize(
        &self,
        conversation_id: &str,
        duration_seconds: f64,
    ) -> Result<(), RecorderError> {
        self.post_json(
            "finalize",
            &FinalizeRequest {
                conversation_id,
                duration_seconds,
            },
        )
        .await?;
        info!(
            "conversation {} finalized at {:.1}s",
            conversation_id, duration_seconds
        );
        Ok(())
    }
}
