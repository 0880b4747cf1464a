//! npc serve Backend Implementation
//!
//! HTTP client for the `npc serve` inference server.
//!
//! # API
//!
//! - `POST /api/stream` - streamed command execution
//! - `POST /api/execute` - command execution, single JSON response
//! - `POST /api/interrupt` - stop generating for a stream id (best effort;
//!   a server without the route answers 404)
//! - `GET /api/models?currentPath=` - models available in a directory
//! - `GET /api/conversations?path=` - recorded conversations
//! - `GET /api/npc_team_global`, `GET /api/npc_team_project?currentPath=`
//! - `GET /api/status` - connectivity check
//!
//! Listing endpoints answer `200` with an `error` field on failure, so every
//! body is checked for one.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::stream::pump;
use super::traits::{
    CommandRequest, ConversationSummary, ExecuteResponse, ModelInfo, NpcInfo, NpcScope,
    StreamRequest, StudioBackend, TransportEvent,
};
use crate::config::StudioConfig;
use crate::messages::StreamId;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ModelsBody {
    #[serde(default)]
    models: Vec<ModelInfo>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationsBody {
    #[serde(default)]
    conversations: Vec<ConversationSummary>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NpcTeamBody {
    #[serde(default)]
    npcs: Vec<NpcInfo>,
    #[serde(default)]
    error: Option<String>,
}

fn reject_body_error(error: Option<String>) -> anyhow::Result<()> {
    match error {
        Some(e) if !e.is_empty() => anyhow::bail!("backend error: {e}"),
        _ => Ok(()),
    }
}

/// Message for a non-2xx response
fn status_error(status: reqwest::StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("backend returned {status}")
    } else {
        format!("backend returned {status}: {body}")
    }
}

async fn ensure_success(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!(status_error(status, &body))
}

/// npc serve backend client
#[derive(Clone)]
pub struct NpcServeBackend {
    base_url: String,
    http_client: reqwest::Client,
    request_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl NpcServeBackend {
    /// Create a backend for `base_url` with default timeouts
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let defaults = StudioConfig::default();
        Self::build(
            base_url.into(),
            defaults.request_timeout,
            defaults.idle_timeout,
        )
    }

    /// Create from the studio configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &StudioConfig) -> anyhow::Result<Self> {
        Self::build(
            config.base_url.clone(),
            config.request_timeout,
            config.idle_timeout,
        )
    }

    fn build(
        base_url: String,
        request_timeout: Duration,
        idle_timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        // No overall timeout on the client: streamed bodies may run for minutes.
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            request_timeout,
            idle_timeout,
        })
    }

    /// Set the stall limit for streamed responses
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http_client
            .get(self.url(path))
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

#[async_trait]
impl StudioBackend for NpcServeBackend {
    fn name(&self) -> &str {
        "npc serve"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.url("/api/status"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn status(&self) -> anyhow::Result<serde_json::Value> {
        self.get_json("/api/status", &[]).await
    }

    async fn send_streaming(
        &self,
        request: &StreamRequest,
    ) -> anyhow::Result<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(100);

        let stream_id = request.stream_id;
        let send = self
            .http_client
            .post(self.url("/api/stream"))
            .json(&request.command.wire_body())
            .send();
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            let sent = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, send).await {
                    Ok(sent) => sent,
                    Err(_) => {
                        let message = format!("no data from backend for {}s", limit.as_secs());
                        let _ = tx.send(TransportEvent::error(stream_id, message)).await;
                        return;
                    }
                },
                None => send.await,
            };

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(stream_id = %stream_id, error = %e, "Stream request failed");
                    let _ = tx.send(TransportEvent::error(stream_id, e.to_string())).await;
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(stream_id = %stream_id, %status, "Backend rejected stream request");
                let _ = tx
                    .send(TransportEvent::error(stream_id, status_error(status, &body)))
                    .await;
                return;
            }

            tracing::debug!(stream_id = %stream_id, "Stream response headers received");
            pump(stream_id, response.bytes_stream(), tx, idle_timeout).await;
        });

        Ok(rx)
    }

    async fn execute(&self, request: &CommandRequest) -> anyhow::Result<ExecuteResponse> {
        let response = self
            .http_client
            .post(self.url("/api/execute"))
            .json(&request.wire_body())
            .timeout(self.request_timeout)
            .send()
            .await?;

        let response: ExecuteResponse = ensure_success(response).await?.json().await?;
        reject_body_error(response.error.clone())?;
        Ok(response)
    }

    async fn list_models(&self, current_path: &str) -> anyhow::Result<Vec<ModelInfo>> {
        if current_path.is_empty() {
            anyhow::bail!("a current path is required to list models");
        }
        let body: ModelsBody = self
            .get_json("/api/models", &[("currentPath", current_path)])
            .await?;
        reject_body_error(body.error)?;
        Ok(body.models)
    }

    async fn list_conversations(&self, path: &str) -> anyhow::Result<Vec<ConversationSummary>> {
        let body: ConversationsBody = self.get_json("/api/conversations", &[("path", path)]).await?;
        reject_body_error(body.error)?;
        Ok(body.conversations)
    }

    async fn npc_team(&self, scope: &NpcScope) -> anyhow::Result<Vec<NpcInfo>> {
        let body: NpcTeamBody = match scope {
            NpcScope::Global => self.get_json("/api/npc_team_global", &[]).await?,
            NpcScope::Project { current_path } => {
                self.get_json("/api/npc_team_project", &[("currentPath", current_path.as_str())])
                    .await?
            }
        };
        reject_body_error(body.error)?;
        Ok(body.npcs)
    }

    async fn interrupt(&self, stream_id: StreamId) -> anyhow::Result<()> {
        let response = self
            .http_client
            .post(self.url("/api/interrupt"))
            .json(&serde_json::json!({ "streamId": stream_id }))
            .timeout(self.request_timeout)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}
