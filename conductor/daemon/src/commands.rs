//! One-shot Commands
//!
//! `exec`, `models`, `conversations`, `npcs` and `status` talk to the backend
//! directly and print either a plain listing or JSON (`--json`).

use serde::Serialize;

use studio_core::backend::{ConversationSummary, ModelInfo, NpcInfo, NpcScope};
use studio_core::{CommandRequest, ConversationId, StudioBackend, StudioConfig};

/// Output format for listings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Aligned plain text
    Plain,
    /// Pretty-printed JSON
    Json,
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Two aligned columns, the first padded to its widest entry
fn columns<'a, I>(rows: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let rows: Vec<(&str, &str)> = rows.into_iter().collect();
    let width = rows.iter().map(|(left, _)| left.len()).max().unwrap_or(0);
    rows.iter()
        .map(|(left, right)| {
            if right.is_empty() {
                (*left).to_string()
            } else {
                format!("{left:<width$}  {right}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a model listing
///
/// # Errors
///
/// JSON serialization failure.
pub fn format_models(models: &[ModelInfo], format: Format) -> anyhow::Result<String> {
    if format == Format::Json {
        return to_json(models);
    }
    if models.is_empty() {
        return Ok("no models found".to_string());
    }
    Ok(columns(models.iter().map(|m| {
        let label = m.display_name.as_deref().filter(|l| *l != m.value).unwrap_or("");
        (m.value.as_str(), label)
    })))
}

/// Render a conversation listing
///
/// # Errors
///
/// JSON serialization failure.
pub fn format_conversations(
    conversations: &[ConversationSummary],
    format: Format,
) -> anyhow::Result<String> {
    if format == Format::Json {
        return to_json(conversations);
    }
    if conversations.is_empty() {
        return Ok("no conversations found".to_string());
    }
    Ok(columns(conversations.iter().map(|c| {
        (
            c.id.as_str(),
            c.timestamp.as_deref().unwrap_or(""),
        )
    })))
}

/// Render an NPC team
///
/// # Errors
///
/// JSON serialization failure.
pub fn format_npcs(npcs: &[NpcInfo], format: Format) -> anyhow::Result<String> {
    if format == Format::Json {
        return to_json(npcs);
    }
    if npcs.is_empty() {
        return Ok("no NPCs found".to_string());
    }
    Ok(columns(
        npcs.iter()
            .map(|n| (n.name.as_str(), n.model.as_deref().unwrap_or(""))),
    ))
}

/// A request filled with the configured defaults
pub fn request_with_defaults(config: &StudioConfig, command: String) -> CommandRequest {
    CommandRequest::new(command, ConversationId::new())
        .with_model(config.default_model.clone())
        .with_npc(config.default_npc.clone())
        .with_current_path(config.base_dir.to_string_lossy())
}

/// `exec`: run a command without streaming
///
/// # Errors
///
/// Backend failures.
pub async fn exec<B: StudioBackend>(
    backend: &B,
    config: &StudioConfig,
    command: String,
    format: Format,
) -> anyhow::Result<String> {
    let response = backend
        .execute(&request_with_defaults(config, command))
        .await?;
    match format {
        Format::Json => to_json(&response),
        Format::Plain => Ok(response.output),
    }
}

/// `models`
///
/// # Errors
///
/// Backend failures.
pub async fn models<B: StudioBackend>(
    backend: &B,
    path: &str,
    format: Format,
) -> anyhow::Result<String> {
    format_models(&backend.list_models(path).await?, format)
}

/// `conversations`
///
/// # Errors
///
/// Backend failures.
pub async fn conversations<B: StudioBackend>(
    backend: &B,
    path: &str,
    format: Format,
) -> anyhow::Result<String> {
    format_conversations(&backend.list_conversations(path).await?, format)
}

/// `npcs`
///
/// # Errors
///
/// Backend failures.
pub async fn npcs<B: StudioBackend>(
    backend: &B,
    scope: &NpcScope,
    format: Format,
) -> anyhow::Result<String> {
    format_npcs(&backend.npc_team(scope).await?, format)
}

/// `status`
///
/// # Errors
///
/// Backend failures; an unreachable backend is reported as an error.
pub async fn status<B: StudioBackend>(
    backend: &B,
    config: &StudioConfig,
    format: Format,
) -> anyhow::Result<String> {
    let body = backend.status().await.map_err(|e| {
        anyhow::anyhow!("backend at {} is not reachable: {e}", config.base_url)
    })?;
    match format {
        Format::Json => to_json(&body),
        Format::Plain => Ok(format!("backend at {} is up\n{}", config.base_url, to_json(&body)?)),
    }
}
