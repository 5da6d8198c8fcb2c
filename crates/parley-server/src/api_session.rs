//! Session broker handler.
//!
//! Mints a short-lived realtime credential upstream so the long-lived API key
//! never leaves the server. Failures are plain-text `500` responses whose body
//! is the diagnostic the client shows to the user.

use crate::AppState;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parley_types::SessionCredential;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Body sent to the upstream session endpoint.
#[derive(Debug, Serialize)]
struct UpstreamSessionRequest<'a> {
    model: &'a str,
    voice: &'a str,
    instructions: &'a str,
}

#[derive(Debug, Deserialize)]
struct UpstreamSession {
    #[serde(default)]
    client_secret: Option<UpstreamSecret>,
}

#[derive(Debug, Deserialize)]
struct UpstreamSecret {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// The ephemeral secret handed to the client.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientSecret {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Response body for `GET /api/session`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub client_secret: ClientSecret,
    pub model: String,
}

impl From<SessionCredential> for SessionResponse {
    fn from(credential: SessionCredential) -> Self {
        Self {
            client_secret: ClientSecret {
                value: credential.secret().to_string(),
                expires_at: credential.expires_at(),
            },
            model: credential.model_id().to_string(),
        }
    }
}

/// Session broker errors. Every variant renders as a plain-text `500`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Missing OPENAI_API_KEY")]
    MissingApiKey,

    /// Upstream answered non-2xx; carries its body.
    #[error("{0}")]
    Upstream(String),

    /// The upstream request never produced a response.
    #[error("{0}")]
    Transport(String),

    #[error("invalid upstream session response: {0}")]
    InvalidResponse(String),

    #[error("upstream session response did not include a client secret")]
    MissingSecret,
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

fn non_empty_or(text: String, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

/// Handler for `GET /api/session`.
pub async fn create_session_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<SessionResponse>, SessionError> {
    let credential = mint_session(&state).await?;
    tracing::info!(
        model = credential.model_id(),
        expires_at = ?credential.expires_at(),
        "minted realtime session"
    );
    Ok(Json(SessionResponse::from(credential)))
}

/// Requests a fresh ephemeral credential from the upstream API.
pub async fn mint_session(state: &AppState) -> Result<SessionCredential, SessionError> {
    let realtime = &state.realtime;
    let api_key = realtime.api_key().ok_or_else(|| {
        tracing::error!("session requested but no upstream API key is configured");
        SessionError::MissingApiKey
    })?;

    let resp = state
        .http
        .post(realtime.sessions_url())
        .bearer_auth(api_key)
        .json(&UpstreamSessionRequest {
            model: &realtime.model,
            voice: &realtime.voice,
            instructions: &realtime.instructions,
        })
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "upstream session request failed");
            SessionError::Transport(non_empty_or(e.to_string(), "Server error"))
        })?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| SessionError::Transport(non_empty_or(e.to_string(), "Server error")))?;

    if !status.is_success() {
        tracing::warn!(%status, model = %realtime.model, "upstream rejected session request");
        return Err(SessionError::Upstream(non_empty_or(
            body,
            "Failed to create session",
        )));
    }

    let session: UpstreamSession =
        serde_json::from_str(&body).map_err(|e| SessionError::InvalidResponse(e.to_string()))?;
    let secret = session.client_secret.ok_or(SessionError::MissingSecret)?;
    let value = secret
        .value
        .filter(|v| !v.trim().is_empty())
        .ok_or(SessionError::MissingSecret)?;

    let credential = SessionCredential::new(value, realtime.model.clone());
    Ok(match secret.expires_at {
        Some(expires_at) => credential.with_expiry(expires_at),
        None => credential,
    })
}
