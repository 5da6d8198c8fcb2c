//! Client for the session broker that mints ephemeral realtime credentials.

use crate::error::CallError;
use parley_types::SessionCredential;
use serde::Deserialize;
use tracing::{debug, warn};

const GENERIC_FAILURE: &str = "Failed to get session";
const MISSING_SECRET: &str = "session response did not include a client secret";
const MISSING_MODEL: &str = "session response did not include a model";

/// The broker returns the secret either nested (`{"value": ...}`) as the
/// upstream API does, or already flattened to a bare string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClientSecret {
    Nested {
        value: Option<String>,
        expires_at: Option<i64>,
    },
    Plain(String),
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    client_secret: Option<ClientSecret>,
    model: Option<String>,
}

impl SessionResponse {
    fn into_credential(self) -> Result<SessionCredential, CallError> {
        let (secret, expires_at) = match self.client_secret {
            Some(ClientSecret::Nested { value, expires_at }) => (value, expires_at),
            Some(ClientSecret::Plain(value)) => (Some(value), None),
            None => (None, None),
        };
        let secret = secret
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| CallError::Credential(MISSING_SECRET.to_string()))?;
        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| CallError::Credential(MISSING_MODEL.to_string()))?;

        let credential = SessionCredential::new(secret, model);
        Ok(match expires_at {
            Some(at) => credential.with_expiry(at),
            None => credential,
        })
    }
}

/// Requests one credential per call attempt. Never retries.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    http: reqwest::Client,
    url: String,
}

impl BrokerClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Acquires a fresh session credential from the broker.
    pub async fn acquire(&self) -> Result<SessionCredential, CallError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CallError::Credential(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "session broker rejected credential request");
            return Err(CallError::Credential(non_empty_or(body, GENERIC_FAILURE)));
        }

        let session: SessionResponse = resp
            .json()
            .await
            .map_err(|e| CallError::Credential(format!("invalid session response: {}", e)))?;
        let credential = session.into_credential()?;

        debug!(
            model = credential.model_id(),
            expires_at = ?credential.expires_at(),
            "acquired session credential"
        );
        Ok(credential)
    }
}

pub(crate) fn non_empty_or(body: String, fallback: &str) -> String {
    if body.trim().is_empty() {
        fallback.to_string()
    } else {
        body
    }
}
