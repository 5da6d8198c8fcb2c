//! Offer/answer exchange with the realtime signaling endpoint.

use crate::broker::non_empty_or;
use crate::error::CallError;
use parley_types::{SdpKind, SessionCredential, SessionDescription};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};

const SDP_CONTENT_TYPE: &str = "application/sdp";
const GENERIC_FAILURE: &str = "Failed to create Realtime session";

/// Posts the local offer and returns the remote answer unparsed.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    http: reqwest::Client,
    url: String,
}

impl SignalingClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Exchanges `offer` for the remote answer in a single attempt.
    ///
    /// A non-2xx reply fails with the response body preserved verbatim.
    pub async fn negotiate(
        &self,
        credential: &SessionCredential,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, CallError> {
        if offer.kind != SdpKind::Offer {
            return Err(CallError::Signaling(
                "local description is not an offer".to_string(),
            ));
        }

        let resp = self
            .http
            .post(&self.url)
            .query(&[("model", credential.model_id())])
            .header(AUTHORIZATION, format!("Bearer {}", credential.secret()))
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer.sdp.clone())
            .send()
            .await
            .map_err(|e| CallError::Signaling(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CallError::Signaling(e.to_string()))?;

        if !status.is_success() {
            warn!(%status, model = credential.model_id(), "signaling endpoint rejected offer");
            return Err(CallError::Signaling(non_empty_or(body, GENERIC_FAILURE)));
        }

        debug!(answer_bytes = body.len(), "received remote answer");
        Ok(SessionDescription::answer(body))
    }
}
