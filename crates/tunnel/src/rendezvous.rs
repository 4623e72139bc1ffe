//! Client for the rendezvous service's session-description exchange.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Body of a `TunnelHostExchange` request.
#[derive(Debug, Serialize)]
pub struct ExchangeRequest {
    /// Identifier of the tunnel being established.
    #[serde(rename = "tunnelId")]
    pub tunnel_id: String,
    /// Opaque credential presented to the rendezvous service.
    pub token: String,
    /// Base64-encoded local offer.
    pub offer_b64: String,
    /// Base64-encoded HMAC signature of the local offer.
    pub signature_b64: String,
}

/// Body of a successful `TunnelHostExchange` response.
#[derive(Debug, Deserialize)]
pub struct ExchangeResponse {
    /// Base64-encoded remote offer.
    #[serde(rename = "peerOffer_b64")]
    pub peer_offer_b64: String,
    /// Base64-encoded HMAC signature of the remote offer.
    #[serde(rename = "peerSignature_b64")]
    pub peer_signature_b64: String,
}

/// The rendezvous exchange call, abstracted so [`crate::session::host_tunnel`]
/// can be driven by a stub in tests instead of a live HTTPS endpoint.
pub trait RendezvousExchange: Send + Sync {
    /// Posts the local offer and receives the peer's offer in exchange.
    fn exchange<'a>(&'a self, request: &'a ExchangeRequest) -> BoxFuture<'a, Result<ExchangeResponse>>;
}

/// A client for the rendezvous service's offer/answer exchange
/// endpoint.
pub struct RendezvousClient {
    http: reqwest::Client,
    base_url: String,
}

impl RendezvousClient {
    /// Builds a client targeting the rendezvous service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Posts the local offer and receives the peer's offer in
    /// exchange.
    ///
    /// Maps an HTTP 401 to [`TunnelError::Unauthorized`] (unrecoverable
    /// per the host-side establishment failure taxonomy); any other
    /// transport-level failure is [`TunnelError::RendezvousTransport`]
    /// (delayed-recoverable).
    pub async fn exchange(&self, request: &ExchangeRequest) -> Result<ExchangeResponse> {
        let url = format!("{}/tunnel-host-exchange", self.base_url);
        let response = self.http.post(url).json(request).send().await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TunnelError::Unauthorized);
        }

        let response = response.error_for_status()?;
        let body: ExchangeResponse = response.json().await?;
        Ok(body)
    }
}

impl RendezvousExchange for RendezvousClient {
    fn exchange<'a>(&'a self, request: &'a ExchangeRequest) -> BoxFuture<'a, Result<ExchangeResponse>> {
        Box::pin(Self::exchange(self, request))
    }
}
