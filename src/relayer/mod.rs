//! Meta-transaction relayer client.
//!
//! The relayer fronts gas for signed transaction envelopes: it resolves a
//! signer's proxy wallet, hands out nonces, accepts submissions, and exposes
//! a polling endpoint for the submission's mined/confirmed/failed state.
//! Waiting for a terminal state is always bounded by an explicit deadline.

use alloy::primitives::Address;
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unparseable response: {0}")]
    Parse(String),
    #[error("submission {0} not terminal after {1:?}")]
    Timeout(String, Duration),
}

impl RelayerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout(..) => true,
            Self::Parse(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Pending,
    Mined,
    Confirmed,
    Failed,
}

impl RelayState {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "MINED" => RelayState::Mined,
            "CONFIRMED" | "COMPLETED" => RelayState::Confirmed,
            "FAILED" | "REVERTED" => RelayState::Failed,
            _ => RelayState::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayState::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionStatus {
    pub state: RelayState,
    pub tx_hash: Option<String>,
}

/// A signed transaction envelope accepted by the relayer.
#[derive(Debug, Clone, Serialize)]
pub struct SignedEnvelope {
    pub from: Address,
    pub to: Address,
    /// 0x-prefixed calldata.
    pub data: String,
    pub signature: String,
    pub nonce: u64,
}

pub struct RelayerClient {
    client: reqwest::Client,
    base_url: String,
}

impl RelayerClient {
    pub fn new(base_url: String) -> Result<Self, RelayerError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self { client, base_url })
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value, RelayerError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;
        Self::into_json(resp).await
    }

    async fn into_json(resp: reqwest::Response) -> Result<serde_json::Value, RelayerError> {
        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayerError::Api { status, body });
        }
        Ok(resp.json().await?)
    }

    /// Resolve the proxy wallet deployed for a signer.
    pub async fn proxy_wallet(&self, owner: Address) -> Result<Address, RelayerError> {
        let resp = self.get(&format!("/proxy-wallet?address={owner}")).await?;
        let raw = resp
            .get("proxyWallet")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RelayerError::Parse("missing proxyWallet".into()))?;
        Address::from_str(raw).map_err(|e| RelayerError::Parse(e.to_string()))
    }

    /// Next nonce for a proxy wallet.
    pub async fn next_nonce(&self, address: Address) -> Result<u64, RelayerError> {
        let resp = self.get(&format!("/nonce?address={address}")).await?;
        resp.get("nonce")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RelayerError::Parse("missing nonce".into()))
    }

    /// Submit a signed envelope; returns the relayer's submission id.
    pub async fn submit(&self, envelope: &SignedEnvelope) -> Result<String, RelayerError> {
        let url = format!("{}/submit", self.base_url);
        let resp = self.client.post(&url).json(envelope).send().await?;
        let body = Self::into_json(resp).await?;
        body.get("transactionID")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| RelayerError::Parse("missing transactionID".into()))
    }

    /// Poll a submission until it reaches a terminal state or the deadline
    /// passes. A deadline breach raises [`RelayerError::Timeout`] rather
    /// than blocking indefinitely.
    pub async fn await_terminal(
        &self,
        submission_id: &str,
        deadline: Duration,
    ) -> Result<SubmissionStatus, RelayerError> {
        let started = Instant::now();
        loop {
            let resp = self.get(&format!("/transaction/{submission_id}")).await?;
            let state = RelayState::parse(
                resp.get("state").and_then(|v| v.as_str()).unwrap_or(""),
            );
            if state.is_terminal() {
                return Ok(SubmissionStatus {
                    state,
                    tx_hash: resp
                        .get("transactionHash")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                });
            }

            if started.elapsed() >= deadline {
                return Err(RelayerError::Timeout(submission_id.to_string(), deadline));
            }
            debug!(submission = submission_id, "relayer submission still pending");
            tokio::time::sleep(POLL_INTERVAL.min(deadline)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_state_parsing() {
        assert_eq!(RelayState::parse("MINED"), RelayState::Mined);
        assert_eq!(RelayState::parse("confirmed"), RelayState::Confirmed);
        assert_eq!(RelayState::parse("FAILED"), RelayState::Failed);
        assert_eq!(RelayState::parse("STATE_NEW"), RelayState::Pending);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!RelayState::Pending.is_terminal());
        assert!(RelayState::Mined.is_terminal());
        assert!(RelayState::Confirmed.is_terminal());
        assert!(RelayState::Failed.is_terminal());
    }
}
