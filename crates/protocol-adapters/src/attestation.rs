//! Attestation service client and poller

use crate::error::{AdapterError, AdapterResult};
use async_trait::async_trait;
use bridge_types::{BridgeError, BridgeResult};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};

pub const DEFAULT_ATTESTATION_URL: &str = "https://iris-api-sandbox.circle.com";

/// Attestation lookup result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationStatus {
    /// Burn seen but not yet attested, or not indexed yet
    Pending,
    /// Signed attestation, `0x`-prefixed hex
    Complete(String),
}

/// Lookup of attestations by message hash
#[async_trait]
pub trait AttestationService: Send + Sync {
    async fn fetch(&self, message_hash: &str) -> AdapterResult<AttestationStatus>;
}

#[derive(Debug, Deserialize)]
struct AttestationResponse {
    status: String,
    #[serde(default)]
    attestation: Option<String>,
}

/// HTTP client for an Iris-style attestation API
pub struct IrisAttestationClient {
    http: reqwest::Client,
    base_url: String,
}

impl IrisAttestationClient {
    pub fn new(base_url: &str) -> AdapterResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AttestationService for IrisAttestationClient {
    async fn fetch(&self, message_hash: &str) -> AdapterResult<AttestationStatus> {
        let url = format!("{}/attestations/{}", self.base_url, message_hash);
        let response = self.http.get(&url).send().await?;

        // The service answers 404 until it has indexed the burn
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(AttestationStatus::Pending);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(AdapterError::Http {
                status,
                code: None,
                message,
            });
        }

        let body: AttestationResponse = response.json().await?;
        match (body.status.as_str(), body.attestation) {
            ("complete", Some(attestation)) if attestation.starts_with("0x") => {
                Ok(AttestationStatus::Complete(attestation))
            }
            _ => Ok(AttestationStatus::Pending),
        }
    }
}

/// Bounded, timer-driven attestation wait
#[derive(Clone)]
pub struct AttestationPoller {
    service: Arc<dyn AttestationService>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl AttestationPoller {
    pub fn new(service: Arc<dyn AttestationService>, poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            service,
            poll_interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Poll until the attestation is complete
    ///
    /// Makes at most `max_attempts` lookups, `poll_interval` apart. Lookup
    /// failures count as attempts and are retried.
    pub async fn await_attestation(&self, message_hash: &str) -> BridgeResult<String> {
        for attempt in 1..=self.max_attempts {
            match self.service.fetch(message_hash).await {
                Ok(AttestationStatus::Complete(attestation)) => {
                    tracing::info!(message_hash, attempt, "Attestation received");
                    return Ok(attestation);
                }
                Ok(AttestationStatus::Pending) => {
                    tracing::debug!(message_hash, attempt, "Attestation pending");
                }
                Err(e) => {
                    tracing::warn!(message_hash, attempt, error = %e, "Attestation lookup failed");
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        tracing::warn!(
            message_hash,
            attempts = self.max_attempts,
            "Attestation not complete, giving up"
        );
        Err(BridgeError::AttestationTimeout {
            message_hash: message_hash.to_string(),
            attempts: self.max_attempts,
        })
    }
}
