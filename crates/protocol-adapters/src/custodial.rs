//! Custodial bridge adapter
//!
//! A single `POST /transfers` hands the transfer to the custodian; the
//! adapter then polls `GET /transfers/{id}` with backoff until the custodian
//! reports a final state. The initiating call is never retried.

use crate::error::{AdapterError, AdapterResult};
use async_trait::async_trait;
use bridge_types::{
    BridgeError, BridgeMethod, BridgeResult, ChainConfig, MethodProfile, ProtocolAdapter,
    Settlement, StageRefs, TransferProgress, TransferRequest, TransferState,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

pub const DEFAULT_CUSTODIAL_URL: &str = "https://api.circle.com/v2/bridge";

const SERVICE: &str = "bridge-kit";

/// Body of the transfer initiation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodialTransferRequest {
    pub source_chain: String,
    pub destination_chain: String,
    pub token: String,
    pub amount: String,
    pub from_address: String,
    pub to_address: String,
}

impl From<&TransferRequest> for CustodialTransferRequest {
    fn from(request: &TransferRequest) -> Self {
        Self {
            source_chain: request.source_chain.clone(),
            destination_chain: request.destination_chain.clone(),
            token: request.token.clone(),
            amount: request.amount.to_string(),
            from_address: request.from_address.to_checksum(),
            to_address: request.to_address.to_checksum(),
        }
    }
}

/// Custodian-side transfer state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustodialState {
    Pending,
    Completed {
        tx_hash: Option<String>,
        confirmations: Option<u64>,
    },
    Failed {
        reason: String,
    },
}

#[async_trait]
pub trait CustodialApi: Send + Sync {
    /// Start a transfer; returns the custodian's transfer id
    async fn initiate_transfer(&self, request: &CustodialTransferRequest) -> AdapterResult<String>;

    async fn transfer_status(&self, transfer_id: &str) -> AdapterResult<CustodialState>;
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    #[serde(alias = "transferId")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(alias = "state")]
    status: String,
    #[serde(default, alias = "destinationTxHash")]
    tx_hash: Option<String>,
    #[serde(default)]
    confirmations: Option<u64>,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

impl StatusResponse {
    fn into_state(self) -> CustodialState {
        match self.status.to_ascii_lowercase().as_str() {
            "completed" | "complete" | "success" | "settled" => CustodialState::Completed {
                tx_hash: self.tx_hash,
                confirmations: self.confirmations,
            },
            "failed" | "error" | "rejected" | "cancelled" => CustodialState::Failed {
                reason: self.message.unwrap_or(self.status),
            },
            _ => CustodialState::Pending,
        }
    }
}

/// HTTP client for the custodial bridge API
pub struct CustodialBridgeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CustodialBridgeClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> AdapterResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> AdapterResult<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let payload: Option<ErrorPayload> = serde_json::from_str(&body).ok();
        let (code, message) = match payload {
            Some(p) => (
                p.code.map(|c| match c {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }),
                p.message.unwrap_or_else(|| body.clone()),
            ),
            None => (None, body),
        };
        Err(AdapterError::Http {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl CustodialApi for CustodialBridgeClient {
    async fn initiate_transfer(&self, request: &CustodialTransferRequest) -> AdapterResult<String> {
        let response = self
            .http
            .post(format!("{}/transfers", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        let body: InitiateResponse = Self::read_json(response).await?;
        Ok(body.id)
    }

    async fn transfer_status(&self, transfer_id: &str) -> AdapterResult<CustodialState> {
        let response = self
            .http
            .get(format!("{}/transfers/{}", self.base_url, transfer_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let body: StatusResponse = Self::read_json(response).await?;
        Ok(body.into_state())
    }
}

/// Backoff for custodian status polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPollConfig {
    /// Delays in seconds between successive polls
    pub backoff_schedule: Vec<u64>,
    /// Delay used once the schedule is exhausted
    pub max_backoff_seconds: u64,
    pub max_attempts: u32,
}

impl Default for StatusPollConfig {
    fn default() -> Self {
        Self {
            backoff_schedule: vec![5, 10, 15, 30, 60, 120, 300],
            max_backoff_seconds: 300,
            max_attempts: 20,
        }
    }
}

impl StatusPollConfig {
    /// Delay after poll number `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let seconds = self
            .backoff_schedule
            .get(attempt as usize)
            .copied()
            .unwrap_or(self.max_backoff_seconds);
        Duration::from_secs(seconds)
    }
}

pub struct CustodialAdapter {
    profile: MethodProfile,
    api: Arc<dyn CustodialApi>,
    polling: StatusPollConfig,
}

impl CustodialAdapter {
    pub fn new(profile: MethodProfile, api: Arc<dyn CustodialApi>, polling: StatusPollConfig) -> Self {
        Self {
            profile,
            api,
            polling,
        }
    }

    /// Poll until the custodian reports a final state
    async fn await_settlement(&self, transfer_id: &str) -> BridgeResult<Settlement> {
        let max_attempts = self.polling.max_attempts.max(1);

        for attempt in 0..max_attempts {
            match self.api.transfer_status(transfer_id).await {
                Ok(CustodialState::Completed {
                    tx_hash,
                    confirmations,
                }) => {
                    tracing::info!(transfer_id, "Custodial transfer completed");
                    return Ok(Settlement {
                        destination_tx_ref: tx_hash.unwrap_or_else(|| transfer_id.to_string()),
                        confirmations: confirmations.unwrap_or(0),
                    });
                }
                Ok(CustodialState::Failed { reason }) => {
                    return Err(BridgeError::ExternalServiceError {
                        service: SERVICE.to_string(),
                        code: Some("transfer_failed".to_string()),
                        message: reason,
                    });
                }
                Ok(CustodialState::Pending) => {
                    tracing::debug!(transfer_id, attempt, "Custodial transfer pending");
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(transfer_id, attempt, error = %e, "Custodial status poll failed, retrying");
                }
                Err(e) => return Err(e.into_service_error(SERVICE)),
            }

            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.polling.delay(attempt)).await;
            }
        }

        Err(BridgeError::ExternalServiceError {
            service: SERVICE.to_string(),
            code: None,
            message: format!(
                "transfer {} not final after {} status checks",
                transfer_id, max_attempts
            ),
        })
    }
}

#[async_trait]
impl ProtocolAdapter for CustodialAdapter {
    fn method(&self) -> BridgeMethod {
        BridgeMethod::Custodial
    }

    fn profile(&self) -> &MethodProfile {
        &self.profile
    }

    fn supports(&self, source: &ChainConfig, destination: &ChainConfig, token: &str) -> bool {
        source.has_token(token) && destination.has_token(token)
    }

    async fn execute(
        &self,
        request: &TransferRequest,
        progress: &dyn TransferProgress,
    ) -> BridgeResult<Settlement> {
        progress.enter_stage(TransferState::Minting, StageRefs::none())?;

        let transfer_id = self
            .api
            .initiate_transfer(&CustodialTransferRequest::from(request))
            .await
            .map_err(|e| e.into_service_error(SERVICE))?;
        progress.record(StageRefs::none().bridge_message(&transfer_id));
        tracing::info!(transfer_id = %transfer_id, "Custodial transfer initiated");

        self.await_settlement(&transfer_id).await
    }
}
