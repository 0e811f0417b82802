//! Adapter-level errors
//!
//! These describe what went wrong talking to a chain node or an HTTP
//! service. The adapters translate them into `BridgeError` kinds once the
//! stage they happened in is known.

use bridge_types::BridgeError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Transaction reverted: {reason}")]
    Reverted {
        tx_hash: Option<String>,
        reason: String,
    },

    #[error("Timed out: {0}")]
    Timeout(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

impl AdapterError {
    /// Transport and 5xx failures are worth retrying on idempotent reads
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Transport(_) | AdapterError::Timeout(_) => true,
            AdapterError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Map a failed chain interaction to the bridge taxonomy
    pub fn into_chain_error(self, chain: &str, tx_ref: Option<String>) -> BridgeError {
        match self {
            AdapterError::Reverted { tx_hash, reason } => BridgeError::OnChainRevert {
                chain: chain.to_string(),
                tx_ref: tx_hash.or(tx_ref),
                reason,
            },
            other => BridgeError::ExternalServiceError {
                service: format!("{} rpc", chain),
                code: None,
                message: other.to_string(),
            },
        }
    }

    /// Map a failure observed once funds have left the source wallet
    ///
    /// Only a revert proves the transaction had no effect. Anything else
    /// leaves the transfer in transit under `tx_ref`.
    pub fn into_in_transit_error(self, chain: &str, tx_ref: String) -> BridgeError {
        match self {
            AdapterError::Reverted { tx_hash, reason } => BridgeError::OnChainRevert {
                chain: chain.to_string(),
                tx_ref: Some(tx_hash.unwrap_or(tx_ref)),
                reason,
            },
            other => BridgeError::InTransit {
                chain: chain.to_string(),
                tx_ref: Some(tx_ref),
                reason: other.to_string(),
            },
        }
    }

    /// Map a failed HTTP service call to the bridge taxonomy
    pub fn into_service_error(self, service: &str) -> BridgeError {
        match self {
            AdapterError::Http { code, message, .. } => BridgeError::ExternalServiceError {
                service: service.to_string(),
                code,
                message,
            },
            other => BridgeError::external(service, other.to_string()),
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AdapterError::Decode(err.to_string())
        } else if err.is_timeout() {
            AdapterError::Timeout(err.to_string())
        } else {
            AdapterError::Transport(err.to_string())
        }
    }
}
