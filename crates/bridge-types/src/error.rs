//! Bridge error taxonomy

use crate::amount::Amount;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by route optimization and transfer execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("Unsupported route: {0}")]
    UnsupportedRoute(String),

    #[error("Insufficient balance on {chain}: required {required}, available {available}")]
    InsufficientBalance {
        chain: String,
        required: Amount,
        available: Amount,
    },

    #[error("Insufficient allowance on {chain}: {reason}")]
    InsufficientAllowance {
        chain: String,
        tx_ref: Option<String>,
        reason: String,
    },

    #[error("Transaction reverted on {chain}: {reason}")]
    OnChainRevert {
        chain: String,
        tx_ref: Option<String>,
        reason: String,
    },

    #[error("Attestation for message {message_hash} not complete after {attempts} attempts")]
    AttestationTimeout { message_hash: String, attempts: u32 },

    #[error("{service} error: {message}")]
    ExternalServiceError {
        service: String,
        code: Option<String>,
        message: String,
    },

    #[error("Transfer cancelled: {0}")]
    Cancelled(String),

    /// The burn went out but its outcome, or the mint after it, is unknown
    #[error("Funds in transit on {chain}: {reason}")]
    InTransit {
        chain: String,
        tx_ref: Option<String>,
        reason: String,
    },
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            BridgeError::UnsupportedChain(_) => ErrorKind::UnsupportedChain,
            BridgeError::UnsupportedRoute(_) => ErrorKind::UnsupportedRoute,
            BridgeError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            BridgeError::InsufficientAllowance { .. } => ErrorKind::InsufficientAllowance,
            BridgeError::OnChainRevert { .. } => ErrorKind::OnChainRevert,
            BridgeError::AttestationTimeout { .. } => ErrorKind::AttestationTimeout,
            BridgeError::ExternalServiceError { .. } => ErrorKind::ExternalServiceError,
            BridgeError::Cancelled(_) => ErrorKind::Cancelled,
            BridgeError::InTransit { .. } => ErrorKind::InTransit,
        }
    }

    /// Chain the error happened on, when there is one
    pub fn chain(&self) -> Option<&str> {
        match self {
            BridgeError::InsufficientBalance { chain, .. }
            | BridgeError::InsufficientAllowance { chain, .. }
            | BridgeError::OnChainRevert { chain, .. }
            | BridgeError::InTransit { chain, .. } => Some(chain),
            _ => None,
        }
    }

    /// Transaction or message reference tied to the error
    pub fn tx_ref(&self) -> Option<&str> {
        match self {
            BridgeError::InsufficientAllowance { tx_ref, .. }
            | BridgeError::OnChainRevert { tx_ref, .. }
            | BridgeError::InTransit { tx_ref, .. } => tx_ref.as_deref(),
            BridgeError::AttestationTimeout { message_hash, .. } => Some(message_hash),
            _ => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.kind().is_client_error()
    }

    pub fn external(service: &str, message: impl Into<String>) -> Self {
        BridgeError::ExternalServiceError {
            service: service.to_string(),
            code: None,
            message: message.into(),
        }
    }
}

/// Flat error classification stored on failed transfer records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidRequest,
    UnsupportedChain,
    UnsupportedRoute,
    InsufficientBalance,
    InsufficientAllowance,
    OnChainRevert,
    AttestationTimeout,
    ExternalServiceError,
    Cancelled,
    InTransit,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::UnsupportedChain => "UnsupportedChain",
            ErrorKind::UnsupportedRoute => "UnsupportedRoute",
            ErrorKind::InsufficientBalance => "InsufficientBalance",
            ErrorKind::InsufficientAllowance => "InsufficientAllowance",
            ErrorKind::OnChainRevert => "OnChainRevert",
            ErrorKind::AttestationTimeout => "AttestationTimeout",
            ErrorKind::ExternalServiceError => "ExternalServiceError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::InTransit => "InTransit",
        }
    }

    /// Errors the caller can fix by changing the request or their wallet state
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidRequest
                | ErrorKind::UnsupportedChain
                | ErrorKind::UnsupportedRoute
                | ErrorKind::InsufficientBalance
                | ErrorKind::InsufficientAllowance
        )
    }

    /// User-facing next step
    ///
    /// Attestation timeouts and in-transit failures happen after the burn,
    /// so the transfer must not be resubmitted.
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorKind::AttestationTimeout | ErrorKind::InTransit => "retry status check",
            ErrorKind::InvalidRequest | ErrorKind::UnsupportedChain | ErrorKind::UnsupportedRoute => {
                "fix request"
            }
            ErrorKind::InsufficientBalance | ErrorKind::InsufficientAllowance => {
                "top up wallet and retry transfer"
            }
            ErrorKind::Cancelled => "none",
            ErrorKind::OnChainRevert | ErrorKind::ExternalServiceError => "retry transfer",
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attestation_timeout_is_distinguishable() {
        let err = BridgeError::AttestationTimeout {
            message_hash: "0xabc".to_string(),
            attempts: 30,
        };
        assert_eq!(err.kind(), ErrorKind::AttestationTimeout);
        assert_eq!(err.kind().hint(), "retry status check");
        assert_eq!(err.tx_ref(), Some("0xabc"));
        assert!(!err.is_client_error());

        let revert = BridgeError::OnChainRevert {
            chain: "sepolia".to_string(),
            tx_ref: Some("0xdef".to_string()),
            reason: "execution reverted".to_string(),
        };
        assert_eq!(revert.kind().hint(), "retry transfer");
        assert_eq!(revert.chain(), Some("sepolia"));
    }

    #[test]
    fn test_in_transit_points_at_status() {
        let err = BridgeError::InTransit {
            chain: "sepolia".to_string(),
            tx_ref: Some("0xburn".to_string()),
            reason: "receipt wait timed out".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::InTransit);
        assert_eq!(err.kind().hint(), "retry status check");
        assert_eq!(err.chain(), Some("sepolia"));
        assert_eq!(err.tx_ref(), Some("0xburn"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_client_errors() {
        assert!(BridgeError::InvalidRequest("x".into()).is_client_error());
        assert!(BridgeError::UnsupportedChain("x".into()).is_client_error());
        assert!(!BridgeError::external("bridge-kit", "down").is_client_error());
    }
}
