//! Transfer records and the execution state machine

use crate::{
    address::EvmAddress,
    adapter::Settlement,
    amount::Amount,
    error::{BridgeError, ErrorKind},
    route::BridgeMethod,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transfer record identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated transfer request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Source chain registry key
    pub source_chain: String,
    /// Destination chain registry key
    pub destination_chain: String,
    /// Token symbol (upper-case)
    pub token: String,
    pub amount: Amount,
    pub from_address: EvmAddress,
    pub to_address: EvmAddress,
}

/// Transfer execution state
///
/// Burn/mint path: Created -> Approving -> Burning -> AwaitingAttestation ->
/// Minting -> Completed. The custodial path goes Created -> Minting ->
/// Completed. Failed is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Created,
    Approving,
    Burning,
    AwaitingAttestation,
    Minting,
    Completed,
    Failed,
}

impl TransferState {
    fn rank(&self) -> u8 {
        match self {
            TransferState::Created => 0,
            TransferState::Approving => 1,
            TransferState::Burning => 2,
            TransferState::AwaitingAttestation => 3,
            TransferState::Minting => 4,
            TransferState::Completed => 5,
            TransferState::Failed => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }

    /// Cancellation is only possible before a burn can have been broadcast
    pub fn is_cancellable(&self) -> bool {
        matches!(self, TransferState::Created | TransferState::Approving)
    }

    /// States only move forward; skipping intermediate states is allowed
    pub fn can_transition_to(&self, next: TransferState) -> bool {
        !self.is_terminal() && (next == TransferState::Failed || next.rank() > self.rank())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Created => "created",
            TransferState::Approving => "approving",
            TransferState::Burning => "burning",
            TransferState::AwaitingAttestation => "awaiting_attestation",
            TransferState::Minting => "minting",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// References produced by a stage, merged into the record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageRefs {
    pub source_tx: Option<String>,
    pub bridge_message: Option<String>,
    pub attestation: Option<String>,
    pub destination_tx: Option<String>,
    pub confirmations: Option<u64>,
}

impl StageRefs {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn source_tx(mut self, tx: impl Into<String>) -> Self {
        self.source_tx = Some(tx.into());
        self
    }

    pub fn bridge_message(mut self, message: impl Into<String>) -> Self {
        self.bridge_message = Some(message.into());
        self
    }

    pub fn attestation(mut self, attestation: impl Into<String>) -> Self {
        self.attestation = Some(attestation.into());
        self
    }

    pub fn destination_tx(mut self, tx: impl Into<String>) -> Self {
        self.destination_tx = Some(tx.into());
        self
    }

    pub fn confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = Some(confirmations);
        self
    }
}

/// A timestamped state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub state: TransferState,
    pub at: DateTime<Utc>,
}

/// Why a transfer failed, with enough context for manual reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCause {
    pub kind: ErrorKind,
    /// State the transfer was in when it failed
    pub stage: TransferState,
    pub chain: Option<String>,
    pub tx_ref: Option<String>,
    pub message: String,
}

impl FailureCause {
    pub fn from_error(error: &BridgeError, stage: TransferState) -> Self {
        Self {
            kind: error.kind(),
            stage,
            chain: error.chain().map(str::to_string),
            tx_ref: error.tx_ref().map(str::to_string),
            message: error.to_string(),
        }
    }

    pub fn hint(&self) -> &'static str {
        self.kind.hint()
    }
}

/// Mutable execution record, owned by the execution engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: TransferId,
    pub request: TransferRequest,
    pub method: BridgeMethod,
    pub state: TransferState,
    pub created_at: DateTime<Utc>,
    pub source_tx_ref: Option<String>,
    pub bridge_message_ref: Option<String>,
    pub attestation_ref: Option<String>,
    pub destination_tx_ref: Option<String>,
    pub confirmations: u64,
    pub last_error: Option<FailureCause>,
    pub history: Vec<StateTransition>,
    pub client_reference: Option<String>,
}

impl TransferRecord {
    pub fn new(
        id: TransferId,
        request: TransferRequest,
        method: BridgeMethod,
        client_reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            request,
            method,
            state: TransferState::Created,
            created_at: now,
            source_tx_ref: None,
            bridge_message_ref: None,
            attestation_ref: None,
            destination_tx_ref: None,
            confirmations: 0,
            last_error: None,
            history: vec![StateTransition {
                state: TransferState::Created,
                at: now,
            }],
            client_reference,
        }
    }

    /// Merge stage references; already-recorded refs are never cleared
    pub fn apply_refs(&mut self, refs: StageRefs) {
        if refs.source_tx.is_some() {
            self.source_tx_ref = refs.source_tx;
        }
        if refs.bridge_message.is_some() {
            self.bridge_message_ref = refs.bridge_message;
        }
        if refs.attestation.is_some() {
            self.attestation_ref = refs.attestation;
        }
        if refs.destination_tx.is_some() {
            self.destination_tx_ref = refs.destination_tx;
        }
        if let Some(confirmations) = refs.confirmations {
            self.confirmations = confirmations;
        }
    }

    /// Time of the latest transition
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.history.last().map(|t| t.at).unwrap_or(self.created_at)
    }

    /// Whether `reference` names this record (id, tx hashes or bridge message)
    pub fn matches_reference(&self, reference: &str) -> bool {
        let eq = |r: &Option<String>| {
            r.as_deref()
                .map(|r| r.eq_ignore_ascii_case(reference))
                .unwrap_or(false)
        };
        self.id.as_str() == reference
            || eq(&self.source_tx_ref)
            || eq(&self.destination_tx_ref)
            || eq(&self.bridge_message_ref)
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            id: self.id.clone(),
            method: self.method,
            state: self.state,
            request: self.request.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at(),
            source_tx_ref: self.source_tx_ref.clone(),
            bridge_message_ref: self.bridge_message_ref.clone(),
            attestation_ref: self.attestation_ref.clone(),
            destination_tx_ref: self.destination_tx_ref.clone(),
            confirmations: self.confirmations,
            last_error: self.last_error.clone(),
            history: self.history.clone(),
        }
    }
}

/// Read-only point-in-time view of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub id: TransferId,
    pub method: BridgeMethod,
    pub state: TransferState,
    pub request: TransferRequest,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_tx_ref: Option<String>,
    pub bridge_message_ref: Option<String>,
    pub attestation_ref: Option<String>,
    pub destination_tx_ref: Option<String>,
    pub confirmations: u64,
    pub last_error: Option<FailureCause>,
    pub history: Vec<StateTransition>,
}

/// Outcome of driving a transfer to a terminal state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalResult {
    /// Settled, with proof of settlement on the destination side
    Completed(Settlement),
    Failed(FailureCause),
}

impl TerminalResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, TerminalResult::Completed(_))
    }
}

/// Broadcast on every state transition
#[derive(Debug, Clone)]
pub struct TransferUpdate {
    pub id: TransferId,
    pub state: TransferState,
    pub snapshot: TransferSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_only_move_forward() {
        use TransferState::*;
        assert!(Created.can_transition_to(Approving));
        assert!(Created.can_transition_to(Minting));
        assert!(Minting.can_transition_to(Completed));
        assert!(Burning.can_transition_to(Failed));
        assert!(!Minting.can_transition_to(AwaitingAttestation));
        assert!(!Burning.can_transition_to(Burning));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_cancellable_states() {
        use TransferState::*;
        assert!(Created.is_cancellable());
        assert!(Approving.is_cancellable());
        assert!(!Burning.is_cancellable());
        assert!(!AwaitingAttestation.is_cancellable());
        assert!(!Completed.is_cancellable());
    }

    #[test]
    fn test_refs_merge_without_clearing() {
        let request = TransferRequest {
            source_chain: "sepolia".into(),
            destination_chain: "arc".into(),
            token: "USDC".into(),
            amount: Amount::from_whole(1),
            from_address: EvmAddress::ZERO,
            to_address: EvmAddress::ZERO,
        };
        let mut record = TransferRecord::new(
            TransferId::new("t-1"),
            request,
            BridgeMethod::NativeMessaging,
            None,
            Utc::now(),
        );

        record.apply_refs(StageRefs::none().source_tx("0xaa").bridge_message("0xbb"));
        record.apply_refs(StageRefs::none().destination_tx("0xcc").confirmations(3));

        assert_eq!(record.source_tx_ref.as_deref(), Some("0xaa"));
        assert_eq!(record.bridge_message_ref.as_deref(), Some("0xbb"));
        assert_eq!(record.destination_tx_ref.as_deref(), Some("0xcc"));
        assert_eq!(record.confirmations, 3);
        assert!(record.matches_reference("0xAA"));
        assert!(record.matches_reference("t-1"));
        assert!(!record.matches_reference("0xdd"));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&TransferState::AwaitingAttestation).unwrap();
        assert_eq!(json, "\"awaiting_attestation\"");
    }
}
