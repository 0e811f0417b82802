//! In-memory fakes of the external services, for tests across the workspace

use crate::{
    abi,
    attestation::{AttestationService, AttestationStatus},
    custodial::{CustodialApi, CustodialState, CustodialTransferRequest},
    error::{AdapterError, AdapterResult},
    rpc::{ChainRpc, LogEntry, TxReceipt},
};
use async_trait::async_trait;
use bridge_types::{
    Amount, BridgeError, BridgeResult, ChainConfig, EvmAddress, StageRefs, TransferProgress,
    TransferRequest, TransferState,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

/// Deterministic address derived from a label
pub fn address(label: &str) -> EvmAddress {
    let hash = bridge_types::keccak256(label.as_bytes());
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    EvmAddress::from_bytes(bytes)
}

pub fn wallet() -> EvmAddress {
    address("wallet")
}

pub fn recipient() -> EvmAddress {
    address("recipient")
}

pub fn relayer() -> EvmAddress {
    address("relayer")
}

/// Chain config with USDC and EURC deployed
pub fn chain(key: &str, chain_id: u64, domain: u32, counterpart: &str, burn_mint: bool) -> ChainConfig {
    let mut tokens = BTreeMap::new();
    tokens.insert("USDC".to_string(), address(&format!("{}:usdc", key)));
    tokens.insert("EURC".to_string(), address(&format!("{}:eurc", key)));
    ChainConfig {
        key: key.to_string(),
        chain_id,
        display_name: format!("{} testnet", key),
        rpc_endpoint: format!("http://{}.invalid", key),
        tokens,
        bridge_contract: address(&format!("{}:messenger", key)),
        message_transmitter: address(&format!("{}:transmitter", key)),
        cctp_domain: domain,
        confirmations: 1,
        counterpart: Some(counterpart.to_string()),
        supports_burn_mint: burn_mint,
    }
}

/// USDC request from [`wallet`] to [`recipient`]
pub fn request(source: &str, destination: &str, amount: &str) -> TransferRequest {
    TransferRequest {
        source_chain: source.to_string(),
        destination_chain: destination.to_string(),
        token: "USDC".to_string(),
        amount: amount.parse().unwrap_or(Amount::ZERO),
        from_address: wallet(),
        to_address: recipient(),
    }
}

/// Decoded transaction sent to a [`FakeChainRpc`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxKind {
    Approve { amount: Amount },
    DepositForBurn { amount: Amount, destination_domain: u32 },
    ReceiveMessage { message: Vec<u8> },
    Other,
}

#[derive(Debug, Clone)]
pub struct SentTx {
    pub hash: String,
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub kind: TxKind,
}

#[derive(Default)]
struct ChainState {
    balances: HashMap<EvmAddress, Amount>,
    allowances: HashMap<(EvmAddress, EvmAddress), Amount>,
    allowance_cap: Option<Amount>,
    revert_next: Option<([u8; 4], String)>,
    receipt_failure: Option<([u8; 4], AdapterError)>,
    receipts: HashMap<String, AdapterResult<TxReceipt>>,
    sent: Vec<SentTx>,
    receipt_delay: Duration,
}

/// Chain node fake that understands the burn/mint calls
pub struct FakeChainRpc {
    chain: ChainConfig,
    state: Mutex<ChainState>,
}

impl FakeChainRpc {
    pub fn new(chain: ChainConfig) -> Self {
        Self {
            chain,
            state: Mutex::new(ChainState::default()),
        }
    }

    pub fn set_balance(&self, owner: EvmAddress, amount: Amount) {
        self.state.lock().balances.insert(owner, amount);
    }

    /// Approvals grant at most `cap`
    pub fn cap_allowance(&self, cap: Amount) {
        self.state.lock().allowance_cap = Some(cap);
    }

    /// The next transaction calling `signature` reverts with `reason`
    pub fn revert_next(&self, signature: &str, reason: &str) {
        self.state.lock().revert_next = Some((abi::selector(signature), reason.to_string()));
    }

    /// The transaction calling `signature` goes out, but waiting for its
    /// receipt fails with `error`
    pub fn fail_receipt_next(&self, signature: &str, error: AdapterError) {
        self.state.lock().receipt_failure = Some((abi::selector(signature), error));
    }

    /// Delay every receipt wait
    pub fn set_receipt_delay(&self, delay: Duration) {
        self.state.lock().receipt_delay = delay;
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().sent.clone()
    }

    fn decode(data: &[u8]) -> TxKind {
        let Some((selector, args)) = abi::split_call(data) else {
            return TxKind::Other;
        };
        let uint = |i| abi::word(args, i).and_then(abi::decode_uint);

        if selector == abi::selector(abi::APPROVE) {
            uint(1)
                .map(|units| TxKind::Approve {
                    amount: Amount::from_units(units),
                })
                .unwrap_or(TxKind::Other)
        } else if selector == abi::selector(abi::DEPOSIT_FOR_BURN) {
            match (uint(0), uint(1)) {
                (Some(units), Some(domain)) => TxKind::DepositForBurn {
                    amount: Amount::from_units(units),
                    destination_domain: domain as u32,
                },
                _ => TxKind::Other,
            }
        } else if selector == abi::selector(abi::RECEIVE_MESSAGE) {
            abi::decode_bytes(args, 0)
                .map(|message| TxKind::ReceiveMessage { message })
                .unwrap_or(TxKind::Other)
        } else {
            TxKind::Other
        }
    }
}

#[async_trait]
impl ChainRpc for FakeChainRpc {
    async fn token_balance(&self, _token: EvmAddress, owner: EvmAddress) -> AdapterResult<Amount> {
        Ok(self
            .state
            .lock()
            .balances
            .get(&owner)
            .copied()
            .unwrap_or(Amount::ZERO))
    }

    async fn allowance(
        &self,
        _token: EvmAddress,
        owner: EvmAddress,
        spender: EvmAddress,
    ) -> AdapterResult<Amount> {
        Ok(self
            .state
            .lock()
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or(Amount::ZERO))
    }

    async fn send_transaction(
        &self,
        from: EvmAddress,
        to: EvmAddress,
        data: Vec<u8>,
    ) -> AdapterResult<String> {
        let mut state = self.state.lock();
        let hash = format!("0x{:062x}{:02x}", self.chain.chain_id, state.sent.len() + 1);
        let kind = Self::decode(&data);

        let called = abi::split_call(&data).map(|(selector, _)| selector);
        let reverts = matches!(
            (&state.revert_next, called),
            (Some((selector, _)), Some(called)) if *selector == called
        );
        let revert = if reverts {
            state.revert_next.take().map(|(_, reason)| reason)
        } else {
            None
        };

        let mut logs = Vec::new();
        if revert.is_none() {
            match &kind {
                TxKind::Approve { amount } => {
                    let granted = state.allowance_cap.map_or(*amount, |cap| cap.min(*amount));
                    if let Some(spender) = abi::word(&data[4..], 0).and_then(abi::decode_address) {
                        state.allowances.insert((from, spender), granted);
                    }
                }
                TxKind::DepositForBurn { amount, destination_domain } => {
                    let balance = state.balances.entry(from).or_insert(Amount::ZERO);
                    *balance = balance.saturating_sub(*amount);
                    let mut message = self.chain.cctp_domain.to_be_bytes().to_vec();
                    message.extend_from_slice(&destination_domain.to_be_bytes());
                    message.extend_from_slice(&amount.units().to_be_bytes());
                    message.extend_from_slice(hash.as_bytes());
                    logs.push(LogEntry {
                        address: self.chain.message_transmitter,
                        topics: vec![abi::event_topic(abi::MESSAGE_SENT)],
                        data: abi::encode(&[abi::Token::Bytes(message)]),
                    });
                }
                _ => {}
            }
        }

        let receipt_fails = matches!(
            (&state.receipt_failure, called),
            (Some((selector, _)), Some(called)) if *selector == called
        );
        let receipt = match revert {
            Some(reason) => Err(AdapterError::Reverted {
                tx_hash: Some(hash.clone()),
                reason,
            }),
            None if receipt_fails => match state.receipt_failure.take() {
                Some((_, error)) => Err(error),
                None => Err(AdapterError::Rpc("receipt unavailable".to_string())),
            },
            None => Ok(TxReceipt {
                tx_hash: hash.clone(),
                block_number: state.sent.len() as u64 + 1,
                confirmations: 0,
                logs,
            }),
        };
        state.receipts.insert(hash.clone(), receipt);
        state.sent.push(SentTx {
            hash: hash.clone(),
            from,
            to,
            kind,
        });
        Ok(hash)
    }

    async fn wait_for_receipt(&self, tx_hash: &str, confirmations: u64) -> AdapterResult<TxReceipt> {
        let delay = self.state.lock().receipt_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let receipt = self
            .state
            .lock()
            .receipts
            .get(tx_hash)
            .cloned()
            .unwrap_or_else(|| Err(AdapterError::Rpc(format!("unknown transaction {}", tx_hash))))?;
        Ok(TxReceipt {
            confirmations: confirmations.max(1),
            ..receipt
        })
    }
}

/// Attestation service that completes after a fixed number of polls
pub struct FakeAttestationService {
    complete_on: Option<u32>,
    attestation: String,
    fail_first: u32,
    polls: AtomicU32,
}

impl FakeAttestationService {
    /// Always pending
    pub fn never() -> Self {
        Self {
            complete_on: None,
            attestation: String::new(),
            fail_first: 0,
            polls: AtomicU32::new(0),
        }
    }

    /// Complete on poll number `polls`
    pub fn after(polls: u32, attestation: &str) -> Self {
        Self {
            complete_on: Some(polls),
            attestation: attestation.to_string(),
            fail_first: 0,
            polls: AtomicU32::new(0),
        }
    }

    /// The first `count` polls fail with a transport error
    pub fn failing_first(mut self, count: u32) -> Self {
        self.fail_first = count;
        self
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttestationService for FakeAttestationService {
    async fn fetch(&self, _message_hash: &str) -> AdapterResult<AttestationStatus> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if poll <= self.fail_first {
            return Err(AdapterError::Transport("connection reset".to_string()));
        }
        match self.complete_on {
            Some(n) if poll >= n => Ok(AttestationStatus::Complete(self.attestation.clone())),
            _ => Ok(AttestationStatus::Pending),
        }
    }
}

/// Custodial API fake
pub struct FakeCustodialApi {
    reject: Option<(String, String)>,
    complete_on: Option<u32>,
    status_error: Option<AdapterError>,
    initiations: AtomicU32,
    polls: AtomicU32,
    requests: Mutex<Vec<CustodialTransferRequest>>,
}

impl FakeCustodialApi {
    fn build(reject: Option<(String, String)>, complete_on: Option<u32>) -> Self {
        Self {
            reject,
            complete_on,
            status_error: None,
            initiations: AtomicU32::new(0),
            polls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reports completed on status poll number `polls`
    pub fn completing_after(polls: u32) -> Self {
        Self::build(None, Some(polls))
    }

    /// Rejects the initiating call with an error payload
    pub fn rejecting(code: &str, message: &str) -> Self {
        Self::build(Some((code.to_string(), message.to_string())), None)
    }

    pub fn never_final() -> Self {
        Self::build(None, None)
    }

    /// Every status poll fails with `error`
    pub fn failing_status(error: AdapterError) -> Self {
        Self {
            status_error: Some(error),
            ..Self::build(None, None)
        }
    }

    pub fn initiations(&self) -> u32 {
        self.initiations.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CustodialTransferRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CustodialApi for FakeCustodialApi {
    async fn initiate_transfer(&self, request: &CustodialTransferRequest) -> AdapterResult<String> {
        let n = self.initiations.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().push(request.clone());
        if let Some((code, message)) = &self.reject {
            return Err(AdapterError::Http {
                status: 422,
                code: Some(code.clone()),
                message: message.clone(),
            });
        }
        Ok(format!("bk-{}", n))
    }

    async fn transfer_status(&self, transfer_id: &str) -> AdapterResult<CustodialState> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = &self.status_error {
            return Err(error.clone());
        }
        match self.complete_on {
            Some(n) if poll >= n => Ok(CustodialState::Completed {
                tx_hash: Some(format!("0x{}", hex::encode(transfer_id.as_bytes()))),
                confirmations: Some(1),
            }),
            _ => Ok(CustodialState::Pending),
        }
    }
}

/// `TransferProgress` that records stage entries
#[derive(Default)]
pub struct RecordingProgress {
    stages: Mutex<Vec<TransferState>>,
    refs: Mutex<StageRefs>,
    cancel_at: Option<TransferState>,
}

impl RecordingProgress {
    /// Refuse entry into `stage` as if the transfer had been cancelled
    pub fn cancel_at(mut self, stage: TransferState) -> Self {
        self.cancel_at = Some(stage);
        self
    }

    pub fn stages(&self) -> Vec<TransferState> {
        self.stages.lock().clone()
    }

    pub fn refs(&self) -> StageRefs {
        self.refs.lock().clone()
    }

    fn merge(&self, refs: StageRefs) {
        let mut current = self.refs.lock();
        current.source_tx = refs.source_tx.or(current.source_tx.take());
        current.bridge_message = refs.bridge_message.or(current.bridge_message.take());
        current.attestation = refs.attestation.or(current.attestation.take());
        current.destination_tx = refs.destination_tx.or(current.destination_tx.take());
        current.confirmations = refs.confirmations.or(current.confirmations);
    }
}

impl TransferProgress for RecordingProgress {
    fn enter_stage(&self, stage: TransferState, refs: StageRefs) -> BridgeResult<()> {
        if self.cancel_at == Some(stage) {
            return Err(BridgeError::Cancelled("cancelled by user".to_string()));
        }
        self.merge(refs);
        self.stages.lock().push(stage);
        Ok(())
    }

    fn record(&self, refs: StageRefs) {
        self.merge(refs);
    }
}
