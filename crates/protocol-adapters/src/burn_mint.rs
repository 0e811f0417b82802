//! Native burn/mint messaging adapter
//!
//! Flow on the source chain: balance check, exact-amount approval, allowance
//! verification, `depositForBurn`, `MessageSent` extraction. Then the
//! attestation wait, then `receiveMessage` on the destination chain through
//! that chain's own RPC client and relayer account.

use crate::{
    abi,
    attestation::AttestationPoller,
    error::AdapterError,
    rpc::{find_message_sent, ChainRpc},
};
use async_trait::async_trait;
use bridge_types::{
    keccak256, to_hex_prefixed, BridgeError, BridgeMethod, BridgeResult, ChainConfig, EvmAddress,
    MethodProfile, ProtocolAdapter, Settlement, StageRefs, TransferProgress, TransferRequest,
    TransferState,
};
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

/// RPC access and signing account for one chain
#[derive(Clone)]
pub struct ChainContext {
    pub chain: ChainConfig,
    pub rpc: Arc<dyn ChainRpc>,
    /// Node-managed account used to relay `receiveMessage` on this chain
    pub relayer: EvmAddress,
}

/// Result of the source-chain burn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnReceipt {
    pub approval_tx_hash: String,
    pub source_tx_hash: String,
    pub message: Vec<u8>,
    /// keccak256 of `message`, `0x`-prefixed
    pub message_hash: String,
}

/// Result of the destination-chain mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub destination_tx_hash: String,
    pub confirmations: u64,
}

pub struct BurnMintAdapter {
    profile: MethodProfile,
    chains: HashMap<String, ChainContext>,
    attestation: AttestationPoller,
    burnable: BTreeSet<String>,
}

impl BurnMintAdapter {
    pub fn new(
        profile: MethodProfile,
        chains: impl IntoIterator<Item = ChainContext>,
        attestation: AttestationPoller,
    ) -> Self {
        Self {
            profile,
            chains: chains
                .into_iter()
                .map(|ctx| (ctx.chain.key.to_ascii_lowercase(), ctx))
                .collect(),
            attestation,
            burnable: BTreeSet::from(["USDC".to_string()]),
        }
    }

    /// Override the set of token symbols the token messenger can burn
    pub fn with_burnable_tokens(mut self, tokens: impl IntoIterator<Item = String>) -> Self {
        self.burnable = tokens.into_iter().map(|t| t.to_ascii_uppercase()).collect();
        self
    }

    fn context(&self, key: &str) -> BridgeResult<&ChainContext> {
        self.chains
            .get(&key.to_ascii_lowercase())
            .ok_or_else(|| BridgeError::UnsupportedChain(key.to_string()))
    }

    /// Approve the exact amount, verify the allowance, then burn
    ///
    /// Enters `Approving` before the approval is dispatched and `Burning`
    /// once it is confirmed, so a cancellation that lands in between stops
    /// the flow before anything is burned.
    pub async fn deposit_for_burn(
        &self,
        request: &TransferRequest,
        progress: &dyn TransferProgress,
    ) -> BridgeResult<BurnReceipt> {
        let source = self.context(&request.source_chain)?;
        let destination = self.context(&request.destination_chain)?;
        let chain = &source.chain;
        let token = *chain.token_address(&request.token).ok_or_else(|| {
            BridgeError::UnsupportedRoute(format!("{} is not configured on {}", request.token, chain.key))
        })?;
        let owner = request.from_address;
        let spender = chain.bridge_contract;

        let balance = source
            .rpc
            .token_balance(token, owner)
            .await
            .map_err(|e| e.into_chain_error(&chain.key, None))?;
        if balance < request.amount {
            return Err(BridgeError::InsufficientBalance {
                chain: chain.key.clone(),
                required: request.amount,
                available: balance,
            });
        }

        progress.enter_stage(TransferState::Approving, StageRefs::none())?;

        let approval_tx_hash = source
            .rpc
            .send_transaction(owner, token, abi::approve(spender, request.amount))
            .await
            .map_err(|e| approval_error(e, &chain.key, None))?;
        tracing::info!(chain = %chain.key, tx_hash = %approval_tx_hash, amount = %request.amount, "Approval sent");

        source
            .rpc
            .wait_for_receipt(&approval_tx_hash, chain.confirmations)
            .await
            .map_err(|e| approval_error(e, &chain.key, Some(approval_tx_hash.clone())))?;

        let allowance = source
            .rpc
            .allowance(token, owner, spender)
            .await
            .map_err(|e| e.into_chain_error(&chain.key, Some(approval_tx_hash.clone())))?;
        if allowance < request.amount {
            return Err(BridgeError::InsufficientAllowance {
                chain: chain.key.clone(),
                tx_ref: Some(approval_tx_hash),
                reason: format!("allowance {} below amount {}", allowance, request.amount),
            });
        }

        progress.enter_stage(TransferState::Burning, StageRefs::none())?;

        let burn_data = abi::deposit_for_burn(
            request.amount,
            destination.chain.cctp_domain,
            request.to_address,
            token,
        );
        let source_tx_hash = source
            .rpc
            .send_transaction(owner, spender, burn_data)
            .await
            .map_err(|e| e.into_chain_error(&chain.key, None))?;
        progress.record(StageRefs::none().source_tx(&source_tx_hash));
        tracing::info!(chain = %chain.key, tx_hash = %source_tx_hash, "Burn sent");

        // From here on the burn may have happened
        let receipt = source
            .rpc
            .wait_for_receipt(&source_tx_hash, chain.confirmations)
            .await
            .map_err(|e| e.into_in_transit_error(&chain.key, source_tx_hash.clone()))?;

        let message = find_message_sent(&receipt.logs, chain.message_transmitter).ok_or_else(|| {
            BridgeError::InTransit {
                chain: chain.key.clone(),
                tx_ref: Some(source_tx_hash.clone()),
                reason: "burn receipt carries no MessageSent event".to_string(),
            }
        })?;
        let message_hash = to_hex_prefixed(&keccak256(&message));

        Ok(BurnReceipt {
            approval_tx_hash,
            source_tx_hash,
            message,
            message_hash,
        })
    }

    pub async fn await_attestation(&self, message_hash: &str) -> BridgeResult<String> {
        self.attestation.await_attestation(message_hash).await
    }

    /// Submit the attested message on the destination chain
    ///
    /// The burn is done by now, so failures short of a revert are reported
    /// in transit: under the message hash before the mint is sent, under the
    /// mint hash after.
    pub async fn receive_message(
        &self,
        destination_chain: &str,
        message: &[u8],
        attestation: &str,
    ) -> BridgeResult<MintReceipt> {
        let destination = self.context(destination_chain)?;
        let chain = &destination.chain;
        let message_hash = to_hex_prefixed(&keccak256(message));
        let attestation_bytes = abi::parse_hex(attestation).ok_or_else(|| BridgeError::InTransit {
            chain: chain.key.clone(),
            tx_ref: Some(message_hash.clone()),
            reason: format!("malformed attestation {:?}", attestation),
        })?;

        let tx_hash = destination
            .rpc
            .send_transaction(
                destination.relayer,
                chain.message_transmitter,
                abi::receive_message(message, &attestation_bytes),
            )
            .await
            .map_err(|e| e.into_in_transit_error(&chain.key, message_hash))?;
        tracing::info!(chain = %chain.key, tx_hash = %tx_hash, "Mint sent");

        let receipt = destination
            .rpc
            .wait_for_receipt(&tx_hash, chain.confirmations)
            .await
            .map_err(|e| e.into_in_transit_error(&chain.key, tx_hash.clone()))?;

        Ok(MintReceipt {
            destination_tx_hash: tx_hash,
            confirmations: receipt.confirmations,
        })
    }
}

/// A failed approval leaves the bridge without allowance
fn approval_error(err: AdapterError, chain: &str, tx_ref: Option<String>) -> BridgeError {
    match err {
        AdapterError::Reverted { tx_hash, reason } => BridgeError::InsufficientAllowance {
            chain: chain.to_string(),
            tx_ref: tx_hash.or(tx_ref),
            reason: format!("approval reverted: {}", reason),
        },
        other => other.into_chain_error(chain, tx_ref),
    }
}

#[async_trait]
impl ProtocolAdapter for BurnMintAdapter {
    fn method(&self) -> BridgeMethod {
        BridgeMethod::NativeMessaging
    }

    fn profile(&self) -> &MethodProfile {
        &self.profile
    }

    fn supports(&self, source: &ChainConfig, destination: &ChainConfig, token: &str) -> bool {
        let token = token.to_ascii_uppercase();
        source.supports_burn_mint
            && destination.supports_burn_mint
            && self.burnable.contains(&token)
            && source.has_token(&token)
            && destination.has_token(&token)
    }

    async fn execute(
        &self,
        request: &TransferRequest,
        progress: &dyn TransferProgress,
    ) -> BridgeResult<Settlement> {
        let burn = self.deposit_for_burn(request, progress).await?;

        progress.enter_stage(
            TransferState::AwaitingAttestation,
            StageRefs::none()
                .source_tx(&burn.source_tx_hash)
                .bridge_message(&burn.message_hash),
        )?;

        let attestation = self.await_attestation(&burn.message_hash).await?;

        progress.enter_stage(TransferState::Minting, StageRefs::none().attestation(&attestation))?;

        let mint = self
            .receive_message(&request.destination_chain, &burn.message, &attestation)
            .await?;

        Ok(Settlement {
            destination_tx_ref: mint.destination_tx_hash,
            confirmations: mint.confirmations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        self, FakeAttestationService, FakeChainRpc, RecordingProgress, TxKind,
    };
    use bridge_types::{Amount, ErrorKind};
    use std::time::Duration;

    struct Harness {
        adapter: BurnMintAdapter,
        source: Arc<FakeChainRpc>,
        destination: Arc<FakeChainRpc>,
        attestation: Arc<FakeAttestationService>,
    }

    fn harness(balance: Amount, attestation: FakeAttestationService) -> Harness {
        let sepolia = testing::chain("sepolia", 11_155_111, 0, "arc", true);
        let arc = testing::chain("arc", 0x5afe, 26, "sepolia", true);
        let source = Arc::new(FakeChainRpc::new(sepolia.clone()));
        source.set_balance(testing::wallet(), balance);
        let destination = Arc::new(FakeChainRpc::new(arc.clone()));
        let attestation = Arc::new(attestation);

        let adapter = BurnMintAdapter::new(
            MethodProfile::native_messaging(),
            [
                ChainContext {
                    chain: sepolia,
                    rpc: source.clone(),
                    relayer: testing::relayer(),
                },
                ChainContext {
                    chain: arc,
                    rpc: destination.clone(),
                    relayer: testing::relayer(),
                },
            ],
            AttestationPoller::new(attestation.clone(), Duration::from_secs(10), 30),
        );

        Harness {
            adapter,
            source,
            destination,
            attestation,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_burn_and_mint() {
        let h = harness(Amount::from_whole(500), FakeAttestationService::after(2, "0xa77e57"));
        let progress = RecordingProgress::default();
        let request = testing::request("sepolia", "arc", "100");

        let settlement = h.adapter.execute(&request, &progress).await.unwrap();

        assert!(!settlement.destination_tx_ref.is_empty());
        assert_eq!(
            progress.stages(),
            vec![
                TransferState::Approving,
                TransferState::Burning,
                TransferState::AwaitingAttestation,
                TransferState::Minting,
            ]
        );

        let sent = h.source.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, TxKind::Approve { amount: Amount::from_whole(100) });
        assert_eq!(
            sent[1].kind,
            TxKind::DepositForBurn {
                amount: Amount::from_whole(100),
                destination_domain: 26,
            }
        );
        assert_eq!(h.destination.sent().len(), 1);
        assert!(matches!(h.destination.sent()[0].kind, TxKind::ReceiveMessage { .. }));
        assert_eq!(h.attestation.polls(), 2);

        let refs = progress.refs();
        assert!(refs.source_tx.is_some());
        assert!(refs.bridge_message.as_deref().unwrap().starts_with("0x"));
        assert_eq!(refs.attestation.as_deref(), Some("0xa77e57"));
    }

    #[tokio::test]
    async fn test_insufficient_balance_sends_nothing() {
        let h = harness(Amount::from_whole(10), FakeAttestationService::after(1, "0x01"));
        let progress = RecordingProgress::default();
        let request = testing::request("sepolia", "arc", "100");

        let err = h.adapter.execute(&request, &progress).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
        assert!(h.source.sent().is_empty());
        assert!(progress.stages().is_empty());
    }

    #[tokio::test]
    async fn test_burn_revert_surfaces_reason() {
        let h = harness(Amount::from_whole(500), FakeAttestationService::after(1, "0x01"));
        h.source.revert_next(abi::DEPOSIT_FOR_BURN, "Burn amount exceeds per tx limit");
        let progress = RecordingProgress::default();

        let err = h
            .adapter
            .execute(&testing::request("sepolia", "arc", "100"), &progress)
            .await
            .unwrap_err();
        match err {
            BridgeError::OnChainRevert { chain, tx_ref, reason } => {
                assert_eq!(chain, "sepolia");
                assert!(tx_ref.is_some());
                assert!(reason.contains("per tx limit"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(h.destination.sent().is_empty());
    }

    #[tokio::test]
    async fn test_short_allowance_fails_before_burn() {
        let h = harness(Amount::from_whole(500), FakeAttestationService::after(1, "0x01"));
        h.source.cap_allowance(Amount::from_whole(50));
        let progress = RecordingProgress::default();

        let err = h
            .adapter
            .execute(&testing::request("sepolia", "arc", "100"), &progress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientAllowance);
        assert_eq!(h.source.sent().len(), 1);
        assert_eq!(progress.stages(), vec![TransferState::Approving]);
    }

    #[tokio::test]
    async fn test_cancel_during_approval_stops_before_burn() {
        let h = harness(Amount::from_whole(500), FakeAttestationService::after(1, "0x01"));
        let progress = RecordingProgress::default().cancel_at(TransferState::Burning);

        let err = h
            .adapter
            .execute(&testing::request("sepolia", "arc", "100"), &progress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        let sent = h.source.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].kind, TxKind::Approve { .. }));
    }

    #[tokio::test]
    async fn test_unconfirmed_burn_is_reported_in_transit() {
        let h = harness(Amount::from_whole(500), FakeAttestationService::after(1, "0x01"));
        h.source.fail_receipt_next(
            abi::DEPOSIT_FOR_BURN,
            AdapterError::Timeout("transaction not confirmed after 180 polls".to_string()),
        );
        let progress = RecordingProgress::default();

        let err = h
            .adapter
            .execute(&testing::request("sepolia", "arc", "100"), &progress)
            .await
            .unwrap_err();

        let sent = h.source.sent();
        assert!(matches!(sent[1].kind, TxKind::DepositForBurn { .. }));
        assert_eq!(err.kind(), ErrorKind::InTransit);
        assert_eq!(err.kind().hint(), "retry status check");
        assert_eq!(err.tx_ref(), Some(sent[1].hash.as_str()));
        assert_eq!(progress.refs().source_tx.as_deref(), Some(sent[1].hash.as_str()));
        assert_eq!(progress.stages(), vec![TransferState::Approving, TransferState::Burning]);
        assert_eq!(h.attestation.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_mint_receipt_is_reported_in_transit() {
        let h = harness(Amount::from_whole(500), FakeAttestationService::after(1, "0xa77e57"));
        h.destination.fail_receipt_next(
            abi::RECEIVE_MESSAGE,
            AdapterError::Rpc("header not found".to_string()),
        );
        let progress = RecordingProgress::default();

        let err = h
            .adapter
            .execute(&testing::request("sepolia", "arc", "100"), &progress)
            .await
            .unwrap_err();

        let mint = &h.destination.sent()[0];
        assert_eq!(err.kind(), ErrorKind::InTransit);
        assert_eq!(err.chain(), Some("arc"));
        assert_eq!(err.tx_ref(), Some(mint.hash.as_str()));
        assert_eq!(h.source.sent().len(), 2);
    }

    #[test]
    fn test_supports_requires_burn_mint_on_both_chains() {
        let h = harness(Amount::ZERO, FakeAttestationService::never());
        let sepolia = testing::chain("sepolia", 11_155_111, 0, "arc", true);
        let arc = testing::chain("arc", 0x5afe, 26, "sepolia", true);
        let legacy = testing::chain("legacy", 1, 9, "sepolia", false);

        assert!(h.adapter.supports(&sepolia, &arc, "USDC"));
        assert!(h.adapter.supports(&sepolia, &arc, "usdc"));
        assert!(!h.adapter.supports(&sepolia, &arc, "EURC"));
        assert!(!h.adapter.supports(&sepolia, &legacy, "USDC"));
    }
}
