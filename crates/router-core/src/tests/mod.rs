//! Scenario tests: optimizer and engine wired to fake chains and services


use crate::{ExecutionEngine, PersistentStore, RouteOptimizer, RouteRequest};
use bridge_types::{
    Amount, ChainRegistry, LiquidityEntry, LiquiditySnapshot, MethodProfile, ProtocolAdapter,
};
use protocol_adapters::{
    testing::{self, FakeAttestationService, FakeChainRpc, FakeCustodialApi},
    AttestationPoller, BurnMintAdapter, ChainContext, CustodialAdapter, StatusPollConfig,
};
use std::{sync::Arc, time::Duration};

pub(crate) struct Harness {
    pub optimizer: RouteOptimizer,
    pub engine: ExecutionEngine,
    pub sepolia: Arc<FakeChainRpc>,
    pub arc: Arc<FakeChainRpc>,
    pub attestation: Arc<FakeAttestationService>,
    pub custodial: Arc<FakeCustodialApi>,
}

pub(crate) struct HarnessOptions {
    pub arc_burn_mint: bool,
    pub attestation: FakeAttestationService,
    pub persistence: Option<Arc<PersistentStore>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            arc_burn_mint: true,
            attestation: FakeAttestationService::after(3, "0xa77e57a7"),
            persistence: None,
        }
    }
}

pub(crate) fn harness(options: HarnessOptions) -> Harness {
    let sepolia_config = testing::chain("sepolia", 11_155_111, 0, "arc", true);
    let arc_config = testing::chain("arc", 0x5afe, 26, "sepolia", options.arc_burn_mint);

    let sepolia = Arc::new(FakeChainRpc::new(sepolia_config.clone()));
    sepolia.set_balance(testing::wallet(), Amount::from_whole(1_000));
    let arc = Arc::new(FakeChainRpc::new(arc_config.clone()));
    let attestation = Arc::new(options.attestation);
    let custodial = Arc::new(FakeCustodialApi::completing_after(2));

    let burn_mint: Arc<dyn ProtocolAdapter> = Arc::new(BurnMintAdapter::new(
        MethodProfile::native_messaging(),
        [
            ChainContext {
                chain: sepolia_config.clone(),
                rpc: sepolia.clone(),
                relayer: testing::relayer(),
            },
            ChainContext {
                chain: arc_config.clone(),
                rpc: arc.clone(),
                relayer: testing::relayer(),
            },
        ],
        AttestationPoller::new(attestation.clone(), Duration::from_secs(10), 30),
    ));
    let custodial_adapter: Arc<dyn ProtocolAdapter> = Arc::new(CustodialAdapter::new(
        MethodProfile::custodial(),
        custodial.clone(),
        StatusPollConfig::default(),
    ));
    let adapters = vec![burn_mint, custodial_adapter];

    let registry = ChainRegistry::new([sepolia_config, arc_config]);
    let liquidity = LiquiditySnapshot::new([LiquidityEntry {
        chain: "arc".into(),
        token: "USDC".into(),
        available: Amount::from_whole(300_000),
        utilization_rate: 0.5,
    }]);

    let optimizer = RouteOptimizer::new(Arc::new(registry), Arc::new(liquidity), adapters.clone());
    let engine = match options.persistence {
        Some(store) => ExecutionEngine::with_persistence(adapters, store).unwrap(),
        None => ExecutionEngine::new(adapters),
    };

    Harness {
        optimizer,
        engine,
        sepolia,
        arc,
        attestation,
        custodial,
    }
}

/// Sepolia -> Arc USDC request for `amount`
pub(crate) fn route(amount: &str) -> RouteRequest {
    RouteRequest {
        source_chain: "sepolia".to_string(),
        destination_chain: Some("arc".to_string()),
        token: "USDC".to_string(),
        amount: amount.to_string(),
        from_address: testing::wallet().to_checksum(),
        to_address: testing::recipient().to_checksum(),
    }
}
