//! API context wired to in-memory fakes

use crate::ApiContext;
use bridge_types::{
    Amount, ChainRegistry, LiquidityEntry, LiquiditySnapshot, MethodProfile, ProtocolAdapter,
};
use protocol_adapters::{
    testing::{self, FakeAttestationService, FakeChainRpc, FakeCustodialApi},
    AttestationPoller, BurnMintAdapter, ChainContext, CustodialAdapter, StatusPollConfig,
};
use router_core::{ExecutionEngine, RouteOptimizer, RouteRequest};
use std::{sync::Arc, time::Duration};

/// Sepolia and Arc, both burn/mint capable, with a funded test wallet
pub(crate) fn context() -> Arc<ApiContext> {
    let sepolia_config = testing::chain("sepolia", 11_155_111, 0, "arc", true);
    let arc_config = testing::chain("arc", 0x5afe, 26, "sepolia", true);

    let sepolia = Arc::new(FakeChainRpc::new(sepolia_config.clone()));
    sepolia.set_balance(testing::wallet(), Amount::from_whole(10_000));
    let arc = Arc::new(FakeChainRpc::new(arc_config.clone()));

    let burn_mint: Arc<dyn ProtocolAdapter> = Arc::new(BurnMintAdapter::new(
        MethodProfile::native_messaging(),
        [
            ChainContext {
                chain: sepolia_config.clone(),
                rpc: sepolia,
                relayer: testing::relayer(),
            },
            ChainContext {
                chain: arc_config.clone(),
                rpc: arc,
                relayer: testing::relayer(),
            },
        ],
        AttestationPoller::new(
            Arc::new(FakeAttestationService::after(3, "0xa77e57a7")),
            Duration::from_secs(10),
            30,
        ),
    ));
    let custodial: Arc<dyn ProtocolAdapter> = Arc::new(CustodialAdapter::new(
        MethodProfile::custodial(),
        Arc::new(FakeCustodialApi::completing_after(2)),
        StatusPollConfig::default(),
    ));
    let adapters = vec![burn_mint, custodial];

    let registry = ChainRegistry::new([sepolia_config, arc_config]);
    let liquidity = LiquiditySnapshot::new([
        LiquidityEntry {
            chain: "arc".into(),
            token: "USDC".into(),
            available: Amount::from_whole(300_000),
            utilization_rate: 0.5,
        },
        LiquidityEntry {
            chain: "sepolia".into(),
            token: "USDC".into(),
            available: Amount::from_whole(500_000),
            utilization_rate: 0.5,
        },
    ]);

    let optimizer = RouteOptimizer::new(Arc::new(registry), Arc::new(liquidity), adapters.clone());
    Arc::new(ApiContext::new(
        Arc::new(optimizer),
        ExecutionEngine::new(adapters),
        "sepolia",
    ))
}

/// Sepolia -> Arc USDC request for `amount`
pub(crate) fn route(amount: &str) -> RouteRequest {
    RouteRequest {
        source_chain: "sepolia".to_string(),
        destination_chain: None,
        token: "USDC".to_string(),
        amount: amount.to_string(),
        from_address: testing::wallet().to_checksum(),
        to_address: testing::recipient().to_checksum(),
    }
}
