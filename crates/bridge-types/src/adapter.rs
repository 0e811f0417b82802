//! Protocol adapter contract
//!
//! Every bridging method implements [`ProtocolAdapter`]. The optimizer uses
//! the capability check and quote; the execution engine calls `execute` and
//! hands the adapter a [`TransferProgress`] so that stage changes flow back
//! through the engine, which is the only writer of transfer state.

use crate::{
    amount::Amount,
    chain::ChainConfig,
    error::BridgeResult,
    route::{BridgeMethod, MethodProfile, RouteQuote},
    transfer::{StageRefs, TransferRequest, TransferState},
};
use async_trait::async_trait;

/// Proof of settlement on the destination side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub destination_tx_ref: String,
    pub confirmations: u64,
}

/// Stage reporting hook implemented by the execution engine
pub trait TransferProgress: Send + Sync {
    /// Move the transfer into `stage`, merging `refs` first
    ///
    /// Fails with `BridgeError::Cancelled` if the transfer was cancelled or
    /// already reached a terminal state; the adapter must stop immediately.
    fn enter_stage(&self, stage: TransferState, refs: StageRefs) -> BridgeResult<()>;

    /// Record references without changing stage
    fn record(&self, refs: StageRefs);
}

/// Uniform quote/execute contract for a bridging method
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn method(&self) -> BridgeMethod;

    fn profile(&self) -> &MethodProfile;

    /// Capability check for a (source, destination, token) triple
    fn supports(&self, source: &ChainConfig, destination: &ChainConfig, token: &str) -> bool;

    /// Price a request. Pure; the default uses the method profile.
    fn quote(
        &self,
        request: &TransferRequest,
        destination: &ChainConfig,
        available_liquidity: Amount,
    ) -> RouteQuote {
        RouteQuote::build(self.profile(), request, destination, available_liquidity)
    }

    /// Drive the transfer through this method's stages to settlement
    async fn execute(
        &self,
        request: &TransferRequest,
        progress: &dyn TransferProgress,
    ) -> BridgeResult<Settlement>;
}
