//! Shared types for cross-chain stablecoin routing
//!
//! This crate contains the domain model shared by the route optimizer,
//! the protocol adapters and the execution engine:
//! - Fixed-point token amounts and fee rates
//! - EVM addresses with checksum validation
//! - Chain registry and liquidity snapshot
//! - Route quotes, transfer records and the transfer state machine
//! - The error taxonomy and the protocol adapter contract

pub mod adapter;
pub mod address;
pub mod amount;
pub mod chain;
pub mod error;
pub mod route;
pub mod transfer;

pub use adapter::{ProtocolAdapter, Settlement, TransferProgress};
pub use address::EvmAddress;
pub use amount::{Amount, FeeRate};
pub use chain::{ChainConfig, ChainRegistry, LiquidityEntry, LiquiditySnapshot, PoolLiquidity};
pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use route::{
    BridgeMethod, DurationRange, LiquidityTier, MethodProfile, RankedQuotes, RouteQuote, Score,
};
pub use transfer::{
    FailureCause, StageRefs, StateTransition, TerminalResult, TransferId, TransferRecord,
    TransferRequest, TransferSnapshot, TransferState, TransferUpdate,
};

use sha3::{Digest, Keccak256};

/// Decimal precision of the stablecoins in scope (USDC, EURC)
pub const TOKEN_DECIMALS: u32 = 6;

/// Base units per whole token
pub const TOKEN_UNIT: u128 = 1_000_000;

/// Precision for fee rate calculations (parts per million)
pub const RATE_PRECISION: u128 = 1_000_000;

/// Keccak-256 digest, as used for EVM selectors, event topics and message hashes
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Render bytes as a `0x`-prefixed lowercase hex string
pub fn to_hex_prefixed(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}
