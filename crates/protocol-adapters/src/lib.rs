//! Protocol Adapters - Bridging method implementations
//!
//! Talks to everything outside the process:
//! - Chain nodes over JSON-RPC (balances, allowances, transactions, receipts)
//! - The attestation service for burn/mint messages
//! - The custodial bridge API
//!
//! `testing` holds in-memory fakes of all three for use in tests.

pub mod abi;
pub mod attestation;
pub mod burn_mint;
pub mod custodial;
pub mod error;
pub mod rpc;
pub mod testing;

pub use attestation::{AttestationPoller, AttestationService, AttestationStatus, IrisAttestationClient};
pub use burn_mint::{BurnMintAdapter, BurnReceipt, ChainContext, MintReceipt};
pub use custodial::{
    CustodialAdapter, CustodialApi, CustodialBridgeClient, CustodialState, StatusPollConfig,
};
pub use error::{AdapterError, AdapterResult};
pub use rpc::{ChainRpc, EvmRpcClient, ReceiptPolicy, TxReceipt};
