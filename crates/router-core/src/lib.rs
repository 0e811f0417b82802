//! Router Core - Route selection and transfer execution
//!
//! This crate provides the core of the bridge router:
//! - Route optimization across the configured bridging methods
//! - The transfer execution state machine
//! - In-memory transfer storage with optional disk persistence

pub mod engine;
pub mod optimizer;
pub mod persistence;
pub mod transfer_store;

#[cfg(test)]
mod tests;

pub use engine::{EngineError, ExecutionEngine, Submission};
pub use optimizer::{RouteOptimizer, RouteRequest};
pub use persistence::{PersistentStore, StoreMetadata, TransferStorePersistence};
pub use transfer_store::TransferStore;
