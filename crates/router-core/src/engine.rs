//! Transfer execution engine
//!
//! Owns every `TransferRecord` and is the only writer of their state. Each
//! transfer runs as one task that drives the selected adapter; the adapter
//! reports stage changes back through [`TransferProgress`], and every state
//! change is timestamped, persisted and broadcast to subscribers.

use crate::{
    persistence::{PersistentStore, TransferStorePersistence},
    transfer_store::TransferStore,
};
use bridge_types::{
    BridgeError, BridgeMethod, BridgeResult, ErrorKind, FailureCause, ProtocolAdapter, RouteQuote,
    StageRefs, StateTransition, TerminalResult, TransferId, TransferProgress, TransferRecord,
    TransferRequest, TransferSnapshot, TransferState, TransferUpdate,
};
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of the transition broadcast channel
const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Transfer not found: {0}")]
    NotFound(String),

    #[error("Transfer {id} cannot be cancelled in state {state}")]
    CancellationRefused { id: TransferId, state: TransferState },

    #[error("Transfer {0} has already been started")]
    AlreadyStarted(TransferId),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Result of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: TransferId,
    /// False when an active record with the same client reference was returned
    pub created: bool,
}

struct EngineInner {
    adapters: HashMap<BridgeMethod, Arc<dyn ProtocolAdapter>>,
    store: TransferStore,
    /// Client reference -> record id
    references: DashMap<String, TransferId>,
    /// Records whose execution has been claimed
    claimed: DashSet<TransferId>,
    updates: broadcast::Sender<TransferUpdate>,
    persistence: Option<Arc<PersistentStore>>,
}

/// Handle to the execution engine; cheap to clone
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl ExecutionEngine {
    pub fn new(adapters: Vec<Arc<dyn ProtocolAdapter>>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                adapters: adapters.into_iter().map(|a| (a.method(), a)).collect(),
                store: TransferStore::new(),
                references: DashMap::new(),
                claimed: DashSet::new(),
                updates,
                persistence: None,
            }),
        }
    }

    /// Attach a persistent store and reload the records it holds
    ///
    /// Records that were in flight at shutdown are kept for status queries
    /// but are never executed again: their burn may already be on chain.
    pub fn with_persistence(
        adapters: Vec<Arc<dyn ProtocolAdapter>>,
        persistence: Arc<PersistentStore>,
    ) -> anyhow::Result<Self> {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let store = TransferStore::new();
        store.load_from_disk(&persistence)?;

        let references = DashMap::new();
        let claimed = DashSet::new();
        for record in store.all() {
            if let Some(reference) = &record.client_reference {
                let newer = references
                    .get(reference)
                    .and_then(|id| store.get(&id))
                    .map_or(true, |existing: TransferRecord| existing.created_at < record.created_at);
                if newer {
                    references.insert(reference.clone(), record.id.clone());
                }
            }
            if record.state != TransferState::Created {
                claimed.insert(record.id.clone());
            }
        }

        Ok(Self {
            inner: Arc::new(EngineInner {
                adapters: adapters.into_iter().map(|a| (a.method(), a)).collect(),
                store,
                references,
                claimed,
                updates,
                persistence: Some(persistence),
            }),
        })
    }

    pub fn store(&self) -> &TransferStore {
        &self.inner.store
    }

    /// Receive every state transition
    pub fn subscribe(&self) -> broadcast::Receiver<TransferUpdate> {
        self.inner.updates.subscribe()
    }

    /// Create a record in `Created` for `quote`'s method
    ///
    /// A repeated submission carrying the client reference of a record that
    /// is still active returns that record instead of creating another.
    pub fn submit(
        &self,
        request: TransferRequest,
        quote: &RouteQuote,
        client_reference: Option<String>,
    ) -> BridgeResult<Submission> {
        if !self.inner.adapters.contains_key(&quote.method) {
            return Err(BridgeError::UnsupportedRoute(format!(
                "no adapter for {}",
                quote.method
            )));
        }
        if quote.destination_chain != request.destination_chain || quote.token != request.token {
            return Err(BridgeError::InvalidRequest(
                "quote does not match the transfer request".to_string(),
            ));
        }

        let Some(reference) = client_reference else {
            let id = self.create(request, quote.method, None);
            return Ok(Submission { id, created: true });
        };

        match self.inner.references.entry(reference.clone()) {
            Entry::Occupied(mut entry) => {
                let active = self
                    .inner
                    .store
                    .get(entry.get())
                    .map_or(false, |r| !r.state.is_terminal());
                if active {
                    tracing::info!(client_reference = %reference, transfer_id = %entry.get(), "Duplicate submission");
                    return Ok(Submission {
                        id: entry.get().clone(),
                        created: false,
                    });
                }
                let id = self.create(request, quote.method, Some(reference));
                entry.insert(id.clone());
                Ok(Submission { id, created: true })
            }
            Entry::Vacant(entry) => {
                let id = self.create(request, quote.method, Some(reference));
                entry.insert(id.clone());
                Ok(Submission { id, created: true })
            }
        }
    }

    fn create(
        &self,
        request: TransferRequest,
        method: BridgeMethod,
        client_reference: Option<String>,
    ) -> TransferId {
        let id = TransferId::new(format!("xfer_{}", hex::encode(rand::random::<[u8; 16]>())));
        let record = TransferRecord::new(id.clone(), request, method, client_reference, Utc::now());

        tracing::info!(
            transfer_id = %id,
            method = %method,
            source = %record.request.source_chain,
            destination = %record.request.destination_chain,
            amount = %record.request.amount,
            token = %record.request.token,
            "Transfer created"
        );

        self.persist(&record);
        self.inner.store.insert(record);
        id
    }

    /// Submit and drive the transfer on a background task
    pub fn start(
        &self,
        request: TransferRequest,
        quote: &RouteQuote,
        client_reference: Option<String>,
    ) -> BridgeResult<Submission> {
        let submission = self.submit(request, quote, client_reference)?;
        if submission.created {
            let engine = self.clone();
            let id = submission.id.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.execute(&id).await {
                    tracing::error!(transfer_id = %id, error = %e, "Transfer execution did not start");
                }
            });
        }
        Ok(submission)
    }

    /// Drive a record to a terminal state
    ///
    /// A record can be executed once. A record cancelled before execution
    /// returns its failure without touching any chain.
    pub async fn execute(&self, id: &TransferId) -> Result<TerminalResult, EngineError> {
        let record = self
            .inner
            .store
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if !self.inner.claimed.insert(id.clone()) {
            return Err(EngineError::AlreadyStarted(id.clone()));
        }
        if let Some(result) = terminal_result(&record) {
            return Ok(result);
        }

        let adapter = self
            .inner
            .adapters
            .get(&record.method)
            .cloned()
            .ok_or_else(|| BridgeError::UnsupportedRoute(format!("no adapter for {}", record.method)))?;

        tracing::info!(transfer_id = %id, method = %record.method, "Executing transfer");
        let progress = EngineProgress { engine: self, id };

        let outcome = adapter.execute(&record.request, &progress).await;
        let result = match outcome {
            Ok(settlement) => {
                let refs = StageRefs::none()
                    .destination_tx(&settlement.destination_tx_ref)
                    .confirmations(settlement.confirmations);
                match self.transition(id, TransferState::Completed, refs) {
                    Ok(_) => TerminalResult::Completed(settlement),
                    Err(e) => self.fail(id, &e),
                }
            }
            Err(e) => self.fail(id, &e),
        };

        match &result {
            TerminalResult::Completed(settlement) => tracing::info!(
                transfer_id = %id,
                destination_tx = %settlement.destination_tx_ref,
                "Transfer completed"
            ),
            TerminalResult::Failed(cause) => tracing::warn!(
                transfer_id = %id,
                kind = cause.kind.as_str(),
                stage = %cause.stage,
                chain = ?cause.chain,
                tx_ref = ?cause.tx_ref,
                hint = cause.hint(),
                "Transfer failed: {}",
                cause.message
            ),
        }
        Ok(result)
    }

    /// Snapshot by record id, source/destination tx hash or bridge message ref
    pub fn status(&self, reference: &str) -> Result<TransferSnapshot, EngineError> {
        self.inner
            .store
            .find_by_reference(reference)
            .map(|r| r.snapshot())
            .ok_or_else(|| EngineError::NotFound(reference.to_string()))
    }

    /// Cancel a transfer that has not started burning
    pub fn cancel(&self, id: &TransferId) -> Result<TransferSnapshot, EngineError> {
        let outcome = self
            .inner
            .store
            .update(id, |record| {
                if !record.state.is_cancellable() {
                    return Err(EngineError::CancellationRefused {
                        id: record.id.clone(),
                        state: record.state,
                    });
                }
                let cause = FailureCause {
                    kind: ErrorKind::Cancelled,
                    stage: record.state,
                    chain: None,
                    tx_ref: None,
                    message: "Transfer cancelled: cancelled by user".to_string(),
                };
                record.last_error = Some(cause);
                Ok(self.apply(record, TransferState::Failed))
            })
            .ok_or_else(|| EngineError::NotFound(id.to_string()))??;

        tracing::info!(transfer_id = %id, "Transfer cancelled");
        self.broadcast(&outcome);
        Ok(outcome)
    }

    /// Move a record to `next` under its write guard
    fn transition(
        &self,
        id: &TransferId,
        next: TransferState,
        refs: StageRefs,
    ) -> BridgeResult<TransferSnapshot> {
        let snapshot = self
            .inner
            .store
            .update(id, |record| {
                if record.state.is_terminal() {
                    return Err(BridgeError::Cancelled(format!(
                        "transfer is already {}",
                        record.state
                    )));
                }
                if !record.state.can_transition_to(next) {
                    return Err(BridgeError::external(
                        "execution-engine",
                        format!("illegal transition {} -> {}", record.state, next),
                    ));
                }
                record.apply_refs(refs);
                Ok(self.apply(record, next))
            })
            .ok_or_else(|| BridgeError::external("execution-engine", format!("unknown transfer {}", id)))??;

        tracing::debug!(transfer_id = %id, state = %next, "Transfer state changed");
        self.broadcast(&snapshot);
        Ok(snapshot)
    }

    /// Record the failure, unless the record is already terminal
    fn fail(&self, id: &TransferId, error: &BridgeError) -> TerminalResult {
        let result = self.inner.store.update(id, |record| {
            if let Some(result) = terminal_result(record) {
                return (result, None);
            }
            let cause = FailureCause::from_error(error, record.state);
            record.last_error = Some(cause.clone());
            let snapshot = self.apply(record, TransferState::Failed);
            (TerminalResult::Failed(cause), Some(snapshot))
        });

        match result {
            Some((result, snapshot)) => {
                if let Some(snapshot) = snapshot {
                    self.broadcast(&snapshot);
                }
                result
            }
            None => TerminalResult::Failed(FailureCause::from_error(error, TransferState::Created)),
        }
    }

    /// Set the state, append history and persist; caller holds the write guard
    fn apply(&self, record: &mut TransferRecord, next: TransferState) -> TransferSnapshot {
        record.state = next;
        record.history.push(StateTransition {
            state: next,
            at: Utc::now(),
        });
        self.persist(record);
        record.snapshot()
    }

    fn persist(&self, record: &TransferRecord) {
        if let Some(persistence) = &self.inner.persistence {
            if let Err(e) = persistence.store_transfer(record) {
                tracing::error!(transfer_id = %record.id, error = %e, "Failed to persist transfer");
            }
        }
    }

    fn broadcast(&self, snapshot: &TransferSnapshot) {
        // No receivers is fine
        let _ = self.inner.updates.send(TransferUpdate {
            id: snapshot.id.clone(),
            state: snapshot.state,
            snapshot: snapshot.clone(),
        });
    }

    fn record_refs(&self, id: &TransferId, refs: StageRefs) {
        self.inner.store.update(id, |record| {
            record.apply_refs(refs);
            self.persist(record);
        });
    }
}

fn terminal_result(record: &TransferRecord) -> Option<TerminalResult> {
    match record.state {
        TransferState::Completed => Some(TerminalResult::Completed(bridge_types::Settlement {
            destination_tx_ref: record.destination_tx_ref.clone().unwrap_or_default(),
            confirmations: record.confirmations,
        })),
        TransferState::Failed => Some(TerminalResult::Failed(record.last_error.clone().unwrap_or(
            FailureCause {
                kind: ErrorKind::ExternalServiceError,
                stage: TransferState::Failed,
                chain: None,
                tx_ref: None,
                message: "failed without a recorded cause".to_string(),
            },
        ))),
        _ => None,
    }
}

/// Stage reporting handed to the adapter for one record
struct EngineProgress<'a> {
    engine: &'a ExecutionEngine,
    id: &'a TransferId,
}

impl TransferProgress for EngineProgress<'_> {
    fn enter_stage(&self, stage: TransferState, refs: StageRefs) -> BridgeResult<()> {
        self.engine.transition(self.id, stage, refs).map(|_| ())
    }

    fn record(&self, refs: StageRefs) {
        self.engine.record_refs(self.id, refs);
    }
}
