//! Subscription Manager - Manages transfer status subscriptions
//!
//! Fans engine transitions out to the WebSocket subscribers of each
//! transfer.

use bridge_types::{TransferId, TransferSnapshot, TransferUpdate};
use dashmap::DashMap;
use router_core::ExecutionEngine;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{sync::broadcast, task::JoinHandle};

/// Subscription ID
pub type SubscriptionId = u64;

/// Transfer update addressed to one subscription
#[derive(Clone, Debug)]
pub struct TransferNotification {
    pub subscription_id: SubscriptionId,
    pub snapshot: TransferSnapshot,
}

/// Subscription entry
#[derive(Clone, Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub transfer_id: TransferId,
    pub sender: broadcast::Sender<TransferNotification>,
}

/// Manages WebSocket subscriptions
pub struct SubscriptionManager {
    /// Active subscriptions by ID
    subscriptions: DashMap<SubscriptionId, Subscription>,
    /// Subscriptions by transfer for efficient lookup
    transfer_subscriptions: DashMap<TransferId, Vec<SubscriptionId>>,
    /// Next subscription ID
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            transfer_subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to updates of one transfer
    pub fn subscribe_transfer(
        &self,
        transfer_id: TransferId,
    ) -> (SubscriptionId, broadcast::Receiver<TransferNotification>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = broadcast::channel(16);

        self.subscriptions.insert(
            id,
            Subscription {
                id,
                transfer_id: transfer_id.clone(),
                sender,
            },
        );
        self.transfer_subscriptions
            .entry(transfer_id.clone())
            .or_default()
            .push(id);

        tracing::debug!(subscription_id = id, transfer_id = %transfer_id, "Created subscription");

        (id, receiver)
    }

    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> bool {
        let Some((_, sub)) = self.subscriptions.remove(&subscription_id) else {
            return false;
        };

        let emptied = match self.transfer_subscriptions.get_mut(&sub.transfer_id) {
            Some(mut subs) => {
                subs.retain(|&id| id != subscription_id);
                subs.is_empty()
            }
            None => false,
        };
        if emptied {
            self.transfer_subscriptions
                .remove_if(&sub.transfer_id, |_, subs| subs.is_empty());
        }

        tracing::debug!(subscription_id, "Removed subscription");
        true
    }

    /// Notify the subscribers of a transfer
    pub fn notify(&self, update: &TransferUpdate) {
        let Some(sub_ids) = self.transfer_subscriptions.get(&update.id) else {
            return;
        };
        for &sub_id in sub_ids.iter() {
            if let Some(sub) = self.subscriptions.get(&sub_id) {
                // Subscriber might have disconnected
                let _ = sub.sender.send(TransferNotification {
                    subscription_id: sub_id,
                    snapshot: update.snapshot.clone(),
                });
            }
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn has_subscription(&self, subscription_id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&subscription_id)
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward every engine transition to the subscription manager
pub fn spawn_update_forwarder(
    engine: &ExecutionEngine,
    manager: Arc<SubscriptionManager>,
) -> JoinHandle<()> {
    let mut updates = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => manager.notify(&update),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Update forwarder lagged behind the engine");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_types::{BridgeMethod, TransferRecord, TransferState};
    use chrono::Utc;
    use protocol_adapters::testing;

    fn update(id: &str, state: TransferState) -> TransferUpdate {
        let mut record = TransferRecord::new(
            TransferId::new(id),
            testing::request("sepolia", "arc", "10"),
            BridgeMethod::NativeMessaging,
            None,
            Utc::now(),
        );
        record.state = state;
        TransferUpdate {
            id: record.id.clone(),
            state,
            snapshot: record.snapshot(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_notify() {
        let manager = SubscriptionManager::new();
        let (sub_id, mut receiver) = manager.subscribe_transfer(TransferId::new("xfer_a"));
        assert_eq!(sub_id, 1);

        manager.notify(&update("xfer_b", TransferState::Approving));
        manager.notify(&update("xfer_a", TransferState::Burning));

        let notification = receiver.recv().await.unwrap();
        assert_eq!(notification.subscription_id, sub_id);
        assert_eq!(notification.snapshot.id.as_str(), "xfer_a");
        assert_eq!(notification.snapshot.state, TransferState::Burning);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe() {
        let manager = SubscriptionManager::new();
        let (sub_id, _) = manager.subscribe_transfer(TransferId::new("xfer_a"));
        assert!(manager.has_subscription(sub_id));

        assert!(manager.unsubscribe(sub_id));
        assert!(!manager.has_subscription(sub_id));
        assert!(!manager.unsubscribe(sub_id));
        assert_eq!(manager.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarder_delivers_engine_transitions() {
        let ctx = crate::testing::context();
        let manager = Arc::new(SubscriptionManager::new());
        let forwarder = spawn_update_forwarder(&ctx.engine, manager.clone());

        let (request, quote) = ctx
            .optimizer
            .select(&crate::testing::route("100"), None)
            .unwrap();
        let submission = ctx.engine.submit(request, &quote, None).unwrap();
        let (_, mut receiver) = manager.subscribe_transfer(submission.id.clone());

        ctx.engine.execute(&submission.id).await.unwrap();

        let mut states = Vec::new();
        while states.last() != Some(&TransferState::Completed) {
            states.push(receiver.recv().await.unwrap().snapshot.state);
        }
        assert_eq!(states.first(), Some(&TransferState::Approving));
        forwarder.abort();
    }
}
