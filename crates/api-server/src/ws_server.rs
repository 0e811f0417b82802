//! WebSocket Server
//!
//! JSON-RPC over WebSocket for transfer status subscriptions:
//! `transferSubscribe [transferId]`, `transferUnsubscribe [subscriptionId]`
//! and `transferNotification` pushes.

use crate::{
    methods::{ApiContext, StatusResponse},
    subscriptions::{SubscriptionId, SubscriptionManager, TransferNotification},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// WebSocket JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct WsJsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// WebSocket Server
pub struct WebSocketServer {
    context: Arc<ApiContext>,
    subscription_manager: Arc<SubscriptionManager>,
}

impl WebSocketServer {
    pub fn new(context: Arc<ApiContext>, subscription_manager: Arc<SubscriptionManager>) -> Self {
        Self {
            context,
            subscription_manager,
        }
    }

    /// Run the WebSocket server
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("WebSocket server listening on {}", addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        while let Ok((stream, peer_addr)) = listener.accept().await {
            let ctx = self.context.clone();
            let sub_mgr = self.subscription_manager.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, ctx, sub_mgr).await {
                    tracing::warn!("WebSocket connection error from {}: {}", peer_addr, e);
                }
            });
        }

        Ok(())
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    context: Arc<ApiContext>,
    subscription_manager: Arc<SubscriptionManager>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();

    // Track subscriptions for this connection
    let mut active_subscriptions: Vec<SubscriptionId> = Vec::new();

    let result: anyhow::Result<()> = loop {
        let outgoing = tokio::select! {
            incoming = ws_receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(()),
                };
                let Message::Text(text) = msg else {
                    continue;
                };
                match serde_json::from_str::<WsJsonRpcRequest>(&text) {
                    Ok(request) => {
                        let (response, initial) = handle_ws_method(
                            &context,
                            &subscription_manager,
                            &request,
                            &mut active_subscriptions,
                            &outbound_tx,
                        );
                        std::iter::once(response).chain(initial).collect()
                    }
                    Err(_) => vec![error_response(&Value::Null, -32700, "Parse error")],
                }
            }
            Some(notification) = outbound_rx.recv() => vec![notification],
        };

        let mut failed = None;
        for message in outgoing {
            if let Err(e) = ws_sender.send(Message::Text(message.to_string())).await {
                failed = Some(e);
                break;
            }
        }
        if let Some(e) = failed {
            break Err(e.into());
        }
    };

    // Clean up subscriptions on disconnect
    for sub_id in active_subscriptions {
        subscription_manager.unsubscribe(sub_id);
    }

    result
}

/// Handle WebSocket JSON-RPC method
///
/// Returns the response and, for a new subscription, a notification carrying
/// the transfer's current state.
fn handle_ws_method(
    context: &ApiContext,
    subscription_manager: &SubscriptionManager,
    request: &WsJsonRpcRequest,
    active_subscriptions: &mut Vec<SubscriptionId>,
    outbound: &mpsc::UnboundedSender<Value>,
) -> (Value, Option<Value>) {
    match request.method.as_str() {
        "transferSubscribe" => {
            let params: Vec<Value> = serde_json::from_value(request.params.clone()).unwrap_or_default();
            let Some(reference) = params.first().and_then(|v| v.as_str()) else {
                return (error_response(&request.id, -32602, "Missing transfer id"), None);
            };
            let snapshot = match context.engine.status(reference) {
                Ok(snapshot) => snapshot,
                Err(_) => return (error_response(&request.id, -32602, "Transfer not found"), None),
            };

            let (sub_id, receiver) = subscription_manager.subscribe_transfer(snapshot.id.clone());
            active_subscriptions.push(sub_id);
            tokio::spawn(forward_notifications(receiver, outbound.clone()));

            let initial = format_transfer_notification(&TransferNotification {
                subscription_id: sub_id,
                snapshot,
            });
            (
                json!({
                    "jsonrpc": "2.0",
                    "id": request.id,
                    "result": sub_id
                }),
                Some(initial),
            )
        }

        "transferUnsubscribe" => {
            let params: Vec<Value> = serde_json::from_value(request.params.clone()).unwrap_or_default();
            let Some(id) = params.first().and_then(|v| v.as_u64()) else {
                return (error_response(&request.id, -32602, "Missing subscription ID"), None);
            };

            // Only subscriptions made on this connection
            let success = active_subscriptions.contains(&id) && subscription_manager.unsubscribe(id);
            if success {
                active_subscriptions.retain(|&s| s != id);
            }
            (
                json!({
                    "jsonrpc": "2.0",
                    "id": request.id,
                    "result": success
                }),
                None,
            )
        }

        _ => (
            error_response(&request.id, -32601, &format!("Method not found: {}", request.method)),
            None,
        ),
    }
}

/// Push a subscription's notifications to its connection until either closes
async fn forward_notifications(
    mut receiver: broadcast::Receiver<TransferNotification>,
    outbound: mpsc::UnboundedSender<Value>,
) {
    loop {
        match receiver.recv().await {
            Ok(notification) => {
                if outbound.send(format_transfer_notification(&notification)).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Subscriber lagged, skipping notifications");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Create error response
fn error_response(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}

/// Format a transfer notification for WebSocket
pub fn format_transfer_notification(notification: &TransferNotification) -> Value {
    let snapshot = notification.snapshot.clone();
    let reference = snapshot.id.to_string();
    json!({
        "jsonrpc": "2.0",
        "method": "transferNotification",
        "params": {
            "result": StatusResponse::new(&reference, snapshot),
            "subscription": notification.subscription_id
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{subscriptions::spawn_update_forwarder, testing};
    use futures::stream::SplitStream;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn next_json(stream: &mut SplitStream<Client>) -> Value {
        loop {
            if let Message::Text(text) = stream.next().await.unwrap().unwrap() {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_receives_current_state_and_updates() {
        let ctx = testing::context();
        let manager = Arc::new(SubscriptionManager::new());
        let forwarder = spawn_update_forwarder(&ctx.engine, manager.clone());

        let (request, quote) = ctx.optimizer.select(&testing::route("100"), None).unwrap();
        let submission = ctx.engine.submit(request, &quote, None).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(WebSocketServer::new(ctx.clone(), manager.clone()).serve(listener));

        let (client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut sink, mut stream) = client.split();

        let subscribe = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "transferSubscribe",
            "params": [submission.id.as_str()]
        });
        sink.send(Message::Text(subscribe.to_string())).await.unwrap();

        let response = next_json(&mut stream).await;
        let sub_id = response["result"].as_u64().unwrap();
        let initial = next_json(&mut stream).await;
        assert_eq!(initial["method"], "transferNotification");
        assert_eq!(initial["params"]["subscription"], sub_id);
        assert_eq!(initial["params"]["result"]["status"], "created");

        ctx.engine.cancel(&submission.id).unwrap();
        let update = next_json(&mut stream).await;
        assert_eq!(update["params"]["result"]["status"], "failed");
        assert_eq!(update["params"]["result"]["error"]["kind"], "Cancelled");

        let unsubscribe = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "transferUnsubscribe",
            "params": [sub_id]
        });
        sink.send(Message::Text(unsubscribe.to_string())).await.unwrap();
        assert_eq!(next_json(&mut stream).await["result"], true);
        assert_eq!(manager.subscription_count(), 0);

        forwarder.abort();
    }

    #[tokio::test]
    async fn test_rejects_unknown_transfer_and_method() {
        let ctx = testing::context();
        let manager = Arc::new(SubscriptionManager::new());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(WebSocketServer::new(ctx, manager.clone()).serve(listener));

        let (client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut sink, mut stream) = client.split();

        let subscribe = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "transferSubscribe",
            "params": ["xfer_missing"]
        });
        sink.send(Message::Text(subscribe.to_string())).await.unwrap();
        let response = next_json(&mut stream).await;
        assert_eq!(response["error"]["code"], -32602);
        assert_eq!(manager.subscription_count(), 0);

        let unknown = json!({ "jsonrpc": "2.0", "id": 2, "method": "accountSubscribe" });
        sink.send(Message::Text(unknown.to_string())).await.unwrap();
        assert_eq!(next_json(&mut stream).await["error"]["code"], -32601);
    }
}
