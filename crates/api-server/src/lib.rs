//! API Server - HTTP and WebSocket surface of the route bridge
//!
//! - HTTP: route optimization, transfer execution, status, cancellation,
//!   liquidity and health
//! - WebSocket: transferSubscribe, transferUnsubscribe

pub mod http_server;
pub mod methods;
pub mod subscriptions;
pub mod ws_server;

#[cfg(test)]
mod testing;

pub use http_server::HttpApiServer;
pub use methods::{ApiContext, ApiError};
pub use subscriptions::{spawn_update_forwarder, SubscriptionManager};
pub use ws_server::WebSocketServer;

/// API server configuration
#[derive(Clone, Debug)]
pub struct ApiServerConfig {
    /// HTTP bind address
    pub http_addr: String,
    /// WebSocket bind address
    pub ws_addr: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:3001".to_string(),
            ws_addr: "127.0.0.1:3002".to_string(),
        }
    }
}
