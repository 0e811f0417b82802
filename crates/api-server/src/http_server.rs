//! HTTP API Server
//!
//! REST endpoints for route optimization, transfer execution and status.

use crate::methods::{
    handle_cancel, handle_execute, handle_health, handle_liquidity, handle_optimize,
    handle_status, ApiContext, ApiError, ExecuteRequest, ExecuteResponse, HealthResponse,
    LiquidityResponse, OptimizeRequest, OptimizeResponse, StatusResponse,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// HTTP API Server
pub struct HttpApiServer {
    context: Arc<ApiContext>,
}

impl HttpApiServer {
    pub fn new(context: Arc<ApiContext>) -> Self {
        Self { context }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        // CORS layer to allow browser clients
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/api/route/optimize", post(optimize))
            .route("/api/transfer/execute", post(execute))
            .route("/api/transfer/status/:reference", get(status))
            .route("/api/transfer/:id/cancel", post(cancel))
            .route("/api/liquidity/:chain/:token", get(liquidity))
            .route("/health", get(health))
            .layer(cors)
            .with_state(self.context)
    }

    /// Run the server
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP API server listening on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let kind = self.kind();
        let body = json!({
            "success": false,
            "error": self.to_string(),
            "kind": kind.map(|k| k.as_str()),
            "hint": kind.map(|k| k.hint()),
        });
        (status, Json(body)).into_response()
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

async fn optimize(
    State(ctx): State<Arc<ApiContext>>,
    payload: Result<Json<OptimizeRequest>, JsonRejection>,
) -> Result<Json<OptimizeResponse>, ApiError> {
    let params = json_body(payload)?;
    tracing::info!(
        source = %params.source_chain,
        token = %params.token,
        "Route optimization requested"
    );
    handle_optimize(&ctx, params).map(Json)
}

async fn execute(
    State(ctx): State<Arc<ApiContext>>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let params = json_body(payload)?;
    tracing::info!(
        method = %params.route.method,
        token = %params.token,
        "Transfer execution requested"
    );
    handle_execute(&ctx, params).map(Json)
}

async fn status(
    State(ctx): State<Arc<ApiContext>>,
    Path(reference): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    handle_status(&ctx, &reference).map(Json)
}

async fn cancel(
    State(ctx): State<Arc<ApiContext>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    tracing::info!(transfer_id = %id, "Cancellation requested");
    handle_cancel(&ctx, &id).map(Json)
}

async fn liquidity(
    State(ctx): State<Arc<ApiContext>>,
    Path((chain, token)): Path<(String, String)>,
) -> Result<Json<LiquidityResponse>, ApiError> {
    handle_liquidity(&ctx, &chain, &token).map(Json)
}

async fn health(State(ctx): State<Arc<ApiContext>>) -> Json<HealthResponse> {
    Json(handle_health(&ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use bridge_types::TransferState;
    use protocol_adapters::testing;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn optimize_body(amount: Value) -> Value {
        json!({
            "sourceWallet": testing::wallet().to_checksum(),
            "destinationWallet": testing::recipient().to_checksum(),
            "token": "USDC",
            "amount": amount,
            "sourceChain": "0xaa36a7",
        })
    }

    #[tokio::test]
    async fn test_optimize_ranks_burn_mint_first() {
        let ctx = context();
        let (status, body) = send(
            HttpApiServer::new(ctx).router(),
            post("/api/route/optimize", optimize_body(json!(1000))),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["method"], "CCTP");
        assert_eq!(body["estimatedFee"], "1.0000 USDC");
        assert_eq!(body["estimatedTime"], "5-10 minutes");
        assert_eq!(body["destinationChainKey"], "arc");
        assert_eq!(body["liquidity"], "High");
        assert_eq!(body["score"], 99.0);
        assert_eq!(body["alternatives"][0]["method"], "Bridge Kit");
        assert_eq!(body["alternatives"][0]["estimatedFee"], "2.0000 USDC");
    }

    #[tokio::test]
    async fn test_optimize_accepts_string_amount() {
        let (status, body) = send(
            HttpApiServer::new(context()).router(),
            post("/api/route/optimize", optimize_body(json!("250.5"))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalCost"], "0.2505");
    }

    #[tokio::test]
    async fn test_optimize_rejects_bad_input() {
        let mut malformed = optimize_body(json!(100));
        malformed["destinationWallet"] = json!("0x1234");
        let (status, body) = send(
            HttpApiServer::new(context()).router(),
            post("/api/route/optimize", malformed),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["kind"], "InvalidRequest");
        assert_eq!(body["hint"], "fix request");

        let mut unknown_chain = optimize_body(json!(100));
        unknown_chain["sourceChain"] = json!("0x1");
        let (status, body) = send(
            HttpApiServer::new(context()).router(),
            post("/api/route/optimize", unknown_chain),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "UnsupportedChain");

        let (status, _) = send(
            HttpApiServer::new(context()).router(),
            post("/api/route/optimize", json!({ "token": "USDC" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_then_query_status() {
        let ctx = context();
        let mut updates = ctx.engine.subscribe();

        let mut body = optimize_body(json!("100"));
        body["route"] = json!({ "method": "CCTP", "destinationChain": "arc testnet" });
        let (status, response) = send(
            HttpApiServer::new(ctx.clone()).router(),
            post("/api/transfer/execute", body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["method"], "CCTP");
        assert_eq!(response["message"], "Transfer initiated via CCTP");
        let tx_hash = response["txHash"].as_str().unwrap().to_string();
        assert_eq!(response["transferId"], tx_hash.as_str());

        while updates.recv().await.unwrap().state != TransferState::Completed {}

        let (status, body) = send(
            HttpApiServer::new(ctx.clone()).router(),
            get(&format!("/api/transfer/status/{}", tx_hash)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["txHash"], tx_hash.as_str());
        assert!(body["sourceTxRef"].is_string());
        assert!(body["destinationTxRef"].is_string());
        assert!(body.get("error").is_none());
        assert_eq!(body["history"].as_array().unwrap().len(), 6);

        let (status, body) = send(
            HttpApiServer::new(ctx).router(),
            post(&format!("/api/transfer/{}/cancel", tx_hash), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_execute_rejects_unknown_method() {
        let mut body = optimize_body(json!("100"));
        body["route"] = json!({ "method": "Teleport" });
        let (status, body) = send(
            HttpApiServer::new(context()).router(),
            post("/api/transfer/execute", body),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid transfer method: Teleport");
    }

    #[tokio::test]
    async fn test_status_of_unknown_transfer() {
        let (status, body) = send(
            HttpApiServer::new(context()).router(),
            get("/api/transfer/status/0xnothing"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_liquidity_lookup() {
        let (status, body) = send(
            HttpApiServer::new(context()).router(),
            get("/api/liquidity/arc/USDC"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chain"], "arc");
        assert_eq!(body["liquidity"], "300000");
        assert_eq!(body["utilizationRate"], 0.5);

        let (status, _) = send(
            HttpApiServer::new(context()).router(),
            get("/api/liquidity/polygon/USDC"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(HttpApiServer::new(context()).router(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["uptime"].is_number());
    }
}
