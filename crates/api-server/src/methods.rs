//! API Methods - request handlers behind the HTTP routes
//!
//! Handlers are plain functions over [`ApiContext`]; the HTTP layer only
//! extracts requests and maps [`ApiError`] to status codes.

use axum::http::StatusCode;
use bridge_types::{
    Amount, BridgeError, BridgeMethod, ErrorKind, FailureCause, LiquidityTier, RouteQuote, Score,
    StateTransition, TransferId, TransferSnapshot, TransferState,
};
use chrono::{DateTime, Utc};
use router_core::{EngineError, ExecutionEngine, RouteOptimizer, RouteRequest};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};

/// Context shared across handlers
pub struct ApiContext {
    pub optimizer: Arc<RouteOptimizer>,
    pub engine: ExecutionEngine,
    /// Source chain for execute requests that name none
    pub default_source_chain: String,
    pub started_at: Instant,
}

impl ApiContext {
    pub fn new(
        optimizer: Arc<RouteOptimizer>,
        engine: ExecutionEngine,
        default_source_chain: impl Into<String>,
    ) -> Self {
        Self {
            optimizer,
            engine,
            default_source_chain: default_source_chain.into(),
            started_at: Instant::now(),
        }
    }
}

// ============ Request/Response Types ============

/// Amount as sent by clients: a decimal string or a JSON number
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    fn to_decimal(&self) -> String {
        match self {
            AmountInput::Text(s) => s.trim().to_string(),
            AmountInput::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    pub source_wallet: String,
    pub token: String,
    pub amount: AmountInput,
    pub destination_wallet: String,
    pub source_chain: String,
    #[serde(default)]
    pub destination_chain: Option<String>,
}

/// Route as chosen by the caller, usually echoed from an optimize response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSelection {
    pub method: String,
    #[serde(default)]
    pub destination_chain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub source_wallet: String,
    pub token: String,
    pub amount: AmountInput,
    pub destination_wallet: String,
    pub route: RouteSelection,
    #[serde(default)]
    pub source_chain: Option<String>,
    #[serde(default)]
    pub destination_chain: Option<String>,
    /// Resubmitting with the reference of an active transfer returns it
    #[serde(default)]
    pub client_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteView {
    pub method: BridgeMethod,
    /// Destination display name
    pub destination_chain: String,
    pub destination_chain_key: String,
    /// Fee with four decimals and the token symbol, e.g. "1.0000 USDC"
    pub estimated_fee: String,
    pub estimated_time: String,
    pub total_cost: Amount,
    pub liquidity: LiquidityTier,
    pub score: Score,
}

impl From<&RouteQuote> for RouteView {
    fn from(quote: &RouteQuote) -> Self {
        Self {
            method: quote.method,
            destination_chain: quote.destination_chain_name.clone(),
            destination_chain_key: quote.destination_chain.clone(),
            estimated_fee: format!("{} {}", quote.estimated_fee.to_fixed(4), quote.token),
            estimated_time: quote.estimated_duration.to_string(),
            total_cost: quote.estimated_fee,
            liquidity: quote.liquidity_tier,
            score: quote.score,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    pub success: bool,
    #[serde(flatten)]
    pub route: RouteView,
    pub alternatives: Vec<RouteView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    /// Reference accepted by the status query
    pub tx_hash: String,
    pub transfer_id: TransferId,
    pub method: BridgeMethod,
    /// Unix milliseconds
    pub estimated_completion: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorView {
    pub kind: ErrorKind,
    pub stage: TransferState,
    pub chain: Option<String>,
    pub tx_ref: Option<String>,
    pub message: String,
    pub hint: &'static str,
}

impl From<&FailureCause> for ErrorView {
    fn from(cause: &FailureCause) -> Self {
        Self {
            kind: cause.kind,
            stage: cause.stage,
            chain: cause.chain.clone(),
            tx_ref: cause.tx_ref.clone(),
            message: cause.message.clone(),
            hint: cause.hint(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// The reference the caller looked up
    pub tx_hash: String,
    pub transfer_id: TransferId,
    pub status: TransferState,
    pub confirmations: u64,
    /// Unix milliseconds of the last state change
    pub timestamp: i64,
    pub method: BridgeMethod,
    pub source_chain: String,
    pub destination_chain: String,
    pub token: String,
    pub amount: Amount,
    pub source_tx_ref: Option<String>,
    pub bridge_message_ref: Option<String>,
    pub attestation_ref: Option<String>,
    pub destination_tx_ref: Option<String>,
    pub history: Vec<StateTransition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorView>,
}

impl StatusResponse {
    pub fn new(reference: &str, snapshot: TransferSnapshot) -> Self {
        Self {
            tx_hash: reference.to_string(),
            transfer_id: snapshot.id,
            status: snapshot.state,
            confirmations: snapshot.confirmations,
            timestamp: snapshot.updated_at.timestamp_millis(),
            method: snapshot.method,
            source_chain: snapshot.request.source_chain,
            destination_chain: snapshot.request.destination_chain,
            token: snapshot.request.token,
            amount: snapshot.request.amount,
            source_tx_ref: snapshot.source_tx_ref,
            bridge_message_ref: snapshot.bridge_message_ref,
            attestation_ref: snapshot.attestation_ref,
            destination_tx_ref: snapshot.destination_tx_ref,
            history: snapshot.history,
            error: snapshot.last_error.as_ref().map(ErrorView::from),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityResponse {
    pub chain: String,
    pub token: String,
    pub liquidity: Amount,
    pub utilization_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the server started
    pub uptime: f64,
}

// ============ Handlers ============

pub fn handle_optimize(ctx: &ApiContext, params: OptimizeRequest) -> Result<OptimizeResponse, ApiError> {
    let request = RouteRequest {
        source_chain: params.source_chain,
        destination_chain: params.destination_chain,
        token: params.token,
        amount: params.amount.to_decimal(),
        from_address: params.source_wallet,
        to_address: params.destination_wallet,
    };
    let ranked = ctx.optimizer.optimize(&request)?;

    Ok(OptimizeResponse {
        success: true,
        route: RouteView::from(&ranked.chosen),
        alternatives: ranked.alternatives.iter().map(RouteView::from).collect(),
    })
}

/// Validate, re-quote for the chosen method and start the transfer
pub fn handle_execute(ctx: &ApiContext, params: ExecuteRequest) -> Result<ExecuteResponse, ApiError> {
    let method = BridgeMethod::parse(&params.route.method).ok_or_else(|| {
        ApiError::BadRequest(format!("Invalid transfer method: {}", params.route.method))
    })?;

    let request = RouteRequest {
        source_chain: params
            .source_chain
            .unwrap_or_else(|| ctx.default_source_chain.clone()),
        destination_chain: params.destination_chain.or(params.route.destination_chain),
        token: params.token,
        amount: params.amount.to_decimal(),
        from_address: params.source_wallet,
        to_address: params.destination_wallet,
    };
    let (request, quote) = ctx.optimizer.select(&request, Some(method))?;
    let submission = ctx.engine.start(request, &quote, params.client_reference)?;

    let estimated_completion =
        Utc::now().timestamp_millis() + (quote.estimated_duration.max_secs as i64) * 1000;
    let message = if submission.created {
        format!("Transfer initiated via {}", method)
    } else {
        "Transfer already in progress".to_string()
    };

    Ok(ExecuteResponse {
        success: true,
        tx_hash: submission.id.to_string(),
        transfer_id: submission.id,
        method,
        estimated_completion,
        message,
    })
}

pub fn handle_status(ctx: &ApiContext, reference: &str) -> Result<StatusResponse, ApiError> {
    let snapshot = ctx.engine.status(reference)?;
    Ok(StatusResponse::new(reference, snapshot))
}

pub fn handle_cancel(ctx: &ApiContext, id: &str) -> Result<StatusResponse, ApiError> {
    let snapshot = ctx.engine.cancel(&TransferId::new(id))?;
    Ok(StatusResponse::new(id, snapshot))
}

pub fn handle_liquidity(ctx: &ApiContext, chain: &str, token: &str) -> Result<LiquidityResponse, ApiError> {
    let pool = ctx
        .optimizer
        .registry()
        .resolve(chain)
        .and_then(|config| ctx.optimizer.liquidity().get(&config.key, token))
        .ok_or_else(|| ApiError::NotFound("Chain or token not found".to_string()))?;

    Ok(LiquidityResponse {
        chain: chain.to_string(),
        token: token.to_string(),
        liquidity: pool.available,
        utilization_rate: pool.utilization_rate,
    })
}

pub fn handle_health(ctx: &ApiContext) -> HealthResponse {
    HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        uptime: ctx.started_at.elapsed().as_secs_f64(),
    }
}

// ============ Error Types ============

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) | ApiError::Engine(EngineError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Engine(EngineError::CancellationRefused { .. })
            | ApiError::Engine(EngineError::AlreadyStarted(_)) => StatusCode::CONFLICT,
            ApiError::Bridge(e) | ApiError::Engine(EngineError::Bridge(e)) => {
                if e.is_client_error() {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
        }
    }

    /// Error classification, for errors raised by the bridge itself
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ApiError::Bridge(e) | ApiError::Engine(EngineError::Bridge(e)) => Some(e.kind()),
            _ => None,
        }
    }
}
