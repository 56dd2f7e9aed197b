//! HTTP API for the faucet
//!
//! Every mutating call names the account it acts for (`caller`, or `from`
//! for `fund`) and carries that account's signature over
//! [`call_message`](crate::auth::call_message) of the call's arguments and
//! its `issued_at` time. Calls signed by anyone else are rejected with 403.

use super::auth::{call_message, Authenticator};
use super::error::{FaucetError, FaucetResult};
use super::service::{FaucetService, FaucetStatus, Receipt, RequesterView};
use crate::database::DistributionRecord;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use spigot_common::utils::converter::parse_ether;
use spigot_common::Address;
use std::num::NonZeroU32;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<FaucetService>,
    limiter: Arc<DefaultDirectRateLimiter>,
    auth: Arc<Authenticator>,
}

impl ApiState {
    /// `requests_per_second` is a global quota across all callers; 0 is
    /// treated as 1. Signed calls are valid `signature_max_age_secs` either
    /// side of their `issued_at`.
    pub fn new(
        service: Arc<FaucetService>,
        requests_per_second: u32,
        signature_max_age_secs: u64,
    ) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            service,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            auth: Arc::new(Authenticator::new(signature_max_age_secs)),
        }
    }

    fn throttle(&self) -> FaucetResult<()> {
        self.limiter.check().map_err(|_| FaucetError::Throttled)
    }

    /// Resolve `claimed` and check it signed `action` with `args`
    fn authenticate(
        &self,
        action: &str,
        claimed: &str,
        args: &[String],
        signed: &CallSignature,
    ) -> FaucetResult<Address> {
        let caller = parse_address(claimed)?;
        let mut fields = vec![caller.to_string()];
        fields.extend_from_slice(args);

        let message = call_message(action, &fields, signed.issued_at);
        self.auth.verify(
            &caller,
            &message,
            signed.issued_at,
            &signed.signature,
            self.service.now(),
        )?;
        Ok(caller)
    }
}

/// Build the router
pub fn router(state: ApiState, cors_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/status", get(status_handler))
        .route("/api/requesters/:address", get(requester_handler))
        .route("/api/requesters/:address/history", get(history_handler))
        .route("/api/distributions", get(recent_distributions_handler))
        .route("/api/request", post(request_funds_handler))
        .route("/api/fund", post(fund_handler))
        .route("/api/admin/rate-limits", post(set_rate_limits_handler))
        .route("/api/admin/retrieve", post(retrieve_funds_handler))
        .route("/api/admin/pause", post(pause_handler))
        .route("/api/admin/unpause", post(unpause_handler))
        .route("/api/admin/transfer-ownership", post(transfer_ownership_handler))
        .route("/api/admin/accept-ownership", post(accept_ownership_handler))
        .with_state(state);

    if cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        app = app.layer(cors);
        info!("CORS enabled");
    }

    app
}

/// Signature fields shared by every mutating call
#[derive(Debug, Deserialize)]
pub struct CallSignature {
    /// Unix seconds at signing time
    pub issued_at: u64,
    /// `0x`-prefixed hex `r || s || v`
    pub signature: String,
}

/// Body of calls that only need a caller
#[derive(Debug, Deserialize)]
pub struct CallerRequest {
    pub caller: String,
    #[serde(flatten)]
    pub signed: CallSignature,
}

#[derive(Debug, Deserialize)]
pub struct FundRequest {
    pub from: String,
    /// Ether units, e.g. "1.0"
    pub amount: String,
    #[serde(flatten)]
    pub signed: CallSignature,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitsRequest {
    pub caller: String,
    pub max_tx_per_hour: u32,
    pub time_limit_secs: u64,
    #[serde(flatten)]
    pub signed: CallSignature,
}

#[derive(Debug, Deserialize)]
pub struct TransferOwnershipRequest {
    pub caller: String,
    pub candidate: String,
    #[serde(flatten)]
    pub signed: CallSignature,
}

/// Success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub data: T,
    pub timestamp: String,
}

impl<T> SuccessResponse<T> {
    fn new(data: T) -> Json<Self> {
        Json(Self {
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }
}

type ApiResult<T> = FaucetResult<Json<SuccessResponse<T>>>;

fn parse_address(value: &str) -> FaucetResult<Address> {
    value
        .parse()
        .map_err(|e| FaucetError::InvalidAddress(format!("{}: {}", value, e)))
}

/// Dispense handler
pub async fn request_funds_handler(
    State(state): State<ApiState>,
    Json(request): Json<CallerRequest>,
) -> ApiResult<Receipt> {
    state.throttle()?;
    let caller = state.authenticate("request_funds", &request.caller, &[], &request.signed)?;
    let receipt = state.service.request_funds(caller).await?;
    Ok(SuccessResponse::new(receipt))
}

pub async fn fund_handler(
    State(state): State<ApiState>,
    Json(request): Json<FundRequest>,
) -> ApiResult<Receipt> {
    state.throttle()?;
    let amount = parse_ether(&request.amount)
        .map_err(|e| FaucetError::InvalidAmount(format!("{}: {:#}", request.amount, e)))?;
    let from = state.authenticate("fund", &request.from, &[amount.to_string()], &request.signed)?;
    let receipt = state.service.fund(from, amount).await?;
    Ok(SuccessResponse::new(receipt))
}

pub async fn set_rate_limits_handler(
    State(state): State<ApiState>,
    Json(request): Json<RateLimitsRequest>,
) -> ApiResult<Receipt> {
    state.throttle()?;
    let caller = state.authenticate(
        "set_rate_limits",
        &request.caller,
        &[
            request.max_tx_per_hour.to_string(),
            request.time_limit_secs.to_string(),
        ],
        &request.signed,
    )?;
    let receipt = state
        .service
        .set_rate_limits(caller, request.max_tx_per_hour, request.time_limit_secs)
        .await?;
    Ok(SuccessResponse::new(receipt))
}

pub async fn retrieve_funds_handler(
    State(state): State<ApiState>,
    Json(request): Json<CallerRequest>,
) -> ApiResult<Receipt> {
    state.throttle()?;
    let caller = state.authenticate("retrieve_funds", &request.caller, &[], &request.signed)?;
    let receipt = state.service.retrieve_funds(caller).await?;
    Ok(SuccessResponse::new(receipt))
}

pub async fn pause_handler(
    State(state): State<ApiState>,
    Json(request): Json<CallerRequest>,
) -> ApiResult<Receipt> {
    state.throttle()?;
    let caller = state.authenticate("pause", &request.caller, &[], &request.signed)?;
    let receipt = state.service.pause(caller).await?;
    Ok(SuccessResponse::new(receipt))
}

pub async fn unpause_handler(
    State(state): State<ApiState>,
    Json(request): Json<CallerRequest>,
) -> ApiResult<Receipt> {
    state.throttle()?;
    let caller = state.authenticate("unpause", &request.caller, &[], &request.signed)?;
    let receipt = state.service.unpause(caller).await?;
    Ok(SuccessResponse::new(receipt))
}

pub async fn transfer_ownership_handler(
    State(state): State<ApiState>,
    Json(request): Json<TransferOwnershipRequest>,
) -> ApiResult<Receipt> {
    state.throttle()?;
    let candidate = parse_address(&request.candidate)?;
    let caller = state.authenticate(
        "transfer_ownership",
        &request.caller,
        &[candidate.to_string()],
        &request.signed,
    )?;
    let receipt = state.service.transfer_ownership(caller, candidate).await?;
    Ok(SuccessResponse::new(receipt))
}

pub async fn accept_ownership_handler(
    State(state): State<ApiState>,
    Json(request): Json<CallerRequest>,
) -> ApiResult<Receipt> {
    state.throttle()?;
    let caller = state.authenticate("accept_ownership", &request.caller, &[], &request.signed)?;
    let receipt = state.service.accept_ownership(caller).await?;
    Ok(SuccessResponse::new(receipt))
}

/// Status handler
pub async fn status_handler(State(state): State<ApiState>) -> ApiResult<FaucetStatus> {
    let status = state.service.status().await?;
    Ok(SuccessResponse::new(status))
}

pub async fn requester_handler(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<RequesterView> {
    let address = parse_address(&address)?;
    Ok(SuccessResponse::new(state.service.requester(address).await))
}

pub async fn history_handler(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<Vec<DistributionRecord>> {
    let address = parse_address(&address)?;
    Ok(SuccessResponse::new(state.service.history(&address)?))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    20
}

pub async fn recent_distributions_handler(
    State(state): State<ApiState>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Vec<DistributionRecord>> {
    let limit = query.limit.min(1000);
    Ok(SuccessResponse::new(state.service.recent_distributions(limit)?))
}

/// Prometheus metrics
pub async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let Some(metrics) = state.service.metrics() else {
        return (StatusCode::NOT_FOUND, "metrics disabled".to_string()).into_response();
    };

    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => FaucetError::Internal(e.to_string()).into_response(),
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Root handler with info
pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Spigot Faucet",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Rate-limited native currency faucet",
        "endpoints": {
            "POST /api/request": "Request funds",
            "POST /api/fund": "Send funds to the faucet",
            "POST /api/admin/rate-limits": "Change rate limits (owner)",
            "POST /api/admin/retrieve": "Withdraw the balance (owner)",
            "POST /api/admin/pause": "Pause dispensing (owner)",
            "POST /api/admin/unpause": "Resume dispensing (owner)",
            "POST /api/admin/transfer-ownership": "Nominate a new owner (owner)",
            "POST /api/admin/accept-ownership": "Accept a nomination (pending owner)",
            "GET /api/status": "Get faucet status",
            "GET /api/requesters/:address": "Get requester allowance",
            "GET /api/requesters/:address/history": "Get dispense history",
            "GET /api/distributions?limit=N": "Get latest dispenses",
            "GET /health": "Health check",
            "GET /metrics": "Prometheus metrics"
        }
    }))
}
