//! Error types for the faucet

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Faucet errors.
///
/// Every rejection produced by the state machine leaves the faucet untouched;
/// the display string is the reason surfaced to callers.
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("Pausable: paused")]
    Paused,

    #[error("Pausable: not paused")]
    NotPaused,

    /// `pause` on a paused faucet. Same reason as [`FaucetError::Paused`],
    /// but it is the owner's mistake, not an outage.
    #[error("Pausable: paused")]
    AlreadyPaused,

    #[error("Faucet: Insufficient contract balance")]
    InsufficientBalance,

    #[error("Faucet: Request too soon")]
    TooSoon { retry_after: u64 },

    #[error("Faucet: Max transactions per hour exceeded")]
    RateLimitExceeded { retry_after: u64 },

    #[error("{0}")]
    InvalidParameter(String),

    #[error("Ownable: caller is not the owner")]
    NotOwner,

    #[error("Ownable2Step: caller is not the new owner")]
    NotPendingOwner,

    #[error("Faucet has not been deployed")]
    NotDeployed,

    #[error("Faucet is already deployed")]
    AlreadyDeployed,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Too many requests, slow down")]
    Throttled,

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FaucetError {
    /// Stable machine-readable code, also used as the metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            FaucetError::Paused => "PAUSED",
            FaucetError::NotPaused => "NOT_PAUSED",
            FaucetError::AlreadyPaused => "ALREADY_PAUSED",
            FaucetError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            FaucetError::TooSoon { .. } => "TOO_SOON",
            FaucetError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            FaucetError::InvalidParameter(_) => "INVALID_PARAMETER",
            FaucetError::NotOwner => "NOT_OWNER",
            FaucetError::NotPendingOwner => "NOT_PENDING_OWNER",
            FaucetError::NotDeployed => "NOT_DEPLOYED",
            FaucetError::AlreadyDeployed => "ALREADY_DEPLOYED",
            FaucetError::InvalidAddress(_) => "INVALID_ADDRESS",
            FaucetError::InvalidAmount(_) => "INVALID_AMOUNT",
            FaucetError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            FaucetError::Unauthorized(_) => "UNAUTHORIZED",
            FaucetError::Throttled => "THROTTLED",
            FaucetError::Ledger(_) => "LEDGER_ERROR",
            FaucetError::Database(_) => "DATABASE_ERROR",
            FaucetError::Config(_) => "CONFIG_ERROR",
            FaucetError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used when the error crosses the API boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FaucetError::Paused | FaucetError::InsufficientBalance | FaucetError::NotDeployed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FaucetError::TooSoon { .. }
            | FaucetError::RateLimitExceeded { .. }
            | FaucetError::Throttled => StatusCode::TOO_MANY_REQUESTS,
            FaucetError::NotOwner | FaucetError::NotPendingOwner | FaucetError::Unauthorized(_) => {
                StatusCode::FORBIDDEN
            }
            FaucetError::NotPaused
            | FaucetError::AlreadyPaused
            | FaucetError::InsufficientFunds(_)
            | FaucetError::InvalidParameter(_)
            | FaucetError::InvalidAddress(_)
            | FaucetError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            FaucetError::AlreadyDeployed => StatusCode::CONFLICT,
            FaucetError::Ledger(_) => StatusCode::BAD_GATEWAY,
            FaucetError::Database(_) | FaucetError::Config(_) | FaucetError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Seconds until the request could succeed, for rate-limit rejections.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            FaucetError::TooSoon { retry_after } | FaucetError::RateLimitExceeded { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        if let Some(seconds) = self.retry_after() {
            body["retry_after"] = json!(seconds);
        }

        (status, Json(body)).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
