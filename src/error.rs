use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::projects::models::ProjectStatus;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Purchase error: {0}")]
    Purchase(#[from] PurchaseError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid signature for wallet {0}")]
    InvalidSignature(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// State-graph violations
#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ProjectStatus,
        to: ProjectStatus,
    },
}

/// Purchase-settlement errors
#[derive(Error, Debug)]
pub enum PurchaseError {
    #[error("Operation {0} not found on chain after retries")]
    OperationNotFound(String),

    #[error("Operation source wallet {onchain} does not belong to patron {patron}")]
    WalletMismatch { patron: String, onchain: String },

    #[error("Purchase of {requested} shares exceeds cap: {available} remaining")]
    MaxSharesExceeded { requested: i64, available: i64 },

    #[error("Project is not open for purchases (status: {0})")]
    ProjectNotOpen(ProjectStatus),
}

/// Batch-settlement errors
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Ledger rejected submission: {0}")]
    SubmissionFailed(String),

    #[error("Ledger submission timed out, outcome unknown")]
    SubmissionTimeout,

    #[error("Settlement incomplete: {confirmed}/{total} chunks confirmed")]
    Incomplete { confirmed: usize, total: usize },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::Transition(TransitionError::InvalidTransition { from, to }) => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                self.to_string(),
                Some(serde_json::json!({ "from": from, "to": to })),
            ),
            AppError::Purchase(PurchaseError::OperationNotFound(ophash)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "OPERATION_NOT_FOUND",
                self.to_string(),
                Some(serde_json::json!({ "ophash": ophash })),
            ),
            AppError::Purchase(PurchaseError::WalletMismatch { patron, onchain }) => (
                StatusCode::FORBIDDEN,
                "WALLET_MISMATCH",
                self.to_string(),
                Some(serde_json::json!({ "patron": patron, "onchain": onchain })),
            ),
            AppError::Purchase(PurchaseError::MaxSharesExceeded {
                requested,
                available,
            }) => (
                StatusCode::CONFLICT,
                "MAX_SHARES_EXCEEDED",
                self.to_string(),
                Some(serde_json::json!({ "requested": requested, "available": available })),
            ),
            AppError::Purchase(PurchaseError::ProjectNotOpen(current)) => (
                StatusCode::CONFLICT,
                "PROJECT_NOT_OPEN",
                self.to_string(),
                Some(serde_json::json!({ "status": current })),
            ),
            AppError::Settlement(SettlementError::Incomplete { confirmed, total }) => (
                StatusCode::BAD_GATEWAY,
                "SETTLEMENT_INCOMPLETE",
                self.to_string(),
                Some(serde_json::json!({ "confirmed": confirmed, "total": total })),
            ),
            AppError::Settlement(SettlementError::SubmissionTimeout) => (
                StatusCode::GATEWAY_TIMEOUT,
                "SETTLEMENT_TIMEOUT",
                self.to_string(),
                None,
            ),
            AppError::Settlement(SettlementError::SubmissionFailed(_)) => {
                (StatusCode::BAD_GATEWAY, "SETTLEMENT_FAILED", self.to_string(), None)
            }
            AppError::Ledger(_) => (StatusCode::BAD_GATEWAY, "LEDGER_ERROR", self.to_string(), None),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone(), None)
            }
            AppError::InvalidSignature(_) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_SIGNATURE",
                self.to_string(),
                None,
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone(), None),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
