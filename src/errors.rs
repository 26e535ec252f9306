use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::OrderStatus;

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Stable machine-readable code the client can branch on
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    // Client-caused failures. Each one carries its own code so callers can
    // react to it specifically (e.g. re-sync the cart on a price mismatch).
    #[error("Cart is empty")]
    CartEmpty,

    #[error("Cart contains menus from more than one store")]
    MultiStoreCart,

    #[error("Submitted total {submitted} does not match computed total {expected}")]
    PriceMismatch { expected: i64, submitted: i64 },

    #[error("Cannot transition order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Menu {0} not found")]
    MenuNotFound(Uuid),

    #[error("Store {0} not found")]
    StoreNotFound(Uuid),

    #[error("Refund window closed for order {0}")]
    RefundWindowClosed(Uuid),

    #[error("Concurrent modification of order {0}")]
    ConcurrentModification(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Server-caused failures. None of these leak detail to the client.
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Order history is corrupted: {0}")]
    HistoryCorrupted(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<crate::cache::CacheError> for ServiceError {
    fn from(err: crate::cache::CacheError) -> Self {
        ServiceError::CacheError(err.to_string())
    }
}

impl From<crate::message_queue::MessageQueueError> for ServiceError {
    fn from(err: crate::message_queue::MessageQueueError) -> Self {
        ServiceError::QueueError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::OrderNotFound(_) | Self::MenuNotFound(_) | Self::StoreNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::CartEmpty
            | Self::MultiStoreCart
            | Self::PriceMismatch { .. }
            | Self::InvalidTransition { .. }
            | Self::RefundWindowClosed(_)
            | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::DatabaseError(_)
            | Self::HistoryCorrupted(_)
            | Self::CacheError(_)
            | Self::QueueError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code for the client. All integrity failures share one code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CartEmpty => "CART_EMPTY",
            Self::MultiStoreCart => "MULTI_STORE_CART",
            Self::PriceMismatch { .. } => "PRICE_MISMATCH",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::MenuNotFound(_) => "MENU_NOT_FOUND",
            Self::StoreNotFound(_) => "STORE_NOT_FOUND",
            Self::RefundWindowClosed(_) => "REFUND_WINDOW_CLOSED",
            Self::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::DatabaseError(_)
            | Self::HistoryCorrupted(_)
            | Self::CacheError(_)
            | Self::QueueError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// True for failures caused by server state rather than the request.
    pub fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return a generic message to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        if self.is_internal() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_internal() {
            tracing::error!(error = %self, "Request failed with internal error");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.error_code().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
