use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use buffett_identity_session::SignInError;
use buffett_paywall::{PaywallError, QuotaDecision, SubscriptionTier};
use buffett_valuation::ValuationError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not signed in")]
    Unauthorized,

    #[error("{0}")]
    SignIn(#[from] SignInError),

    #[error("{message}")]
    UpgradeRequired {
        message: String,
        required_tier: SubscriptionTier,
    },

    #[error("{message}")]
    QuotaExceeded {
        message: String,
        quota: QuotaDecision,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal(String),
}

impl From<PaywallError> for ApiError {
    fn from(error: PaywallError) -> Self {
        match error {
            PaywallError::UnknownFeature(_) | PaywallError::AccountNotFound(_) => {
                ApiError::NotFound(error.to_string())
            }
            PaywallError::UnknownTier(_) | PaywallError::InvalidEmail => {
                ApiError::BadRequest(error.to_string())
            }
            PaywallError::Store(detail) => ApiError::Internal(detail),
            PaywallError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ValuationError> for ApiError {
    fn from(error: ValuationError) -> Self {
        ApiError::BadRequest(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({ "error": self.to_string() })),
            ApiError::SignIn(e) => (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() })),
            ApiError::UpgradeRequired {
                message,
                required_tier,
            } => (
                StatusCode::FORBIDDEN,
                json!({ "error": message, "required_tier": required_tier }),
            ),
            ApiError::QuotaExceeded { message, quota } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": message, "quota": quota }),
            ),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, json!({ "error": message })),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::Internal(detail) => {
                error!("Request failed: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
