//! API error taxonomy and its HTTP mapping.
//!
//! Token failures stay distinguishable on the wire: expiry, bad signature,
//! and revocation each carry their own error code so clients can react
//! correctly (refresh vs. re-login vs. alarm).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::moderation::ModerationVerdict;

#[derive(Debug)]
pub enum ApiError {
    InvalidCredentials,
    AccountInactive,
    TokenExpired,
    TokenInvalidSignature,
    /// Token exists but has been redeemed or revoked. Replays land here.
    TokenRevoked,
    MissingToken,
    InsufficientRole,
    Validation(String),
    EmailTaken,
    NotFound(&'static str),
    /// The moderation verdict travels as the response body.
    ModerationBlocked(ModerationVerdict),
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidCredentials
            | ApiError::TokenExpired
            | ApiError::TokenInvalidSignature
            | ApiError::TokenRevoked
            | ApiError::MissingToken => StatusCode::UNAUTHORIZED,
            ApiError::AccountInactive | ApiError::InsufficientRole => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::EmailTaken => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ModerationBlocked(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::InvalidCredentials => "Invalid email or password".to_string(),
            ApiError::AccountInactive => "Account is inactive".to_string(),
            ApiError::TokenExpired => "Token has expired".to_string(),
            ApiError::TokenInvalidSignature => "Invalid token".to_string(),
            ApiError::TokenRevoked => "Token has been revoked".to_string(),
            ApiError::MissingToken => "Missing authorization token".to_string(),
            ApiError::InsufficientRole => "Insufficient permissions".to_string(),
            ApiError::Validation(msg) => msg.clone(),
            ApiError::EmailTaken => "Email is already registered".to_string(),
            ApiError::NotFound(what) => format!("{what} not found"),
            ApiError::ModerationBlocked(_) => "Review blocked by moderation".to_string(),
            ApiError::Internal => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            // Clients render the verdict directly, so it is the whole body.
            ApiError::ModerationBlocked(verdict) => (status, Json(verdict)).into_response(),
            other => (status, Json(json!({ "error": other.message() }))).into_response(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Internal error: {err:#}");
        ApiError::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_are_unauthorized() {
        assert_eq!(ApiError::TokenExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::TokenInvalidSignature.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::TokenRevoked.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::MissingToken.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_role_and_account_errors_are_forbidden() {
        assert_eq!(ApiError::InsufficientRole.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::AccountInactive.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_remaining_statuses() {
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::EmailTaken.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::NotFound("Teacher").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Internal.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
