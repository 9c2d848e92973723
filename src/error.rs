use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::repo::StoreError;

/// Every client-facing failure of the auth subsystem.
///
/// Messages are stable and safe to show. `Internal` carries the cause for
/// logging only; the response body never includes it.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Access token required")]
    MissingCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Token has been invalidated")]
    Revoked,
    #[error("User account is deactivated")]
    Deactivated,
    #[error("Supplier account pending approval")]
    PendingApproval,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("{0}")]
    RateLimited(&'static str),
    #[error("Invalid email or password")]
    CredentialMismatch,
    #[error("{0}")]
    Validation(String),
    #[error("User already exists with this email")]
    EmailTaken,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials | AuthError::CredentialMismatch => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::InvalidToken
            | AuthError::Revoked
            | AuthError::Deactivated
            | AuthError::PendingApproval
            | AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::EmailTaken => AuthError::EmailTaken,
            other => AuthError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AuthError::Internal(e) => {
                error!(error = %format!("{e:#}"), "internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(AuthError::MissingCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::CredentialMismatch.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidToken.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::Revoked.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::Deactivated.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::PendingApproval.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::RateLimited("slow down").status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_detail() {
        let resp = AuthError::Internal(anyhow::anyhow!("connection refused to 10.0.0.5")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn client_errors_carry_message_body() {
        let body = body_json(AuthError::PendingApproval.into_response()).await;
        assert_eq!(body, json!({ "message": "Supplier account pending approval" }));
    }

    #[test]
    fn store_email_conflict_maps_to_conflict() {
        let err: AuthError = StoreError::EmailTaken.into();
        assert!(matches!(err, AuthError::EmailTaken));
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
