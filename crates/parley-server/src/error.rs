use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_core::{ChatError, ErrorKind};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::Chat(e) => match e.kind() {
                ErrorKind::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                ErrorKind::PermissionDenied => (StatusCode::FORBIDDEN, "permission_denied"),
                ErrorKind::BlockedRelationship => {
                    (StatusCode::FORBIDDEN, "blocked_relationship")
                }
                ErrorKind::InvalidState => (StatusCode::CONFLICT, "invalid_state"),
                ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = serde_json::json!({
            "error": message,
            "kind": kind,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ChatError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (ChatError::NotFound("Message"), StatusCode::NOT_FOUND),
            (ChatError::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
            (ChatError::Blocked("x".into()), StatusCode::FORBIDDEN),
            (ChatError::InvalidState("x".into()), StatusCode::CONFLICT),
            (ChatError::Poisoned, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).into_response().status(), status);
        }
    }
}
