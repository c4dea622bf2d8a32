use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Duplicate binding: {0}/{1}")]
    DuplicateBinding(String, String),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("No idle backup key available")]
    NoBackupAvailable,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code included in every error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::DuplicateId(_) => "duplicate_id",
            AppError::DuplicateBinding(_, _) => "duplicate_binding",
            AppError::Unauthenticated => "unauthenticated",
            AppError::NoBackupAvailable => "no_backup_available",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) | AppError::Sqlx(_) | AppError::Anyhow(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::DuplicateId(id) => {
                (StatusCode::CONFLICT, format!("Id already exists: {id}"))
            }
            AppError::DuplicateBinding(proxy_id, key_id) => (
                StatusCode::CONFLICT,
                format!("Binding already exists: {proxy_id}/{key_id}"),
            ),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthenticated".to_string()),
            AppError::NoBackupAvailable => (
                StatusCode::CONFLICT,
                "No idle backup key available".to_string(),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Sqlx(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Anyhow(e) => {
                tracing::error!("Error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": { "code": self.code(), "message": message } }));
        (status, body).into_response()
    }
}
