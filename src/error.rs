use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type AppResult<T> = std::result::Result<T, AppError>;

/// Malformed creation input. Always reported before the store is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("content is required and must be a non-empty string")]
    EmptyContent,
    #[error("ttl_seconds must be an integer >= 1")]
    InvalidTtl,
    #[error("max_views must be an integer >= 1")]
    InvalidMaxViews,
    #[error("{field} has the wrong type")]
    WrongType { field: &'static str },
    #[error("request body must be a JSON object")]
    InvalidBody,
    #[error("x-test-now-ms must be milliseconds since the epoch")]
    InvalidClock,
}

impl ValidationError {
    /// Name of the input the error refers to.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::EmptyContent => "content",
            ValidationError::InvalidTtl => "ttl_seconds",
            ValidationError::InvalidMaxViews => "max_views",
            ValidationError::WrongType { field } => field,
            ValidationError::InvalidBody => "body",
            ValidationError::InvalidClock => "x-test-now-ms",
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("paste not found or unavailable")]
    Unavailable,
    #[error("database error")]
    Database {
        #[from]
        source: sqlx::Error,
    },
    #[error("IO error")]
    IO {
        #[from]
        source: std::io::Error,
    },
    #[error("malformed stored record")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unavailable => StatusCode::NOT_FOUND,
            AppError::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::IO { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        let body = match &self {
            AppError::Validation(err) => json!({ "error": err.to_string(), "field": err.field() }),
            AppError::Unavailable => json!({ "error": self.to_string() }),
            _ => {
                error!("request failed: {self:?}");
                json!({ "error": "internal server error" })
            }
        };

        (status_code, Json(body)).into_response()
    }
}
