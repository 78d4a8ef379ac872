use axum::{
    Json,
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use process::ProcessError;
use serde_json::json;
use thiserror::Error;

const IMPORT_MESSAGE: &str = "Ha ocurrido un error. Por favor, inténtalo de nuevo más tarde";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("No tienes acceso")]
    Unauthorized,

    #[error("Por favor, especifica {0}")]
    MissingField(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    JsonBody(#[from] JsonRejection),

    #[error("La zona sanitaria que has especificado no existe")]
    ZoneNotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid {key} value: {reason}")]
    Config { key: &'static str, reason: String },

    #[error("Feed has no rows")]
    EmptyFeed,

    #[error("Import failed: {0}")]
    Import(#[from] ProcessError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Upload failed: {0}")]
    Upload(#[from] MultipartError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt document: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Persistence(String),
}

impl AppError {
    fn is_import_failure(&self) -> bool {
        matches!(
            self,
            AppError::EmptyFeed | AppError::Import(_) | AppError::Fetch(_) | AppError::Io(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Unauthorized
            | AppError::BadRequest(_)
            | AppError::JsonBody(_)
            | AppError::Upload(_) => StatusCode::BAD_REQUEST,
            AppError::ZoneNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            // Clients of the original API expect 500 for a missing zone code.
            AppError::MissingField(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = if self.is_import_failure() {
            json!({ "err": IMPORT_MESSAGE, "detail": self.to_string() })
        } else {
            json!({ "err": self.to_string() })
        };

        (status, Json(body)).into_response()
    }
}
