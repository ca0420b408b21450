use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum::http::Uri;

use serde::Serialize;

pub async fn handler404(path: Uri) -> (StatusCode, Json<Error>) {
    (
        StatusCode::NOT_FOUND,
        Json(Error::NotFound {
            message: format!("Invalid path: {}", path),
        }),
    )
}

/// Result of a mutating operation, serialized into the `data` slot of the
/// response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Outcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error")]
pub enum Error {
    ConnectionError { message: String },
    NotFound { message: String },
    Conflict { message: String },
    UploadError { message: String },
    StoreError { message: String },
    InvalidPayload { message: String },
    Internal { kind: &'static str, message: String },
}

impl Error {
    pub fn connection<D: fmt::Display>(err: D) -> Error {
        Error::ConnectionError {
            message: err.to_string(),
        }
    }

    pub fn not_found<S: Into<String>>(message: S) -> Error {
        Error::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict<S: Into<String>>(message: S) -> Error {
        Error::Conflict {
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionError { message } => write!(f, "connection error: {}", message),
            Error::NotFound { message } => write!(f, "not found: {}", message),
            Error::Conflict { message } => write!(f, "conflict: {}", message),
            Error::UploadError { message } => write!(f, "upload error: {}", message),
            Error::StoreError { message } => write!(f, "store error: {}", message),
            Error::InvalidPayload { message } => write!(f, "invalid payload: {}", message),
            Error::Internal { kind, message } => write!(f, "{}: {}", kind, message),
        }
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        log::error!("store operation failed: {}", err);
        Self::StoreError {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Self {
        Self::UploadError {
            message: io.to_string(),
        }
    }
}

impl From<mongodb::bson::oid::Error> for Error {
    fn from(id: mongodb::bson::oid::Error) -> Self {
        Self::NotFound {
            message: format!("invalid record identifier: {}", id),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Internal {
            kind: "TokenError",
            message: err.to_string(),
        }
    }
}

impl From<pbkdf2::password_hash::Error> for Error {
    fn from(err: pbkdf2::password_hash::Error) -> Self {
        Self::Internal {
            kind: "HashError",
            message: err.to_string(),
        }
    }
}
