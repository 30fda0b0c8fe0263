use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a workbench failure should be reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbenchBehavior {
    /// Beckn-style NACK over HTTP 200.
    Nack,
    /// NACK with the HTTP status carried in the error code.
    Http,
}

/// Single failing JSON path from schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaErrorItem {
    pub paths: String,
    pub message: String,
}

/// Typed failure taxonomy for the request pipeline.
///
/// Steps wrap underlying plugin failures into one of these kinds; the
/// response encoder maps each kind to exactly one HTTP status and Beckn
/// error code. Anything else is treated as an internal server error with a
/// redacted message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("signature validation failed: {0}")]
    SignValidation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("schema validation failed")]
    SchemaValidation(Vec<SchemaErrorItem>),

    #[error("workbench failure: {message}")]
    Workbench {
        behavior: WorkbenchBehavior,
        code: String,
        message: String,
        context: Option<serde_json::Value>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    pub fn bad_request(cause: impl std::fmt::Display) -> Self {
        Self::BadRequest(cause.to_string())
    }

    pub fn sign_validation(cause: impl std::fmt::Display) -> Self {
        Self::SignValidation(cause.to_string())
    }

    pub fn not_found(cause: impl std::fmt::Display) -> Self {
        Self::NotFound(cause.to_string())
    }

    pub fn internal(cause: impl std::fmt::Display) -> Self {
        Self::Internal(cause.to_string())
    }
}
