//! Beckn ACK/NACK response encoding.
//!
//! ACK/NACK is the protocol's in-band acknowledgement inside the HTTP body,
//! distinct from HTTP-level success: schema validation reports travel as a
//! NACK over HTTP 200 by Beckn convention, while signature failures use 401.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::model::{ProtocolError, SchemaErrorItem, WorkbenchBehavior};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub ack: Ack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<SchemaErrorItem>>,
    /// Correlation hint for 500s; internal detail stays in the logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NackResponse {
    pub message: Message,
    pub error: ErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

fn ack_body() -> AckResponse {
    AckResponse {
        message: Message {
            ack: Ack {
                status: "ACK".to_string(),
            },
        },
    }
}

/// `200 {"message":{"ack":{"status":"ACK"}}}`.
pub fn ack() -> Response {
    (StatusCode::OK, Json(ack_body())).into_response()
}

/// Sends a caller-specified body in place of the ACK. The value is parsed
/// as JSON; anything unparsable is wrapped as `{"message": <raw>}`.
pub fn ack_with_body(raw: &str) -> Response {
    let body: serde_json::Value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::json!({ "message": raw }));
    (StatusCode::OK, Json(body)).into_response()
}

/// Maps a pipeline error to its NACK response and HTTP status.
pub fn nack(err: &ProtocolError, message_id: Option<&str>) -> Response {
    let (status, error, context) = match err {
        ProtocolError::BadRequest(_) => (
            StatusCode::BAD_REQUEST,
            ErrorBody {
                code: "400".to_string(),
                message: err.to_string(),
                errors: None,
                message_id: None,
            },
            None,
        ),
        ProtocolError::SignValidation(_) => (
            StatusCode::UNAUTHORIZED,
            ErrorBody {
                code: "401".to_string(),
                message: err.to_string(),
                errors: None,
                message_id: None,
            },
            None,
        ),
        ProtocolError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            ErrorBody {
                code: "404".to_string(),
                message: err.to_string(),
                errors: None,
                message_id: None,
            },
            None,
        ),
        ProtocolError::SchemaValidation(items) => (
            StatusCode::OK,
            ErrorBody {
                code: "400".to_string(),
                message: "schema validation failed".to_string(),
                errors: Some(items.clone()),
                message_id: None,
            },
            None,
        ),
        ProtocolError::Workbench {
            behavior,
            code,
            message,
            context,
        } => {
            let status = match behavior {
                WorkbenchBehavior::Nack => StatusCode::OK,
                WorkbenchBehavior::Http => code
                    .parse::<u16>()
                    .ok()
                    .and_then(|c| StatusCode::from_u16(c).ok())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            };
            (
                status,
                ErrorBody {
                    code: code.clone(),
                    message: message.clone(),
                    errors: None,
                    message_id: None,
                },
                context.clone(),
            )
        }
        ProtocolError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody {
                code: "500".to_string(),
                message: "INTERNAL_SERVER_ERROR".to_string(),
                errors: None,
                message_id: message_id.map(str::to_string),
            },
            None,
        ),
    };

    let body = NackResponse {
        message: Message {
            ack: Ack {
                status: "NACK".to_string(),
            },
        },
        error,
        context,
    };
    (status, Json(body)).into_response()
}
