//! Error taxonomy and HTTP error responses for the gate

use crate::GateBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Header carrying the gate error code on every error response
pub const X_GATE_ERROR: &str = "x-gate-error";

/// Setup-time configuration failure. No request is handled once one occurs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("gate '{gate}': serviceurl cannot be empty")]
    MissingServiceUrl { gate: String },

    #[error("gate '{gate}': 'name' and 'names' cannot be used simultaneously")]
    ConflictingNames { gate: String },

    #[error("gate '{gate}': one of 'name' or 'names' must be set")]
    MissingNames { gate: String },

    #[error("gate '{gate}': service names cannot be empty")]
    EmptyServiceName { gate: String },

    #[error("gate '{gate}': invalid duration for '{field}' (got `{value}`): {source}")]
    InvalidDuration {
        gate: String,
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("gate '{gate}': '{field}' must be greater than zero")]
    ZeroDuration { gate: String, field: &'static str },

    #[error("gate '{gate}': invalid upstream '{value}': {reason}")]
    InvalidUpstream {
        gate: String,
        value: String,
        reason: String,
    },

    #[error("gate '{gate}': host conflicts with gate '{other}' (hosts are case-insensitive)")]
    DuplicateHost { gate: String, other: String },
}

/// Failure of a single wake/status call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProbeError {
    /// The orchestrator answered with something other than `started`/`starting`
    #[error("{0}")]
    UnexpectedStatus(String),

    /// The call never produced a body
    #[error("{0}")]
    Transport(String),

    #[error("wake call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl ProbeError {
    /// Raw text shown to users and written to logs
    pub fn detail(&self) -> String {
        self.to_string()
    }
}

/// Error codes for gate errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateErrorCode {
    /// Missing Host header in request
    MissingHostHeader,
    /// No gate configured for the host
    UnknownHost,
    /// A wake/status call failed or returned an unknown status
    WakeFailed,
    /// Services did not become ready within the blocking delay
    WakeTimeout,
    /// The waiting request was cancelled
    WaitCancelled,
    /// Upstream did not answer in time
    RequestTimeout,
    /// Failed to connect to the upstream
    ConnectionFailed,
    /// Internal gate error
    InternalError,
}

impl GateErrorCode {
    /// Get the default HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateErrorCode::MissingHostHeader => StatusCode::BAD_REQUEST,
            GateErrorCode::UnknownHost => StatusCode::NOT_FOUND,
            GateErrorCode::WakeFailed => StatusCode::INTERNAL_SERVER_ERROR,
            GateErrorCode::WakeTimeout => StatusCode::GATEWAY_TIMEOUT,
            GateErrorCode::WaitCancelled => StatusCode::SERVICE_UNAVAILABLE,
            GateErrorCode::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            GateErrorCode::ConnectionFailed => StatusCode::BAD_GATEWAY,
            GateErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Gate-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GateErrorCode::MissingHostHeader => "MISSING_HOST_HEADER",
            GateErrorCode::UnknownHost => "UNKNOWN_HOST",
            GateErrorCode::WakeFailed => "WAKE_FAILED",
            GateErrorCode::WakeTimeout => "WAKE_TIMEOUT",
            GateErrorCode::WaitCancelled => "WAIT_CANCELLED",
            GateErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            GateErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            GateErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: GateErrorCode,
    pub message: String,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: GateErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Gate-Error header.
///
/// Used for failures that happen outside a gate's pages: routing and upstream forwarding.
pub fn json_error_response(code: GateErrorCode, message: impl Into<String>) -> Response<GateBody> {
    let body = ErrorResponse::new(code, message).to_json();

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header(X_GATE_ERROR, code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

/// Create an HTML page response, tagged with an error code when there is one
pub fn html_response(
    status: StatusCode,
    code: Option<GateErrorCode>,
    html: String,
) -> Response<GateBody> {
    let mut builder = Response::builder()
        .status(status)
        .header("Content-Type", "text/html; charset=utf-8")
        .header("Cache-Control", "no-store");

    if let Some(code) = code {
        builder = builder.header(X_GATE_ERROR, code.as_header_value());
    }

    builder
        .body(Full::new(Bytes::from(html)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

/// Create an HTML error page response using the code's status
pub fn html_error_response(code: GateErrorCode, html: String) -> Response<GateBody> {
    html_response(code.status_code(), Some(code), html)
}
