//! Wire payload types for the shadow protocol
//!
//! Every exchange is JSON correlated by a `requestId`. Shadow documents
//! themselves are schemaless and stay `serde_json::Value`; only the
//! envelopes around them are typed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON key carrying the correlation id in every payload.
pub const REQUEST_ID_KEY: &str = "requestId";

/// The three correlated shadow operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowAction {
    Update,
    Get,
    Delete,
}

impl ShadowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowAction::Update => "update",
            ShadowAction::Get => "get",
            ShadowAction::Delete => "delete",
        }
    }
}

impl fmt::Display for ShadowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome delivered to a request callback, exactly once per request.
#[derive(Debug, Clone, PartialEq)]
pub enum ShadowAck {
    /// The cloud accepted the request; carries the full response document.
    Accepted { document: Value },
    /// The cloud rejected the request.
    Rejected { code: String, message: String },
    /// No reply arrived within the request's deadline.
    Timeout,
}

/// User error returned by a delta handler, forwarded to the cloud on
/// `delta/rejected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRejection {
    pub code: String,
    pub message: String,
}

impl DeltaRejection {
    pub fn new<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Outbound `update` payload: `{"reported": …, "requestId": …}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateRequest {
    pub reported: Value,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

/// Outbound `get` / `delete` payload: `{"requestId": …}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

/// Inbound `*/rejected` payload.
///
/// `code` and `message` are optional rather than failing the parse; a
/// malformed rejection still completes its request, and the dispatcher
/// decides how loudly to complain about the gaps.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rejection {
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Inbound `delta` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeltaMessage {
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    pub desired: Option<Value>,
}

/// Outbound `delta/rejected` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaRejectedMessage {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub code: String,
    pub message: String,
}

/// Extract the correlation id from an inbound payload.
pub fn request_id(payload: &Value) -> Option<&str> {
    payload.get(REQUEST_ID_KEY).and_then(Value::as_str)
}
