//! JSON-RPC error codes and the response error object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC / LSP error codes used by the bridge
pub struct ErrorCodes;

impl ErrorCodes {
    /// Internal JSON-RPC error (JSON-RPC reserved)
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Request failed but was syntactically correct (LSP 3.17)
    /// Use for: requests abandoned because the server connection went away
    pub const REQUEST_FAILED: i64 = -32803;

    /// Server cancelled the request (LSP 3.17)
    pub const SERVER_CANCELLED: i64 = -32802;
}

/// Error object of a JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Error code
    pub code: i64,
    /// Human-readable error message
    pub message: String,
    /// Optional additional error data; an explicit `null` is kept
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "super::present"
    )]
    pub data: Option<Value>,
}

impl ResponseError {
    /// Create a REQUEST_FAILED error for requests dropped by the bridge
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCodes::REQUEST_FAILED,
            message: message.into(),
            data: None,
        }
    }

    /// Create an INTERNAL_ERROR error
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCodes::INTERNAL_ERROR,
            message: message.into(),
            data: None,
        }
    }
}
