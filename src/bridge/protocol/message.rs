//! JSON-RPC 2.0 message envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error_codes::ResponseError;
use super::message_id::MessageId;

/// The only protocol version the bridge speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Shape of a message, derived from which envelope fields are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has an id and a method: expects a response
    Request,
    /// Has a method but no id
    Notification,
    /// Has an id (or null id) and a result or error, no method
    Response,
    /// None of the above
    Invalid,
}

/// A JSON-RPC request, notification or response.
///
/// Absent fields are omitted on the wire. `params` and `result` distinguish
/// "absent" from an explicit `null` so that encoding a decoded message
/// reproduces the same message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "super::present"
    )]
    pub params: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "super::present"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl Message {
    fn empty() -> Self {
        Self {
            jsonrpc: default_version(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    /// Build a request that expects a response.
    pub fn request(id: impl Into<MessageId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id.into()),
            method: Some(method.into()),
            params: Some(params),
            ..Self::empty()
        }
    }

    /// Build a notification (no id, no response expected).
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: Some(method.into()),
            params: Some(params),
            ..Self::empty()
        }
    }

    /// Build a successful response.
    pub fn response(id: impl Into<MessageId>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            result: Some(result),
            ..Self::empty()
        }
    }

    /// Build an error response.
    pub fn error_response(id: impl Into<MessageId>, error: ResponseError) -> Self {
        Self {
            id: Some(id.into()),
            error: Some(error),
            ..Self::empty()
        }
    }

    /// Classify the message by its envelope.
    pub fn kind(&self) -> MessageKind {
        match (&self.id, &self.method) {
            (Some(_), Some(_)) => MessageKind::Request,
            (None, Some(_)) => MessageKind::Notification,
            (_, None) if self.result.is_some() || self.error.is_some() => MessageKind::Response,
            _ => MessageKind::Invalid,
        }
    }

    /// Method name, or `""` for responses.
    pub fn method_name(&self) -> &str {
        self.method.as_deref().unwrap_or_default()
    }

    /// Convert to a raw JSON value.
    pub fn to_value(&self) -> Value {
        // A Message only holds JSON values and strings, so this cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
