//! JSON-RPC message id type.
//!
//! JSON-RPC allows ids to be either numbers or strings. The editor bus
//! supplies the ids, so both forms are carried through unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// JSON-RPC id of a request or response.
///
/// Used as the key of the request registry, so it must hash and compare
/// exactly as it appears on the wire: `1` and `"1"` are different ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    String(String),
}

impl MessageId {
    /// Extract the id from a raw JSON-RPC message.
    ///
    /// Returns `None` if the field is missing, null, or neither a number nor
    /// a string (e.g. notifications).
    pub fn from_json(message: &serde_json::Value) -> Option<Self> {
        match message.get("id")? {
            serde_json::Value::Number(n) => n.as_i64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}
