//! JSON-RPC message types for bridge communication.
//!
//! The bridge only looks at the envelope of a message (id, method, and
//! whether it carries a result or error). Params and results are opaque
//! `serde_json::Value`s.
//!
//! ## Module Structure
//!
//! - `message_id` - MessageId type for numeric and string request ids
//! - `message` - Message envelope and constructors
//! - `error_codes` - JSON-RPC/LSP error codes and ResponseError

mod error_codes;
mod message;
mod message_id;

pub use error_codes::{ErrorCodes, ResponseError};
pub use message::{JSONRPC_VERSION, Message, MessageKind};
pub use message_id::MessageId;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A present field is `Some`, even when its value is `null`.
///
/// Pair with `#[serde(default)]` so an absent field stays `None`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
