//! Bus → wire direction.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use serde_json::{Value, json};

use crate::bridge::bus::BusSource;
use crate::bridge::codec;
use crate::bridge::connection::ConnectionWriter;
use crate::bridge::protocol::{Message, MessageId, MessageKind, ResponseError};
use crate::bridge::registry::RequestRegistry;
use crate::error::{BridgeError, BridgeResult};

/// Build a wire message from a raw bus message.
///
/// - `{id, method, params?}` becomes a request (params default to `{}`)
/// - `{method, params?}` or a `null` id becomes a notification
/// - `{id, result | error}` is an editor reply to a server-initiated request
///
/// # Errors
/// `Encoding` when the bus message cannot be expressed as JSON-RPC.
pub fn compose_request(raw: &Value) -> BridgeResult<Message> {
    let object = raw
        .as_object()
        .ok_or_else(|| BridgeError::encoding("bus message is not a JSON object"))?;

    let id = match object.get("id") {
        None | Some(Value::Null) => None,
        Some(value) => Some(MessageId::from_json(raw).ok_or_else(|| {
            BridgeError::encoding(format!("bus message id must be an integer or string: {}", value))
        })?),
    };

    match object.get("method") {
        Some(Value::String(method)) => {
            let params = object.get("params").cloned().unwrap_or_else(|| json!({}));
            Ok(match id {
                Some(id) => Message::request(id, method.as_str(), params),
                None => Message::notification(method.as_str(), params),
            })
        }
        Some(other) => Err(BridgeError::encoding(format!(
            "bus message method must be a string: {}",
            other
        ))),
        None => compose_reply(id, object),
    }
}

fn compose_reply(
    id: Option<MessageId>,
    object: &serde_json::Map<String, Value>,
) -> BridgeResult<Message> {
    let id = id.ok_or_else(|| BridgeError::encoding("bus message has neither method nor id"))?;

    if let Some(error) = object.get("error") {
        let error: ResponseError = serde_json::from_value(error.clone())
            .map_err(|e| BridgeError::encoding(format!("invalid error object: {}", e)))?;
        return Ok(Message::error_response(id, error));
    }
    match object.get("result") {
        Some(result) => Ok(Message::response(id, result.clone())),
        None => Err(BridgeError::encoding("bus message has no method")),
    }
}

/// Forwards bus messages to the server in bus order.
///
/// Runs on the caller's task and owns the write half of the connection.
pub struct InboundBridge<S> {
    source: S,
    writer: ConnectionWriter,
    registry: Arc<RequestRegistry>,
    /// Reused frame buffer
    frame: Vec<u8>,
}

impl<S: BusSource> InboundBridge<S> {
    pub fn new(source: S, writer: ConnectionWriter, registry: Arc<RequestRegistry>) -> Self {
        Self {
            source,
            writer,
            registry,
            frame: Vec::new(),
        }
    }

    /// Run one poll cycle: wait up to `poll_timeout`, then forward every
    /// available message.
    ///
    /// Per-message failures that happen before any byte is written are logged
    /// and the message is skipped. Returns the number of messages written.
    ///
    /// # Errors
    /// A write failure or a failing bus. The byte stream is in an unknown
    /// state afterwards and the bridge must be torn down.
    pub async fn listen(&mut self, poll_timeout: Duration) -> BridgeResult<usize> {
        let available = self.source.poll(poll_timeout).await?;
        let mut forwarded = 0;

        for _ in 0..available {
            let raw = self.source.receive().await?;
            match self.forward(raw).await {
                Ok(()) => forwarded += 1,
                Err(e) if e.is_recoverable() => {
                    error!(
                        target: "tsunagi::bridge::inbound",
                        "Skipping bus message: {}",
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(forwarded)
    }

    /// Compose, encode, register and write one bus message.
    ///
    /// The message is encoded before it is registered, and registered before
    /// it is written, so a response can never beat its registry entry and an
    /// encoding failure never leaves an orphan entry.
    pub async fn forward(&mut self, raw: Value) -> BridgeResult<()> {
        let message = compose_request(&raw)?;

        self.frame.clear();
        codec::encode_into(&message, &mut self.frame)?;

        let registered = match (&message.id, &message.method) {
            (Some(id), Some(method)) => {
                self.registry.register(id.clone(), method.as_str())?;
                Some(id)
            }
            _ => None,
        };

        debug!(
            target: "tsunagi::bridge::inbound",
            "Forwarding {} ({} bytes)",
            describe(&message),
            self.frame.len()
        );

        if let Err(e) = self.writer.send(&self.frame).await {
            if let Some(id) = registered {
                self.registry.remove(id);
            }
            error!(
                target: "tsunagi::bridge::inbound",
                "Write to language server failed: {}",
                e
            );
            return Err(e);
        }
        Ok(())
    }
}

fn describe(message: &Message) -> String {
    match (message.kind(), &message.id) {
        (MessageKind::Request, Some(id)) => {
            format!("request {} '{}'", id, message.method_name())
        }
        (MessageKind::Notification, _) => format!("notification '{}'", message.method_name()),
        (MessageKind::Response, Some(id)) => format!("reply {}", id),
        _ => "message".to_string(),
    }
}
