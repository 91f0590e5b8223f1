//! Editor-side bus collaborator.
//!
//! The bridge pulls requests from a [`BusSource`] and publishes everything it
//! learns from the server through a [`BusSink`]. Two implementations ship with
//! the crate:
//!
//! - [`channel`]: in-process tokio channels, for embedders and tests
//! - [`tcp`]: newline-delimited JSON over two localhost sockets

pub mod channel;
pub mod tcp;

pub use channel::{ChannelSink, ChannelSource, EditorEndpoint, channel_bus};
pub use tcp::{TcpBus, TcpBusSink, TcpBusSource};

use std::future::Future;
use std::time::Duration;

use serde_json::{Value, json};

use crate::bridge::protocol::Message;
use crate::bridge::registry::PendingRequest;
use crate::error::BridgeResult;

/// Id used by the bridge's own sentinel messages.
pub const SENTINEL_ID: i64 = -1;

/// Method of the readiness sentinel.
pub const SERVER_READY_METHOD: &str = "server_ready";

/// Method of the disconnect sentinel.
pub const SERVER_DISCONNECTED_METHOD: &str = "server_disconnected";

/// Something the bridge publishes on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Startup finished; requests can be sent.
    Ready,
    /// A server response correlated with the request that caused it.
    Response {
        message: Message,
        request: PendingRequest,
    },
    /// A server notification or server-initiated request.
    ServerMessage(Message),
    /// The server connection was lost mid-session.
    Disconnected { reason: String },
}

impl Delivery {
    /// Raw JSON form, as written by byte-oriented buses.
    pub fn to_raw(&self) -> Value {
        match self {
            Delivery::Ready => json!({
                "id": SENTINEL_ID,
                "method": SERVER_READY_METHOD,
                "params": {},
            }),
            Delivery::Response { message, .. } | Delivery::ServerMessage(message) => {
                message.to_value()
            }
            Delivery::Disconnected { reason } => json!({
                "id": SENTINEL_ID,
                "method": SERVER_DISCONNECTED_METHOD,
                "params": { "reason": reason },
            }),
        }
    }
}

/// Where bus requests come from.
///
/// Messages must be handed out in the order the editor sent them.
pub trait BusSource: Send {
    /// Wait up to `timeout` for messages; returns how many are available.
    ///
    /// Returns `Ok(0)` when the timeout passes without traffic and `Bus` once
    /// the editor side is gone. Must be cancel safe: dropping the future loses
    /// no message.
    fn poll(&mut self, timeout: Duration) -> impl Future<Output = BridgeResult<usize>> + Send;

    /// Take the next raw message.
    fn receive(&mut self) -> impl Future<Output = BridgeResult<Value>> + Send;
}

/// Where deliveries go. Cloned into the outbound task.
pub trait BusSink: Clone + Send + Sync + 'static {
    /// Publish one delivery. Deliveries from one sender stay in order.
    fn publish(&self, delivery: Delivery) -> impl Future<Output = BridgeResult<()>> + Send;
}
