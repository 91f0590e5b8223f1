//! The two directional forwarding loops.
//!
//! # Components
//!
//! - `InboundBridge`: pulls bus messages, frames them and writes them to the server
//! - `OutboundBridge`: background task that reads server frames, correlates
//!   responses and publishes them on the bus

mod inbound;
mod outbound;

pub use inbound::{InboundBridge, compose_request};
pub use outbound::{OutboundExit, OutboundTaskHandle, spawn_outbound_task};
