//! Transport bridge between an editor bus and a TCP language server.
//!
//! Messages travel in both directions at once. Bus requests are framed with
//! the LSP base protocol (`Content-Length` header plus UTF-8 JSON body) and
//! written to the server; server frames are decoded, correlated with the
//! requests that caused them and published back on the bus.
//!
//! # Module Structure
//!
//! - `codec` - Content-Length framing
//! - `protocol` - JSON-RPC message envelope, ids and error codes
//! - `registry` - RequestRegistry correlating responses with requests
//! - `connection` - ConnectionManager with bounded-retry connect and close
//! - `process` - ServerProcess for a locally spawned language server
//! - `bus` - Bus traits plus channel and TCP implementations
//! - `actor` - InboundBridge (bus → wire) and the outbound task (wire → bus)
//! - `lifecycle` - LifecycleController for ordered startup and teardown

pub mod actor;
pub mod bus;
pub mod codec;
pub mod connection;
pub mod lifecycle;
pub mod process;
pub mod protocol;
pub mod registry;

pub use bus::{BusSink, BusSource, Delivery};
pub use connection::{ConnectTimeout, ConnectionManager, ConnectionState};
pub use lifecycle::{
    LifecycleController, LifecycleState, ServerLaunch, ShutdownReport, ShutdownTimeout,
};
pub use protocol::{Message, MessageId};
pub use registry::{PendingRequest, RequestRegistry};
