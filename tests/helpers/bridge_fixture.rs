//! Controller wiring over the in-process channel bus.

#![allow(dead_code)]

use std::time::Duration;

use tsunagi::bridge::bus::{ChannelSink, ChannelSource, EditorEndpoint, channel_bus};
use tsunagi::bridge::{
    ConnectTimeout, ConnectionManager, Delivery, LifecycleController, ShutdownTimeout,
};

pub type ChannelController = LifecycleController<ChannelSource, ChannelSink>;

/// Controller attaching to `127.0.0.1:port`.
pub fn attach_controller(
    port: u16,
    connect_timeout: Duration,
) -> (EditorEndpoint, ChannelController) {
    let (endpoint, source, sink) = channel_bus();
    let connection = ConnectionManager::new(
        "127.0.0.1",
        port,
        ConnectTimeout::new(connect_timeout).expect("valid connect timeout"),
    );
    let controller = LifecycleController::new(connection, source, sink)
        .with_shutdown_timeout(ShutdownTimeout::new(Duration::from_secs(2)).unwrap())
        .with_poll_timeout(Duration::from_millis(50));
    (endpoint, controller)
}

/// Wait for the readiness sentinel.
pub async fn expect_ready(endpoint: &mut EditorEndpoint) {
    let delivery = endpoint.recv_timeout(Duration::from_secs(2)).await;
    assert_eq!(delivery, Some(Delivery::Ready), "bridge should announce readiness first");
}
