//! In-process bus over tokio unbounded channels.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use super::{BusSink, BusSource, Delivery};
use crate::error::{BridgeError, BridgeResult};

/// Create a connected bus: the editor's end plus the bridge's two ends.
pub fn channel_bus() -> (EditorEndpoint, ChannelSource, ChannelSink) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();

    let endpoint = EditorEndpoint {
        requests: request_tx,
        deliveries: delivery_rx,
    };
    let source = ChannelSource {
        requests: request_rx,
        buffered: VecDeque::new(),
    };
    let sink = ChannelSink {
        deliveries: delivery_tx,
    };
    (endpoint, source, sink)
}

/// The editor's side of a channel bus.
#[derive(Debug)]
pub struct EditorEndpoint {
    requests: mpsc::UnboundedSender<Value>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
}

impl EditorEndpoint {
    /// Send a raw request or notification to the bridge.
    pub fn send(&self, raw: Value) -> BridgeResult<()> {
        self.requests
            .send(raw)
            .map_err(|_| BridgeError::bus("bridge side of the bus is closed"))
    }

    /// Next delivery, or `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    /// Next delivery if one arrives within `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Delivery> {
        tokio::time::timeout(timeout, self.deliveries.recv())
            .await
            .ok()
            .flatten()
    }

    /// Delivery already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.deliveries.try_recv().ok()
    }
}

/// Bridge-side request source of a channel bus.
#[derive(Debug)]
pub struct ChannelSource {
    requests: mpsc::UnboundedReceiver<Value>,
    buffered: VecDeque<Value>,
}

impl ChannelSource {
    fn drain_ready(&mut self) {
        while let Ok(raw) = self.requests.try_recv() {
            self.buffered.push_back(raw);
        }
    }
}

impl BusSource for ChannelSource {
    async fn poll(&mut self, timeout: Duration) -> BridgeResult<usize> {
        self.drain_ready();
        if !self.buffered.is_empty() {
            return Ok(self.buffered.len());
        }

        match tokio::time::timeout(timeout, self.requests.recv()).await {
            Ok(Some(raw)) => {
                self.buffered.push_back(raw);
                self.drain_ready();
                Ok(self.buffered.len())
            }
            Ok(None) => Err(BridgeError::bus("editor side of the bus is closed")),
            Err(_) => Ok(0),
        }
    }

    async fn receive(&mut self) -> BridgeResult<Value> {
        if let Some(raw) = self.buffered.pop_front() {
            return Ok(raw);
        }
        self.requests
            .recv()
            .await
            .ok_or_else(|| BridgeError::bus("editor side of the bus is closed"))
    }
}

/// Bridge-side delivery sink of a channel bus.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl BusSink for ChannelSink {
    async fn publish(&self, delivery: Delivery) -> BridgeResult<()> {
        self.deliveries
            .send(delivery)
            .map_err(|_| BridgeError::bus("editor side of the bus is closed"))
    }
}
