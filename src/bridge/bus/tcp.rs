//! Bus over two localhost TCP sockets carrying newline-delimited JSON.
//!
//! The editor listens on two ports. The bridge connects to both:
//!
//! - `in_port`: the editor writes one JSON request per line
//! - `out_port`: the bridge writes one JSON delivery per line

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use super::{BusSink, BusSource, Delivery};
use crate::error::{BridgeError, BridgeResult};

/// Factory for the two halves of a TCP bus.
pub struct TcpBus;

impl TcpBus {
    /// Connect to the editor's bus endpoints on `host`.
    ///
    /// # Errors
    /// `Bus` if either endpoint refuses the connection.
    pub async fn connect(
        host: &str,
        in_port: u16,
        out_port: u16,
    ) -> BridgeResult<(TcpBusSource, TcpBusSink)> {
        let inbound = TcpStream::connect((host, in_port)).await.map_err(|e| {
            BridgeError::bus(format!("cannot connect to bus input {}:{}: {}", host, in_port, e))
        })?;
        let outbound = TcpStream::connect((host, out_port)).await.map_err(|e| {
            BridgeError::bus(format!("cannot connect to bus output {}:{}: {}", host, out_port, e))
        })?;
        if let Err(e) = outbound.set_nodelay(true) {
            log::debug!(
                target: "tsunagi::bus",
                "Could not disable Nagle on bus output: {}",
                e
            );
        }

        log::info!(
            target: "tsunagi::bus",
            "Connected to editor bus (in {}, out {})",
            in_port,
            out_port
        );

        // Only the read half of the input socket and the write half of the
        // output socket carry traffic
        let (in_read, in_write) = inbound.into_split();
        let (_out_read, out_write) = outbound.into_split();

        let source = TcpBusSource {
            lines: BufReader::new(in_read).lines(),
            buffered: VecDeque::new(),
            _keep_open: in_write,
        };
        let sink = TcpBusSink {
            writer: Arc::new(Mutex::new(out_write)),
        };
        Ok((source, sink))
    }
}

/// Request source reading JSON lines.
pub struct TcpBusSource {
    lines: Lines<BufReader<OwnedReadHalf>>,
    buffered: VecDeque<Value>,
    _keep_open: OwnedWriteHalf,
}

impl TcpBusSource {
    /// Queue one line. Blank and malformed lines are skipped.
    fn accept_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(raw) => self.buffered.push_back(raw),
            Err(e) => {
                log::error!(
                    target: "tsunagi::bus",
                    "Skipping malformed bus message ({} bytes): {}",
                    trimmed.len(),
                    e
                );
            }
        }
    }

    fn closed() -> BridgeError {
        BridgeError::bus("editor closed the bus input")
    }
}

impl BusSource for TcpBusSource {
    async fn poll(&mut self, timeout: Duration) -> BridgeResult<usize> {
        if !self.buffered.is_empty() {
            return Ok(self.buffered.len());
        }

        // `next_line` is cancel safe, so the timeout never drops a partial line
        let deadline = tokio::time::Instant::now() + timeout;
        while self.buffered.is_empty() {
            match tokio::time::timeout_at(deadline, self.lines.next_line()).await {
                Ok(Ok(Some(line))) => self.accept_line(&line),
                Ok(Ok(None)) => return Err(Self::closed()),
                Ok(Err(e)) => return Err(BridgeError::bus(format!("bus read failed: {}", e))),
                Err(_) => return Ok(0),
            }
        }
        Ok(self.buffered.len())
    }

    async fn receive(&mut self) -> BridgeResult<Value> {
        loop {
            if let Some(raw) = self.buffered.pop_front() {
                return Ok(raw);
            }
            match self.lines.next_line().await {
                Ok(Some(line)) => self.accept_line(&line),
                Ok(None) => return Err(Self::closed()),
                Err(e) => return Err(BridgeError::bus(format!("bus read failed: {}", e))),
            }
        }
    }
}

/// Delivery sink writing JSON lines.
#[derive(Clone)]
pub struct TcpBusSink {
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl BusSink for TcpBusSink {
    async fn publish(&self, delivery: Delivery) -> BridgeResult<()> {
        let mut line = serde_json::to_vec(&delivery.to_raw())
            .map_err(|e| BridgeError::encoding(e.to_string()))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| BridgeError::bus(format!("bus write failed: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| BridgeError::bus(format!("bus write failed: {}", e)))
    }
}
