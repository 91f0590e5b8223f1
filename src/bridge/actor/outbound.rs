//! Wire → bus direction.
//!
//! A background task reads frames for the whole connected lifetime. It stops
//! only when the stream ends, the stream is corrupted, or the connection is
//! closed locally. There is no cancel flag: closing the connection unblocks
//! the pending read.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::bus::{BusSink, Delivery};
use crate::bridge::connection::ConnectionReader;
use crate::bridge::protocol::{Message, MessageKind};
use crate::bridge::registry::RequestRegistry;
use crate::error::{BridgeError, BridgeResult};

/// Why the outbound loop ended.
#[derive(Debug)]
pub enum OutboundExit {
    /// The connection was closed through `ConnectionManager::close()`.
    Closed,
    /// The server ended the stream.
    ServerGone(BridgeError),
    /// A frame could not be decoded; the stream position is lost.
    Corrupted(BridgeError),
    /// The bus refused a delivery.
    BusFailed(BridgeError),
}

impl OutboundExit {
    /// Human-readable reason, as published in the disconnect sentinel.
    pub fn reason(&self) -> String {
        match self {
            OutboundExit::Closed => "connection closed by the bridge".to_string(),
            OutboundExit::ServerGone(BridgeError::ConnectionClosed) => {
                "connection closed by the language server".to_string()
            }
            OutboundExit::ServerGone(e) => format!("language server connection lost: {}", e),
            OutboundExit::Corrupted(e) => format!("unreadable data from language server: {}", e),
            OutboundExit::BusFailed(e) => format!("bus failure: {}", e),
        }
    }

    /// Whether the exit was triggered from this side.
    pub fn is_local(&self) -> bool {
        matches!(self, OutboundExit::Closed)
    }
}

/// Handle to the running outbound task.
pub struct OutboundTaskHandle {
    join_handle: JoinHandle<OutboundExit>,
    /// Cancelled when the loop ends, however it ends
    finished: CancellationToken,
}

impl OutboundTaskHandle {
    /// Whether the task has completed.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled() || self.join_handle.is_finished()
    }

    /// Resolve once the loop has ended.
    pub async fn terminated(&self) {
        self.finished.cancelled().await;
    }

    /// Wait for the task to finish, aborting it after `bound`.
    ///
    /// # Errors
    /// `Shutdown` if the task overran `bound` or panicked.
    pub async fn join(mut self, bound: Duration) -> BridgeResult<OutboundExit> {
        match tokio::time::timeout(bound, &mut self.join_handle).await {
            Ok(Ok(exit)) => Ok(exit),
            Ok(Err(join_error)) => Err(BridgeError::Shutdown {
                message: format!("outbound task failed: {}", join_error),
            }),
            Err(_) => {
                self.join_handle.abort();
                warn!(
                    target: "tsunagi::bridge::outbound",
                    "Outbound task did not stop within {:?}, aborted",
                    bound
                );
                Err(BridgeError::Shutdown {
                    message: format!("outbound task did not stop within {:?}", bound),
                })
            }
        }
    }
}

/// Spawn the outbound loop on its own task.
pub fn spawn_outbound_task<K: BusSink>(
    reader: ConnectionReader,
    registry: Arc<RequestRegistry>,
    sink: K,
) -> OutboundTaskHandle {
    let finished = CancellationToken::new();
    let guard = finished.clone().drop_guard();

    let join_handle = tokio::spawn(async move {
        // Signals `terminated()` even if the loop panics
        let _guard = guard;
        outbound_loop(reader, registry, sink).await
    });

    OutboundTaskHandle {
        join_handle,
        finished,
    }
}

async fn outbound_loop<K: BusSink>(
    mut reader: ConnectionReader,
    registry: Arc<RequestRegistry>,
    sink: K,
) -> OutboundExit {
    let exit = loop {
        let message = match reader.receive_frame().await {
            Ok(message) => message,
            Err(e) => break classify_exit(&reader, e),
        };

        let Some(delivery) = route(message, &registry) else {
            continue;
        };
        if let Err(e) = sink.publish(delivery).await {
            warn!(
                target: "tsunagi::bridge::outbound",
                "Bus rejected delivery, stopping: {}",
                e
            );
            return OutboundExit::BusFailed(e);
        }
    };

    if exit.is_local() {
        debug!(target: "tsunagi::bridge::outbound", "Outbound loop stopped by close");
        return exit;
    }

    let reason = exit.reason();
    info!(
        target: "tsunagi::bridge::outbound",
        "Language server disconnected: {}",
        reason
    );
    if let Err(e) = sink.publish(Delivery::Disconnected { reason }).await {
        warn!(
            target: "tsunagi::bridge::outbound",
            "Failed to publish disconnect notice: {}",
            e
        );
    }
    exit
}

fn classify_exit(reader: &ConnectionReader, error: BridgeError) -> OutboundExit {
    if reader.closed_locally() {
        return OutboundExit::Closed;
    }
    match error {
        e @ (BridgeError::Framing { .. } | BridgeError::Decoding(_)) => {
            warn!(
                target: "tsunagi::bridge::outbound",
                "Cannot resynchronize after bad frame: {}",
                e
            );
            OutboundExit::Corrupted(e)
        }
        e => OutboundExit::ServerGone(e),
    }
}

/// Decide what one server message becomes on the bus.
///
/// Requests, notifications and id-less messages are server-initiated.
/// Anything else with an id must match a pending request; stray responses
/// are dropped.
fn route(message: Message, registry: &RequestRegistry) -> Option<Delivery> {
    let id = match (message.kind(), &message.id) {
        (MessageKind::Response | MessageKind::Invalid, Some(id)) => id.clone(),
        _ => {
            debug!(
                target: "tsunagi::bridge::outbound",
                "Server message '{}'",
                message.method_name()
            );
            return Some(Delivery::ServerMessage(message));
        }
    };

    match registry.resolve(&id) {
        Ok(request) => {
            debug!(
                target: "tsunagi::bridge::outbound",
                "Response {} for '{}' after {:?}",
                id,
                request.method,
                request.registered_at.elapsed()
            );
            Some(Delivery::Response { message, request })
        }
        Err(e) => {
            warn!(
                target: "tsunagi::bridge::outbound",
                "Dropping stray response: {}",
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::bus::channel_bus;
    use crate::bridge::codec;
    use crate::bridge::connection::{ConnectTimeout, ConnectionManager};
    use crate::bridge::protocol::MessageId;
    use serde_json::json;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

    /// Reads never complete; every write fails as if the peer reset.
    struct ResetOnWrite;

    impl AsyncRead for ResetOnWrite {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for ResetOnWrite {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn attached() -> (ConnectionManager, ConnectionReader, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let manager = ConnectionManager::new("127.0.0.1", 1, ConnectTimeout::default());
        let (reader, _writer) = manager.attach(client).unwrap();
        (manager, reader, server)
    }

    async fn write_message(server: &mut DuplexStream, message: &Message) {
        server.write_all(&codec::encode(message).unwrap()).await.unwrap();
    }

    #[test]
    fn route_correlates_registered_response_once() {
        let registry = RequestRegistry::new();
        registry.register(MessageId::Number(1), "ping").unwrap();

        let delivery = route(Message::response(1, json!({})), &registry);
        match delivery {
            Some(Delivery::Response { message, request }) => {
                assert_eq!(message.result, Some(json!({})));
                assert_eq!(request.method, "ping");
            }
            other => panic!("expected correlated response, got {:?}", other),
        }
        assert!(route(Message::response(1, json!({})), &registry).is_none());
    }

    #[test]
    fn route_passes_server_initiated_messages_through() {
        let registry = RequestRegistry::new();
        let notification = Message::notification("window/logMessage", json!({"message": "hi"}));
        let request = Message::request(99, "workspace/configuration", json!({}));

        assert!(matches!(
            route(notification, &registry),
            Some(Delivery::ServerMessage(_))
        ));
        assert!(matches!(
            route(request, &registry),
            Some(Delivery::ServerMessage(_))
        ));
    }

    #[tokio::test]
    async fn publishes_responses_and_disconnect_on_server_close() {
        let (_manager, reader, mut server) = attached();
        let registry = Arc::new(RequestRegistry::new());
        registry.register(MessageId::Number(1), "ping").unwrap();
        let (mut endpoint, _source, sink) = channel_bus();

        let handle = spawn_outbound_task(reader, Arc::clone(&registry), sink);

        write_message(&mut server, &Message::notification("$/progress", json!({}))).await;
        write_message(&mut server, &Message::response(1, json!({"pong": true}))).await;
        drop(server);

        let first = endpoint.recv_timeout(Duration::from_secs(2)).await;
        assert!(matches!(first, Some(Delivery::ServerMessage(_))), "got {:?}", first);
        let second = endpoint.recv_timeout(Duration::from_secs(2)).await;
        assert!(matches!(second, Some(Delivery::Response { .. })), "got {:?}", second);
        let third = endpoint.recv_timeout(Duration::from_secs(2)).await;
        assert!(
            matches!(third, Some(Delivery::Disconnected { .. })),
            "got {:?}",
            third
        );

        let exit = handle.join(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(exit, OutboundExit::ServerGone(BridgeError::ConnectionClosed)));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn local_close_ends_loop_without_disconnect_notice() {
        let (manager, reader, _server) = attached();
        let (mut endpoint, _source, sink) = channel_bus();
        let handle = spawn_outbound_task(reader, Arc::new(RequestRegistry::new()), sink);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        manager.close();

        tokio::time::timeout(Duration::from_secs(1), handle.terminated())
            .await
            .expect("close should stop the loop promptly");
        assert!(handle.is_finished());
        let exit = handle.join(Duration::from_secs(1)).await.unwrap();
        assert!(exit.is_local());
        assert!(endpoint.try_recv().is_none());
    }

    #[tokio::test]
    async fn corrupted_frame_is_fatal() {
        let (_manager, reader, mut server) = attached();
        let (mut endpoint, _source, sink) = channel_bus();
        let handle = spawn_outbound_task(reader, Arc::new(RequestRegistry::new()), sink);

        server.write_all(b"Content-Length: 5\r\n\r\n{oops").await.unwrap();

        let exit = handle.join(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(exit, OutboundExit::Corrupted(BridgeError::Decoding(_))));
        assert!(matches!(
            endpoint.recv_timeout(Duration::from_millis(200)).await,
            Some(Delivery::Disconnected { .. })
        ));
    }

    #[tokio::test]
    async fn server_hanging_up_mid_body_is_reported() {
        let (_manager, reader, mut server) = attached();
        let (mut endpoint, _source, sink) = channel_bus();
        let handle = spawn_outbound_task(reader, Arc::new(RequestRegistry::new()), sink);

        server.write_all(b"Content-Length: 40\r\n\r\n{\"js").await.unwrap();
        drop(server);

        let exit = handle.join(Duration::from_secs(2)).await.unwrap();
        assert!(
            matches!(
                exit,
                OutboundExit::ServerGone(BridgeError::TruncatedStream {
                    expected: 40,
                    received: 4
                })
            ),
            "got {:?}",
            exit
        );
        match endpoint.recv_timeout(Duration::from_millis(200)).await {
            Some(Delivery::Disconnected { reason }) => {
                assert!(reason.contains("connection lost"), "got: {}", reason);
            }
            other => panic!("expected disconnect notice, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn write_failure_seen_first_still_publishes_disconnect() {
        let manager = ConnectionManager::new("127.0.0.1", 1, ConnectTimeout::default());
        let (reader, mut writer) = manager.attach(ResetOnWrite).unwrap();
        let (mut endpoint, _source, sink) = channel_bus();
        let handle = spawn_outbound_task(reader, Arc::new(RequestRegistry::new()), sink);

        let err = writer.send(b"Content-Length: 2\r\n\r\n{}").await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionClosed), "got {:?}", err);
        // Teardown closes the connection while the reader is still blocked
        manager.close();

        let exit = handle.join(Duration::from_secs(1)).await.unwrap();
        assert!(!exit.is_local(), "got {:?}", exit);
        assert!(matches!(
            endpoint.recv_timeout(Duration::from_millis(200)).await,
            Some(Delivery::Disconnected { .. })
        ));
        assert!(endpoint.try_recv().is_none(), "exactly one disconnect notice");
    }

    #[tokio::test]
    async fn stray_response_is_dropped_and_loop_continues() {
        let (_manager, reader, mut server) = attached();
        let registry = Arc::new(RequestRegistry::new());
        registry.register(MessageId::Number(2), "hover").unwrap();
        let (mut endpoint, _source, sink) = channel_bus();
        let _handle = spawn_outbound_task(reader, Arc::clone(&registry), sink);

        write_message(&mut server, &Message::response(42, json!(null))).await;
        write_message(&mut server, &Message::response(2, json!(null))).await;

        match endpoint.recv_timeout(Duration::from_secs(2)).await {
            Some(Delivery::Response { request, .. }) => {
                assert_eq!(request.id, MessageId::Number(2));
            }
            other => panic!("expected response for id 2, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn join_aborts_task_that_overruns_bound() {
        let (_manager, reader, _server) = attached();
        let (_endpoint, _source, sink) = channel_bus();
        let handle = spawn_outbound_task(reader, Arc::new(RequestRegistry::new()), sink);

        let result = handle.join(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(BridgeError::Shutdown { .. })));
    }
}
