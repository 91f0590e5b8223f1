//! End-to-end: the server hangs up mid-session.

mod helpers;

use std::time::Duration;

use helpers::bridge_fixture::{attach_controller, expect_ready};
use helpers::stub_server::{Behavior, StubServer};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tsunagi::BridgeError;
use tsunagi::bridge::actor::OutboundExit;
use tsunagi::bridge::protocol::ErrorCodes;
use tsunagi::bridge::{ConnectionState, Delivery, LifecycleState, MessageId};

#[tokio::test]
async fn server_close_notifies_bus_and_drains_pending_requests() {
    let server = StubServer::start(Behavior::HangUpAfter { answered: 1 }).await;
    let (mut endpoint, mut controller) = attach_controller(server.port, Duration::from_secs(2));

    controller.start().await.unwrap();
    expect_ready(&mut endpoint).await;

    endpoint.send(json!({"id": 1, "method": "first"})).unwrap();
    endpoint.send(json!({"id": 2, "method": "second"})).unwrap();

    let run = controller.run(CancellationToken::new());
    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run should end when the server goes away")
        .expect("run should stop cleanly");

    // Bus: answer to 1, disconnect notice, failure for abandoned 2
    match endpoint.recv_timeout(Duration::from_secs(1)).await {
        Some(Delivery::Response { request, message }) => {
            assert_eq!(request.id, MessageId::Number(1));
            assert!(message.error.is_none());
        }
        other => panic!("expected response to request 1, got {:?}", other),
    }
    match endpoint.recv_timeout(Duration::from_secs(1)).await {
        Some(Delivery::Disconnected { reason }) => {
            assert!(reason.contains("closed"), "reason: {}", reason);
        }
        other => panic!("expected disconnect notice, got {:?}", other),
    }
    match endpoint.recv_timeout(Duration::from_secs(1)).await {
        Some(Delivery::Response { request, message }) => {
            assert_eq!(request.id, MessageId::Number(2));
            assert_eq!(message.error.map(|e| e.code), Some(ErrorCodes::REQUEST_FAILED));
        }
        other => panic!("expected failure for request 2, got {:?}", other),
    }

    assert_eq!(report.abandoned.len(), 1);
    assert_eq!(report.abandoned[0].method, "second");
    assert!(matches!(
        report.outbound_exit,
        Some(OutboundExit::ServerGone(BridgeError::ConnectionClosed))
    ));
    assert_eq!(controller.registry().pending_count(), 0);
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert_eq!(controller.connection_state(), ConnectionState::Closed);

    assert_eq!(server.received().await.len(), 2);
}

#[tokio::test]
async fn stop_after_server_loss_is_still_idempotent() {
    let server = StubServer::start(Behavior::HangUpAfter { answered: 0 }).await;
    let (mut endpoint, mut controller) = attach_controller(server.port, Duration::from_secs(2));
    controller.start().await.unwrap();
    expect_ready(&mut endpoint).await;

    endpoint.send(json!({"id": 9, "method": "doomed"})).unwrap();
    controller.listen(Duration::from_millis(500)).await.unwrap();
    assert_eq!(server.received().await.len(), 1);

    let first = controller.stop().await.unwrap();
    assert_eq!(first.abandoned.len(), 1);
    let second = controller.stop().await.unwrap();
    assert!(second.abandoned.is_empty());
    assert!(second.outbound_exit.is_none());
}
