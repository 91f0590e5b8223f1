//! In-process stand-in for a TCP language server.
//!
//! Speaks Content-Length framing via the crate's own codec and records every
//! frame it receives, in arrival order.

#![allow(dead_code)]

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tsunagi::bridge::Message;
use tsunagi::bridge::codec;

/// How the stub answers.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Answer every request with `{id, result: params}`.
    Echo,
    /// Answer the first `answered` requests, read one more frame, then hang up.
    HangUpAfter { answered: usize },
    /// Read and record, never answer.
    Silent,
}

pub struct StubServer {
    pub port: u16,
    handle: JoinHandle<Vec<Message>>,
}

impl StubServer {
    /// Bind an ephemeral port and serve exactly one connection.
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub server");
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(serve(listener, behavior));
        Self { port, handle }
    }

    /// Frames received before the bridge closed the connection.
    pub async fn received(self) -> Vec<Message> {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.handle)
            .await
            .expect("stub server should finish once the bridge disconnects")
            .expect("stub server task panicked")
    }
}

async fn serve(listener: TcpListener, behavior: Behavior) -> Vec<Message> {
    let (socket, _) = listener.accept().await.expect("accept bridge connection");
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut received = Vec::new();
    let mut answered = 0;

    while let Ok(message) = codec::decode(&mut reader).await {
        received.push(message.clone());
        let (Some(id), Some(_)) = (message.id.clone(), message.method.as_ref()) else {
            continue;
        };

        let answer = match behavior {
            Behavior::Echo => true,
            Behavior::HangUpAfter { answered: limit } => {
                if answered >= limit {
                    // Request read but never answered
                    break;
                }
                true
            }
            Behavior::Silent => false,
        };

        if answer {
            let result = message.params.clone().unwrap_or(serde_json::Value::Null);
            let frame = codec::encode(&Message::response(id, result)).unwrap();
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
            answered += 1;
        }
    }

    let _ = write_half.shutdown().await;
    received
}
