//! Byte-stream connection to the language server.
//!
//! `ConnectionManager` owns the connection state and the close signal. A
//! successful `connect` hands out the two halves of the stream:
//!
//! - `ConnectionReader` is used only by the outbound bridge
//! - `ConnectionWriter` is used only by the inbound bridge
//!
//! Neither half needs a lock. Every blocking read and write also waits on the
//! shared close token, so `ConnectionManager::close()` from any task unblocks
//! an in-flight read with `ConnectionClosed`.

mod backoff;
mod connect_timeout;
mod state;

pub use connect_timeout::ConnectTimeout;
pub use state::ConnectionState;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bridge::codec::{self, classify_io_error};
use crate::bridge::protocol::Message;
use crate::error::{BridgeError, BridgeResult, LockResultExt};

use backoff::Backoff;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// State shared by the manager and both stream halves.
#[derive(Debug)]
struct Shared {
    state: std::sync::Mutex<ConnectionState>,
    closed: CancellationToken,
    /// Set once the stream failed while still connected
    lost: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock().recover_poison("Connection::state")
    }

    fn set_state(&self, new_state: ConnectionState) {
        *self.state.lock().recover_poison("Connection::set_state") = new_state;
    }

    /// The stream failed under a live connection: Connected -> Closed.
    ///
    /// A later `close()` does not turn this into a local close.
    fn mark_remote_closed(&self) {
        let mut state = self.state.lock().recover_poison("Connection::mark_remote_closed");
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Closed;
            self.lost.store(true, Ordering::SeqCst);
        }
    }
}

/// Owner of the server connection: bounded-retry connect, state, and close.
///
/// Cloning yields another handle to the same connection; closing through any
/// clone closes it for all of them.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    host: String,
    port: u16,
    timeout: ConnectTimeout,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager for `host:port` in the Disconnected state.
    pub fn new(host: impl Into<String>, port: u16, timeout: ConnectTimeout) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            shared: Arc::new(Shared {
                state: std::sync::Mutex::new(ConnectionState::Disconnected),
                closed: CancellationToken::new(),
                lost: AtomicBool::new(false),
            }),
        }
    }

    /// Printable `host:port` (IPv6 hosts are bracketed).
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Connect to the server, retrying until the connect timeout elapses.
    ///
    /// Failed attempts are logged at debug level and retried after a bounded
    /// exponential backoff. Each attempt is itself limited to the time left,
    /// so the call returns no later than the timeout plus scheduling slack.
    ///
    /// Valid only from Disconnected. A timed-out call leaves the manager in
    /// Disconnected so it can be retried.
    ///
    /// # Errors
    /// - `Connection` carrying the last underlying error when the deadline passes
    /// - `ConnectionClosed` if `close()` is called while connecting
    /// - `InvalidState` if not Disconnected
    pub async fn connect(&self) -> BridgeResult<(ConnectionReader, ConnectionWriter)> {
        self.begin_connecting()?;

        match self.connect_with_retry().await {
            Ok(stream) => {
                let (read_half, write_half) = stream.into_split();
                Ok(self.establish(Box::new(read_half), Box::new(write_half)))
            }
            Err(e) => {
                let mut state = self.shared.state.lock().recover_poison("Connection::connect");
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Disconnected;
                }
                Err(e)
            }
        }
    }

    /// Adopt an already-established stream instead of dialing.
    ///
    /// Valid only from Disconnected. Used to run the bridge over in-memory
    /// streams and pre-connected sockets.
    pub fn attach<S>(&self, stream: S) -> BridgeResult<(ConnectionReader, ConnectionWriter)>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.begin_connecting()?;
        let (read_half, write_half) = tokio::io::split(stream);
        Ok(self.establish(Box::new(read_half), Box::new(write_half)))
    }

    /// Close the connection.
    ///
    /// Idempotent, never fails, and safe to call before a connection exists or
    /// while another task is blocked reading from it.
    pub fn close(&self) {
        let previous = {
            let mut state = self.shared.state.lock().recover_poison("Connection::close");
            let previous = *state;
            if previous != ConnectionState::Closed {
                *state = ConnectionState::Closing;
            }
            previous
        };

        self.shared.closed.cancel();
        self.shared.set_state(ConnectionState::Closed);

        if previous != ConnectionState::Closed {
            log::debug!(
                target: "tsunagi::connection",
                "Closed connection to {} (was {:?})",
                self.address(),
                previous
            );
        }
    }

    fn begin_connecting(&self) -> BridgeResult<()> {
        let mut state = self
            .shared
            .state
            .lock()
            .recover_poison("Connection::begin_connecting");
        if *state != ConnectionState::Disconnected {
            return Err(BridgeError::invalid_state(format!(
                "cannot connect from {:?}",
                *state
            )));
        }
        *state = ConnectionState::Connecting;
        Ok(())
    }

    fn establish(
        &self,
        read_half: BoxedRead,
        write_half: BoxedWrite,
    ) -> (ConnectionReader, ConnectionWriter) {
        {
            let mut state = self.shared.state.lock().recover_poison("Connection::establish");
            // A concurrent close() wins; the halves then fail on first use
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
            }
        }
        let reader = ConnectionReader {
            inner: BufReader::new(read_half),
            shared: Arc::clone(&self.shared),
        };
        let writer = ConnectionWriter {
            inner: write_half,
            shared: Arc::clone(&self.shared),
        };
        (reader, writer)
    }

    async fn connect_with_retry(&self) -> BridgeResult<TcpStream> {
        let address = self.address();
        let deadline = Instant::now() + self.timeout.as_duration();
        let mut backoff = Backoff::default();
        let mut attempts: u32 = 0;
        let mut last_error: Option<io::Error> = None;

        log::info!(
            target: "tsunagi::connection",
            "Connecting to language server at {}",
            address
        );

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = tokio::time::timeout(
                remaining,
                TcpStream::connect((self.host.as_str(), self.port)),
            );

            let outcome = tokio::select! {
                biased;
                _ = self.shared.closed.cancelled() => return Err(BridgeError::ConnectionClosed),
                outcome = attempt => outcome,
            };

            match outcome {
                Ok(Ok(stream)) => {
                    // Best effort; small JSON-RPC frames should not wait for Nagle
                    if let Err(e) = stream.set_nodelay(true) {
                        log::debug!(
                            target: "tsunagi::connection",
                            "Could not disable Nagle on {}: {}",
                            address,
                            e
                        );
                    }
                    log::info!(
                        target: "tsunagi::connection",
                        "Connected to {} after {} attempt(s)",
                        address,
                        attempts
                    );
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    log::debug!(
                        target: "tsunagi::connection",
                        "Connect attempt {} to {} failed: {}",
                        attempts,
                        address,
                        e
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    // An attempt cut short by the deadline says less than a real refusal
                    if last_error.is_none() {
                        last_error = Some(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "connection attempt timed out",
                        ));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let delay = backoff.next_delay().min(deadline - now);
            tokio::select! {
                biased;
                _ = self.shared.closed.cancelled() => return Err(BridgeError::ConnectionClosed),
                _ = tokio::time::sleep(delay) => {}
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        let source = last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::TimedOut, "connection attempt timed out")
        });
        log::error!(
            target: "tsunagi::connection",
            "Unable to connect to the language server at {}: {}",
            address,
            source
        );
        Err(BridgeError::Connection {
            address,
            attempts,
            source,
        })
    }
}

/// Read half of the server connection.
pub struct ConnectionReader {
    inner: BufReader<BoxedRead>,
    shared: Arc<Shared>,
}

impl ConnectionReader {
    /// Block until one full frame has been read and decoded.
    ///
    /// # Errors
    /// `ConnectionClosed` when the peer ends the stream or the connection is
    /// closed locally; otherwise the codec's framing/decoding errors.
    pub async fn receive_frame(&mut self) -> BridgeResult<Message> {
        if self.shared.closed.is_cancelled() {
            return Err(BridgeError::ConnectionClosed);
        }

        let result = tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => Err(BridgeError::ConnectionClosed),
            result = codec::decode(&mut self.inner) => result,
        };

        if matches!(&result, Err(e) if e.is_disconnect()) {
            self.shared.mark_remote_closed();
        }
        result
    }

    /// Block until exactly `len` raw bytes are available.
    ///
    /// # Errors
    /// `ConnectionClosed` if the stream ends first or the connection is closed.
    pub async fn receive_exact(&mut self, len: usize) -> BridgeResult<Vec<u8>> {
        if self.shared.closed.is_cancelled() {
            return Err(BridgeError::ConnectionClosed);
        }

        let mut buf = vec![0u8; len];
        let result = tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => Err(BridgeError::ConnectionClosed),
            result = self.inner.read_exact(&mut buf) => result.map(|_| ()).map_err(classify_io_error),
        };

        match result {
            Ok(()) => Ok(buf),
            Err(e) => {
                if e.is_disconnect() {
                    self.shared.mark_remote_closed();
                }
                Err(e)
            }
        }
    }

    /// Whether the connection was closed through `ConnectionManager::close()`
    /// before either half saw the stream fail.
    pub fn closed_locally(&self) -> bool {
        self.shared.closed.is_cancelled() && !self.shared.lost.load(Ordering::SeqCst)
    }
}

/// Write half of the server connection.
pub struct ConnectionWriter {
    inner: BoxedWrite,
    shared: Arc<Shared>,
}

impl ConnectionWriter {
    /// Write all of `bytes` and flush.
    ///
    /// Partial writes are continued until every byte is written.
    ///
    /// Any failure while connected leaves the connection Closed; the stream
    /// position is unknown after a partial write.
    ///
    /// # Errors
    /// `ConnectionClosed` if the connection was closed or the peer is gone.
    pub async fn send(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        if self.shared.closed.is_cancelled() {
            return Err(BridgeError::ConnectionClosed);
        }

        let inner = &mut self.inner;
        let result = tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => Err(BridgeError::ConnectionClosed),
            result = async {
                inner.write_all(bytes).await?;
                inner.flush().await
            } => result.map_err(classify_io_error),
        };

        if result.is_err() {
            self.shared.mark_remote_closed();
        }
        result
    }
}
