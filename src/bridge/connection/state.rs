//! Connection state machine for the server socket.

/// State of the byte-stream connection to the language server.
///
/// State transitions:
/// - Disconnected -> Connecting (connect called)
/// - Connecting -> Connected (an attempt succeeded)
/// - Connecting -> Disconnected (deadline passed, connect may be retried)
/// - Connected -> Closing -> Closed (local close)
/// - Connected -> Closed (peer closed the stream)
/// - Disconnected -> Closed (close before any connection was made)
///
/// Only the connection module mutates this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempted yet, or the last attempt timed out
    Disconnected,
    /// Retry loop in progress
    Connecting,
    /// Stream established; reads and writes allowed
    Connected,
    /// Local close in progress
    Closing,
    /// Terminal state
    Closed,
}
