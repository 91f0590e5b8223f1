//! Error handling types for tsunagi
//!
//! This module provides the error taxonomy shared by every bridge component.

use std::sync::PoisonError;
use thiserror::Error;

use crate::bridge::protocol::MessageId;

/// Comprehensive error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Could not connect to the language server within the configured bound
    #[error("Could not connect to {address} after {attempts} attempt(s): {source}")]
    Connection {
        address: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the connection, or it was closed locally
    #[error("Connection closed")]
    ConnectionClosed,

    /// Frame header absent or malformed
    #[error("Framing error: {message}")]
    Framing { message: String },

    /// Stream ended before the declared frame was complete
    #[error("Truncated stream: expected {expected} bytes, received {received}")]
    TruncatedStream { expected: usize, received: usize },

    /// Frame body is not a valid JSON-RPC message
    #[error("Decoding error: {0}")]
    Decoding(#[source] serde_json::Error),

    /// Message could not be composed or serialized
    #[error("Encoding error: {message}")]
    Encoding { message: String },

    /// A request with this id is already pending
    #[error("Duplicate request id: {0}")]
    DuplicateId(MessageId),

    /// No pending request with this id
    #[error("Unknown request id: {0}")]
    UnknownId(MessageId),

    /// A startup step failed
    #[error("Startup failed during {step}: {source}")]
    Startup {
        step: &'static str,
        #[source]
        source: Box<BridgeError>,
    },

    /// Teardown did not complete cleanly
    #[error("Shutdown error: {message}")]
    Shutdown { message: String },

    /// Server process could not be spawned or terminated
    #[error("Process error for '{command}': {source}")]
    Process {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Bus collaborator failure
    #[error("Bus error: {message}")]
    Bus { message: String },

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Helper trait to recover from PoisonError instead of propagating it
pub trait LockResultExt<T> {
    /// Recover the guard from a poisoned lock, logging which operation hit it.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "tsunagi::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}

/// Helper functions for common error patterns
impl BridgeError {
    /// Create a framing error
    pub fn framing(message: impl Into<String>) -> Self {
        BridgeError::Framing {
            message: message.into(),
        }
    }

    /// Create an encoding error
    pub fn encoding(message: impl Into<String>) -> Self {
        BridgeError::Encoding {
            message: message.into(),
        }
    }

    /// Create a bus error
    pub fn bus(message: impl Into<String>) -> Self {
        BridgeError::Bus {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        BridgeError::InvalidState {
            message: message.into(),
        }
    }

    /// Wrap an error as the failure of a named startup step
    pub fn startup(step: &'static str, source: BridgeError) -> Self {
        BridgeError::Startup {
            step,
            source: Box::new(source),
        }
    }

    /// Whether a per-message failure leaves the byte stream intact.
    ///
    /// Only failures detected before any byte of the frame was written qualify.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::Encoding { .. } | BridgeError::DuplicateId(_) | BridgeError::UnknownId(_)
        )
    }

    /// Whether the error means the remote end of the stream is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionClosed | BridgeError::TruncatedStream { .. }
        )
    }
}
