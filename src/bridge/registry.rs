//! Request registry for correlating server responses with bus requests.
//!
//! The inbound bridge registers every request it writes; the outbound bridge
//! resolves the entry when the matching response arrives. Whatever is still
//! pending at teardown is drained and reported as abandoned.

use std::collections::HashMap;
use std::time::Instant;

use crate::bridge::protocol::MessageId;
use crate::error::{BridgeError, BridgeResult, LockResultExt};

/// Metadata of a request that was written to the server and awaits a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: MessageId,
    pub method: String,
    pub registered_at: Instant,
}

/// Thread-safe table of in-flight requests.
///
/// Shared between the two bridges behind an `Arc`. All state lives behind a
/// single mutex; no lock is held across an await point.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    pending: std::sync::Mutex<Pending>,
}

#[derive(Debug, Default)]
struct Pending {
    /// Entry plus its registration sequence number
    entries: HashMap<MessageId, (u64, PendingRequest)>,
    next_seq: u64,
}

impl RequestRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request.
    ///
    /// Must be called before the request is written so that a fast response
    /// always finds its entry.
    ///
    /// # Errors
    /// `DuplicateId` if a request with this id is already pending. The existing
    /// entry is left untouched.
    pub fn register(&self, id: MessageId, method: impl Into<String>) -> BridgeResult<()> {
        let mut pending = self.pending.lock().recover_poison("RequestRegistry::register");

        if pending.entries.contains_key(&id) {
            return Err(BridgeError::DuplicateId(id));
        }

        let entry = PendingRequest {
            id: id.clone(),
            method: method.into(),
            registered_at: Instant::now(),
        };
        let seq = pending.next_seq;
        pending.next_seq += 1;
        pending.entries.insert(id, (seq, entry));
        Ok(())
    }

    /// Remove and return the pending entry for `id`.
    ///
    /// # Errors
    /// `UnknownId` if `id` was never registered or was already resolved.
    pub fn resolve(&self, id: &MessageId) -> BridgeResult<PendingRequest> {
        let mut pending = self.pending.lock().recover_poison("RequestRegistry::resolve");
        pending
            .entries
            .remove(id)
            .map(|(_, entry)| entry)
            .ok_or_else(|| BridgeError::UnknownId(id.clone()))
    }

    /// Remove a pending request without resolving it.
    ///
    /// Used for cleanup when a registered request could not be written.
    /// Returns `true` if the request was pending.
    pub fn remove(&self, id: &MessageId) -> bool {
        let mut pending = self.pending.lock().recover_poison("RequestRegistry::remove");
        pending.entries.remove(id).is_some()
    }

    /// Whether a request with this id is pending.
    pub fn is_pending(&self, id: &MessageId) -> bool {
        let pending = self.pending.lock().recover_poison("RequestRegistry::is_pending");
        pending.entries.contains_key(id)
    }

    /// Number of pending requests.
    pub fn pending_count(&self) -> usize {
        let pending = self
            .pending
            .lock()
            .recover_poison("RequestRegistry::pending_count");
        pending.entries.len()
    }

    /// Remove every pending request, oldest first.
    ///
    /// Called at teardown so that abandoned requests can be reported.
    pub fn drain_all(&self) -> Vec<PendingRequest> {
        let mut pending = self.pending.lock().recover_poison("RequestRegistry::drain_all");
        let mut entries: Vec<_> = pending.entries.drain().map(|(_, entry)| entry).collect();
        drop(pending);

        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, entry)| entry).collect()
    }
}
