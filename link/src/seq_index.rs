//! Sequenced request index.
//!
//! Tracks every outbound operation awaiting a terminal server response
//! (ack, error, reply, or map response), keyed by its sequence number.
//! Entries are removed exactly once: either by the matching response, by
//! the request timer, or by a bulk drain on disconnect. Whoever removes an
//! entry owns its completion; everybody else observes `None` and does
//! nothing.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::task::AbortHandle;

use crate::{
    error::RelayLinkError,
    models::{Completion, CompletionCallback, Message},
};

/// Variant-specific state of a pending operation.
#[derive(Debug, Clone)]
pub enum PendingKind {
    Publish {
        message: Message,
    },
    MapOperation {
        map: String,
        key: Option<String>,
    },
    SendRequest {
        message: Message,
        timeout: Duration,
        /// Request timer. Aborted when a reply claims the entry first.
        timer: Option<AbortHandle>,
    },
    SendReply {
        reply: Message,
    },
}

/// An outbound operation awaiting a terminal response.
#[derive(Clone)]
pub struct PendingRequest {
    pub seq: u64,
    /// Pre-encoded envelope text, resent verbatim on session resume.
    pub envelope: String,
    pub callback: Option<CompletionCallback>,
    pub kind: PendingKind,
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("seq", &self.seq)
            .field("envelope", &self.envelope)
            .field("callback", &self.callback.is_some())
            .field("kind", &self.kind)
            .finish()
    }
}

impl PendingRequest {
    pub fn new(seq: u64, envelope: String, callback: Option<CompletionCallback>, kind: PendingKind) -> Self {
        Self {
            seq,
            envelope,
            callback,
            kind,
        }
    }

    /// Abort the request timer, if any.
    pub fn cancel_timer(&self) {
        if let PendingKind::SendRequest {
            timer: Some(handle),
            ..
        } = &self.kind
        {
            handle.abort();
        }
    }

    /// Whether handing the frame to the transport completes the operation
    /// when the session runs without QoS. Requests and map operations
    /// always wait for their response.
    pub fn completes_on_write(&self) -> bool {
        matches!(self.kind, PendingKind::Publish { .. } | PendingKind::SendReply { .. })
    }

    /// The success payload for a write-only completion (publish without QoS,
    /// or an ACK without body).
    pub fn default_completion(&self) -> Completion {
        match &self.kind {
            PendingKind::Publish { message } => Completion::Published(message.clone()),
            PendingKind::SendRequest { message, .. } => Completion::Reply(message.clone()),
            PendingKind::SendReply { reply } => Completion::ReplySent(reply.clone()),
            PendingKind::MapOperation { map, key } => Completion::Map {
                map: map.clone(),
                key: key.clone(),
                value: None,
            },
        }
    }

    /// Deliver the terminal outcome.
    ///
    /// Returns the error back when there is no callback to receive it, so
    /// the caller can escalate it to the connection-level error handler.
    pub fn finish(
        self,
        outcome: Result<Completion, RelayLinkError>,
    ) -> Option<RelayLinkError> {
        self.cancel_timer();
        match (self.callback, outcome) {
            (Some(cb), outcome) => {
                crate::connection::invoke_guarded("completion", || cb(outcome));
                None
            },
            (None, Ok(_)) => None,
            (None, Err(e)) => Some(e),
        }
    }
}

/// Concurrent ordered map from sequence number to pending operation.
///
/// A single mutex guards every operation, so an insert racing a removal
/// (fast ack) or a snapshot racing a removal (resend on resume) can never
/// lose or duplicate an entry.
#[derive(Debug, Default)]
pub struct SequencedRequestIndex {
    entries: Mutex<BTreeMap<u64, PendingRequest>>,
}

impl SequencedRequestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, seq: u64, entry: PendingRequest) {
        if let Some(previous) = self.entries.lock().insert(seq, entry) {
            log::warn!("[relay-link] Replaced pending entry for seq {}", previous.seq);
        }
    }

    /// Point lookup without removal.
    pub fn get(&self, seq: u64) -> Option<PendingRequest> {
        self.entries.lock().get(&seq).cloned()
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.entries.lock().contains_key(&seq)
    }

    /// Remove and return the entry for `seq`, if still present.
    pub fn remove(&self, seq: u64) -> Option<PendingRequest> {
        self.entries.lock().remove(&seq)
    }

    /// Remove every entry, ordered by ascending seq.
    pub fn drain(&self) -> Vec<PendingRequest> {
        let entries = std::mem::take(&mut *self.entries.lock());
        entries.into_values().collect()
    }

    /// Copy every entry, ordered by ascending seq, leaving the index intact.
    pub fn snapshot(&self) -> Vec<PendingRequest> {
        self.entries.lock().values().cloned().collect()
    }

    /// Store the timer handle of a pending request. No-op when the entry is
    /// already gone; the caller then aborts the timer itself.
    pub fn attach_timer(&self, seq: u64, handle: AbortHandle) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&seq).map(|e| &mut e.kind) {
            Some(PendingKind::SendRequest { timer, .. }) => {
                *timer = Some(handle);
                true
            },
            _ => false,
        }
    }

    /// Sequence numbers currently pending, ascending.
    pub fn seqs(&self) -> Vec<u64> {
        self.entries.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
