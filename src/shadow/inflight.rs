//! In-flight request table
//!
//! Correlates outbound requests with the reply, rejection or timeout that
//! resolves them. Entries are keyed by normalized request id in a mutex-guarded
//! map; removal under the lock is what makes the reply-vs-timeout race safe:
//! whichever side takes the entry out owns the only right to fire the callback.
//! Callbacks themselves run after the lock is released, so user code never
//! executes under the table mutex.

use crate::error::ShadowError;
use crate::protocol::{ShadowAck, ShadowAction};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Longest request id the table will key on, in characters; longer ids are
/// truncated.
pub const MAX_REQUEST_ID_LENGTH: usize = 64;

/// Callback resolved exactly once per request.
pub type ActionCallback = Box<dyn FnOnce(ShadowAction, ShadowAck) + Send + 'static>;

struct InFlightEntry {
    action: ShadowAction,
    created_at: Instant,
    timeout: Duration,
    callback: ActionCallback,
}

/// Bounded table of uncompleted requests.
pub struct InFlightTable {
    capacity: usize,
    entries: Mutex<HashMap<String, InFlightEntry>>,
}

/// Request ids compare case-insensitively and only on the first 64
/// characters. Bounding is by characters: an inbound id is cloud-supplied
/// and a byte cut could land inside a multibyte sequence.
fn normalize_request_id(request_id: &str) -> String {
    request_id
        .chars()
        .take(MAX_REQUEST_ID_LENGTH)
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

impl InFlightTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a request before it is published.
    ///
    /// Fails with `TooManyInFlightMessages` at capacity. Inserting an id that
    /// is already present is a caller bug; ids are fresh UUIDs.
    pub fn insert(
        &self,
        request_id: &str,
        action: ShadowAction,
        timeout_secs: u8,
        callback: ActionCallback,
    ) -> Result<(), ShadowError> {
        let entry = InFlightEntry {
            action,
            created_at: Instant::now(),
            timeout: Duration::from_secs(u64::from(timeout_secs)),
            callback,
        };

        let mut entries = self.entries.lock().expect("in-flight lock poisoned");
        if entries.len() >= self.capacity {
            return Err(ShadowError::TooManyInFlightMessages {
                capacity: self.capacity,
            });
        }
        let previous = entries.insert(normalize_request_id(request_id), entry);
        debug_assert!(previous.is_none(), "duplicate in-flight request id");
        Ok(())
    }

    /// Resolve a request with a reply ack.
    ///
    /// Returns false when no entry matches; an unmatched reply is a protocol
    /// anomaly worth a warning, not an error.
    pub fn complete(&self, request_id: &str, ack: ShadowAck) -> bool {
        let entry = {
            let mut entries = self.entries.lock().expect("in-flight lock poisoned");
            entries.remove(&normalize_request_id(request_id))
        };

        match entry {
            Some(entry) => {
                (entry.callback)(entry.action, ack);
                true
            }
            None => {
                warn!(request_id, "no in-flight request matching reply");
                false
            }
        }
    }

    /// Expire entries whose deadline has passed, firing their callbacks with
    /// a timeout ack. Returns the number of entries expired.
    pub fn reap(&self, now: Instant) -> usize {
        let expired: Vec<InFlightEntry> = {
            let mut entries = self.entries.lock().expect("in-flight lock poisoned");
            let overdue: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.created_at) > entry.timeout)
                .map(|(id, _)| id.clone())
                .collect();
            overdue
                .into_iter()
                .filter_map(|id| entries.remove(&id))
                .collect()
        };

        let count = expired.len();
        for entry in expired {
            warn!(action = %entry.action, "request timed out");
            (entry.callback)(entry.action, ShadowAck::Timeout);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("in-flight lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
