//! Delta handler registry
//!
//! Devices react to desired-state deltas by registering handlers, either for
//! the whole desired object or for a single property. The registry is
//! append-only; handlers live as long as the client and run in registration
//! order. Handlers are snapshotted under the lock and invoked after release,
//! which keeps user code off the registry mutex while the never-shrinking
//! vector preserves ordering.

use crate::error::ShadowError;
use crate::protocol::DeltaRejection;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Handler invoked when a delta covers its key.
///
/// Returning `Err` reports a user error back to the cloud on `delta/rejected`
/// and stops dispatch of the remaining handlers.
pub type DeltaHandlerFn = dyn Fn(Option<&str>, &Value) -> Result<(), DeltaRejection> + Send + Sync;

#[derive(Clone)]
struct DeltaHandler {
    /// `None` receives the entire desired object.
    key: Option<String>,
    callback: Arc<DeltaHandlerFn>,
}

/// Append-only, bounded collection of delta handlers.
pub struct DeltaRegistry {
    capacity: usize,
    handlers: Mutex<Vec<DeltaHandler>>,
}

impl DeltaRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Append a handler. Fails with `TooManyDeltaHandlers` at capacity.
    pub fn register<F>(&self, key: Option<&str>, callback: F) -> Result<(), ShadowError>
    where
        F: Fn(Option<&str>, &Value) -> Result<(), DeltaRejection> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.lock().expect("delta registry lock poisoned");
        if handlers.len() >= self.capacity {
            return Err(ShadowError::TooManyDeltaHandlers {
                capacity: self.capacity,
            });
        }
        handlers.push(DeltaHandler {
            key: key.map(str::to_string),
            callback: Arc::new(callback),
        });
        Ok(())
    }

    /// Dispatch a desired object to the handlers, in registration order.
    ///
    /// Keyless handlers receive the whole object; keyed handlers only run when
    /// their property is present, and receive that sub-object. The first
    /// handler to return a rejection short-circuits the rest.
    pub fn dispatch(&self, desired: &Value) -> Result<(), DeltaRejection> {
        let snapshot: Vec<DeltaHandler> = self
            .handlers
            .lock()
            .expect("delta registry lock poisoned")
            .clone();

        for handler in snapshot {
            match &handler.key {
                None => (handler.callback)(None, desired)?,
                Some(key) => {
                    if let Some(property) = desired.get(key) {
                        (handler.callback)(Some(key), property)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .expect("delta registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
