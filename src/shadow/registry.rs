//! Process-wide client registry and timeout reaper
//!
//! Every live client is tracked in one bounded registry so a single reaper
//! can expire overdue requests for all of them. The reaper is a plain OS
//! thread, not a runtime task: timeouts must keep firing while the transport
//! is disconnected and regardless of which tokio runtime (if any) is still
//! alive, and its callbacks are synchronous.

use super::client::ClientCore;
use crate::error::ShadowError;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Reaper scan interval. A request with timeout `t` is expired somewhere in
/// `[t, t + tick]` after publish.
pub const REAPER_TICK: Duration = Duration::from_secs(1);

/// Bounded set of live clients, held weakly.
pub(crate) struct ClientRegistry {
    clients: Mutex<Vec<Weak<ClientCore>>>,
}

static REGISTRY: OnceLock<ClientRegistry> = OnceLock::new();

/// The process-wide registry. The reaper thread starts on first use.
pub(crate) fn global() -> &'static ClientRegistry {
    REGISTRY.get_or_init(|| {
        spawn_reaper();
        ClientRegistry::new()
    })
}

fn spawn_reaper() {
    std::thread::Builder::new()
        .name("shadow-reaper".to_string())
        .spawn(|| loop {
            std::thread::sleep(REAPER_TICK);
            let expired = global().reap_all(Instant::now());
            if expired > 0 {
                debug!(expired, "reaper expired overdue requests");
            }
        })
        .expect("failed to spawn shadow reaper thread");
}

impl ClientRegistry {
    pub(crate) fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Add a client, pruning entries whose clients are gone. `capacity` is the
    /// adding client's configured process-wide bound.
    pub(crate) fn add(
        &self,
        client: &Arc<ClientCore>,
        capacity: usize,
    ) -> Result<(), ShadowError> {
        let mut clients = self.clients.lock().expect("client registry lock poisoned");
        clients.retain(|entry| entry.strong_count() > 0);
        if clients.len() >= capacity {
            return Err(ShadowError::TooManyClients { capacity });
        }
        clients.push(Arc::downgrade(client));
        trace!(device = %client.device_name, live = clients.len(), "client registered");
        Ok(())
    }

    /// Remove a client. Missing entries are fine; drop order is not fixed.
    pub(crate) fn remove(&self, client: &Arc<ClientCore>) {
        let mut clients = self.clients.lock().expect("client registry lock poisoned");
        clients.retain(|entry| match entry.upgrade() {
            Some(live) => !Arc::ptr_eq(&live, client),
            None => false,
        });
    }

    /// Visit every live client. The registry lock is held only long enough to
    /// snapshot; visiting happens outside it so a visit cannot re-enter the
    /// registry or block other clients from being added.
    pub(crate) fn for_each<F: FnMut(&Arc<ClientCore>)>(&self, mut visit: F) {
        let snapshot: Vec<Arc<ClientCore>> = {
            let clients = self.clients.lock().expect("client registry lock poisoned");
            clients.iter().filter_map(Weak::upgrade).collect()
        };
        for client in &snapshot {
            visit(client);
        }
    }

    /// One reaper pass over every live client's in-flight table.
    pub(crate) fn reap_all(&self, now: Instant) -> usize {
        let mut expired = 0;
        self.for_each(|client| {
            expired += client.inflight.reap(now);
        });
        expired
    }
}
