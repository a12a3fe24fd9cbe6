//! Tunnel handles and the concurrent per-session tunnel registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{Error, Result};

/// A live transport connection multiplexed under a session.
///
/// Implemented by the gateway's transport layer. The registry only needs a
/// stable identifier and a way to close the connection.
pub trait Tunnel: Send + Sync {
    /// Returns the unique identifier of this tunnel.
    fn uuid(&self) -> Uuid;

    /// Closes the tunnel.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying transport could not be closed.
    fn close(&self) -> Result<()>;
}

/// Registry key helpers for every [`Tunnel`].
///
/// Blanket-implemented, so the key is always derived from
/// [`Tunnel::uuid`] and cannot be overridden by an implementor.
pub trait TunnelExt {
    /// Returns the registry key for this tunnel.
    fn id(&self) -> String;
}

impl<T: Tunnel + ?Sized> TunnelExt for T {
    fn id(&self) -> String {
        self.uuid().to_string()
    }
}

/// A tunnel close that failed during teardown.
#[derive(Debug)]
pub struct TunnelCloseFailure {
    /// Id of the tunnel that could not be closed.
    pub id: String,
    /// Error returned by the tunnel.
    pub error: Error,
}

/// Outcome of closing every tunnel registered with a session.
///
/// Teardown never fails as a whole; individual failures are collected here.
#[derive(Debug, Default)]
pub struct InvalidationReport {
    /// Number of tunnels closed cleanly.
    pub closed: usize,
    /// Tunnels whose close returned an error.
    pub failures: Vec<TunnelCloseFailure>,
}

impl InvalidationReport {
    /// Returns the number of close attempts made.
    pub fn attempted(&self) -> usize {
        self.closed + self.failures.len()
    }

    /// Returns true if every tunnel closed without error.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Concurrent map of tunnel id to tunnel handle.
///
/// Keys are always the hyphenated string form of the stored tunnel's UUID.
/// Each insert and remove is atomic; there are no cross-key transactions.
/// Connection handling code may register and unregister tunnels directly
/// through this type; changes are visible immediately to
/// [`Session::has_tunnels`](crate::Session::has_tunnels) and
/// [`Session::invalidate`](crate::Session::invalidate).
#[derive(Default)]
pub struct TunnelRegistry {
    tunnels: RwLock<HashMap<String, Arc<dyn Tunnel>>>,
}

impl TunnelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tunnel under its own id.
    ///
    /// Returns the tunnel previously registered under the same id, if any.
    /// The previous tunnel is not closed.
    pub fn insert(&self, tunnel: Arc<dyn Tunnel>) -> Option<Arc<dyn Tunnel>> {
        let id = tunnel.uuid().to_string();
        let mut tunnels = self.tunnels.write();
        let previous = tunnels.insert(id.clone(), tunnel);
        debug!(
            tunnel_id = %id,
            replaced = previous.is_some(),
            tunnels = tunnels.len(),
            "Tunnel registered"
        );
        previous
    }

    /// Unregisters the tunnel with the given id.
    pub fn remove(&self, id: &str) -> Option<Arc<dyn Tunnel>> {
        let mut tunnels = self.tunnels.write();
        let removed = tunnels.remove(id);
        if removed.is_some() {
            debug!(tunnel_id = %id, tunnels = tunnels.len(), "Tunnel unregistered");
        }
        removed
    }

    /// Returns the tunnel with the given id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Tunnel>> {
        self.tunnels.read().get(id).cloned()
    }

    /// Returns true if a tunnel is registered under the given id.
    pub fn contains(&self, id: &str) -> bool {
        self.tunnels.read().contains_key(id)
    }

    /// Returns the number of registered tunnels.
    pub fn len(&self) -> usize {
        self.tunnels.read().len()
    }

    /// Returns true if no tunnels are registered.
    pub fn is_empty(&self) -> bool {
        self.tunnels.read().is_empty()
    }

    /// Returns the ids of all registered tunnels.
    pub fn ids(&self) -> Vec<String> {
        self.tunnels.read().keys().cloned().collect()
    }

    /// Returns handles to all registered tunnels.
    pub fn snapshot(&self) -> Vec<Arc<dyn Tunnel>> {
        self.tunnels.read().values().cloned().collect()
    }

    /// Calls `f` for every registered tunnel.
    ///
    /// Iterates over a snapshot, so `f` may add or remove tunnels.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Arc<dyn Tunnel>),
    {
        for (id, tunnel) in self.entries() {
            f(&id, &tunnel);
        }
    }

    /// Attempts to close every registered tunnel.
    ///
    /// Each close is attempted independently. Failures are logged and
    /// collected in the returned report; they never stop the remaining
    /// closes. The registry lock is not held while closing, and tunnels are
    /// left registered.
    pub fn close_all(&self) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        for (id, tunnel) in self.entries() {
            match tunnel.close() {
                Ok(()) => {
                    debug!(tunnel_id = %id, "Tunnel closed");
                    report.closed += 1;
                }
                Err(error) => {
                    debug!(tunnel_id = %id, error = %error, "Unable to close tunnel");
                    report.failures.push(TunnelCloseFailure { id, error });
                }
            }
        }

        report
    }

    fn entries(&self) -> Vec<(String, Arc<dyn Tunnel>)> {
        self.tunnels
            .read()
            .iter()
            .map(|(id, tunnel)| (id.clone(), Arc::clone(tunnel)))
            .collect()
    }
}

impl fmt::Debug for TunnelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
