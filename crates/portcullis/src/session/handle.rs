//! The per-login session: identity, contexts, tunnels and activity.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::tunnel::{InvalidationReport, Tunnel, TunnelRegistry};

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// State tied to one authenticated login.
///
/// `U` is the authenticated identity and `C` a backend context granted to
/// it (one per authentication source). All methods take `&self`; share the
/// session between connection handlers with an `Arc`.
pub struct Session<U, C> {
    /// Authenticated identity; replaced on re-authentication.
    identity: RwLock<Arc<U>>,
    /// Backend contexts, replaced as a whole.
    contexts: RwLock<Arc<[C]>>,
    /// Live tunnels keyed by tunnel id.
    tunnels: TunnelRegistry,
    /// Milliseconds since the Unix epoch of the last `access()`.
    last_accessed: AtomicU64,
}

impl<U, C> Session<U, C> {
    /// Creates a session for the given identity and contexts.
    ///
    /// The creation time counts as the first access. `contexts` must not be
    /// empty.
    pub fn new(identity: U, contexts: Vec<C>) -> Self {
        debug_assert!(!contexts.is_empty(), "a session needs at least one context");
        Self {
            identity: RwLock::new(Arc::new(identity)),
            contexts: RwLock::new(contexts.into()),
            tunnels: TunnelRegistry::new(),
            last_accessed: AtomicU64::new(now_millis()),
        }
    }

    /// Returns the authenticated identity.
    pub fn identity(&self) -> Arc<U> {
        Arc::clone(&self.identity.read())
    }

    /// Replaces the authenticated identity.
    pub fn set_identity(&self, identity: U) {
        *self.identity.write() = Arc::new(identity);
    }

    /// Returns a read-only snapshot of the granted contexts.
    ///
    /// Later calls to [`set_contexts`](Self::set_contexts) do not affect a
    /// snapshot already handed out.
    pub fn contexts(&self) -> Arc<[C]> {
        Arc::clone(&self.contexts.read())
    }

    /// Replaces all granted contexts.
    pub fn set_contexts(&self, contexts: Vec<C>) {
        *self.contexts.write() = contexts.into();
    }

    /// Returns true if any tunnel is registered with this session.
    pub fn has_tunnels(&self) -> bool {
        !self.tunnels.is_empty()
    }

    /// Returns the number of registered tunnels.
    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }

    /// Returns the live tunnel registry.
    ///
    /// Changes made through the registry immediately affect
    /// [`has_tunnels`](Self::has_tunnels) and [`invalidate`](Self::invalidate).
    /// Tunnels not registered here still work but are not considered when
    /// deciding whether the session is in use.
    pub fn tunnels(&self) -> &TunnelRegistry {
        &self.tunnels
    }

    /// Registers a tunnel under its own id, replacing any tunnel with the
    /// same id.
    pub fn add_tunnel(&self, tunnel: Arc<dyn Tunnel>) {
        self.tunnels.insert(tunnel);
    }

    /// Unregisters the tunnel with the given id.
    ///
    /// Returns true if the tunnel was registered and has been removed.
    pub fn remove_tunnel(&self, id: &str) -> bool {
        self.tunnels.remove(id).is_some()
    }

    /// Marks the session as accessed now.
    ///
    /// Reads never count as access; the dispatcher must call this on every
    /// unit of session activity. The stored time never moves backwards, even
    /// if the wall clock does.
    pub fn access(&self) {
        self.last_accessed.fetch_max(now_millis(), Ordering::Relaxed);
    }

    /// Returns the time of the last access in milliseconds since the Unix
    /// epoch.
    pub fn last_accessed_time(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    /// Returns the time elapsed since the last access.
    pub fn idle_time(&self) -> Duration {
        Duration::from_millis(now_millis().saturating_sub(self.last_accessed_time()))
    }

    /// Closes every registered tunnel.
    ///
    /// Close failures are logged and reported, never propagated: one
    /// misbehaving tunnel must not keep the others open. The session does
    /// not mark itself invalid; the caller is expected to discard it.
    pub fn invalidate(&self) -> InvalidationReport {
        let report = self.tunnels.close_all();
        if report.is_clean() {
            debug!(closed = report.closed, "Session invalidated");
        } else {
            info!(
                closed = report.closed,
                failed = report.failures.len(),
                "Session invalidated with unclosed tunnels"
            );
        }
        report
    }
}

impl<U: fmt::Debug, C: fmt::Debug> fmt::Debug for Session<U, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity())
            .field("contexts", &self.contexts())
            .field("tunnels", &self.tunnels)
            .field("last_accessed", &self.last_accessed_time())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result, Uuid};

    struct NullTunnel(Uuid);

    impl Tunnel for NullTunnel {
        fn uuid(&self) -> Uuid {
            self.0
        }

        fn close(&self) -> Result<()> {
            Err(Error::TunnelClose {
                id: self.0.to_string(),
                reason: "already gone".to_string(),
            })
        }
    }

    fn test_session() -> Session<String, &'static str> {
        Session::new("alice".to_string(), vec!["postgres"])
    }

    #[test]
    fn test_session_new() {
        let before = now_millis();
        let session = test_session();

        assert_eq!(*session.identity(), "alice");
        assert_eq!(&*session.contexts(), &["postgres"]);
        assert!(!session.has_tunnels());
        assert!(session.last_accessed_time() >= before);
        assert!(session.last_accessed_time() <= now_millis());
    }

    #[test]
    fn test_session_set_identity() {
        let session = test_session();
        let old = session.identity();

        session.set_identity("bob".to_string());

        assert_eq!(*old, "alice");
        assert_eq!(*session.identity(), "bob");
    }

    #[test]
    fn test_session_contexts_snapshot() {
        let session = test_session();
        let snapshot = session.contexts();

        session.set_contexts(vec!["postgres", "ldap"]);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(&*session.contexts(), &["postgres", "ldap"]);
    }

    #[test]
    fn test_session_tunnels() {
        let session = test_session();
        let uuid = Uuid::new_v4();

        session.add_tunnel(Arc::new(NullTunnel(uuid)));
        assert!(session.has_tunnels());
        assert_eq!(session.tunnel_count(), 1);

        assert!(session.remove_tunnel(&uuid.to_string()));
        assert!(!session.has_tunnels());
        assert!(!session.remove_tunnel(&uuid.to_string()));
    }

    #[test]
    fn test_session_access_moves_forward() {
        let session = test_session();
        let first = session.last_accessed_time();

        std::thread::sleep(Duration::from_millis(20));
        session.access();

        assert!(session.last_accessed_time() >= first + 20);
        assert!(session.idle_time() < Duration::from_secs(1));
    }

    #[test]
    fn test_session_access_never_regresses() {
        let session = test_session();
        let future = now_millis() + 60_000;
        session.last_accessed.store(future, Ordering::Relaxed);

        session.access();

        assert_eq!(session.last_accessed_time(), future);
        assert_eq!(session.idle_time(), Duration::ZERO);
    }

    #[test]
    fn test_session_idle_time_grows_without_access() {
        let session = test_session();
        std::thread::sleep(Duration::from_millis(30));
        assert!(session.idle_time() >= Duration::from_millis(30));
    }

    #[test]
    fn test_session_invalidate_swallows_failures() {
        let session = test_session();
        session.add_tunnel(Arc::new(NullTunnel(Uuid::new_v4())));

        let report = session.invalidate();

        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, Error::TunnelClose { .. }));
        assert!(session.has_tunnels());
    }

    #[test]
    fn test_session_debug() {
        let session = test_session();
        let debug = format!("{session:?}");
        assert!(debug.contains("alice"));
        assert!(debug.contains("postgres"));
    }
}
