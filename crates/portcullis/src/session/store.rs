//! Token-keyed session store with idle eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handle::Session;
use crate::{Error, Result};

/// Configuration for the session store.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions idle longer than this, with no tunnels, are invalidated.
    pub session_timeout: Duration,
    /// Interval between eviction sweeps.
    pub eviction_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(60 * 60),
            eviction_interval: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    /// Checks that the configuration can drive the eviction task.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if either duration is zero.
    pub fn validate(&self) -> Result<()> {
        if self.session_timeout.is_zero() {
            return Err(Error::Configuration(
                "session timeout must be greater than zero".to_string(),
            ));
        }
        if self.eviction_interval.is_zero() {
            return Err(Error::Configuration(
                "eviction interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Maps auth tokens to sessions and evicts idle ones.
pub struct SessionStore<U, C> {
    /// Sessions indexed by auth token.
    sessions: RwLock<HashMap<String, Arc<Session<U, C>>>>,
    /// Configuration.
    config: SessionConfig,
    /// Eviction task handle (if started).
    eviction_handle: RwLock<Option<JoinHandle<()>>>,
}

impl<U, C> SessionStore<U, C> {
    /// Creates an empty store with the given configuration.
    pub fn new(config: SessionConfig) -> Self {
        info!(
            timeout_secs = config.session_timeout.as_secs(),
            interval_secs = config.eviction_interval.as_secs(),
            "Session store initialized"
        );
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            eviction_handle: RwLock::new(None),
        }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Stores a session under the given token.
    ///
    /// Returns the session previously stored under that token, if any. The
    /// replaced session is not invalidated.
    pub fn put(
        &self,
        token: impl Into<String>,
        session: Arc<Session<U, C>>,
    ) -> Option<Arc<Session<U, C>>> {
        let token = token.into();
        let mut sessions = self.sessions.write();
        let previous = sessions.insert(token, session);
        debug!(
            replaced = previous.is_some(),
            total_sessions = sessions.len(),
            "Session stored"
        );
        previous
    }

    /// Returns the session stored under the given token.
    ///
    /// Lookup does not count as access.
    pub fn get(&self, token: &str) -> Option<Arc<Session<U, C>>> {
        self.sessions.read().get(token).cloned()
    }

    /// Removes the session stored under the given token without
    /// invalidating it.
    pub fn remove(&self, token: &str) -> Option<Arc<Session<U, C>>> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(token);
        if removed.is_some() {
            debug!(remaining_sessions = sessions.len(), "Session removed");
        }
        removed
    }

    /// Removes and invalidates the session stored under the given token.
    ///
    /// Returns false if no session was stored under the token.
    pub fn invalidate(&self, token: &str) -> bool {
        match self.remove(token) {
            Some(session) => {
                let report = session.invalidate();
                info!(
                    closed = report.closed,
                    failed = report.failures.len(),
                    "Session logged out"
                );
                true
            }
            None => false,
        }
    }

    /// Returns the number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if no sessions are stored.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Returns all stored tokens.
    pub fn tokens(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Invalidates sessions that have been idle longer than the timeout.
    ///
    /// Sessions with registered tunnels are in use and never evicted.
    /// Returns the number of sessions evicted.
    pub fn evict_idle(&self) -> usize {
        let timeout = self.config.session_timeout;
        let expired: Vec<(String, Arc<Session<U, C>>)> = {
            let mut sessions = self.sessions.write();
            let stale: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| !session.has_tunnels() && session.idle_time() >= timeout)
                .map(|(token, _)| token.clone())
                .collect();

            stale
                .into_iter()
                .filter_map(|token| sessions.remove(&token).map(|session| (token, session)))
                .collect()
        };

        // Closing tunnels may block; the store lock is already released.
        for (_, session) in &expired {
            warn!(
                idle_secs = session.idle_time().as_secs(),
                timeout_secs = timeout.as_secs(),
                "Session timed out due to inactivity"
            );
            session.invalidate();
        }

        if !expired.is_empty() {
            info!(
                evicted = expired.len(),
                remaining_sessions = self.len(),
                "Idle session eviction complete"
            );
        }

        expired.len()
    }

    /// Removes and invalidates every stored session.
    ///
    /// Stops the eviction task first. Returns the number of sessions torn
    /// down.
    pub fn shutdown(&self) -> usize {
        self.stop_eviction_task();

        let drained: Vec<Arc<Session<U, C>>> = {
            let mut sessions = self.sessions.write();
            sessions.drain().map(|(_, session)| session).collect()
        };

        info!(session_count = drained.len(), "Invalidating all sessions");
        for session in &drained {
            session.invalidate();
        }

        drained.len()
    }

    /// Stops the eviction task if running.
    pub fn stop_eviction_task(&self) {
        if let Some(handle) = self.eviction_handle.write().take() {
            handle.abort();
            debug!("Session eviction task stopped");
        }
    }
}

impl<U, C> SessionStore<U, C>
where
    U: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    /// Starts the background eviction task.
    ///
    /// The task runs [`evict_idle`](Self::evict_idle) every
    /// `eviction_interval`. Starting it again replaces the running task.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid.
    pub fn start_eviction_task(self: &Arc<Self>) -> Result<()> {
        self.config.validate()?;

        let weak = Arc::downgrade(self);
        let interval = self.config.eviction_interval;

        let handle = tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            // The first tick completes immediately.
            interval_timer.tick().await;

            loop {
                interval_timer.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                store.evict_idle();
            }
        });

        if let Some(previous) = self.eviction_handle.write().replace(handle) {
            previous.abort();
        }
        debug!(
            interval_secs = interval.as_secs(),
            "Session eviction task started"
        );
        Ok(())
    }
}

impl<U, C> Drop for SessionStore<U, C> {
    fn drop(&mut self) {
        self.stop_eviction_task();
    }
}
