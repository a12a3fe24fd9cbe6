//! Session tracking for gateway logins.
//!
//! This module provides:
//! - [`Session`]: identity, granted contexts, live tunnels and activity for
//!   one login
//! - [`SessionStore`]: auth token to session map with idle eviction
//!
//! # Example
//!
//! ```rust,ignore
//! use portcullis::session::{Session, SessionConfig, SessionStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = SessionConfig {
//!     session_timeout: Duration::from_secs(3600),
//!     ..Default::default()
//! };
//! let store = Arc::new(SessionStore::new(config));
//! store.start_eviction_task()?;
//!
//! let session = Arc::new(Session::new(user, contexts));
//! store.put(token, session);
//! ```

mod handle;
mod store;

pub use handle::Session;
pub use store::{SessionConfig, SessionStore};
