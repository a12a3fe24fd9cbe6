#![forbid(unsafe_code)]
// Allow pedantic lints for early-stage API ergonomics.
#![allow(clippy::doc_markdown)]
#![allow(clippy::nursery)]
#![allow(clippy::pedantic)]

//! # Portcullis
//!
//! Per-user session bookkeeping for remote-access gateways.
//!
//! A [`Session`] is created once per login and carries:
//! - the authenticated identity and the backend contexts granted to it
//! - every live [`Tunnel`] multiplexed under the login
//! - a last-access timestamp used for idle eviction
//!
//! The [`SessionStore`] maps auth tokens to sessions and runs the idle
//! eviction sweep.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use portcullis::{Session, SessionConfig, SessionStore};
//!
//! let store = Arc::new(SessionStore::new(SessionConfig::default()));
//! store.start_eviction_task()?;
//!
//! let session = Arc::new(Session::new(user, vec![context]));
//! store.put(token.clone(), Arc::clone(&session));
//!
//! // On connect
//! session.add_tunnel(tunnel);
//! session.access();
//!
//! // On logout
//! store.invalidate(&token);
//! ```

use std::io;

use thiserror::Error;

pub mod session;
pub mod tunnel;

pub use session::{Session, SessionConfig, SessionStore};
pub use tunnel::{InvalidationReport, Tunnel, TunnelCloseFailure, TunnelExt, TunnelRegistry};

// Re-export for tunnel implementors
pub use uuid::Uuid;

// -----------------------------------------------------------------------------
// Error Types
// -----------------------------------------------------------------------------

/// Errors that can occur while managing gateway sessions.
///
/// Only tunnel implementations and session store configuration produce
/// errors. [`Session::invalidate`] absorbs tunnel close failures and reports
/// them through [`InvalidationReport`] instead.
///
/// # Recovery Strategies
///
/// | Error Variant | Recovery Strategy |
/// |--------------|-------------------|
/// | [`Io`](Error::Io) | Log and drop the tunnel |
/// | [`TunnelClose`](Error::TunnelClose) | Log and drop the tunnel |
/// | [`Configuration`](Error::Configuration) | Fix the session configuration |
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error raised by a tunnel's underlying transport.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A tunnel failed to close.
    ///
    /// Carries the tunnel id and the reason reported by the tunnel.
    #[error("failed to close tunnel {id}: {reason}")]
    TunnelClose {
        /// Id of the tunnel that failed.
        id: String,
        /// Reason reported by the tunnel implementation.
        reason: String,
    },

    /// Session configuration error.
    ///
    /// Occurs when a [`SessionConfig`] cannot drive the eviction task.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// A specialized [`Result`] type for portcullis operations.
pub type Result<T> = std::result::Result<T, Error>;
