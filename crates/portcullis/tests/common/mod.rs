#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use portcullis::{Error, Result, Session, Tunnel, TunnelExt, Uuid};

pub type TestSession = Session<String, String>;

/// How a [`MockTunnel`] responds to `close()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseBehavior {
    Succeed,
    Refuse,
    IoError,
}

/// Tunnel double that counts close attempts.
pub struct MockTunnel {
    uuid: Uuid,
    behavior: CloseBehavior,
    closes: AtomicUsize,
}

impl MockTunnel {
    pub fn new() -> Arc<Self> {
        Self::with_behavior(CloseBehavior::Succeed)
    }

    pub fn failing() -> Arc<Self> {
        Self::with_behavior(CloseBehavior::Refuse)
    }

    pub fn with_behavior(behavior: CloseBehavior) -> Arc<Self> {
        Self::with_uuid(Uuid::new_v4(), behavior)
    }

    pub fn with_uuid(uuid: Uuid, behavior: CloseBehavior) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            behavior,
            closes: AtomicUsize::new(0),
        })
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Tunnel for MockTunnel {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            CloseBehavior::Succeed => Ok(()),
            CloseBehavior::Refuse => Err(Error::TunnelClose {
                id: self.id(),
                reason: "backend refused".to_string(),
            }),
            CloseBehavior::IoError => Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "backend connection reset",
            ))),
        }
    }
}

pub fn test_session() -> TestSession {
    Session::new("U1".to_string(), vec!["C1".to_string()])
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
