//! Shutdown coordination.
//!
//! # State Machine
//! ```text
//! Running → ShuttingDown → Stopped
//! ```
//!
//! # Design Decisions
//! - Only the first trigger starts shutdown; later triggers are no-ops
//! - Built on `watch` so late subscribers still observe the current phase

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    ShuttingDown,
    Stopped,
}

/// Coordinator for graceful shutdown.
///
/// All long-running tasks subscribe and stop once the phase leaves `Running`.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<ShutdownPhase>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ShutdownPhase::Running);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Start shutdown. Returns `true` only for the trigger that moved the
    /// state out of `Running`.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Running {
                *phase = ShutdownPhase::ShuttingDown;
                true
            } else {
                false
            }
        })
    }

    /// Mark shutdown finished.
    pub fn complete(&self) {
        self.tx.send_replace(ShutdownPhase::Stopped);
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half handed to tasks.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<ShutdownPhase>,
}

impl ShutdownListener {
    /// Resolve once shutdown has been triggered. Also resolves if the
    /// coordinator is dropped.
    pub async fn recv(&mut self) {
        let _ = self
            .rx
            .wait_for(|phase| *phase != ShutdownPhase::Running)
            .await;
    }
}
