//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT)
//! - Translate signals to internal events on a channel
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Every signal is delivered; deduplication is the consumer's job

use tokio::sync::mpsc;

/// Operator request to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

/// Start listening for stop signals.
pub fn listen() -> std::io::Result<mpsc::UnboundedReceiver<Interrupt>> {
    let (tx, rx) = mpsc::unbounded_channel();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    received = sigint.recv() => received.map(|_| Interrupt::Interrupt),
                    received = sigterm.recv() => received.map(|_| Interrupt::Terminate),
                };
                let Some(event) = event else { break };
                tracing::info!(signal = ?event, "Signal received");
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(signal = ?Interrupt::Interrupt, "Signal received");
            if tx.send(Interrupt::Interrupt).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Resolve on the first stop signal.
pub async fn wait_for_stop() {
    match listen() {
        Ok(mut rx) => {
            rx.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
