// src/exec/cancel.rs

//! OS interrupt → cancellation callback bridge.
//!
//! Cancellation inside the engine is always an explicit
//! [`CancellationToken`]. This bridge is the thin adapter at the process
//! boundary: while installed, every SIGINT (Ctrl-C) invokes the supplied
//! callback. The callback must be idempotent.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Installed for the duration of one execution; deregisters on drop.
#[derive(Debug)]
pub struct CancellationBridge {
    stop: CancellationToken,
    interrupt_tx: mpsc::UnboundedSender<()>,
}

impl CancellationBridge {
    /// Install a bridge that calls `on_interrupt` on every interrupt.
    pub fn install<F>(on_interrupt: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let stop = CancellationToken::new();
        let (interrupt_tx, mut interrupt_rx) = mpsc::unbounded_channel::<()>();
        let on_interrupt = Arc::new(on_interrupt);

        {
            let stop = stop.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        received = interrupt_rx.recv() => match received {
                            Some(()) => on_interrupt(),
                            None => break,
                        },
                    }
                }
            });
        }

        spawn_signal_adapter(stop.clone(), interrupt_tx.clone());

        Self { stop, interrupt_tx }
    }

    /// Convenience: a bridge that cancels `token`.
    pub fn for_token(token: CancellationToken) -> Self {
        Self::install(move || {
            if !token.is_cancelled() {
                info!("interrupt received; cancelling execution");
            }
            token.cancel();
        })
    }

    /// Deliver an interrupt as if the OS had sent one.
    pub fn interrupt(&self) {
        let _ = self.interrupt_tx.send(());
    }

    /// Deregister the handler.
    pub fn stop(self) {
        self.stop.cancel();
    }
}

impl Drop for CancellationBridge {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(unix)]
fn spawn_signal_adapter(stop: CancellationToken, tx: mpsc::UnboundedSender<()>) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGINT; interrupt bridge inactive");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                received = sigint.recv() => {
                    if received.is_none() || tx.send(()).is_err() {
                        break;
                    }
                }
            }
        }
        debug!("interrupt adapter stopped");
    });
}

#[cfg(not(unix))]
fn spawn_signal_adapter(stop: CancellationToken, tx: mpsc::UnboundedSender<()>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        warn!(error = %e, "failed to listen for Ctrl+C; interrupt bridge inactive");
                        break;
                    }
                    if tx.send(()).is_err() {
                        break;
                    }
                }
            }
        }
        debug!("interrupt adapter stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn interrupt_cancels_token() {
        let token = CancellationToken::new();
        let bridge = CancellationBridge::for_token(token.clone());

        bridge.interrupt();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();

        // A second interrupt on an already-cancelled token is a no-op.
        bridge.interrupt();
        bridge.stop();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn stopped_bridge_ignores_interrupts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let bridge = CancellationBridge::install(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let tx = bridge.interrupt_tx.clone();
        bridge.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _ = tx.send(());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
