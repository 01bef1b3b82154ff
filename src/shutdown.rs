//! Termination signal handling shared by both binaries.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Resolves on SIGINT or SIGTERM (Ctrl-C only on non-Unix targets).
pub async fn signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

// ─── Stop flag ───────────────────────────────────────────────────

/// Process-wide stop flag. Once triggered it stays triggered, so a task
/// that subscribes late still sees it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal(self.tx.subscribe())
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One task's view of the stop flag.
#[derive(Debug)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Resolves once the flag is set, immediately if it already is.
    pub async fn recv(&mut self) {
        // An Err means every sender is gone, which also means stop
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}

/// A stop flag that is set when the process receives SIGINT or SIGTERM.
pub fn channel() -> Shutdown {
    let shutdown = Shutdown::new();
    let notify = shutdown.clone();
    tokio::spawn(async move {
        signal().await;
        notify.trigger();
    });
    shutdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn late_subscriber_sees_earlier_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(shutdown.is_triggered());

        let mut signal = shutdown.subscribe();
        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .expect("signal already set");
    }

    #[tokio::test]
    async fn waiting_subscribers_wake_on_trigger() {
        let shutdown = Shutdown::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let mut signal = shutdown.subscribe();
                tokio::spawn(async move { signal.recv().await })
            })
            .collect();

        tokio::task::yield_now().await;
        shutdown.trigger();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
