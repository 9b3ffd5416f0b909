//! Shutdown coordination for the router.

use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Every background loop and the HTTP server hold a receiver; one trigger
/// stops them all. Clones share the same channel and flag.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Fire the signal. Returns `false` if it had already fired.
    pub fn trigger(&self) -> bool {
        let first = !self.triggered.swap(true, Ordering::SeqCst);
        if first {
            let _ = self.tx.send(());
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Loops that have not exited yet.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Wait for background tasks to finish, abandoning them after `grace`.
    /// Returns how many finished in time.
    pub async fn drain(tasks: Vec<JoinHandle<()>>, grace: Duration) -> usize {
        let total = tasks.len();
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        match tokio::time::timeout(grace, join_all(tasks)).await {
            Ok(results) => results.iter().filter(|r| r.is_ok()).count(),
            Err(_) => {
                let pending = aborts.iter().filter(|a| !a.is_finished()).count();
                tracing::warn!(pending, total, "Background tasks did not stop in time, aborting");
                aborts.iter().for_each(|a| a.abort());
                total - pending
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_every_subscriber_once() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.clone().subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        assert!(shutdown.trigger());
        assert!(!shutdown.clone().trigger());
        assert!(shutdown.is_triggered());
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
        assert!(a.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_stragglers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        let polite = tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        let stubborn = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        shutdown.trigger();
        let finished = Shutdown::drain(vec![polite, stubborn], Duration::from_secs(5)).await;
        assert_eq!(finished, 1);
    }
}
