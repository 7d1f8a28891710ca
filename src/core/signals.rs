//! Cross-task binary signals
//!
//! The monitor and the orchestrator communicate through exactly two
//! flags: a connectivity signal (written by the monitor) and a stop
//! signal (written by the run controller). Both are single-writer,
//! multi-reader, idempotent to set, and observable either by polling
//! or by awaiting an edge.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// An edge-observable binary flag backed by a watch channel.
///
/// Cloning produces another handle to the same flag. Writers call
/// [`set`](Signal::set)/[`clear`](Signal::clear); readers either poll
/// [`is_set`](Signal::is_set) or await [`wait_set`](Signal::wait_set).
#[derive(Debug, Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    /// Create a new, unset signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the flag. Idempotent.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Lower the flag. Idempotent.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    /// Current value.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to raw value changes.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Wait until the flag is raised, up to `timeout`.
    ///
    /// Returns true if the flag was (or became) set within the window.
    pub async fn wait_set(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return true;
        }
        tokio::time::timeout(timeout, async {
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear() {
        let signal = Signal::new();
        assert!(!signal.is_set());
        signal.set();
        signal.set();
        assert!(signal.is_set());
        signal.clear();
        assert!(!signal.is_set());
    }

    #[test]
    fn clones_share_state() {
        let signal = Signal::new();
        let other = signal.clone();
        signal.set();
        assert!(other.is_set());
    }

    #[tokio::test]
    async fn wait_set_observes_edge() {
        let signal = Signal::new();
        let writer = signal.clone();
        let waiter = tokio::spawn(async move { signal.wait_set(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.set();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_set_times_out() {
        let signal = Signal::new();
        assert!(!signal.wait_set(Duration::from_millis(50)).await);
    }
}
