//! Command transport handle
//!
//! [`CommandTransport`] is the orchestrator's way onto the wire. It
//! does not hold the channel itself; each call submits an exchange
//! into the connection monitor's task, which owns the port and
//! serializes exchanges one at a time.

use crate::core::monitor::Exchange;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Fixed pause after writing a command, before the reply window.
    pub settle: Duration,
    /// Reply window for one command.
    pub reply_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            reply_timeout: Duration::from_secs(2),
        }
    }
}

/// Raised when the monitor task is gone and no exchange can ever be
/// serviced again. Unlike a missing reply, this is an infrastructure
/// fault and aborts the run.
#[derive(Debug, Error)]
#[error("transport unavailable: connection monitor is not running")]
pub struct TransportUnavailable;

/// Scheduling slack granted on top of the settle delay and reply window
/// before a pending exchange is abandoned as unanswered.
const EXCHANGE_GRACE: Duration = Duration::from_secs(1);

/// Sends one command line and waits for one reply line.
#[derive(Clone)]
pub struct CommandTransport {
    tx: mpsc::Sender<Exchange>,
    config: TransportConfig,
}

impl CommandTransport {
    pub(crate) fn new(tx: mpsc::Sender<Exchange>, config: TransportConfig) -> Self {
        Self { tx, config }
    }

    /// Send `command` and wait for a single reply line.
    ///
    /// Returns `Ok(None)` when nothing arrived within the reply window
    /// or the exchange hit an I/O error; both are reported to the
    /// caller as "no response". The wait is bounded: an exchange left
    /// unserviced (monitor busy reconnecting) is abandoned as "no
    /// response" too. Only a dead monitor task is an error.
    pub async fn send(&self, command: &str) -> Result<Option<String>, TransportUnavailable> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = Exchange {
            command: command.to_string(),
            settle: self.config.settle,
            timeout: self.config.reply_timeout,
            reply_tx,
        };
        if self.tx.send(exchange).await.is_err() {
            warn!(%command, "exchange queue closed");
            return Err(TransportUnavailable);
        }
        let deadline = self.config.settle + self.config.reply_timeout + EXCHANGE_GRACE;
        match tokio::time::timeout(deadline, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportUnavailable),
            Err(_) => {
                warn!(%command, "exchange not serviced within its window");
                Ok(None)
            }
        }
    }
}
