//! Connection monitor
//!
//! Owns the physical channel for its whole life: opens it, performs the
//! handshake with retry, then watches device output for status markers
//! while servicing command/response exchanges submitted by the
//! transport handle. Channel I/O errors are never fatal; the monitor
//! closes the channel and reconnects until the stop signal is raised.
//!
//! Single-owner discipline: command exchanges run *inside* the monitor
//! task, so the orchestrator and the marker scanner can never race on
//! the same port.

use crate::core::channel::{Channel, ChannelError, ChannelFactory};
use crate::core::signals::Signal;
use crate::core::RunError;
use crate::core::transport::{CommandTransport, TransportConfig};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Known asynchronous device state changes, detected as substrings of
/// unsolicited output lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusMarker {
    /// Device finished rebooting.
    RebootComplete,
    /// A file upload is in progress.
    UploadInProgress,
    /// Device returned to its idle screen.
    DeviceIdle,
}

impl std::fmt::Display for StatusMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RebootComplete => write!(f, "reboot-complete"),
            Self::UploadInProgress => write!(f, "upload-in-progress"),
            Self::DeviceIdle => write!(f, "device-idle"),
        }
    }
}

/// A marker substring paired with the state change it indicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerPattern {
    /// Literal substring to look for in device output.
    pub text: String,
    /// Marker recorded when the substring is seen.
    pub marker: StatusMarker,
}

/// Timestamped record of observed status markers.
///
/// Written by the monitor, read by the orchestrator to resolve
/// deferred conditions within their settle window.
#[derive(Debug, Clone, Default)]
pub struct StatusLog {
    inner: Arc<RwLock<HashMap<StatusMarker, Instant>>>,
}

impl StatusLog {
    /// Record an observation of `marker` at the current instant.
    pub fn record(&self, marker: StatusMarker) {
        self.inner.write().insert(marker, Instant::now());
    }

    /// Whether `marker` has been observed at or after `since`.
    pub fn observed_since(&self, marker: StatusMarker, since: Instant) -> bool {
        self.inner
            .read()
            .get(&marker)
            .is_some_and(|seen| *seen >= since)
    }

    /// Most recent observation of `marker`, if any.
    pub fn last_seen(&self, marker: StatusMarker) -> Option<Instant> {
        self.inner.read().get(&marker).copied()
    }

    /// Forget all observations.
    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

/// Connection monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Command sent to probe the device during handshake.
    pub handshake_command: String,
    /// Regex a reply line must match for the handshake to succeed.
    pub handshake_pattern: String,
    /// Bare prompt token emitted by the device shell.
    pub prompt_token: String,
    /// Handshake attempts per connection cycle.
    pub max_attempts: u32,
    /// Reply window for one handshake attempt.
    pub attempt_timeout: Duration,
    /// Delay between handshake attempts and between reconnects.
    pub retry_delay: Duration,
    /// Upper bound on any single blocking wait; also the stop-signal
    /// polling latency. Must stay at or below one second.
    pub poll_interval: Duration,
    /// How often the input buffer is cleared while monitoring.
    pub housekeeping_interval: Duration,
    /// Status marker substrings.
    pub markers: Vec<MarkerPattern>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            handshake_command: "time_tick".to_string(),
            handshake_pattern: r"^\[time_tick\+ok\]\s*".to_string(),
            prompt_token: ">".to_string(),
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
            housekeeping_interval: Duration::from_secs(20),
            markers: vec![
                MarkerPattern {
                    text: "POST Check - Coin Bat.".to_string(),
                    marker: StatusMarker::RebootComplete,
                },
                MarkerPattern {
                    text: "File_TOTAL_CNT".to_string(),
                    marker: StatusMarker::UploadInProgress,
                },
                MarkerPattern {
                    text: "LCM State =  12".to_string(),
                    marker: StatusMarker::DeviceIdle,
                },
            ],
        }
    }
}

/// One command/response exchange submitted by a transport handle.
pub(crate) struct Exchange {
    pub command: String,
    pub settle: Duration,
    pub timeout: Duration,
    pub reply_tx: oneshot::Sender<Option<String>>,
}

/// Supervises one physical channel and surfaces connectivity as an
/// edge-triggered signal.
pub struct ConnectionMonitor {
    config: MonitorConfig,
    handshake_re: Regex,
    factory: Box<dyn ChannelFactory>,
    connectivity: Signal,
    stop: Signal,
    status: StatusLog,
    exchange_tx: mpsc::Sender<Exchange>,
    exchange_rx: mpsc::Receiver<Exchange>,
    last_sent: Option<String>,
}

impl ConnectionMonitor {
    /// Create a monitor. Fails if the handshake pattern is not a valid
    /// regular expression.
    pub fn new(
        config: MonitorConfig,
        factory: Box<dyn ChannelFactory>,
        connectivity: Signal,
        stop: Signal,
    ) -> Result<Self, regex::Error> {
        let handshake_re = Regex::new(&config.handshake_pattern)?;
        let (exchange_tx, exchange_rx) = mpsc::channel(8);
        Ok(Self {
            config,
            handshake_re,
            factory,
            connectivity,
            stop,
            status: StatusLog::default(),
            exchange_tx,
            exchange_rx,
            last_sent: None,
        })
    }

    /// Handle to the status marker log.
    pub fn status_log(&self) -> StatusLog {
        self.status.clone()
    }

    /// Create a transport handle that submits exchanges into this
    /// monitor's task.
    pub fn transport(&self, config: TransportConfig) -> CommandTransport {
        CommandTransport::new(self.exchange_tx.clone(), config)
    }

    /// Outer supervision loop. Opens the channel, handshakes, then
    /// watches it; on any failure the channel is closed and reopened
    /// after the retry delay. Exits only when the stop signal is set,
    /// always closing the channel first.
    pub async fn run(mut self) {
        info!("connection monitor started");
        loop {
            if self.stop.is_set() {
                break;
            }
            let mut channel = self.factory.create();
            if let Err(e) = channel.open().await {
                warn!("{}", RunError::ChannelOpenFailure(e.to_string()));
                self.pause(self.config.retry_delay).await;
                continue;
            }
            info!(endpoint = %channel.connection_info(), "channel open");

            if self.connect(channel.as_mut()).await {
                match self.supervise(channel.as_mut()).await {
                    Ok(()) => debug!("leaving channel"),
                    Err(e) => warn!(error = %e, "channel I/O failure, reconnecting"),
                }
            } else {
                warn!(
                    "{}",
                    RunError::HandshakeTimeout(format!(
                        "no handshake reply after {} attempts",
                        self.config.max_attempts
                    ))
                );
            }

            self.connectivity.clear();
            channel.close().await;
            if self.stop.is_set() {
                break;
            }
            self.pause(self.config.retry_delay).await;
        }
        self.connectivity.clear();
        info!("connection monitor stopped");
    }

    /// Attempt the handshake on an open channel.
    ///
    /// Sends the handshake command once per attempt and reads lines
    /// until the attempt timeout elapses, discarding blanks and the
    /// bare prompt. Raises the connectivity signal and returns true on
    /// the first line matching the handshake pattern; returns false
    /// after all attempts are exhausted or the stop signal is raised.
    pub async fn connect(&mut self, channel: &mut dyn Channel) -> bool {
        for attempt in 1..=self.config.max_attempts {
            if self.stop.is_set() {
                return false;
            }
            channel.clear_input();
            if let Err(e) = channel.write_line(&self.config.handshake_command).await {
                warn!(attempt, error = %e, "handshake write failed");
                self.pause(self.config.retry_delay).await;
                continue;
            }
            self.last_sent = Some(self.config.handshake_command.clone());

            let deadline = Instant::now() + self.config.attempt_timeout;
            loop {
                let now = Instant::now();
                if now >= deadline || self.stop.is_set() {
                    break;
                }
                let window = (deadline - now).min(self.config.poll_interval);
                match channel.read_line(window).await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() || trimmed == self.config.prompt_token {
                            continue;
                        }
                        if self.handshake_re.is_match(&line) {
                            info!(attempt, "handshake succeeded");
                            self.connectivity.set();
                            return true;
                        }
                        // Not the handshake reply; still worth scanning.
                        self.record_markers(&line);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(attempt, error = %e, "handshake read failed");
                        break;
                    }
                }
            }
            debug!(
                attempt,
                max = self.config.max_attempts,
                "handshake attempt timed out"
            );
            self.pause(self.config.retry_delay).await;
        }
        false
    }

    /// Inner loop: scan unsolicited output for status markers, filter
    /// echoes, service queued exchanges, and clear the input buffer on
    /// the housekeeping interval. Returns on stop, loss of
    /// connectivity, or a channel I/O error.
    async fn supervise(&mut self, channel: &mut dyn Channel) -> Result<(), ChannelError> {
        let mut last_housekeeping = Instant::now();
        loop {
            if self.stop.is_set() || !self.connectivity.is_set() {
                return Ok(());
            }
            if last_housekeeping.elapsed() >= self.config.housekeeping_interval {
                channel.clear_input();
                last_housekeeping = Instant::now();
            }
            if let Ok(exchange) = self.exchange_rx.try_recv() {
                self.serve_exchange(channel, exchange).await?;
                continue;
            }
            match channel.read_line(self.config.poll_interval).await {
                Ok(Some(line)) => {
                    if self.is_noise(&line) {
                        debug!(%line, "ignored echo");
                    } else if !self.record_markers(&line) {
                        debug!(%line, "device output");
                    }
                }
                Ok(None) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one command/response exchange on behalf of the transport.
    ///
    /// The requester always gets an answer: the first non-noise,
    /// non-marker line, or `None` on timeout or I/O failure. I/O
    /// failures additionally bubble up so the outer loop reconnects.
    async fn serve_exchange(
        &mut self,
        channel: &mut dyn Channel,
        exchange: Exchange,
    ) -> Result<(), ChannelError> {
        let Exchange {
            command,
            settle,
            timeout,
            reply_tx,
        } = exchange;

        debug!(%command, "sending command");
        if let Err(e) = channel.write_line(&command).await {
            let _ = reply_tx.send(None);
            return Err(e);
        }
        self.last_sent = Some(command);
        tokio::time::sleep(settle).await;

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                let _ = reply_tx.send(None);
                return Ok(());
            }
            let window = (deadline - now).min(self.config.poll_interval);
            match channel.read_line(window).await {
                Ok(Some(line)) => {
                    if self.is_noise(&line) {
                        debug!(%line, "ignored echo");
                        continue;
                    }
                    if self.record_markers(&line) {
                        continue;
                    }
                    debug!(reply = %line, "reply received");
                    let _ = reply_tx.send(Some(line));
                    return Ok(());
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = reply_tx.send(None);
                    return Err(e);
                }
            }
        }
    }

    /// A line is noise when it is blank, the bare prompt token, or an
    /// exact repeat of the last non-status line transmitted.
    fn is_noise(&self, line: &str) -> bool {
        let trimmed = line.trim();
        trimmed.is_empty()
            || trimmed == self.config.prompt_token
            || self.last_sent.as_deref() == Some(trimmed)
    }

    /// Record every marker whose substring appears in `line`. Returns
    /// true when at least one matched.
    fn record_markers(&self, line: &str) -> bool {
        let mut matched = false;
        for pattern in &self.config.markers {
            if line.contains(&pattern.text) {
                info!(marker = %pattern.marker, "status marker observed");
                self.status.record(pattern.marker);
                matched = true;
            }
        }
        matched
    }

    /// Sleep that wakes early when the stop signal is raised.
    async fn pause(&self, duration: Duration) {
        let _ = self.stop.wait_set(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Channel that answers the handshake only from the nth write on.
    struct FlakyHandshakeChannel {
        writes: Arc<AtomicUsize>,
        succeed_from: usize,
        pending: Vec<String>,
    }

    impl FlakyHandshakeChannel {
        fn new(succeed_from: usize, writes: Arc<AtomicUsize>) -> Self {
            Self {
                writes,
                succeed_from,
                pending: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Channel for FlakyHandshakeChannel {
        async fn open(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn close(&mut self) {}

        fn is_open(&self) -> bool {
            true
        }

        async fn write_line(&mut self, _line: &str) -> Result<(), ChannelError> {
            let count = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
            if count >= self.succeed_from {
                self.pending.push(">".to_string());
                self.pending.push("[time_tick+ok]".to_string());
            }
            Ok(())
        }

        async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, ChannelError> {
            if self.pending.is_empty() {
                tokio::time::sleep(timeout).await;
                return Ok(None);
            }
            Ok(Some(self.pending.remove(0)))
        }

        fn clear_input(&mut self) {}

        fn connection_info(&self) -> String {
            "scripted".to_string()
        }
    }

    struct NoopFactory;

    impl ChannelFactory for NoopFactory {
        fn create(&self) -> Box<dyn Channel> {
            Box::new(FlakyHandshakeChannel::new(1, Arc::new(AtomicUsize::new(0))))
        }
    }

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            attempt_timeout: Duration::from_millis(100),
            retry_delay: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
            ..MonitorConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_succeeds_on_third_attempt() {
        let connectivity = Signal::new();
        let stop = Signal::new();
        let mut monitor = ConnectionMonitor::new(
            test_config(),
            Box::new(NoopFactory),
            connectivity.clone(),
            stop,
        )
        .unwrap();

        let mut edges = 0usize;
        let mut rx = connectivity.watch();

        let writes = Arc::new(AtomicUsize::new(0));
        let mut channel = FlakyHandshakeChannel::new(3, writes.clone());
        assert!(monitor.connect(&mut channel).await);

        while rx.has_changed().unwrap_or(false) {
            rx.borrow_and_update();
            edges += 1;
        }
        assert_eq!(writes.load(Ordering::SeqCst), 3);
        assert_eq!(edges, 1);
        assert!(connectivity.is_set());
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_gives_up_after_max_attempts() {
        let connectivity = Signal::new();
        let stop = Signal::new();
        let mut monitor = ConnectionMonitor::new(
            test_config(),
            Box::new(NoopFactory),
            connectivity.clone(),
            stop,
        )
        .unwrap();

        let writes = Arc::new(AtomicUsize::new(0));
        // Never succeeds within the configured five attempts.
        let mut channel = FlakyHandshakeChannel::new(100, writes.clone());
        assert!(!monitor.connect(&mut channel).await);
        assert_eq!(writes.load(Ordering::SeqCst), 5);
        assert!(!connectivity.is_set());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_handshake() {
        let connectivity = Signal::new();
        let stop = Signal::new();
        stop.set();
        let mut monitor = ConnectionMonitor::new(
            test_config(),
            Box::new(NoopFactory),
            connectivity,
            stop,
        )
        .unwrap();

        let writes = Arc::new(AtomicUsize::new(0));
        let mut channel = FlakyHandshakeChannel::new(1, writes.clone());
        assert!(!monitor.connect(&mut channel).await);
        assert_eq!(writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn noise_filtering() {
        let connectivity = Signal::new();
        let stop = Signal::new();
        let mut monitor = ConnectionMonitor::new(
            MonitorConfig::default(),
            Box::new(NoopFactory),
            connectivity,
            stop,
        )
        .unwrap();

        assert!(monitor.is_noise(""));
        assert!(monitor.is_noise("  "));
        assert!(monitor.is_noise(">"));
        assert!(!monitor.is_noise("time_tick"));
        monitor.last_sent = Some("time_tick".to_string());
        assert!(monitor.is_noise("time_tick"));
        assert!(!monitor.is_noise("[time_tick+ok]"));
    }

    #[tokio::test]
    async fn marker_recording() {
        let connectivity = Signal::new();
        let stop = Signal::new();
        let monitor = ConnectionMonitor::new(
            MonitorConfig::default(),
            Box::new(NoopFactory),
            connectivity,
            stop,
        )
        .unwrap();
        let log = monitor.status_log();
        let before = Instant::now();

        assert!(monitor.record_markers("POST Check - Coin Bat. OK"));
        assert!(monitor.record_markers("File_TOTAL_CNT = 3"));
        assert!(!monitor.record_markers("unrelated chatter"));

        assert!(log.observed_since(StatusMarker::RebootComplete, before));
        assert!(log.observed_since(StatusMarker::UploadInProgress, before));
        assert!(!log.observed_since(StatusMarker::DeviceIdle, before));
    }
}
