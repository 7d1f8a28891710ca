//! # Linetest Core Library
//!
//! A line-oriented serial acceptance-test engine for embedded devices:
//! - Connection supervision with handshake, retry, and reconnect
//! - Status-marker detection for asynchronous device state changes
//! - Command/response exchanges with per-condition settle delays
//! - Typed reply validation (equality, ranges, timestamps, MAC, rcode)
//! - Test orchestration state machine with per-step result records
//! - Run statistics and plain-text reporting
//!
//! ## Example
//!
//! ```rust,no_run
//! use linetest_core::{
//!     ConnectionMonitor, MonitorConfig, RunIdentity, SerialChannelConfig, Signal,
//!     TestOrchestrator, TransportConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connectivity = Signal::new();
//!     let stop = Signal::new();
//!     let factory = SerialChannelConfig::new("/dev/ttyUSB0", 115_200);
//!
//!     let monitor = ConnectionMonitor::new(
//!         MonitorConfig::default(),
//!         Box::new(factory),
//!         connectivity.clone(),
//!         stop.clone(),
//!     )?;
//!     let transport = monitor.transport(TransportConfig::default());
//!     let status = monitor.status_log();
//!     tokio::spawn(monitor.run());
//!
//!     let library = linetest_core::CommandLibrary::from_path("Command_Line.yml")?;
//!     let orchestrator = TestOrchestrator::new(
//!         transport,
//!         Arc::new(library),
//!         RunIdentity::default(),
//!         status,
//!         stop.clone(),
//!     );
//!
//!     connectivity
//!         .wait_set(std::time::Duration::from_secs(30))
//!         .await;
//!     let _ = orchestrator.state();
//!     stop.set();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::{CommandLibrary, ConfigError, RunParameters, TestPlans};
pub use crate::core::aggregate::{Outcome, ResultAggregator, RunStats, TestResult};
pub use crate::core::channel::{
    Channel, ChannelError, ChannelFactory, SerialChannel, SerialChannelConfig, SerialParity,
};
pub use crate::core::classify::{classify, Reply};
pub use crate::core::condition::{
    evaluate, Condition, ConditionError, DeferredKind, NonEmptyRcode, RcodeRule,
};
pub use crate::core::monitor::{
    ConnectionMonitor, MarkerPattern, MonitorConfig, StatusLog, StatusMarker,
};
pub use crate::core::orchestrator::{
    CommandEntry, CommandLookup, PlanLookup, RunIdentity, RunObserver, RunState, TestOrchestrator,
    TestStep,
};
pub use crate::core::report::{render_summary, ReportSink, TextReport};
pub use crate::core::signals::Signal;
pub use crate::core::transport::{CommandTransport, TransportConfig, TransportUnavailable};
pub use crate::core::RunError;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
