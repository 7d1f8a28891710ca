//! Core module containing the acceptance-test engine
//!
//! This module provides:
//! - Channel layer for the physical serial link
//! - Connection monitor with handshake, retry, and status markers
//! - Command transport (one command line out, one reply line in)
//! - Reply classification and typed condition evaluation
//! - Test orchestration state machine
//! - Result aggregation and report rendering
//! - Cross-task connectivity/stop signals

pub mod aggregate;
pub mod channel;
pub mod classify;
pub mod condition;
pub mod monitor;
pub mod orchestrator;
pub mod report;
pub mod signals;
pub mod transport;

use thiserror::Error;

/// Run-level error taxonomy.
///
/// Only `OrchestrationFault` aborts a run. The I/O variants are
/// recovered locally (retried by the monitor or recorded as a Fail
/// outcome), and the validation variants are recorded as Fail outcomes
/// with a descriptive message; `CommandNotFound` skips its step.
/// Unknown condition types are rejected when the library is loaded
/// (`config::ConfigError::UnknownConditionType`), so no run-time
/// variant exists for them.
#[derive(Debug, Error)]
pub enum RunError {
    /// The channel could not be opened.
    #[error("channel open failure: {0}")]
    ChannelOpenFailure(String),

    /// The handshake never succeeded within its window.
    #[error("handshake timeout: {0}")]
    HandshakeTimeout(String),

    /// No reply line arrived for a command.
    #[error("no response")]
    NoResponse,

    /// The reply prefix did not match the command's contract.
    #[error("prefix mismatch: expected '{expected}', got '{actual}'")]
    PrefixMismatch {
        /// Prefix the command library expects.
        expected: String,
        /// Prefix actually received.
        actual: String,
    },

    /// The reply payload failed condition validation.
    #[error("validation failed: expected {expected}, got '{actual}'")]
    ValidationFailure {
        /// Description of the expected value.
        expected: String,
        /// Payload actually received.
        actual: String,
    },

    /// A test step referenced a command id missing from the library.
    #[error("command '{0}' not found in library")]
    CommandNotFound(String),

    /// A fault in the orchestration layer itself; aborts the run.
    #[error("orchestration fault: {0}")]
    OrchestrationFault(String),
}
