//! Typed validation conditions for reply payloads
//!
//! Each command in the library carries one condition describing what a
//! valid payload looks like. Evaluation is a pure predicate; deferred
//! conditions are the exception and are resolved against status markers
//! observed by the connection monitor (see `monitor`).

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Acceptance window for timestamp validation, in seconds.
const TIMESTAMP_WINDOW_SECS: i64 = 300;

static MAC_RE: OnceLock<Regex> = OnceLock::new();

fn mac_regex() -> &'static Regex {
    MAC_RE.get_or_init(|| {
        Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$").expect("mac address regex")
    })
}

/// Error raised when a condition is constructed with invalid bounds.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConditionError {
    /// `between` bounds were inverted.
    #[error("invalid range: low {low} > high {high}")]
    InvalidRange {
        /// Lower bound as given.
        low: i64,
        /// Upper bound as given.
        high: i64,
    },
}

/// Status-driven validation kinds whose verdict comes from a status
/// marker observed out-of-band rather than from the inline reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferredKind {
    /// Asynchronous completion (e.g. a database dump finishing later).
    AsyncCompletion,
    /// Factory restore; confirmed by the reboot-complete marker.
    Restore,
    /// Therapy start; timer-based, no marker requirement.
    TherapyStart,
    /// Therapy stop; confirmed by the upload-in-progress marker.
    TherapyStop,
}

impl DeferredKind {
    /// Human-readable name used in result records.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AsyncCompletion => "async-completion",
            Self::Restore => "restore",
            Self::TherapyStart => "therapy-start",
            Self::TherapyStop => "therapy-stop",
        }
    }
}

/// Validation condition attached to a command entry.
///
/// Exactly one variant is active per entry; numeric bounds are checked
/// at construction time.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Exact string equality against an expected value.
    Equal {
        /// The expected payload.
        expected: String,
    },
    /// Integer payload within an inclusive range.
    Between {
        /// Lower bound, inclusive.
        low: i64,
        /// Upper bound, inclusive.
        high: i64,
    },
    /// Epoch-seconds payload within five minutes of the host clock.
    Timestamp,
    /// Six-octet MAC address with `:` or `-` separators.
    MacAddress,
    /// Device-specific registration code; rule is pluggable.
    Rcode,
    /// Status-driven check resolved out-of-band.
    Deferred(DeferredKind),
}

impl Condition {
    /// Build a `Between` condition, validating `low <= high`.
    pub fn between(low: i64, high: i64) -> Result<Self, ConditionError> {
        if low > high {
            return Err(ConditionError::InvalidRange { low, high });
        }
        Ok(Self::Between { low, high })
    }

    /// Short type name used in logs and reports.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Equal { .. } => "equal",
            Self::Between { .. } => "between",
            Self::Timestamp => "timestamp",
            Self::MacAddress => "mac-address",
            Self::Rcode => "rcode",
            Self::Deferred(kind) => kind.name(),
        }
    }

    /// Settle delay applied after sending the command, sized so the
    /// device can finish emitting before the reply window is judged.
    pub fn settle_delay(&self) -> Duration {
        match self {
            Self::Timestamp | Self::MacAddress | Self::Rcode => Duration::from_millis(500),
            Self::Deferred(DeferredKind::AsyncCompletion) => Duration::from_secs(2),
            Self::Deferred(DeferredKind::Restore) => Duration::from_secs(10),
            Self::Deferred(DeferredKind::TherapyStop) => Duration::from_secs(5),
            _ => Duration::from_secs(1),
        }
    }

    /// Description of the expected value, for result records.
    pub fn expectation(&self) -> String {
        match self {
            Self::Equal { expected } => expected.clone(),
            Self::Between { low, high } => format!("{low}..={high}"),
            Self::Timestamp => format!("epoch within {TIMESTAMP_WINDOW_SECS}s of now"),
            Self::MacAddress => "MAC address format".to_string(),
            Self::Rcode => "valid rcode".to_string(),
            Self::Deferred(kind) => format!("deferred: {}", kind.name()),
        }
    }
}

/// Pluggable validation rule for the device-specific rcode payload.
///
/// The concrete format is not pinned down by the device documentation;
/// the shipped default only requires a non-empty string.
pub trait RcodeRule: Send + Sync {
    /// Return true when `value` is an acceptable rcode.
    fn is_valid(&self, value: &str) -> bool;
}

/// Default rcode rule: any non-empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonEmptyRcode;

impl RcodeRule for NonEmptyRcode {
    fn is_valid(&self, value: &str) -> bool {
        !value.is_empty()
    }
}

/// Evaluate a condition against a reply payload.
///
/// Deferred conditions always evaluate true here; their real verdict is
/// produced by the orchestrator from status-marker observations.
pub fn evaluate(condition: &Condition, value: &str, rcode: &dyn RcodeRule) -> bool {
    match condition {
        Condition::Equal { expected } => value == expected,
        Condition::Between { low, high } => match value.parse::<i64>() {
            Ok(number) => *low <= number && number <= *high,
            Err(_) => false,
        },
        Condition::Timestamp => match value.parse::<i64>() {
            Ok(stamp) => {
                let now = chrono::Utc::now().timestamp();
                (now - stamp).abs() < TIMESTAMP_WINDOW_SECS
            }
            Err(_) => false,
        },
        Condition::MacAddress => mac_regex().is_match(value),
        Condition::Rcode => rcode.is_valid(value),
        Condition::Deferred(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(condition: &Condition, value: &str) -> bool {
        evaluate(condition, value, &NonEmptyRcode)
    }

    #[test]
    fn equal_is_exact() {
        let condition = Condition::Equal {
            expected: "1.2.3".to_string(),
        };
        assert!(eval(&condition, "1.2.3"));
        assert!(!eval(&condition, "1.2.4"));
        assert!(!eval(&condition, " 1.2.3"));
    }

    #[test]
    fn between_is_inclusive() {
        let condition = Condition::between(10, 20).unwrap();
        assert!(eval(&condition, "15"));
        assert!(eval(&condition, "10"));
        assert!(eval(&condition, "20"));
        assert!(!eval(&condition, "21"));
        assert!(!eval(&condition, "9"));
        assert!(!eval(&condition, "abc"));
        assert!(!eval(&condition, ""));
    }

    #[test]
    fn between_rejects_inverted_bounds() {
        assert_eq!(
            Condition::between(20, 10),
            Err(ConditionError::InvalidRange { low: 20, high: 10 })
        );
    }

    #[test]
    fn timestamp_window_is_strict() {
        let now = chrono::Utc::now().timestamp();
        assert!(eval(&Condition::Timestamp, &now.to_string()));
        assert!(eval(&Condition::Timestamp, &(now - 299).to_string()));
        assert!(!eval(&Condition::Timestamp, &(now - 300).to_string()));
        assert!(!eval(&Condition::Timestamp, &(now + 300).to_string()));
        assert!(!eval(&Condition::Timestamp, "not-a-number"));
    }

    #[test]
    fn mac_address_formats() {
        assert!(eval(&Condition::MacAddress, "AA:BB:CC:DD:EE:FF"));
        assert!(eval(&Condition::MacAddress, "aa-bb-cc-dd-ee-ff"));
        assert!(!eval(&Condition::MacAddress, "AA:BB:CC:DD:EE"));
        assert!(!eval(&Condition::MacAddress, "GG:BB:CC:DD:EE:FF"));
        assert!(!eval(&Condition::MacAddress, "AA:BB:CC:DD:EE:FF:00"));
        assert!(!eval(&Condition::MacAddress, ""));
    }

    #[test]
    fn rcode_default_rule() {
        assert!(eval(&Condition::Rcode, "R1234"));
        assert!(!eval(&Condition::Rcode, ""));
    }

    #[test]
    fn deferred_passes_inline() {
        for kind in [
            DeferredKind::AsyncCompletion,
            DeferredKind::Restore,
            DeferredKind::TherapyStart,
            DeferredKind::TherapyStop,
        ] {
            assert!(eval(&Condition::Deferred(kind), "anything"));
        }
    }

    #[test]
    fn settle_delays() {
        assert_eq!(
            Condition::Timestamp.settle_delay(),
            Duration::from_millis(500)
        );
        assert_eq!(
            Condition::Deferred(DeferredKind::Restore).settle_delay(),
            Duration::from_secs(10)
        );
        assert_eq!(
            Condition::Deferred(DeferredKind::TherapyStop).settle_delay(),
            Duration::from_secs(5)
        );
        assert_eq!(
            Condition::Equal {
                expected: String::new()
            }
            .settle_delay(),
            Duration::from_secs(1)
        );
    }
}
