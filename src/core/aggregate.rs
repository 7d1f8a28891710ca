//! Run results and statistics
//!
//! One [`TestResult`] is recorded per executed step and owned by the
//! [`ResultAggregator`] for the lifetime of the run. Skipped steps
//! (missing command entries) are counted but produce no result.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Outcome of one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// The reply satisfied the step's expectations.
    Pass,
    /// The reply was missing, mismatched, or failed validation.
    Fail,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "Pass"),
            Self::Fail => write!(f, "Fail"),
        }
    }
}

/// Immutable record of one executed test step.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    /// Step name from the test plan.
    pub step_name: String,
    /// Library key of the command that was run.
    pub command_id: String,
    /// Command title from the library.
    pub title: String,
    /// Exact command text sent to the device.
    pub command_sent: String,
    /// Classified reply prefix (empty when no reply arrived).
    pub prefix: String,
    /// Classified reply payload, if any.
    pub actual_value: Option<String>,
    /// Expected value description, when a condition was consulted.
    pub expected_value: Option<String>,
    /// Pass or Fail.
    pub outcome: Outcome,
    /// Wall time spent on the step, including the settle delay.
    pub duration: Duration,
    /// When the step completed.
    pub timestamp: DateTime<Local>,
    /// Failure detail, if any.
    pub error_message: Option<String>,
}

/// Aggregate statistics snapshot for a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Executed steps (passed + failed).
    pub total: usize,
    /// Steps that passed.
    pub passed: usize,
    /// Steps that failed.
    pub failed: usize,
    /// Steps skipped because their command entry was missing.
    pub skipped: usize,
    /// Percentage of executed steps that passed; 0 when none executed.
    pub pass_rate: f64,
    /// Run duration so far (final once the run has ended).
    pub duration: Duration,
    /// When the run started.
    pub started_at: Option<DateTime<Local>>,
    /// When the run ended, if it has.
    pub ended_at: Option<DateTime<Local>>,
}

/// Accumulates per-step results into run statistics.
#[derive(Debug)]
pub struct ResultAggregator {
    run_id: Uuid,
    results: Vec<TestResult>,
    skipped: usize,
    start: Option<Instant>,
    end: Option<Instant>,
    started_at: Option<DateTime<Local>>,
    ended_at: Option<DateTime<Local>>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            results: Vec::new(),
            skipped: 0,
            start: None,
            end: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Reset all counters and mark the run as started.
    pub fn start_run(&mut self) {
        self.run_id = Uuid::new_v4();
        self.results.clear();
        self.skipped = 0;
        self.start = Some(Instant::now());
        self.end = None;
        self.started_at = Some(Local::now());
        self.ended_at = None;
    }

    /// Record the end of the run, freezing the duration.
    pub fn finish_run(&mut self) {
        if self.end.is_none() {
            self.end = Some(Instant::now());
            self.ended_at = Some(Local::now());
        }
    }

    /// Take ownership of one step result.
    pub fn add(&mut self, result: TestResult) {
        self.results.push(result);
    }

    /// Count a step whose command entry was missing.
    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    /// Executed steps (passed + failed).
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Passed steps.
    pub fn passed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Pass)
            .count()
    }

    /// Failed steps.
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Fail)
            .count()
    }

    /// Skipped steps.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Pass percentage over executed steps; 0 when nothing executed.
    pub fn pass_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.passed() as f64 / self.total() as f64 * 100.0
    }

    /// Run duration: final once ended, running while in progress.
    pub fn duration(&self) -> Duration {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end - start,
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// All results in execution order.
    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// Failed results, preserving execution order.
    pub fn failed_tests(&self) -> Vec<&TestResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Fail)
            .collect()
    }

    /// Passed results, preserving execution order.
    pub fn passed_tests(&self) -> Vec<&TestResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Pass)
            .collect()
    }

    /// Snapshot the current statistics.
    pub fn stats(&self) -> RunStats {
        RunStats {
            run_id: self.run_id,
            total: self.total(),
            passed: self.passed(),
            failed: self.failed(),
            skipped: self.skipped,
            pass_rate: self.pass_rate(),
            duration: self.duration(),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, outcome: Outcome) -> TestResult {
        TestResult {
            step_name: name.to_string(),
            command_id: "1".to_string(),
            title: name.to_string(),
            command_sent: "cmd".to_string(),
            prefix: "[cmd+ok]".to_string(),
            actual_value: None,
            expected_value: None,
            outcome,
            duration: Duration::from_millis(10),
            timestamp: Local::now(),
            error_message: None,
        }
    }

    #[test]
    fn empty_run_has_zero_pass_rate() {
        let aggregator = ResultAggregator::new();
        assert_eq!(aggregator.total(), 0);
        assert_eq!(aggregator.pass_rate(), 0.0);
    }

    #[test]
    fn pass_rate_over_executed_steps() {
        let mut aggregator = ResultAggregator::new();
        aggregator.start_run();
        for name in ["a", "b", "c"] {
            aggregator.add(result(name, Outcome::Pass));
        }
        aggregator.add(result("d", Outcome::Fail));
        assert_eq!(aggregator.total(), 4);
        assert_eq!(aggregator.passed(), 3);
        assert_eq!(aggregator.failed(), 1);
        assert_eq!(aggregator.pass_rate(), 75.0);
    }

    #[test]
    fn skipped_steps_do_not_dilute_pass_rate() {
        let mut aggregator = ResultAggregator::new();
        aggregator.start_run();
        aggregator.add(result("a", Outcome::Pass));
        aggregator.record_skipped();
        aggregator.record_skipped();
        assert_eq!(aggregator.total(), 1);
        assert_eq!(aggregator.skipped(), 2);
        assert_eq!(aggregator.pass_rate(), 100.0);
    }

    #[test]
    fn filters_preserve_order() {
        let mut aggregator = ResultAggregator::new();
        aggregator.start_run();
        aggregator.add(result("first", Outcome::Fail));
        aggregator.add(result("second", Outcome::Pass));
        aggregator.add(result("third", Outcome::Fail));
        let failed: Vec<_> = aggregator
            .failed_tests()
            .iter()
            .map(|r| r.step_name.clone())
            .collect();
        assert_eq!(failed, ["first", "third"]);
        assert_eq!(aggregator.passed_tests()[0].step_name, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn duration_freezes_on_finish() {
        let mut aggregator = ResultAggregator::new();
        aggregator.start_run();
        tokio::time::sleep(Duration::from_secs(2)).await;
        aggregator.finish_run();
        let frozen = aggregator.duration();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(aggregator.duration(), frozen);
        assert_eq!(frozen, Duration::from_secs(2));
    }

    #[test]
    fn start_run_resets_counters() {
        let mut aggregator = ResultAggregator::new();
        aggregator.start_run();
        aggregator.add(result("a", Outcome::Fail));
        aggregator.record_skipped();
        aggregator.start_run();
        assert_eq!(aggregator.total(), 0);
        assert_eq!(aggregator.skipped(), 0);
    }
}
