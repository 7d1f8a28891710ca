//! Run report rendering
//!
//! The reporting sink is an external collaborator of the engine: it
//! receives the full ordered result sequence and the aggregate
//! statistics at run end. The plain-text writer here mirrors the
//! operator-facing report the bench crews work from.

use crate::core::aggregate::{RunStats, TestResult};
use crate::core::orchestrator::RunIdentity;
use chrono::Local;
use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;

/// Receives the outcome of a finished run.
pub trait ReportSink: Send {
    /// Deliver the ordered results and the aggregate statistics.
    fn write_run(&mut self, stats: &RunStats, results: &[TestResult]) -> io::Result<()>;
}

/// Plain-text report writer.
pub struct TextReport {
    path: PathBuf,
    plan_name: String,
    identity: RunIdentity,
}

impl TextReport {
    /// Create a writer that renders into the file at `path`.
    pub fn new(path: impl Into<PathBuf>, plan_name: &str, identity: RunIdentity) -> Self {
        Self {
            path: path.into(),
            plan_name: plan_name.to_string(),
            identity,
        }
    }

    fn render(&self, stats: &RunStats, results: &[TestResult]) -> String {
        let rule = "=".repeat(78);
        let thin = "-".repeat(78);
        let mut out = String::new();

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "{:^78}", "TEST EXECUTION REPORT");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Test Plan:    {}", self.plan_name);
        let _ = writeln!(out, "Run Id:       {}", stats.run_id);
        let _ = writeln!(
            out,
            "Generated:    {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(out, "Device SN:    {}", self.identity.device_sn);
        let _ = writeln!(out, "FW Version:   {}", self.identity.fw_version);
        let _ = writeln!(out, "SW Version:   {}", self.identity.sw_version);
        let _ = writeln!(out, "WiFi Version: {}", self.identity.wifi_version);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out);

        for (index, result) in results.iter().enumerate() {
            let _ = writeln!(out, "Test #{}: {}", index + 1, result.step_name);
            let _ = writeln!(out, "  Title:        {}", result.title);
            let _ = writeln!(out, "  Command:      {}", result.command_sent);
            let _ = writeln!(out, "  Prefix:       {}", result.prefix);
            let _ = writeln!(
                out,
                "  Actual:       {}",
                result.actual_value.as_deref().unwrap_or("N/A")
            );
            let _ = writeln!(
                out,
                "  Expected:     {}",
                result.expected_value.as_deref().unwrap_or("N/A")
            );
            let _ = writeln!(out, "  Result:       {}", result.outcome);
            let _ = writeln!(out, "  Duration:     {:.2}s", result.duration.as_secs_f64());
            let _ = writeln!(
                out,
                "  Timestamp:    {}",
                result.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
            if let Some(message) = &result.error_message {
                let _ = writeln!(out, "  Detail:       {message}");
            }
            let _ = writeln!(out, "{thin}");
        }

        out.push_str(&render_summary(stats, results));
        out
    }
}

impl ReportSink for TextReport {
    fn write_run(&mut self, stats: &RunStats, results: &[TestResult]) -> io::Result<()> {
        std::fs::write(&self.path, self.render(stats, results))
    }
}

/// Render the terminal summary block: counts, pass rate, duration, and
/// the list of failures with their recorded messages.
pub fn render_summary(stats: &RunStats, results: &[TestResult]) -> String {
    let rule = "=".repeat(78);
    let mut out = String::new();

    let _ = writeln!(out);
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "{:^78}", "SUMMARY");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Total:     {}", stats.total);
    let _ = writeln!(out, "Passed:    {} ({:.2}%)", stats.passed, stats.pass_rate);
    let _ = writeln!(out, "Failed:    {}", stats.failed);
    let _ = writeln!(out, "Skipped:   {}", stats.skipped);
    let _ = writeln!(out, "Duration:  {:.2}s", stats.duration.as_secs_f64());

    let failures: Vec<&TestResult> = results
        .iter()
        .filter(|r| r.outcome == crate::core::aggregate::Outcome::Fail)
        .collect();
    if !failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Failures:");
        for (index, failure) in failures.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. {} - {}",
                index + 1,
                failure.step_name,
                failure
                    .error_message
                    .as_deref()
                    .unwrap_or("no detail recorded")
            );
        }
    }
    let _ = writeln!(out, "{rule}");
    out
}
