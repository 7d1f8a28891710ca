//! Test orchestration state machine
//!
//! Walks an ordered test plan once connectivity is up: for each step it
//! looks up the command, runs the exchange through the transport,
//! classifies the reply, evaluates the condition, and records exactly
//! one result. A failing step never aborts the run; only faults in the
//! orchestration layer itself do.

use crate::core::aggregate::{Outcome, ResultAggregator, RunStats, TestResult};
use crate::core::classify::classify;
use crate::core::condition::{evaluate, Condition, DeferredKind, NonEmptyRcode, RcodeRule};
use crate::core::monitor::{StatusLog, StatusMarker};
use crate::core::signals::Signal;
use crate::core::transport::CommandTransport;
use crate::core::RunError;
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Run lifecycle states.
///
/// `Paused` is defined but not currently reachable; it is reserved for
/// interactive hold/resume support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// No run has started.
    Idle,
    /// Counters being reset, plan being prepared.
    Initializing,
    /// Steps executing.
    Running,
    /// Reserved.
    Paused,
    /// All steps executed with the stop signal unset.
    Completed,
    /// An orchestration-layer fault aborted the run.
    Failed,
    /// The stop signal halted the run between steps.
    Stopped,
}

impl RunState {
    /// Whether a new run may start from this state.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Completed | Self::Failed | Self::Stopped
        )
    }

    /// Whether this state ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// One entry of a test plan: a named step bound to a command id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStep {
    /// Display name of the step.
    pub step_name: String,
    /// Library key of the command to run.
    pub command_id: String,
}

/// Immutable command library record.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEntry {
    /// Symbolic id (e.g. `Get_SN_Number`), used for identity lookups.
    pub id: String,
    /// Text sent to the device.
    pub outgoing: String,
    /// Reply prefix the device must answer with.
    pub expected_prefix: String,
    /// Human-readable title.
    pub title: String,
    /// Validation condition for the reply payload.
    pub condition: Condition,
}

/// Command library lookup, provided by the configuration layer.
pub trait CommandLookup: Send + Sync {
    /// Fetch the entry for a library key, if present.
    fn get(&self, command_id: &str) -> Option<CommandEntry>;
}

/// Test plan lookup, provided by the configuration layer.
pub trait PlanLookup: Send + Sync {
    /// Fetch the ordered steps of a named plan, if present.
    fn get(&self, plan_name: &str) -> Option<Vec<TestStep>>;
}

/// Run-scoped identity values entered by the operator, used to resolve
/// identity-lookup conditions.
#[derive(Debug, Clone, Default)]
pub struct RunIdentity {
    /// Device serial number.
    pub device_sn: String,
    /// Firmware version.
    pub fw_version: String,
    /// Display software version.
    pub sw_version: String,
    /// Wi-Fi module version.
    pub wifi_version: String,
}

impl RunIdentity {
    /// Expected value for an identity-lookup command, keyed by the
    /// command's symbolic id.
    pub fn expected_for(&self, command_id: &str) -> Option<&str> {
        let value = match command_id {
            "Get_SN_Number" => &self.device_sn,
            "Get_FW_Version" => &self.fw_version,
            "Get_LCM_Version" => &self.sw_version,
            "Get_WiFi_Version" => &self.wifi_version,
            _ => return None,
        };
        Some(value.as_str())
    }
}

/// Observer of run progress. Implementations must not assume they run
/// on any particular task; a panicking observer is caught and logged,
/// never aborts the run.
pub trait RunObserver: Send + Sync {
    /// Called after every state transition, outside the state lock.
    fn on_state_change(&self, from: RunState, to: RunState);

    /// Called after each executed step.
    fn on_step(&self, _result: &TestResult) {}
}

/// The status marker a deferred condition requires, if any.
fn deferred_marker(kind: DeferredKind) -> Option<StatusMarker> {
    match kind {
        DeferredKind::Restore => Some(StatusMarker::RebootComplete),
        DeferredKind::TherapyStop => Some(StatusMarker::UploadInProgress),
        DeferredKind::AsyncCompletion | DeferredKind::TherapyStart => None,
    }
}

/// Drives one test plan through the transport and records outcomes.
pub struct TestOrchestrator {
    transport: CommandTransport,
    library: Arc<dyn CommandLookup>,
    identity: RunIdentity,
    rcode: Arc<dyn RcodeRule>,
    status: StatusLog,
    stop: Signal,
    state: Mutex<RunState>,
    observers: RwLock<Vec<Box<dyn RunObserver>>>,
    aggregator: Mutex<ResultAggregator>,
}

impl TestOrchestrator {
    /// Create an orchestrator in the `Idle` state with the default
    /// rcode rule.
    pub fn new(
        transport: CommandTransport,
        library: Arc<dyn CommandLookup>,
        identity: RunIdentity,
        status: StatusLog,
        stop: Signal,
    ) -> Self {
        Self {
            transport,
            library,
            identity,
            rcode: Arc::new(NonEmptyRcode),
            status,
            stop,
            state: Mutex::new(RunState::Idle),
            observers: RwLock::new(Vec::new()),
            aggregator: Mutex::new(ResultAggregator::new()),
        }
    }

    /// Replace the rcode validation rule.
    pub fn set_rcode_rule(&mut self, rule: Arc<dyn RcodeRule>) {
        self.rcode = rule;
    }

    /// Register an observer for state transitions and step results.
    pub fn add_observer(&self, observer: Box<dyn RunObserver>) {
        self.observers.write().push(observer);
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Snapshot of the current run statistics.
    pub fn stats(&self) -> RunStats {
        self.aggregator.lock().stats()
    }

    /// Results recorded so far, in execution order.
    pub fn results(&self) -> Vec<TestResult> {
        self.aggregator.lock().results().to_vec()
    }

    /// Failed results, in execution order.
    pub fn failed_results(&self) -> Vec<TestResult> {
        self.aggregator
            .lock()
            .failed_tests()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Execute `steps` in order, recording one result per executed
    /// step. Returns the final statistics, or the fault that aborted
    /// the run.
    pub async fn run(&self, plan_name: &str, steps: &[TestStep]) -> Result<RunStats, RunError> {
        {
            let state = self.state.lock();
            if !state.can_start() {
                return Err(RunError::OrchestrationFault(format!(
                    "cannot start a run from state '{state}'"
                )));
            }
        }

        self.transition(RunState::Initializing);
        self.aggregator.lock().start_run();
        info!(plan = plan_name, steps = steps.len(), "run starting");
        self.transition(RunState::Running);

        for step in steps {
            if self.stop.is_set() {
                info!(step = %step.step_name, "stop requested, halting before step");
                self.transition(RunState::Stopped);
                break;
            }
            match self.execute_step(step).await {
                Ok(Some(result)) => {
                    info!(
                        step = %result.step_name,
                        outcome = %result.outcome,
                        duration_ms = result.duration.as_millis() as u64,
                        "step finished"
                    );
                    self.notify_step(&result);
                    self.aggregator.lock().add(result);
                }
                Ok(None) => {
                    self.aggregator.lock().record_skipped();
                }
                Err(fault) => {
                    // A stop racing the monitor shutdown is not a fault.
                    if self.stop.is_set() {
                        self.transition(RunState::Stopped);
                        break;
                    }
                    error!(error = %fault, "orchestration fault, aborting run");
                    self.aggregator.lock().finish_run();
                    self.transition(RunState::Failed);
                    return Err(fault);
                }
            }
        }

        if self.state() == RunState::Running {
            self.transition(RunState::Completed);
        }
        self.aggregator.lock().finish_run();
        let stats = self.aggregator.lock().stats();
        info!(
            total = stats.total,
            passed = stats.passed,
            failed = stats.failed,
            skipped = stats.skipped,
            pass_rate = stats.pass_rate,
            "run finished"
        );
        Ok(stats)
    }

    /// Execute one step. `Ok(None)` means the step was skipped because
    /// its command entry is missing; `Err` is an orchestration fault.
    async fn execute_step(&self, step: &TestStep) -> Result<Option<TestResult>, RunError> {
        let Some(entry) = self.library.get(&step.command_id) else {
            warn!(
                step = %step.step_name,
                command_id = %step.command_id,
                "{}",
                RunError::CommandNotFound(step.command_id.clone())
            );
            return Ok(None);
        };

        let started = Instant::now();
        let reply = self
            .transport
            .send(&entry.outgoing)
            .await
            .map_err(|e| RunError::OrchestrationFault(e.to_string()))?;

        // Let the device finish emitting before the step is judged.
        tokio::time::sleep(entry.condition.settle_delay()).await;
        let duration = started.elapsed();

        Ok(Some(self.judge(step, &entry, reply.as_deref(), started, duration)))
    }

    /// Produce the result record for one executed step.
    fn judge(
        &self,
        step: &TestStep,
        entry: &CommandEntry,
        reply: Option<&str>,
        started: Instant,
        duration: std::time::Duration,
    ) -> TestResult {
        let mut result = TestResult {
            step_name: step.step_name.clone(),
            command_id: step.command_id.clone(),
            title: entry.title.clone(),
            command_sent: entry.outgoing.clone(),
            prefix: String::new(),
            actual_value: None,
            expected_value: None,
            outcome: Outcome::Fail,
            duration,
            timestamp: Local::now(),
            error_message: None,
        };

        let Some(raw) = reply else {
            result.error_message = Some(RunError::NoResponse.to_string());
            return result;
        };

        let classified = classify(raw);
        result.prefix = classified.prefix.clone();
        result.actual_value = classified.value.clone();

        if classified.prefix != entry.expected_prefix {
            result.error_message = Some(
                RunError::PrefixMismatch {
                    expected: entry.expected_prefix.clone(),
                    actual: classified.prefix,
                }
                .to_string(),
            );
            return result;
        }

        if let Condition::Deferred(kind) = entry.condition {
            return self.judge_deferred(result, kind, started);
        }

        // Identity-lookup commands validate against run-scoped values.
        let condition = match self.identity.expected_for(&entry.id) {
            Some(expected) => Condition::Equal {
                expected: expected.to_string(),
            },
            None => entry.condition.clone(),
        };
        result.expected_value = Some(condition.expectation());

        let Some(value) = classified.value.as_deref() else {
            // A bare prefix with no payload satisfies the contract.
            result.outcome = Outcome::Pass;
            return result;
        };

        if evaluate(&condition, value, self.rcode.as_ref()) {
            result.outcome = Outcome::Pass;
        } else {
            result.error_message = Some(
                RunError::ValidationFailure {
                    expected: condition.expectation(),
                    actual: value.to_string(),
                }
                .to_string(),
            );
        }
        result
    }

    /// Resolve a deferred condition from the status marker log rather
    /// than the inline reply, and record that distinction.
    fn judge_deferred(
        &self,
        mut result: TestResult,
        kind: DeferredKind,
        started: Instant,
    ) -> TestResult {
        match deferred_marker(kind) {
            Some(marker) => {
                result.expected_value = Some(format!("status marker '{marker}'"));
                if self.status.observed_since(marker, started) {
                    result.outcome = Outcome::Pass;
                    result.error_message =
                        Some(format!("verified by status marker '{marker}', not inline reply"));
                } else {
                    result.error_message = Some(format!(
                        "status marker '{marker}' not observed within the settle window"
                    ));
                }
            }
            None => {
                result.outcome = Outcome::Pass;
                result.expected_value = Some(format!("deferred: {}", kind.name()));
                result.error_message =
                    Some("deferred condition, not verified by inline reply".to_string());
            }
        }
        result
    }

    /// Transition the run state under the internal lock and notify
    /// observers. Observer panics are caught and logged.
    fn transition(&self, to: RunState) {
        let from = {
            let mut state = self.state.lock();
            let from = *state;
            *state = to;
            from
        };
        info!(%from, %to, "state transition");
        for observer in self.observers.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| observer.on_state_change(from, to))).is_err() {
                error!(%from, %to, "state observer panicked");
            }
        }
    }

    fn notify_step(&self, result: &TestResult) {
        for observer in self.observers.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| observer.on_step(result))).is_err() {
                error!(step = %result.step_name, "step observer panicked");
            }
        }
    }
}
