//! Linetest - serial acceptance test runner
//!
//! Supervises a UART connection to the device under test, walks the
//! selected test plan, and writes a plain-text report of the run.

use anyhow::{bail, Context};
use clap::Parser;
use linetest_core::{
    render_summary, CommandLibrary, ConfigError, ConnectionMonitor, MonitorConfig, Outcome,
    PlanLookup, ReportSink, RunObserver, RunParameters, RunState, SerialChannelConfig, Signal,
    TestOrchestrator, TestPlans, TestResult, TextReport, TransportConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "linetest", version, about = "Serial acceptance test runner")]
struct Args {
    /// Serial port of the device under test
    #[arg(short, long, env = "LINETEST_PORT", default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// Command library file
    #[arg(long, default_value = "Command_Line.yml")]
    commands: PathBuf,

    /// Test plan file
    #[arg(long, default_value = "Test_Case.yml")]
    plans: PathBuf,

    /// Run parameter file (selected plan and device identity)
    #[arg(long, default_value = "Selected_Test_Plan.yml")]
    params: PathBuf,

    /// Override the plan named in the parameter file
    #[arg(long)]
    plan: Option<String>,

    /// Report output path (default: Test_Report_<timestamp>.txt)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Directory for the rolling run log
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Seconds to wait for device connectivity at startup
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,
}

/// Prints per-step progress and state transitions to the console.
struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn on_state_change(&self, from: RunState, to: RunState) {
        println!("[state] {from} -> {to}");
    }

    fn on_step(&self, result: &TestResult) {
        let mark = match result.outcome {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
        };
        println!(
            "  [{mark}] {} ({:.2}s)",
            result.step_name,
            result.duration.as_secs_f64()
        );
        if let Some(message) = &result.error_message {
            if result.outcome == Outcome::Fail {
                println!("         {message}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let file_appender = tracing_appender::rolling::daily(&args.log_dir, "linetest.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    tracing::info!("starting linetest v{}", env!("CARGO_PKG_VERSION"));

    let params = RunParameters::from_path(&args.params)
        .with_context(|| format!("loading {}", args.params.display()))?;
    let library = CommandLibrary::from_path(&args.commands)
        .with_context(|| format!("loading {}", args.commands.display()))?;
    let plans = TestPlans::from_path(&args.plans)
        .with_context(|| format!("loading {}", args.plans.display()))?;

    let plan_name = args
        .plan
        .unwrap_or_else(|| params.selected_test_plan.clone());
    let steps = plans
        .get(&plan_name)
        .ok_or_else(|| ConfigError::PlanNotFound(plan_name.clone()))
        .with_context(|| format!("available plans: {}", plans.plan_names().join(", ")))?;

    let connectivity = Signal::new();
    let stop = Signal::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nstop requested");
            stop.set();
        })
        .context("installing SIGINT handler")?;
    }

    let factory = SerialChannelConfig::new(&args.port, args.baud);
    let monitor = ConnectionMonitor::new(
        MonitorConfig::default(),
        Box::new(factory),
        connectivity.clone(),
        stop.clone(),
    )
    .context("invalid handshake pattern")?;
    let transport = monitor.transport(TransportConfig::default());
    let status = monitor.status_log();
    let monitor_task = tokio::spawn(monitor.run());

    println!("waiting for device on {} @ {} baud...", args.port, args.baud);
    if !connectivity
        .wait_set(Duration::from_secs(args.connect_timeout))
        .await
    {
        stop.set();
        let _ = tokio::time::timeout(Duration::from_secs(5), monitor_task).await;
        bail!(
            "no connectivity within {}s; is the device connected?",
            args.connect_timeout
        );
    }
    println!("device connected\n");

    let orchestrator = TestOrchestrator::new(
        transport,
        Arc::new(library),
        params.identity.clone(),
        status,
        stop.clone(),
    );
    orchestrator.add_observer(Box::new(ConsoleObserver));

    println!("running plan '{plan_name}' ({} steps)", steps.len());
    let run_outcome = orchestrator.run(&plan_name, &steps).await;

    let stats = orchestrator.stats();
    let results = orchestrator.results();

    let report_path = args.report.unwrap_or_else(|| {
        PathBuf::from(format!(
            "Test_Report_{}.txt",
            chrono::Local::now().format("%Y_%m_%d_%H%M%S")
        ))
    });
    let mut report = TextReport::new(&report_path, &plan_name, params.identity.clone());
    report
        .write_run(&stats, &results)
        .with_context(|| format!("writing {}", report_path.display()))?;

    print!("{}", render_summary(&stats, &results));
    println!("report saved to {}", report_path.display());

    stop.set();
    let _ = tokio::time::timeout(Duration::from_secs(5), monitor_task).await;

    match run_outcome {
        Ok(_) => {}
        Err(fault) => bail!("run aborted: {fault}"),
    }
    match orchestrator.state() {
        RunState::Completed if stats.failed == 0 => Ok(()),
        RunState::Completed => std::process::exit(1),
        RunState::Stopped => std::process::exit(2),
        state => bail!("run ended in unexpected state '{state}'"),
    }
}
