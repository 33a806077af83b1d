use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sigweave::assembly::PipelineDescription;
use sigweave::engine::{ComponentKind, ComponentState, ComponentStatus, StopReport};
use tracing::{info, warn};

use crate::cmd::RunArgs;
use crate::exit::{
    assembly_error, pipeline_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, USAGE,
};
use crate::output::{print_run_summary, ComponentRow, OutputFormat, RunSummary};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let limit = args.duration.as_deref().map(parse_duration).transpose()?;

    let description = PipelineDescription::load(&args.description)
        .map_err(|err| assembly_error("load failed", err))?;
    let mut pipeline = description
        .build()
        .map_err(|err| assembly_error("assembly failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let started = Instant::now();
    let report = pipeline
        .start()
        .map_err(|err| pipeline_error("start failed", err))?;
    if !report.is_clean() {
        for failure in &report.failures {
            warn!(
                component = %failure.component,
                phase = %failure.phase,
                error = %failure.error,
                "component excluded"
            );
        }
    }
    info!(running = report.running.len(), "pipeline running");

    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        if pipeline.active() == 0 {
            info!("every component has ended");
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let stop = pipeline
        .stop()
        .map_err(|err| pipeline_error("stop failed", err))?;
    let summary = summarize(&pipeline.statuses(), &stop, started.elapsed());
    print_run_summary(&summary, format);

    Ok(if summary.failures == 0 { SUCCESS } else { FAILURE })
}

fn summarize(
    statuses: &[ComponentStatus],
    stop: &StopReport,
    elapsed: Duration,
) -> RunSummary {
    let components = statuses
        .iter()
        .map(|status| {
            let (stats, loss) = stop
                .loops
                .iter()
                .find(|l| l.component == status.name)
                .map(|l| (l.stats, l.loss))
                .unwrap_or_default();
            let error = stop
                .failures
                .iter()
                .rev()
                .find(|f| f.component == status.name)
                .map(|f| format!("{}: {}", f.phase, f.error));
            ComponentRow {
                name: status.name.clone(),
                kind: kind_name(status.kind),
                state: state_name(status.state),
                ticks: stats.ticks,
                late_ticks: stats.late_ticks,
                max_lateness_ms: stats.max_lateness.as_secs_f64() * 1000.0,
                samples_lost: loss.samples,
                error,
            }
        })
        .collect();

    RunSummary {
        elapsed_seconds: elapsed.as_secs_f64(),
        components,
        failures: stop.failures.len(),
    }
}

fn kind_name(kind: ComponentKind) -> &'static str {
    match kind {
        ComponentKind::Provider => "provider",
        ComponentKind::Consumer => "consumer",
    }
}

fn state_name(state: ComponentState) -> &'static str {
    match state {
        ComponentState::Registered => "registered",
        ComponentState::Running => "running",
        ComponentState::Failed => "failed",
        ComponentState::Finished => "finished",
        ComponentState::Stopped => "stopped",
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
