use crate::fieldbus::{FieldbusConfig, SimulatedFieldbus};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use cycle_core::{ConfigError, CycleConfig, CycleController, CycleError, CycleStats, TimeBase};
use cycle_io::metrics::MetricsRecorder;
use cycle_io::{JournalError, JournalEventType, JournalSender, JournalWorker, RunJournal};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid cycle configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error("failed to open journal: {0}")]
    Journal(#[from] JournalError),
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("cycle loop stopped by work failure: {0}")]
    WorkFailed(String),
}

struct RunSummary {
    stats: CycleStats,
    frames_sent: u64,
    failure: Option<String>,
}

pub fn run_from_args() -> Result<(), AppError> {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return Ok(());
    }
    run(config)
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    let _log_guard = init_tracing(config.json_logs, config.log_file.as_deref());

    let recorder = telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let timebase = TimeBase::new();
    let (journal, journal_worker) = match init_journal(config.journal_path.as_ref(), timebase)? {
        Some((sender, worker)) => (Some(sender), Some(worker)),
        None => (None, None),
    };

    // One worker spins in the cycle loop, the other serves timers and signals.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("cycle-runner")
        .enable_all()
        .build()?;

    let summary = runtime.block_on(drive(&config, recorder, journal));
    // Every journal sender lived inside `drive`, so the writer drains and exits.
    if let Some(worker) = journal_worker {
        worker.finish();
    }
    let summary = summary?;

    info!(
        cycles = summary.stats.cycle_count,
        frames_sent = summary.frames_sent,
        avg_execution_us = summary.stats.avg_execution_time.as_micros() as u64,
        max_execution_us = summary.stats.max_execution_time.as_micros() as u64,
        avg_interval_us = summary.stats.avg_interval_time.as_micros() as u64,
        overruns = summary.stats.overruns,
        working_counter = ?summary.stats.working_counter,
        "Run complete"
    );

    match summary.failure {
        Some(message) => Err(AppError::WorkFailed(message)),
        None => Ok(()),
    }
}

async fn drive(
    config: &RuntimeConfig,
    recorder: Arc<Mutex<MetricsRecorder>>,
    journal: Option<JournalSender>,
) -> Result<RunSummary, AppError> {
    let bus = Arc::new(SimulatedFieldbus::new(FieldbusConfig {
        slaves: config.slaves,
        exchange_time: Duration::from_micros(config.work_us),
        drop_every: config.drop_every,
        fail_after: config.fail_after,
    }));
    let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let work_bus = Arc::clone(&bus);
    let cycle_recorder = Arc::clone(&recorder);
    let cycle_journal = journal.clone();
    let error_recorder = Arc::clone(&recorder);
    let error_journal = journal.clone();
    let error_slot = Arc::clone(&failure);
    let report_every = config.report_every.max(1);
    let expected_wkc = i64::from(config.slaves);

    let cycle_config = CycleConfig::builder()
        .period(Duration::from_micros(config.period_us))
        .work(move || {
            let bus = Arc::clone(&work_bus);
            async move { bus.exchange().await }
        })
        .on_cycle(move |stats| {
            cycle_recorder.lock().record_cycle(stats);
            if stats.working_counter != Some(expected_wkc) {
                debug!(
                    cycle = stats.cycle_count,
                    working_counter = ?stats.working_counter,
                    expected = expected_wkc,
                    "Working counter mismatch"
                );
            }
            if stats.cycle_count % report_every == 0 {
                info!(
                    cycles = stats.cycle_count,
                    last_execution_us = stats.last_execution_time.as_micros() as u64,
                    avg_execution_us = stats.avg_execution_time.as_micros() as u64,
                    last_interval_us = stats.last_interval_time.as_micros() as u64,
                    avg_interval_us = stats.avg_interval_time.as_micros() as u64,
                    overruns = stats.overruns,
                    "Cycle statistics"
                );
                if let Some(journal) = &cycle_journal {
                    if let Err(e) = journal.log_stats(JournalEventType::StatsSnapshot, stats) {
                        warn!(error = %e, "Failed to journal statistics");
                    }
                }
            }
        })
        .on_error(move |err| {
            error_recorder.lock().record_failure();
            warn!(error = %err, "Field-bus exchange failed, cycle loop stopped");
            if let Some(journal) = &error_journal {
                let details = serde_json::json!({ "error": err.to_string() });
                if let Err(e) = journal.log_event(JournalEventType::WorkFailed, details) {
                    warn!(error = %e, "Failed to journal work failure");
                }
            }
            *error_slot.lock() = Some(err.to_string());
        })
        .build()?;

    let controller = CycleController::new(cycle_config);

    info!(
        period_us = config.period_us,
        work_us = config.work_us,
        slaves = config.slaves,
        "Starting cycle controller"
    );
    if let Some(journal) = &journal {
        let details = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "period_us": config.period_us,
            "work_us": config.work_us,
            "slaves": config.slaves,
        });
        if let Err(e) = journal.log_event(JournalEventType::RunStarted, details) {
            warn!(error = %e, "Failed to journal run start");
        }
    }

    controller.start()?;
    recorder.lock().set_running(true);

    let run_seconds = config.run_seconds;
    let deadline = async move {
        match run_seconds {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending::<()>().await,
        }
    };
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Interrupt handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = controller.join() => info!("Cycle loop ended"),
        _ = deadline => info!(seconds = ?run_seconds, "Run duration elapsed"),
        _ = interrupt => info!("Interrupt received, stopping"),
    }

    controller.stop();
    controller.join().await;

    let stats = controller.stats();
    recorder.lock().record_final(&stats);
    if let Some(journal) = &journal {
        if let Err(e) = journal.log_stats(JournalEventType::RunStopped, &stats) {
            warn!(error = %e, "Failed to journal run stop");
        }
    }

    let failure = failure.lock().take();
    Ok(RunSummary {
        stats,
        frames_sent: bus.frames_sent(),
        failure,
    })
}

fn init_journal(
    path: Option<&PathBuf>,
    timebase: TimeBase,
) -> Result<Option<(JournalSender, JournalWorker)>, AppError> {
    let Some(path) = path else {
        return Ok(None);
    };
    match RunJournal::new(path, timebase).and_then(RunJournal::non_blocking) {
        Ok(journal) => {
            info!(path = %path.display(), "Run journal enabled");
            Ok(Some(journal))
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Failed to initialize run journal");
            Err(e.into())
        }
    }
}
