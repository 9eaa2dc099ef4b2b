use std::ffi::OsStr;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cycle_runner=debug,cycle_core=debug"))
}

/// Initialize the tracing subscriber with optional JSON output and an
/// optional log file. The returned guard must be held until exit so
/// buffered file output is flushed.
pub fn init_tracing(json_output: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let (file_writer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let name = path.file_name().unwrap_or(OsStr::new("cycle-runner.log"));
            let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    let file_layer = file_writer.map(|writer| fmt::layer().json().with_writer(writer));

    if json_output {
        tracing_subscriber::registry()
            .with(default_filter())
            .with(file_layer)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(default_filter())
            .with(file_layer)
            .with(fmt::layer().pretty())
            .init();
    }
    guard
}
