use std::time::Duration;
use thiserror::Error;

/// Failure type produced by a work function. Delivered verbatim to `on_error`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cycle period must be greater than zero")]
    ZeroPeriod,
    #[error("no work function configured")]
    MissingWork,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("start() must be called from within a Tokio runtime")]
    NoRuntime,
    /// Delivered to `on_error` when the work future panics.
    #[error("work panicked: {0}")]
    WorkPanicked(String),
    /// Delivered to `on_error` when the next target instant is not
    /// representable on the monotonic clock.
    #[error("cycle period {period:?} overflows the monotonic clock")]
    ScheduleOverflow { period: Duration },
}
