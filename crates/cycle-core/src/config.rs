use crate::error::{BoxError, ConfigError};
use crate::stats::CycleStats;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result of one work invocation: an optional working counter, or a failure.
pub type WorkResult = Result<Option<i64>, BoxError>;

pub type WorkFn = Arc<dyn Fn() -> BoxFuture<'static, WorkResult> + Send + Sync>;
pub type CycleObserver = Arc<dyn Fn(&CycleStats) + Send + Sync>;
pub type ErrorObserver = Arc<dyn Fn(&BoxError) + Send + Sync>;

/// Immutable controller configuration. Build with [`CycleConfig::builder`].
#[derive(Clone)]
pub struct CycleConfig {
    pub(crate) period: Duration,
    pub(crate) work: WorkFn,
    pub(crate) on_cycle: Option<CycleObserver>,
    pub(crate) on_error: Option<ErrorObserver>,
}

impl CycleConfig {
    pub fn builder() -> CycleConfigBuilder {
        CycleConfigBuilder::default()
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl fmt::Debug for CycleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CycleConfig")
            .field("period", &self.period)
            .field("on_cycle", &self.on_cycle.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct CycleConfigBuilder {
    period: Option<Duration>,
    work: Option<WorkFn>,
    on_cycle: Option<CycleObserver>,
    on_error: Option<ErrorObserver>,
}

impl CycleConfigBuilder {
    pub fn period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Work invoked once per cycle. The returned future is awaited to
    /// completion before the next cycle is scheduled.
    pub fn work<F, Fut>(mut self, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = WorkResult> + Send + 'static,
    {
        self.work = Some(Arc::new(move || -> BoxFuture<'static, WorkResult> {
            Box::pin(work())
        }));
        self
    }

    /// Observer called with the post-update snapshot after every successful cycle.
    pub fn on_cycle<F>(mut self, observer: F) -> Self
    where
        F: Fn(&CycleStats) + Send + Sync + 'static,
    {
        self.on_cycle = Some(Arc::new(observer));
        self
    }

    /// Observer called once with the failure that stopped the loop.
    pub fn on_error<F>(mut self, observer: F) -> Self
    where
        F: Fn(&BoxError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(observer));
        self
    }

    pub fn build(self) -> Result<CycleConfig, ConfigError> {
        let period = self.period.unwrap_or(DEFAULT_PERIOD);
        if period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        let work = self.work.ok_or(ConfigError::MissingWork)?;
        Ok(CycleConfig {
            period,
            work,
            on_cycle: self.on_cycle,
            on_error: self.on_error,
        })
    }
}

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(1);
