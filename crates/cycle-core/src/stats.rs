use serde::Serialize;
use std::time::Duration;

/// Point-in-time copy of the controller's cycle statistics.
#[derive(Clone, Copy, Default, Debug, PartialEq, Serialize)]
pub struct CycleStats {
    pub cycle_count: u64,
    pub last_execution_time: Duration,
    pub avg_execution_time: Duration,
    pub max_execution_time: Duration,
    pub last_interval_time: Duration,
    pub avg_interval_time: Duration,
    /// Result of the most recent successful work invocation.
    pub working_counter: Option<i64>,
    /// Cycles that ran past the following target and forced a resync.
    pub overruns: u64,
}

/// Incremental statistics. O(1) per cycle, no sample history.
///
/// Means are kept in `f64` nanoseconds and rounded when a snapshot is taken.
#[derive(Clone, Default, Debug)]
pub struct StatsAccumulator {
    cycle_count: u64,
    interval_samples: u64,
    last_execution: Duration,
    max_execution: Duration,
    avg_execution_ns: f64,
    last_interval: Duration,
    avg_interval_ns: f64,
    working_counter: Option<i64>,
    overruns: u64,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed cycle.
    ///
    /// `interval` is `None` for the first cycle after a start or reset, which
    /// has no predecessor; such cycles count but do not feed the interval mean.
    pub fn record_cycle(&mut self, execution: Duration, interval: Option<Duration>) {
        self.cycle_count += 1;
        self.last_execution = execution;
        self.max_execution = self.max_execution.max(execution);
        self.avg_execution_ns = running_mean(
            self.avg_execution_ns,
            execution.as_nanos() as f64,
            self.cycle_count,
        );

        if let Some(interval) = interval {
            self.interval_samples += 1;
            self.last_interval = interval;
            self.avg_interval_ns = running_mean(
                self.avg_interval_ns,
                interval.as_nanos() as f64,
                self.interval_samples,
            );
        }
    }

    /// Overwrite the working counter with the latest successful result.
    pub fn set_working_counter(&mut self, value: Option<i64>) {
        self.working_counter = value;
    }

    pub fn record_overrun(&mut self) {
        self.overruns += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn snapshot(&self) -> CycleStats {
        CycleStats {
            cycle_count: self.cycle_count,
            last_execution_time: self.last_execution,
            avg_execution_time: nanos_to_duration(self.avg_execution_ns),
            max_execution_time: self.max_execution,
            last_interval_time: self.last_interval,
            avg_interval_time: nanos_to_duration(self.avg_interval_ns),
            working_counter: self.working_counter,
            overruns: self.overruns,
        }
    }
}

#[inline]
fn running_mean(avg: f64, sample: f64, n: u64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    avg + (sample - avg) / n as f64
}

fn nanos_to_duration(ns: f64) -> Duration {
    if ns.is_finite() && ns > 0.0 {
        Duration::from_nanos(ns.round() as u64)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn us(v: u64) -> Duration {
        Duration::from_micros(v)
    }

    #[test]
    fn empty_snapshot_is_zero() {
        let stats = StatsAccumulator::new().snapshot();
        assert_eq!(stats, CycleStats::default());
        assert_eq!(stats.avg_execution_time, Duration::ZERO);
        assert_eq!(stats.working_counter, None);
    }

    #[test]
    fn mean_of_three_samples() {
        let mut acc = StatsAccumulator::new();
        acc.record_cycle(us(100), None);
        acc.record_cycle(us(200), Some(us(1000)));
        acc.record_cycle(us(600), Some(us(3000)));

        let stats = acc.snapshot();
        assert_eq!(stats.cycle_count, 3);
        assert_eq!(stats.last_execution_time, us(600));
        assert_eq!(stats.avg_execution_time, us(300));
        assert_eq!(stats.max_execution_time, us(600));
        assert_eq!(stats.last_interval_time, us(3000));
        assert_eq!(stats.avg_interval_time, us(2000));
    }

    #[test]
    fn first_cycle_has_no_interval() {
        let mut acc = StatsAccumulator::new();
        acc.record_cycle(us(50), None);
        let stats = acc.snapshot();
        assert_eq!(stats.cycle_count, 1);
        assert_eq!(stats.last_interval_time, Duration::ZERO);
        assert_eq!(stats.avg_interval_time, Duration::ZERO);
    }

    #[test]
    fn working_counter_is_overwritten_not_summed() {
        let mut acc = StatsAccumulator::new();
        acc.set_working_counter(Some(3));
        acc.set_working_counter(Some(7));
        assert_eq!(acc.snapshot().working_counter, Some(7));
        acc.set_working_counter(None);
        assert_eq!(acc.snapshot().working_counter, None);
    }

    #[test]
    fn reset_clears_everything() {
        let mut acc = StatsAccumulator::new();
        acc.record_cycle(us(10), None);
        acc.record_cycle(us(10), Some(us(10)));
        acc.set_working_counter(Some(4));
        acc.record_overrun();

        acc.reset();
        assert_eq!(acc.snapshot(), CycleStats::default());
        assert_eq!(acc.cycle_count(), 0);
    }

    #[test]
    fn snapshot_serializes() {
        let mut acc = StatsAccumulator::new();
        acc.record_cycle(us(10), None);
        acc.set_working_counter(Some(2));
        let json = serde_json::to_value(acc.snapshot()).unwrap();
        assert_eq!(json["cycle_count"], 1);
        assert_eq!(json["working_counter"], 2);
    }
}
