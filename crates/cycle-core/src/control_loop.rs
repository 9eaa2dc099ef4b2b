use crate::config::CycleConfig;
use crate::error::{BoxError, CycleError};
use crate::stats::{CycleStats, StatsAccumulator};
use crate::timebase::spin_until;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, trace};

/// State shared between a controller handle and its loop task.
struct Shared {
    running: AtomicBool,
    /// Bumped on every successful `start`; a loop whose generation is stale
    /// exits at its next check and never touches the statistics again.
    generation: AtomicU64,
    stats: Mutex<StatsAccumulator>,
    /// True from `start` until the current loop task has exited.
    active: watch::Sender<bool>,
}

/// Drives a work function at a fixed period using busy-waiting.
///
/// The loop runs as a Tokio task. Between cycles it yields to the runtime
/// once, then spins on the monotonic clock until the next target instant.
/// Dropping the controller stops the loop.
pub struct CycleController {
    config: CycleConfig,
    shared: Arc<Shared>,
}

impl CycleController {
    pub fn new(config: CycleConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                stats: Mutex::new(StatsAccumulator::new()),
                active: watch::Sender::new(false),
            }),
        }
    }

    /// Start the loop. Resets statistics; the first cycle begins immediately.
    ///
    /// No-op while already running. Fails only when called outside a Tokio
    /// runtime.
    pub fn start(&self) -> Result<(), CycleError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| CycleError::NoRuntime)?;

        let generation = {
            let mut stats = self.shared.stats.lock();
            if self.shared.running.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
            stats.reset();
            self.shared.active.send_replace(true);
            generation
        };

        debug!(
            period_us = self.config.period.as_micros() as u64,
            generation, "Starting cycle loop"
        );

        let cycle_loop = CycleLoop {
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            generation,
        };
        handle.spawn(cycle_loop.run());
        Ok(())
    }

    /// Request a cooperative stop. In-flight work is allowed to finish.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            debug!("Cycle loop stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CycleStats {
        self.shared.stats.lock().snapshot()
    }

    pub fn reset_stats(&self) {
        self.shared.stats.lock().reset();
    }

    pub fn period(&self) -> Duration {
        self.config.period
    }

    /// Wait until the most recently started loop has exited. Returns
    /// immediately when no loop is active. Cancel-safe.
    pub async fn join(&self) {
        let mut active = self.shared.active.subscribe();
        // The sender lives in `self.shared`, so this cannot observe a close.
        let _ = active.wait_for(|active| !*active).await;
    }
}

impl Drop for CycleController {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
    }
}

enum CycleOutcome {
    Completed(CycleStats),
    Failed(BoxError),
    /// A newer run took over while this cycle's work was in flight.
    Superseded,
}

struct CycleLoop {
    config: CycleConfig,
    shared: Arc<Shared>,
    generation: u64,
}

impl CycleLoop {
    async fn run(self) {
        let period = self.config.period;
        let mut target = Instant::now();
        let mut previous_start: Option<Instant> = None;

        loop {
            tokio::task::yield_now().await;
            if !self.is_current() {
                break;
            }
            if !spin_until(target, || self.is_current()) {
                break;
            }

            let cycle_start = Instant::now();
            let interval = previous_start.map(|prev| cycle_start.duration_since(prev));
            previous_start = Some(cycle_start);

            // A panicking work future is a work failure like any other.
            let result = AssertUnwindSafe(async { (self.config.work)().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(CycleError::WorkPanicked(panic_message(payload.as_ref())).into())
                });
            let execution = cycle_start.elapsed();

            match self.complete(execution, interval, result) {
                CycleOutcome::Completed(snapshot) => {
                    if let Some(on_cycle) = &self.config.on_cycle {
                        on_cycle(&snapshot);
                    }
                }
                CycleOutcome::Failed(err) => {
                    debug!(error = %err, "Work failed, stopping cycle loop");
                    if let Some(on_error) = &self.config.on_error {
                        on_error(&err);
                    }
                    break;
                }
                CycleOutcome::Superseded => break,
            }

            let now = Instant::now();
            match next_target(target, now, period) {
                Some(Schedule::OnTime(next)) => target = next,
                Some(Schedule::Resynced(next)) => {
                    let late = now.saturating_duration_since(target + period);
                    trace!(
                        overrun_us = late.as_micros() as u64,
                        "Cycle overrun, resynchronising"
                    );
                    self.record_overrun();
                    target = next;
                }
                None => {
                    self.abandon(CycleError::ScheduleOverflow { period }.into());
                    break;
                }
            }
        }

        debug!(generation = self.generation, "Cycle loop exited");
    }

    fn is_current(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
            && self.shared.generation.load(Ordering::Acquire) == self.generation
    }

    fn complete(
        &self,
        execution: Duration,
        interval: Option<Duration>,
        result: Result<Option<i64>, BoxError>,
    ) -> CycleOutcome {
        let mut stats = self.shared.stats.lock();
        if self.shared.generation.load(Ordering::Acquire) != self.generation {
            return CycleOutcome::Superseded;
        }
        match result {
            Ok(working_counter) => {
                stats.set_working_counter(working_counter);
                stats.record_cycle(execution, interval);
                CycleOutcome::Completed(stats.snapshot())
            }
            Err(err) => {
                stats.record_cycle(execution, interval);
                self.shared.running.store(false, Ordering::Release);
                CycleOutcome::Failed(err)
            }
        }
    }

    /// Stop the loop for a reason other than a failed work result.
    fn abandon(&self, err: BoxError) {
        {
            let _stats = self.shared.stats.lock();
            if self.shared.generation.load(Ordering::Acquire) != self.generation {
                return;
            }
            self.shared.running.store(false, Ordering::Release);
        }
        error!(error = %err, "Cycle loop cannot continue, stopping");
        if let Some(on_error) = &self.config.on_error {
            on_error(&err);
        }
    }

    fn record_overrun(&self) {
        let mut stats = self.shared.stats.lock();
        if self.shared.generation.load(Ordering::Acquire) == self.generation {
            stats.record_overrun();
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Schedule {
    OnTime(Instant),
    /// The naive next target had already passed; rebased onto `now`.
    Resynced(Instant),
}

/// Absolute schedule: the next target is `target + period`, unless that
/// instant has already passed, in which case the schedule is rebased onto
/// `now` instead of catching up. `None` when the clock cannot represent it.
fn next_target(target: Instant, now: Instant, period: Duration) -> Option<Schedule> {
    let next = target.checked_add(period)?;
    if now > next {
        now.checked_add(period).map(Schedule::Resynced)
    } else {
        Some(Schedule::OnTime(next))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Drop for CycleLoop {
    // Also runs when an observer panics, so a dead loop never reports itself
    // as running.
    fn drop(&mut self) {
        let _stats = self.shared.stats.lock();
        if self.shared.generation.load(Ordering::Acquire) == self.generation {
            self.shared.running.store(false, Ordering::Release);
            self.shared.active.send_replace(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_config(calls: Arc<AtomicUsize>, period: Duration) -> CycleConfig {
        CycleConfig::builder()
            .period(period)
            .work(move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            })
            .build()
            .unwrap()
    }

    #[test]
    fn start_outside_runtime_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let controller = CycleController::new(counting_config(calls, Duration::from_millis(1)));
        assert!(matches!(controller.start(), Err(CycleError::NoRuntime)));
        assert!(!controller.is_running());
    }

    #[test]
    fn next_target_keeps_absolute_schedule() {
        let target = Instant::now();
        let period = Duration::from_millis(10);
        // Finished early: the next start is exactly one period after the last target.
        let now = target + Duration::from_millis(4);
        assert_eq!(
            next_target(target, now, period),
            Some(Schedule::OnTime(target + period))
        );
        // Finished exactly on the boundary: still on time.
        assert_eq!(
            next_target(target, target + period, period),
            Some(Schedule::OnTime(target + period))
        );
    }

    #[test]
    fn next_target_rebases_after_overrun() {
        let target = Instant::now();
        let period = Duration::from_millis(10);
        let now = target + Duration::from_millis(25);
        assert_eq!(
            next_target(target, now, period),
            Some(Schedule::Resynced(now + period))
        );
    }

    #[test]
    fn next_target_overflow_is_none() {
        let now = Instant::now();
        assert_eq!(next_target(now, now, Duration::MAX), None);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("frame lost"));
        assert_eq!(panic_message(payload.as_ref()), "frame lost");
        let payload: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn stop_while_stopped_is_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let controller = CycleController::new(counting_config(calls, Duration::from_millis(1)));
        controller.stop();
        controller.stop();
        assert!(!controller.is_running());
        assert_eq!(controller.stats(), CycleStats::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_ends_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let controller =
            CycleController::new(counting_config(Arc::clone(&calls), Duration::from_millis(2)));
        controller.start().unwrap();
        assert!(controller.is_running());
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.stop();
        controller.join().await;

        assert!(!controller.is_running());
        let after_join = calls.load(Ordering::SeqCst);
        assert!(after_join >= 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_join);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drop_stops_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let controller =
            CycleController::new(counting_config(Arc::clone(&calls), Duration::from_millis(1)));
        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(controller);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let settled = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), settled);
    }
}
