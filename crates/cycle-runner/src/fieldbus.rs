use cycle_core::{spin_until, WorkResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldbusError {
    #[error("frame {frame} lost: no response from segment")]
    FrameLost { frame: u64 },
}

#[derive(Debug, Clone)]
pub struct FieldbusConfig {
    /// Slaves on the segment; each one that processes the frame adds one
    /// to the working counter.
    pub slaves: u16,
    pub exchange_time: Duration,
    /// Every Nth frame one slave misses the datagram.
    pub drop_every: Option<u64>,
    /// Frame index after which every exchange fails.
    pub fail_after: Option<u64>,
}

impl Default for FieldbusConfig {
    fn default() -> Self {
        Self {
            slaves: 3,
            exchange_time: Duration::from_micros(100),
            drop_every: None,
            fail_after: None,
        }
    }
}

/// Simulated process-data exchange on a field-bus segment.
#[derive(Debug)]
pub struct SimulatedFieldbus {
    config: FieldbusConfig,
    frames: AtomicU64,
}

impl SimulatedFieldbus {
    pub fn new(config: FieldbusConfig) -> Self {
        Self {
            config,
            frames: AtomicU64::new(0),
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Send one frame and wait for it to come back around the ring.
    ///
    /// Sub-millisecond wire times are spun; Tokio timers cannot resolve them.
    pub async fn exchange(&self) -> WorkResult {
        let frame = self.frames.fetch_add(1, Ordering::Relaxed) + 1;

        if self.config.exchange_time >= Duration::from_millis(1) {
            tokio::time::sleep(self.config.exchange_time).await;
        } else {
            spin_until(Instant::now() + self.config.exchange_time, || true);
        }

        if matches!(self.config.fail_after, Some(limit) if frame > limit) {
            return Err(FieldbusError::FrameLost { frame }.into());
        }

        let mut working_counter = i64::from(self.config.slaves);
        if matches!(self.config.drop_every, Some(n) if n > 0 && frame % n == 0) {
            working_counter -= 1;
        }
        Ok(Some(working_counter.max(0)))
    }
}
