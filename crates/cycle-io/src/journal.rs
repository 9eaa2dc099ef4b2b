//! Append-only JSONL journal of cycle loop runs.
//!
//! Records run boundaries, work failures and periodic statistics snapshots
//! so a run can be inspected after the process exits.

use cycle_core::{CycleStats, TimeBase};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("journal writer thread has stopped")]
    WriterStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEventType {
    RunStarted,
    RunStopped,
    WorkFailed,
    StatsSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic timestamp in microseconds
    pub timestamp_us: u64,
    /// Wall-clock Unix timestamp in microseconds
    pub unix_us: u64,
    pub event_type: JournalEventType,
    pub details: serde_json::Value,
}

/// Thread-safe journal writer. Opens the file in append mode.
pub struct RunJournal {
    writer: Mutex<BufWriter<File>>,
    timebase: TimeBase,
}

impl RunJournal {
    pub fn new(path: &Path, timebase: TimeBase) -> Result<Self, JournalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
            timebase,
        })
    }

    pub fn log(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Stamp and log an event.
    pub fn log_event(
        &self,
        event_type: JournalEventType,
        details: serde_json::Value,
    ) -> Result<(), JournalError> {
        self.log(&JournalEntry {
            timestamp_us: self.timebase.now_us(),
            unix_us: self.timebase.unix_us(),
            event_type,
            details,
        })
    }

    pub fn log_stats(
        &self,
        event_type: JournalEventType,
        stats: &CycleStats,
    ) -> Result<(), JournalError> {
        self.log_event(event_type, stats_details(stats))
    }
}

impl RunJournal {
    /// Move the journal onto a dedicated writer thread.
    ///
    /// The returned sender stamps entries on the caller's thread and only
    /// queues them, so it can be used from inside the cycle loop.
    pub fn non_blocking(self) -> Result<(JournalSender, JournalWorker), JournalError> {
        let (tx, rx) = mpsc::channel::<JournalEntry>();
        let timebase = self.timebase;
        let handle = thread::Builder::new()
            .name("run-journal".to_string())
            .spawn(move || {
                for entry in rx {
                    if let Err(e) = self.log(&entry) {
                        warn!(error = %e, "Failed to write journal entry");
                    }
                }
            })?;
        Ok((JournalSender { tx, timebase }, JournalWorker { handle }))
    }
}

/// Queueing handle to a journal running on its writer thread.
#[derive(Clone)]
pub struct JournalSender {
    tx: mpsc::Sender<JournalEntry>,
    timebase: TimeBase,
}

impl JournalSender {
    pub fn log_event(
        &self,
        event_type: JournalEventType,
        details: serde_json::Value,
    ) -> Result<(), JournalError> {
        let entry = JournalEntry {
            timestamp_us: self.timebase.now_us(),
            unix_us: self.timebase.unix_us(),
            event_type,
            details,
        };
        self.tx.send(entry).map_err(|_| JournalError::WriterStopped)
    }

    pub fn log_stats(
        &self,
        event_type: JournalEventType,
        stats: &CycleStats,
    ) -> Result<(), JournalError> {
        self.log_event(event_type, stats_details(stats))
    }
}

/// Writer thread of a non-blocking journal.
pub struct JournalWorker {
    handle: thread::JoinHandle<()>,
}

impl JournalWorker {
    /// Wait until every queued entry is on disk. Returns once all
    /// [`JournalSender`] clones have been dropped.
    pub fn finish(self) {
        if self.handle.join().is_err() {
            warn!("Journal writer thread panicked");
        }
    }
}

/// Flatten a snapshot into microsecond fields for the journal.
pub fn stats_details(stats: &CycleStats) -> serde_json::Value {
    serde_json::json!({
        "cycle_count": stats.cycle_count,
        "last_execution_us": stats.last_execution_time.as_micros() as u64,
        "avg_execution_us": stats.avg_execution_time.as_micros() as u64,
        "max_execution_us": stats.max_execution_time.as_micros() as u64,
        "last_interval_us": stats.last_interval_time.as_micros() as u64,
        "avg_interval_us": stats.avg_interval_time.as_micros() as u64,
        "working_counter": stats.working_counter,
        "overruns": stats.overruns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn writes_jsonl_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs").join("journal.jsonl");

        let journal = RunJournal::new(&path, TimeBase::new()).unwrap();
        journal
            .log_event(
                JournalEventType::RunStarted,
                serde_json::json!({"period_us": 1000}),
            )
            .unwrap();

        let stats = CycleStats {
            cycle_count: 12,
            avg_interval_time: Duration::from_micros(1003),
            working_counter: Some(3),
            ..Default::default()
        };
        journal
            .log_stats(JournalEventType::RunStopped, &stats)
            .unwrap();

        let mut content = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();

        let lines: Vec<&str> = content.trim().split('\n').collect();
        assert_eq!(lines.len(), 2);

        let first: JournalEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event_type, JournalEventType::RunStarted);
        assert_eq!(first.details["period_us"], 1000);

        let second: JournalEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.event_type, JournalEventType::RunStopped);
        assert_eq!(second.details["cycle_count"], 12);
        assert_eq!(second.details["avg_interval_us"], 1003);
        assert_eq!(second.details["working_counter"], 3);
        assert!(second.timestamp_us >= first.timestamp_us);
    }

    #[test]
    fn reopening_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        for _ in 0..2 {
            let journal = RunJournal::new(&path, TimeBase::new()).unwrap();
            journal
                .log_event(JournalEventType::WorkFailed, serde_json::json!({"error": "boom"}))
                .unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn non_blocking_writes_everything_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let journal = RunJournal::new(&path, TimeBase::new()).unwrap();
        let (sender, worker) = journal.non_blocking().unwrap();
        let cycle_sender = sender.clone();
        for cycle_count in 1..=50 {
            let stats = CycleStats {
                cycle_count,
                ..Default::default()
            };
            cycle_sender
                .log_stats(JournalEventType::StatsSnapshot, &stats)
                .unwrap();
        }
        sender
            .log_event(JournalEventType::RunStopped, serde_json::json!({}))
            .unwrap();
        drop(cycle_sender);
        drop(sender);
        worker.finish();

        let entries: Vec<JournalEntry> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 51);
        for (i, entry) in entries[..50].iter().enumerate() {
            assert_eq!(entry.event_type, JournalEventType::StatsSnapshot);
            assert_eq!(entry.details["cycle_count"], i as u64 + 1);
        }
        assert_eq!(entries[50].event_type, JournalEventType::RunStopped);
    }

    #[test]
    fn absent_working_counter_is_null() {
        let details = stats_details(&CycleStats::default());
        assert!(details["working_counter"].is_null());
        assert_eq!(details["cycle_count"], 0);
    }
}
