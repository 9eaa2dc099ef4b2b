pub mod journal;
pub mod metrics;

pub use journal::{
    JournalEntry, JournalError, JournalEventType, JournalSender, JournalWorker, RunJournal,
};
pub use metrics::{handle_path, init_metrics, serve_metrics, MetricsRecorder};
