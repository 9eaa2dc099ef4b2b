use cycle_io::metrics::{init_metrics, serve_metrics, MetricsRecorder};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use tracing::info;

pub fn init() -> Arc<Mutex<MetricsRecorder>> {
    init_metrics();
    Arc::new(Mutex::new(MetricsRecorder::new()))
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}
