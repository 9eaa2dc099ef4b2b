//! Prometheus metrics for the cycle controller.
//!
//! Counters are fed from `CycleStats` snapshots, so they stay correct across
//! statistics resets and restarts.

use cycle_core::CycleStats;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Header, Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

const TIME_BUCKETS_US: &[f64] = &[
    10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 50000.0,
];

// ============================================================================
// Cycle Metrics
// ============================================================================

pub static CYCLES_EXECUTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("cycle_cycles_total", "Total cycles completed").unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static CYCLE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "cycle_failures_total",
        "Work failures that stopped the cycle loop",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static CYCLE_OVERRUNS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "cycle_overruns_total",
        "Cycles that overran the period and forced a resync",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static EXECUTION_TIME_US: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "cycle_execution_time_us",
            "Work execution time per cycle in microseconds",
        )
        .buckets(TIME_BUCKETS_US.to_vec()),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

pub static INTERVAL_TIME_US: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "cycle_interval_time_us",
            "Time between consecutive cycle starts in microseconds",
        )
        .buckets(TIME_BUCKETS_US.to_vec()),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

pub static WORKING_COUNTER: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "cycle_working_counter",
        "Working counter returned by the latest successful cycle",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Loop state (1 = running, 0 = stopped)
pub static LOOP_RUNNING: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("cycle_running", "Cycle loop state (1=running, 0=stopped)").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Converts successive snapshots into counter increments and observations.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    last_cycle_count: u64,
    last_overruns: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest snapshot. Cheap enough to call from `on_cycle`.
    pub fn record_cycle(&mut self, stats: &CycleStats) {
        // A lower count means stats were reset; everything seen is new.
        if stats.cycle_count < self.last_cycle_count {
            self.last_cycle_count = 0;
            self.last_overruns = 0;
        }
        if stats.cycle_count > self.last_cycle_count {
            CYCLES_EXECUTED.inc_by(stats.cycle_count - self.last_cycle_count);
            self.last_cycle_count = stats.cycle_count;
            EXECUTION_TIME_US.observe(stats.last_execution_time.as_secs_f64() * 1e6);
            // Zero only when no cycle since the last start had a predecessor.
            if !stats.last_interval_time.is_zero() {
                INTERVAL_TIME_US.observe(stats.last_interval_time.as_secs_f64() * 1e6);
            }
        }
        if stats.overruns > self.last_overruns {
            CYCLE_OVERRUNS.inc_by(stats.overruns - self.last_overruns);
        }
        self.last_overruns = stats.overruns;

        match stats.working_counter {
            Some(value) => WORKING_COUNTER.set(value as f64),
            None => WORKING_COUNTER.set(f64::NAN),
        }
    }

    /// Record the snapshot taken after the loop exited and mark it stopped.
    ///
    /// A cycle that ended in a work failure is counted in the statistics but
    /// never reaches `on_cycle`, so only this final snapshot carries it.
    pub fn record_final(&mut self, stats: &CycleStats) {
        self.record_cycle(stats);
        self.set_running(false);
    }

    pub fn record_failure(&self) {
        CYCLE_FAILURES.inc();
    }

    pub fn set_running(&self, running: bool) {
        LOOP_RUNNING.set(i64::from(running));
    }
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Response body and status for one exporter path.
#[derive(Debug)]
pub struct ExporterReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl ExporterReply {
    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }
}

/// Route an exporter request path.
pub fn handle_path(path: &str) -> ExporterReply {
    match path {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let metric_families = REGISTRY.gather();
            let mut buffer = Vec::new();
            match encoder.encode(&metric_families, &mut buffer) {
                Ok(()) => ExporterReply {
                    status: 200,
                    content_type: "text/plain; version=0.0.4",
                    body: buffer,
                },
                Err(e) => {
                    tracing::warn!("Failed to encode metrics: {}", e);
                    ExporterReply::text(500, "Internal Server Error")
                }
            }
        }
        "/health" => ExporterReply::text(200, "OK"),
        // Ready once at least one cycle has completed
        "/ready" => {
            if CYCLES_EXECUTED.get() > 0 {
                ExporterReply::text(200, "Ready")
            } else {
                ExporterReply::text(503, "Not Ready")
            }
        }
        _ => ExporterReply::text(404, "Not Found"),
    }
}

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            let reply = handle_path(request.url());
            let mut response = Response::from_data(reply.body).with_status_code(reply.status);
            if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], reply.content_type) {
                response = response.with_header(header);
            }
            if let Err(e) = request.respond(response) {
                tracing::debug!("Failed to send metrics response: {}", e);
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = CYCLES_EXECUTED.get();
    let _ = CYCLE_FAILURES.get();
    let _ = CYCLE_OVERRUNS.get();
    let _ = EXECUTION_TIME_US.get_sample_count();
    let _ = INTERVAL_TIME_US.get_sample_count();
    let _ = WORKING_COUNTER.get();
    let _ = LOOP_RUNNING.get();
}
