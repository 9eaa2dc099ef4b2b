use cycle_core::CycleStats;
use cycle_io::metrics::{init_metrics, serve_metrics, MetricsRecorder};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

fn free_addr() -> String {
    let listener =
        TcpListener::bind("127.0.0.1:0").expect("Failed to bind ephemeral port for exporter test");
    let addr = listener.local_addr().expect("Failed to resolve bound address");
    format!("127.0.0.1:{}", addr.port())
}

fn get(addr: &str, path: &str) -> String {
    let start = Instant::now();
    let mut stream = loop {
        match TcpStream::connect(addr) {
            Ok(stream) => break stream,
            Err(_) if start.elapsed() < Duration::from_secs(5) => {
                thread::sleep(Duration::from_millis(20));
            }
            Err(e) => panic!("exporter never came up: {e}"),
        }
    };
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write!(stream, "GET {path} HTTP/1.0\r\nHost: {addr}\r\n\r\n").unwrap();
    // HTTP/1.0: the server closes the connection after one response.
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    String::from_utf8_lossy(&response).into_owned()
}

fn status_code(response: &str) -> Option<&str> {
    response.lines().next()?.split_whitespace().nth(1)
}

#[test]
fn exporter_serves_metrics_health_and_readiness() {
    init_metrics();
    let addr = free_addr();
    let _server = serve_metrics(addr.clone());

    let health = get(&addr, "/health");
    assert_eq!(status_code(&health), Some("200"), "{health}");

    let missing = get(&addr, "/missing");
    assert_eq!(status_code(&missing), Some("404"), "{missing}");

    let mut recorder = MetricsRecorder::new();
    recorder.record_cycle(&CycleStats {
        cycle_count: 2,
        working_counter: Some(3),
        ..Default::default()
    });

    let ready = get(&addr, "/ready");
    assert_eq!(status_code(&ready), Some("200"), "{ready}");

    let metrics = get(&addr, "/metrics");
    assert_eq!(status_code(&metrics), Some("200"));
    assert!(metrics.contains("cycle_cycles_total 2"));
    assert!(metrics.contains("cycle_working_counter 3"));
}
