use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub period_us: u64,
    pub work_us: u64,
    pub slaves: u16,
    pub drop_every: Option<u64>,
    pub fail_after: Option<u64>,
    pub report_every: u64,
    pub json_logs: bool,
    pub log_file: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub journal_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            period_us: 1000,
            work_us: 100,
            slaves: 3,
            drop_every: None,
            fail_after: None,
            report_every: 1000,
            json_logs: false,
            log_file: None,
            metrics_addr: None,
            journal_path: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--run-seconds" => {
                    if i + 1 < args.len() {
                        cfg.run_seconds = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--period-us" => {
                    if i + 1 < args.len() {
                        cfg.period_us = args[i + 1].parse().unwrap_or(cfg.period_us);
                        i += 1;
                    }
                }
                "--work-us" => {
                    if i + 1 < args.len() {
                        cfg.work_us = args[i + 1].parse().unwrap_or(cfg.work_us);
                        i += 1;
                    }
                }
                "--slaves" => {
                    if i + 1 < args.len() {
                        cfg.slaves = args[i + 1].parse().unwrap_or(cfg.slaves);
                        i += 1;
                    }
                }
                "--drop-every" => {
                    if i + 1 < args.len() {
                        cfg.drop_every = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--fail-after" => {
                    if i + 1 < args.len() {
                        cfg.fail_after = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--report-every" => {
                    if i + 1 < args.len() {
                        cfg.report_every = args[i + 1].parse().unwrap_or(cfg.report_every);
                        i += 1;
                    }
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-file" => {
                    if i + 1 < args.len() {
                        cfg.log_file = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--metrics-addr" => {
                    if i + 1 < args.len() {
                        cfg.metrics_addr = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--journal" => {
                    if i + 1 < args.len() {
                        cfg.journal_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        cfg
    }

    pub fn print_help() {
        println!(
            r#"cycle-runner - busy-wait cycle controller driving a simulated field bus

USAGE:
    cycle-runner [OPTIONS]

OPTIONS:
    --period-us <US>        Target cycle period in microseconds [default: 1000]
    --work-us <US>          Simulated frame exchange time in microseconds [default: 100]
    --slaves <N>            Slaves on the simulated segment (expected working counter) [default: 3]
    --drop-every <N>        Every Nth frame one slave misses the datagram
    --fail-after <N>        Fail every exchange after N frames (stops the loop)
    --run-seconds <SECS>    Run for a fixed duration then exit
    --report-every <N>      Log and journal statistics every N cycles [default: 1000]
    --json-logs             Output logs in JSON format (for log aggregation)
    --log-file <PATH>       Also write logs to the given file
    --metrics-addr <ADDR>   Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --journal <PATH>        Append run events and statistics to a JSONL file
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,cycle_core=trace)

EXAMPLES:
    # 1 kHz loop with metrics
    cycle-runner --metrics-addr 0.0.0.0:9090

    # 250 us cycle, short run, JSON logs and a journal
    cycle-runner --period-us 250 --work-us 40 --run-seconds 10 --json-logs --journal runs.jsonl

    # Demonstrate the failure path
    cycle-runner --fail-after 500 --run-seconds 5
"#
        );
    }
}
