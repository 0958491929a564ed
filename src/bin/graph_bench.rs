use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use taograph::config::{BenchOverrides, ConfigOverrides, GraphConfig};
use taograph::distributed::AggregatorClient;
use taograph::workload::{append_report, MixDriver, PhasePlan, QueryPool};

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"graph_bench - TAO-mix throughput benchmark

USAGE:
    graph_bench [OPTIONS]

OPTIONS:
    -c, --config <FILE>       Path to config file (TOML)
    -a, --aggregator <ADDR>   Aggregator address [default: 127.0.0.1:50060]
    -n, --threads <N>         Driver threads, one connection each
        --query-dir <DIR>     Directory with query parameter files
        --warmup <SECS>       Warm-up budget [default: 60]
        --measure <SECS>      Measure budget [default: 120]
        --cooldown <SECS>     Cool-down budget [default: 5]
    -o, --output <FILE>       Append-only per-thread summary file
    -h, --help                Print help
"#
    );
}

fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    let mut bench_overrides = BenchOverrides::default();
    if let Some(addr) = parse_arg("--aggregator").or_else(|| parse_arg("-a")) {
        bench_overrides.aggregator = Some(addr);
    }
    if let Some(threads) = parse_arg("--threads").or_else(|| parse_arg("-n")) {
        bench_overrides.threads = Some(threads.parse()?);
    }
    if let Some(dir) = parse_arg("--query-dir") {
        bench_overrides.query_dir = Some(dir.into());
    }
    if let Some(secs) = parse_arg("--warmup") {
        bench_overrides.warmup_secs = Some(secs.parse()?);
    }
    if let Some(secs) = parse_arg("--measure") {
        bench_overrides.measure_secs = Some(secs.parse()?);
    }
    if let Some(secs) = parse_arg("--cooldown") {
        bench_overrides.cooldown_secs = Some(secs.parse()?);
    }
    if let Some(path) = parse_arg("--output").or_else(|| parse_arg("-o")) {
        bench_overrides.output = Some(path.into());
    }

    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("TAOGRAPH_CONFIG").ok());
    let config = GraphConfig::load(
        config_path.as_deref(),
        ConfigOverrides {
            bench: Some(bench_overrides),
            ..ConfigOverrides::default()
        },
    )?;
    let bench = config.bench;

    let pool = Arc::new(match &bench.query_dir {
        Some(dir) => QueryPool::from_dir(dir)?,
        None => anyhow::bail!("--query-dir is required"),
    });
    let plan = PhasePlan {
        warmup: Duration::from_secs(bench.warmup_secs),
        measure: Duration::from_secs(bench.measure_secs),
        cooldown: Duration::from_secs(bench.cooldown_secs),
    };

    let addr = if bench.aggregator.starts_with("http://") {
        bench.aggregator.clone()
    } else {
        format!("http://{}", bench.aggregator)
    };
    let stop = Arc::new(AtomicBool::new(false));

    // Ctrl-C raises the cooperative stop flag; in-flight queries finish.
    {
        let stop = stop.clone();
        ctrlc_handler(move || taograph::workload::request_stop(&stop));
    }

    let mut handles = Vec::with_capacity(bench.threads);
    for thread_id in 0..bench.threads {
        let addr = addr.clone();
        let pool = pool.clone();
        let stop = stop.clone();
        let output = bench.output.clone();
        handles.push(std::thread::spawn(move || -> anyhow::Result<()> {
            let mut client = AggregatorClient::connect(&addr)?;
            let driver = MixDriver::new(&mut client, &pool, thread_id);
            let report = driver.run(plan, &stop);
            append_report(&output, &report)?;
            Ok(())
        }));
    }

    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("driver thread panicked"),
        }
    }
    println!("benchmark complete; summaries appended to {}", bench.output.display());
    Ok(())
}

/// Minimal SIGINT hook without an extra dependency: spawn a thread that
/// waits for Ctrl-C via tokio's signal handling.
fn ctrlc_handler(on_signal: impl FnOnce() + Send + 'static) {
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("signal runtime");
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal();
            }
        });
    });
}
