use std::time::Duration;

use tonic::transport::Server;

use taograph::config::{AggregatorOverrides, ConfigOverrides, GraphConfig};
use taograph::distributed::{proto, AggregatorNode, AggregatorOptions};

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
        r#"graph_aggregator - taograph query aggregator

USAGE:
    graph_aggregator [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to config file (TOML)
    -l, --listen <ADDR>     Override listen address [default: 127.0.0.1:50060]
    -s, --shards <ADDRS>    Override shard addresses (comma-separated, shard-id order)
        --pool-size <N>     Connections per shard
        --strict            Fail whole fan-outs on any shard failure
    -h, --help              Print help

ENVIRONMENT:
    TAOGRAPH_CONFIG              Path to config file
    TAOGRAPH_AGGREGATOR_LISTEN   Listen address
    TAOGRAPH_AGGREGATOR_SHARDS   Comma-separated shard addresses

CONFIG FILE (taograph.toml):
    [aggregator]
    listen = "0.0.0.0:50060"
    shards = ["shard-0:50061", "shard-1:50061"]
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    let mut aggregator_overrides = AggregatorOverrides::default();
    if let Some(listen) = parse_arg("--listen").or_else(|| parse_arg("-l")) {
        aggregator_overrides.listen = Some(listen.parse()?);
    }
    if let Some(shards_arg) = parse_arg("--shards").or_else(|| parse_arg("-s")) {
        let shards: Vec<String> = shards_arg
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        aggregator_overrides.shards = Some(shards);
    }
    if let Some(pool_size) = parse_arg("--pool-size") {
        aggregator_overrides.pool_size = Some(pool_size.parse()?);
    }
    if has_flag("--strict") {
        aggregator_overrides.strict_fanout = Some(true);
    }

    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("TAOGRAPH_CONFIG").ok());
    let config = GraphConfig::load(
        config_path.as_deref(),
        ConfigOverrides {
            aggregator: Some(aggregator_overrides),
            ..ConfigOverrides::default()
        },
    )?;

    let aggregator_cfg = &config.aggregator;
    let shard_addrs = aggregator_cfg.shard_endpoints();
    let node = AggregatorNode::connect(
        shard_addrs,
        AggregatorOptions {
            pool_size: aggregator_cfg.pool_size,
            strict_fanout: aggregator_cfg.strict_fanout,
            rpc_timeout: Duration::from_millis(aggregator_cfg.rpc_timeout_ms),
        },
    )
    .await?;

    println!("taograph aggregator listening on {}", aggregator_cfg.listen);
    Server::builder()
        .add_service(proto::aggregator_service_server::AggregatorServiceServer::new(node))
        .serve(aggregator_cfg.listen)
        .await?;

    Ok(())
}
