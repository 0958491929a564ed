use tonic::transport::Server;

use taograph::config::{ConfigOverrides, GraphConfig, ShardOverrides};
use taograph::distributed::{proto, ShardBootstrap, ShardNode};
use taograph::model::Partition;
use taograph::shard::ShardOptions;
use taograph::BuildMode;

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
        r#"graph_shard - taograph shard node

USAGE:
    graph_shard [OPTIONS]

OPTIONS:
    -c, --config <FILE>       Path to config file (TOML)
    -l, --listen <ADDR>       Override listen address [default: 127.0.0.1:50061]
    -d, --shard-id <ID>       Shard ID (0-indexed)
    -t, --num-shards <N>      Total shard count (partition modulus)
        --store-mode <MODE>   succinct | suffix | log
    -m, --mode <MODE>         construct | load
        --node-file <FILE>    Node table TSV (or its prebuilt artifact)
        --edge-file <FILE>    Edge table TSV (or its prebuilt artifact)
        --num-attrs <K>       Node attribute count
    -h, --help                Print help

ENVIRONMENT:
    TAOGRAPH_CONFIG           Path to config file
    TAOGRAPH_SHARD_LISTEN     Listen address
    TAOGRAPH_SHARD_ID         Shard ID
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

    let mut shard_overrides = ShardOverrides::default();
    if let Some(listen) = parse_arg("--listen").or_else(|| parse_arg("-l")) {
        shard_overrides.listen = Some(listen.parse()?);
    }
    if let Some(id) = parse_arg("--shard-id").or_else(|| parse_arg("-d")) {
        shard_overrides.id = Some(id.parse()?);
    }
    if let Some(total) = parse_arg("--num-shards").or_else(|| parse_arg("-t")) {
        shard_overrides.num_shards = Some(total.parse()?);
    }
    if let Some(mode) = parse_arg("--store-mode") {
        shard_overrides.store_mode = Some(serde_json::from_str(&format!("\"{}\"", mode))?);
    }
    if let Some(mode) = parse_arg("--mode").or_else(|| parse_arg("-m")) {
        shard_overrides.mode = Some(serde_json::from_str(&format!("\"{}\"", mode))?);
    }
    if let Some(path) = parse_arg("--node-file") {
        shard_overrides.node_file = Some(path.into());
    }
    if let Some(path) = parse_arg("--edge-file") {
        shard_overrides.edge_file = Some(path.into());
    }
    if let Some(num_attrs) = parse_arg("--num-attrs") {
        shard_overrides.num_attrs = Some(num_attrs.parse()?);
    }

    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("TAOGRAPH_CONFIG").ok());
    let config = GraphConfig::load(
        config_path.as_deref(),
        ConfigOverrides {
            shard: Some(shard_overrides),
            ..ConfigOverrides::default()
        },
    )?;

    let shard_cfg = &config.shard;
    let mut options = ShardOptions::for_mode(shard_cfg.store_mode);
    options.seal_threshold = shard_cfg.seal_threshold;
    options.encoding.sa_sampling_rate = shard_cfg.sa_sampling_rate;
    options.encoding.isa_sampling_rate = shard_cfg.isa_sampling_rate;
    options.encoding.npa_sampling_rate = shard_cfg.npa_sampling_rate;

    let bootstrap = ShardBootstrap {
        partition: Partition::new(shard_cfg.id, shard_cfg.num_shards),
        construct: shard_cfg.mode == BuildMode::Construct,
        node_file: shard_cfg.node_file.clone(),
        edge_file: shard_cfg.edge_file.clone(),
        num_attrs: shard_cfg.num_attrs,
        options,
    };
    let node = ShardNode::new(bootstrap);

    println!("taograph shard listening on {}", shard_cfg.listen);
    Server::builder()
        .add_service(proto::shard_service_server::ShardServiceServer::new(node))
        .serve(shard_cfg.listen)
        .await?;

    Ok(())
}
