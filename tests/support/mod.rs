//! Shared fixtures for the end-to-end tests: a two-shard graph with known
//! edges and node attributes, plus helpers to spawn shard and aggregator
//! servers on ephemeral ports.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use taograph::distributed::proto::aggregator_service_client::AggregatorServiceClient;
use taograph::distributed::{proto, AggregatorNode, AggregatorOptions, ShardNode};
use taograph::{
    Assoc, AssocStore, EncodingConfig, NodeRecord, NodeStore, Partition, ShardHandler,
    ShardOptions,
};

/// Shard 0 of the two-shard fixture (even global ids).
///
/// Nodes: locals {0, 1, 2} are globals {0, 2, 4} with `attrs[1]` = x, y, x.
/// Edges: the `(10, 7)` assoc-list plus an atype-9 list pointing at fixture
/// nodes across both shards.
pub fn shard0_handler() -> Arc<ShardHandler> {
    let edges = vec![
        Assoc::new(10, 20, 7, 100, b"a".to_vec()),
        Assoc::new(10, 30, 7, 200, b"b".to_vec()),
        Assoc::new(10, 40, 7, 200, b"c".to_vec()),
        Assoc::new(10, 0, 9, 500, b"".to_vec()),
        Assoc::new(10, 1, 9, 400, b"".to_vec()),
        Assoc::new(10, 3, 9, 300, b"".to_vec()),
        Assoc::new(10, 4, 9, 200, b"".to_vec()),
    ];
    let nodes = vec![
        NodeRecord::new(vec!["n0".into(), "x".into()]),
        NodeRecord::new(vec!["n2".into(), "y".into()]),
        NodeRecord::new(vec!["n4".into(), "x".into()]),
    ];
    Arc::new(ShardHandler::new(
        Partition::new(0, 2),
        AssocStore::from_edges(edges, EncodingConfig::default()),
        NodeStore::from_records(nodes, 2).unwrap(),
        ShardOptions::default(),
    ))
}

/// Shard 1 of the fixture (odd global ids). Locals {0, 1} are globals
/// {1, 3} with `attrs[1]` = x, y.
pub fn shard1_handler() -> Arc<ShardHandler> {
    let edges = vec![Assoc::new(11, 2, 7, 50, b"z".to_vec())];
    let nodes = vec![
        NodeRecord::new(vec!["n1".into(), "x".into()]),
        NodeRecord::new(vec!["n3".into(), "y".into()]),
    ];
    Arc::new(ShardHandler::new(
        Partition::new(1, 2),
        AssocStore::from_edges(edges, EncodingConfig::default()),
        NodeStore::from_records(nodes, 2).unwrap(),
        ShardOptions::default(),
    ))
}

pub async fn spawn_shard(handler: Arc<ShardHandler>) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let node = ShardNode::with_handler(handler);
    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(proto::shard_service_server::ShardServiceServer::new(node))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("shard server");
    });
    (addr, handle)
}

pub async fn spawn_aggregator(
    shard_addrs: Vec<SocketAddr>,
    options: AggregatorOptions,
) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let urls = shard_addrs
        .into_iter()
        .map(|addr| format!("http://{}", addr))
        .collect::<Vec<_>>();
    let node = AggregatorNode::connect(urls, options)
        .await
        .expect("aggregator connect");
    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(proto::aggregator_service_server::AggregatorServiceServer::new(node))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("aggregator server");
    });
    (addr, handle)
}

pub async fn aggregator_client(
    addr: SocketAddr,
) -> AggregatorServiceClient<tonic::transport::Channel> {
    AggregatorServiceClient::connect(format!("http://{}", addr))
        .await
        .expect("client connect")
}

/// Spin up the whole two-shard fixture and hand back a connected client.
pub async fn two_shard_cluster() -> (
    AggregatorServiceClient<tonic::transport::Channel>,
    Vec<JoinHandle<()>>,
    Arc<ShardHandler>,
    Arc<ShardHandler>,
) {
    let shard0 = shard0_handler();
    let shard1 = shard1_handler();
    let (addr0, h0) = spawn_shard(shard0.clone()).await;
    let (addr1, h1) = spawn_shard(shard1.clone()).await;
    let (agg_addr, h2) =
        spawn_aggregator(vec![addr0, addr1], AggregatorOptions::default()).await;
    let client = aggregator_client(agg_addr).await;
    (client, vec![h0, h1, h2], shard0, shard1)
}
