//! End-to-end tests over real shard and aggregator servers: routing, the
//! TAO primitives through the wire, global-id rewriting, the two-phase
//! neighbor-attribute query, and degraded fan-out.

use std::collections::HashSet;

use tonic::Request;

use taograph::distributed::proto;
use taograph::distributed::AggregatorOptions;
use taograph::{Assoc, NodeRecord};

mod support;

#[tokio::test(flavor = "multi_thread")]
async fn assoc_primitives_route_to_the_owning_shard() {
    let (mut client, _handles, _s0, _s1) = support::two_shard_cluster().await;

    // S1: full range in time-DESC order, dst ASC on ties.
    let resp = client
        .assoc_range(Request::new(proto::AssocRangeRequest {
            src: 10,
            atype: 7,
            off: 0,
            len: 3,
        }))
        .await
        .unwrap()
        .into_inner();
    let rows: Vec<(i64, i64, Vec<u8>)> = resp
        .assocs
        .iter()
        .map(|a| (a.dst_id, a.timestamp, a.attr.clone()))
        .collect();
    assert_eq!(
        rows,
        vec![
            (30, 200, b"b".to_vec()),
            (40, 200, b"c".to_vec()),
            (20, 100, b"a".to_vec()),
        ]
    );

    let count = client
        .assoc_count(Request::new(proto::AssocCountRequest { src: 10, atype: 7 }))
        .await
        .unwrap()
        .into_inner()
        .count;
    assert_eq!(count, 3);

    // S2: bounded time-range scan.
    let resp = client
        .assoc_time_range(Request::new(proto::AssocTimeRangeRequest {
            src: 10,
            atype: 7,
            t_low: 150,
            t_high: 250,
            limit: 1,
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.assocs.len(), 1);
    assert_eq!(resp.assocs[0].dst_id, 30);

    // S5: destination-set filter with an inclusive window.
    let resp = client
        .assoc_get(Request::new(proto::AssocGetRequest {
            src: 10,
            atype: 7,
            dst_id_set: vec![20, 40],
            t_low: 0,
            t_high: 300,
        }))
        .await
        .unwrap()
        .into_inner();
    let got: HashSet<(i64, i64)> = resp.assocs.iter().map(|a| (a.dst_id, a.timestamp)).collect();
    assert_eq!(got, HashSet::from([(40, 200), (20, 100)]));

    // Odd src routes to shard 1.
    let resp = client
        .assoc_range(Request::new(proto::AssocRangeRequest {
            src: 11,
            atype: 7,
            off: 0,
            len: 10,
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.assocs.len(), 1);
    assert_eq!(resp.assocs[0].attr, b"z");
}

#[tokio::test(flavor = "multi_thread")]
async fn obj_get_translates_global_to_local_ids() {
    let (mut client, _handles, _s0, _s1) = support::two_shard_cluster().await;

    // Global 4 is local 2 on shard 0.
    let attrs = client
        .obj_get(Request::new(proto::ObjGetRequest { node_id: 4 }))
        .await
        .unwrap()
        .into_inner()
        .attrs;
    assert_eq!(attrs, vec![b"n4".to_vec(), b"x".to_vec()]);

    // Global 3 is local 1 on shard 1.
    let attrs = client
        .obj_get(Request::new(proto::ObjGetRequest { node_id: 3 }))
        .await
        .unwrap()
        .into_inner()
        .attrs;
    assert_eq!(attrs, vec![b"n3".to_vec(), b"y".to_vec()]);

    // Unknown ids are empty, not errors.
    let attrs = client
        .obj_get(Request::new(proto::ObjGetRequest { node_id: 40 }))
        .await
        .unwrap()
        .into_inner()
        .attrs;
    assert!(attrs.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn get_nodes_unions_shards_with_global_ids() {
    let (mut client, _handles, _s0, _s1) = support::two_shard_cluster().await;

    // S3: attrs[1] == "x" lives at globals 0 and 4 (shard 0) and 1 (shard 1).
    let resp = client
        .get_nodes(Request::new(proto::NodeAttrRequest {
            attr_id: 1,
            key: "x".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(!resp.partial);
    let ids: HashSet<i64> = resp.ids.into_iter().collect();
    assert_eq!(ids, HashSet::from([0, 4, 1]));

    // get_nodes2 equals the intersection of two single lookups.
    let resp = client
        .get_nodes2(Request::new(proto::NodeAttr2Request {
            attr_id1: 1,
            key1: "x".into(),
            attr_id2: 0,
            key2: "n0".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    let ids: HashSet<i64> = resp.ids.into_iter().collect();
    assert_eq!(ids, HashSet::from([0]));

    // Missing keys are empty sets, not errors.
    let resp = client
        .get_nodes(Request::new(proto::NodeAttrRequest {
            attr_id: 1,
            key: "no-such-key".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(resp.ids.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn neighbor_attr_filters_on_the_owning_shards() {
    let (mut client, _handles, _s0, _s1) = support::two_shard_cluster().await;

    // S6: neighbors of 10 include fixture nodes {0, 1, 3, 4} (atype 9) and
    // non-node destinations {20, 30, 40} (atype 7); only neighbors whose
    // local attrs[1] == "x" survive.
    let resp = client
        .get_neighbors_attr(Request::new(proto::NeighborsAttrRequest {
            node_id: 10,
            attr_id: 1,
            key: "x".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    let ids: HashSet<i64> = resp.ids.into_iter().collect();
    assert_eq!(ids, HashSet::from([0, 1, 4]));
}

#[tokio::test(flavor = "multi_thread")]
async fn filter_nodes_buckets_by_owner_and_rewrites_globals() {
    let (mut client, _handles, _s0, _s1) = support::two_shard_cluster().await;

    // Candidates span both shards; survivors keep their intra-bucket order
    // and come back as global ids.
    let resp = client
        .filter_nodes(Request::new(proto::FilterNodesRequest {
            ids: vec![4, 3, 1, 0],
            attr_id: 1,
            key: "x".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(!resp.partial);
    let ids: HashSet<i64> = resp.ids.iter().copied().collect();
    assert_eq!(ids, HashSet::from([4, 0, 1]));
    // Shard-0 candidates were sent as [4, 0] and both survive in order.
    let even: Vec<i64> = resp.ids.iter().copied().filter(|id| id % 2 == 0).collect();
    assert_eq!(even, vec![4, 0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn appended_edges_are_served_and_survive_seal() {
    let (mut client, _handles, shard0, _s1) = support::two_shard_cluster().await;

    // S4: an older edge appended to the log shows up at the tail.
    shard0
        .append_assoc(Assoc::new(10, 50, 7, 50, b"d".to_vec()))
        .unwrap();

    let fetch = |client: &mut proto::aggregator_service_client::AggregatorServiceClient<
        tonic::transport::Channel,
    >| {
        let mut client = client.clone();
        async move {
            client
                .assoc_range(Request::new(proto::AssocRangeRequest {
                    src: 10,
                    atype: 7,
                    off: 0,
                    len: 4,
                }))
                .await
                .unwrap()
                .into_inner()
                .assocs
                .iter()
                .map(|a| (a.dst_id, a.timestamp))
                .collect::<Vec<_>>()
        }
    };

    let before = fetch(&mut client).await;
    assert_eq!(before, vec![(30, 200), (40, 200), (20, 100), (50, 50)]);

    shard0.seal().unwrap();
    let after = fetch(&mut client).await;
    assert_eq!(before, after);

    let count = client
        .assoc_count(Request::new(proto::AssocCountRequest { src: 10, atype: 7 }))
        .await
        .unwrap()
        .into_inner()
        .count;
    assert_eq!(count, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn node_writes_flow_through_get_nodes() {
    let (mut client, _handles, shard0, _s1) = support::two_shard_cluster().await;

    // Rewrite local 1 (global 2) onto "x".
    shard0
        .append_node(1, NodeRecord::new(vec!["n2".into(), "x".into()]))
        .unwrap();

    let resp = client
        .get_nodes(Request::new(proto::NodeAttrRequest {
            attr_id: 1,
            key: "x".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    let ids: HashSet<i64> = resp.ids.into_iter().collect();
    assert_eq!(ids, HashSet::from([0, 2, 4, 1]));
}

#[tokio::test(flavor = "multi_thread")]
async fn init_is_idempotent() {
    let (mut client, _handles, _s0, _s1) = support::two_shard_cluster().await;
    for _ in 0..3 {
        let code = client
            .init(Request::new(proto::InitRequest {}))
            .await
            .unwrap()
            .into_inner()
            .code;
        assert_eq!(code, 0);
    }
    let code = client
        .local_data_init(Request::new(proto::InitRequest {}))
        .await
        .unwrap()
        .into_inner()
        .code;
    assert_eq!(code, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_shard_degrades_fan_out_by_default() {
    let shard0 = support::shard0_handler();
    let shard1 = support::shard1_handler();
    let (addr0, _h0) = support::spawn_shard(shard0).await;
    let (addr1, h1) = support::spawn_shard(shard1).await;
    let (agg_addr, _h2) =
        support::spawn_aggregator(vec![addr0, addr1], AggregatorOptions::default()).await;
    let mut client = support::aggregator_client(agg_addr).await;

    h1.abort();
    // Give the server task a moment to die.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let resp = client
        .get_nodes(Request::new(proto::NodeAttrRequest {
            attr_id: 1,
            key: "x".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(resp.partial);
    let ids: HashSet<i64> = resp.ids.into_iter().collect();
    assert_eq!(ids, HashSet::from([0, 4]));

    // The candidate-filter fan-out degrades the same way: the odd bucket is
    // lost, the even bucket still answers.
    let resp = client
        .filter_nodes(Request::new(proto::FilterNodesRequest {
            ids: vec![0, 1, 3, 4],
            attr_id: 1,
            key: "x".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(resp.partial);
    let ids: HashSet<i64> = resp.ids.into_iter().collect();
    assert_eq!(ids, HashSet::from([0, 4]));
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_shard_fails_strict_fan_out() {
    let shard0 = support::shard0_handler();
    let shard1 = support::shard1_handler();
    let (addr0, _h0) = support::spawn_shard(shard0).await;
    let (addr1, h1) = support::spawn_shard(shard1).await;
    let options = AggregatorOptions {
        strict_fanout: true,
        ..AggregatorOptions::default()
    };
    let (agg_addr, _h2) = support::spawn_aggregator(vec![addr0, addr1], options).await;
    let mut client = support::aggregator_client(agg_addr).await;

    h1.abort();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let result = client
        .get_nodes(Request::new(proto::NodeAttrRequest {
            attr_id: 1,
            key: "x".into(),
        }))
        .await;
    assert!(result.is_err());

    let result = client
        .filter_nodes(Request::new(proto::FilterNodesRequest {
            ids: vec![0, 1],
            attr_id: 1,
            key: "x".into(),
        }))
        .await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn partition_invariant_holds_across_shards() {
    let (_client, _handles, shard0, shard1) = support::two_shard_cluster().await;

    // Every stored edge's src belongs to the shard storing it; the routing
    // assertion rejects foreign sources outright.
    for (shard, handler) in [(0u32, &shard0), (1u32, &shard1)] {
        assert_eq!(handler.partition().shard_id, shard);
        let foreign = if shard == 0 { 11 } else { 10 };
        assert!(handler.assoc_count(foreign, 7).is_err());
    }

    // Each assoc-list lives on exactly one shard, so its owner's count is
    // the global count.
    assert_eq!(shard0.assoc_count(10, 7).unwrap(), 3);
    assert_eq!(shard1.assoc_count(11, 7).unwrap(), 1);
}
