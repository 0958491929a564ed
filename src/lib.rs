//! # taograph
//!
//! A sharded, read-optimized property-graph query engine with a TAO-style
//! social-graph API: edges are typed, timestamped associations with
//! variable-length attributes, nodes carry a small fixed set of string
//! attributes, and the five read primitives (`assoc_range`, `assoc_get`,
//! `assoc_count`, `assoc_time_range`, `obj_get`) are served from a
//! three-tier store (append-only log, sealed suffix store, immutable packed
//! base store) that presents one consistent time-descending view.

pub mod assoc_store;
pub mod config;
pub mod distributed;
pub mod error;
pub mod input;
pub mod log_store;
pub mod merge;
pub mod model;
pub mod node_store;
pub mod shard;
pub mod suffix_store;
pub mod workload;

// Re-export main types for convenience
pub use assoc_store::{AssocStore, EncodingConfig};
pub use config::{BuildMode, GraphConfig};
pub use error::{Result, StoreError};
pub use log_store::LogStore;
pub use model::{Assoc, AssocListKey, NodeRecord, Partition, StoreMode};
pub use node_store::NodeStore;
pub use shard::{ShardHandler, ShardOptions};
pub use suffix_store::SuffixStore;

use std::collections::HashSet;
use std::sync::Arc;

/// The query capability set shared by every engine front-end.
///
/// Implemented by [`LocalGraph`] for a single-shard in-process engine and by
/// [`distributed::AggregatorClient`] for the sharded deployment, so callers
/// (the benchmark driver above all) are indifferent to where the data lives.
/// All node ids are global.
pub trait GraphReader: Send {
    fn get_neighbors(&mut self, node_id: i64) -> anyhow::Result<Vec<i64>>;
    fn get_neighbors_atype(&mut self, node_id: i64, atype: i64) -> anyhow::Result<Vec<i64>>;
    fn get_neighbors_attr(
        &mut self,
        node_id: i64,
        attr_id: u32,
        key: &str,
    ) -> anyhow::Result<Vec<i64>>;
    fn get_edge_attrs(&mut self, node_id: i64, atype: i64) -> anyhow::Result<Vec<Vec<u8>>>;
    fn get_nodes(&mut self, attr_id: u32, key: &str) -> anyhow::Result<Vec<i64>>;
    fn get_nodes2(
        &mut self,
        attr_id1: u32,
        key1: &str,
        attr_id2: u32,
        key2: &str,
    ) -> anyhow::Result<Vec<i64>>;
    fn obj_get(&mut self, node_id: i64) -> anyhow::Result<Vec<String>>;
    fn assoc_range(
        &mut self,
        src: i64,
        atype: i64,
        off: usize,
        len: usize,
    ) -> anyhow::Result<Vec<Assoc>>;
    fn assoc_count(&mut self, src: i64, atype: i64) -> anyhow::Result<i64>;
    fn assoc_get(
        &mut self,
        src: i64,
        atype: i64,
        dst_set: &[i64],
        t_low: i64,
        t_high: i64,
    ) -> anyhow::Result<Vec<Assoc>>;
    fn assoc_time_range(
        &mut self,
        src: i64,
        atype: i64,
        t_low: i64,
        t_high: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Assoc>>;
}

/// Single-shard in-process engine: one shard handler owning the whole id
/// space (`num_shards = 1`, so global and local ids coincide).
pub struct LocalGraph {
    handler: Arc<ShardHandler>,
}

impl LocalGraph {
    pub fn new(edges: AssocStore, nodes: NodeStore, options: ShardOptions) -> Self {
        Self {
            handler: Arc::new(ShardHandler::new(
                Partition::new(0, 1),
                edges,
                nodes,
                options,
            )),
        }
    }

    pub fn from_handler(handler: Arc<ShardHandler>) -> Self {
        assert_eq!(
            handler.partition().num_shards,
            1,
            "LocalGraph requires a single-shard partition"
        );
        Self { handler }
    }

    pub fn handler(&self) -> &Arc<ShardHandler> {
        &self.handler
    }
}

impl GraphReader for LocalGraph {
    fn get_neighbors(&mut self, node_id: i64) -> anyhow::Result<Vec<i64>> {
        Ok(self.handler.get_neighbors(node_id)?)
    }

    fn get_neighbors_atype(&mut self, node_id: i64, atype: i64) -> anyhow::Result<Vec<i64>> {
        Ok(self.handler.get_neighbors_atype(node_id, atype)?)
    }

    fn get_neighbors_attr(
        &mut self,
        node_id: i64,
        attr_id: u32,
        key: &str,
    ) -> anyhow::Result<Vec<i64>> {
        let neighbors = self.handler.get_neighbors(node_id)?;
        Ok(self.handler.filter_nodes(&neighbors, attr_id, key)?)
    }

    fn get_edge_attrs(&mut self, node_id: i64, atype: i64) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(self.handler.get_edge_attrs(node_id, atype)?)
    }

    fn get_nodes(&mut self, attr_id: u32, key: &str) -> anyhow::Result<Vec<i64>> {
        Ok(self.handler.get_nodes(attr_id, key)?)
    }

    fn get_nodes2(
        &mut self,
        attr_id1: u32,
        key1: &str,
        attr_id2: u32,
        key2: &str,
    ) -> anyhow::Result<Vec<i64>> {
        Ok(self.handler.get_nodes2(attr_id1, key1, attr_id2, key2)?)
    }

    fn obj_get(&mut self, node_id: i64) -> anyhow::Result<Vec<String>> {
        Ok(self.handler.obj_get(node_id)?)
    }

    fn assoc_range(
        &mut self,
        src: i64,
        atype: i64,
        off: usize,
        len: usize,
    ) -> anyhow::Result<Vec<Assoc>> {
        Ok(self.handler.assoc_range(src, atype, off, len)?)
    }

    fn assoc_count(&mut self, src: i64, atype: i64) -> anyhow::Result<i64> {
        Ok(self.handler.assoc_count(src, atype)?)
    }

    fn assoc_get(
        &mut self,
        src: i64,
        atype: i64,
        dst_set: &[i64],
        t_low: i64,
        t_high: i64,
    ) -> anyhow::Result<Vec<Assoc>> {
        let set: HashSet<i64> = dst_set.iter().copied().collect();
        Ok(self.handler.assoc_get(src, atype, &set, t_low, t_high)?)
    }

    fn assoc_time_range(
        &mut self,
        src: i64,
        atype: i64,
        t_low: i64,
        t_high: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Assoc>> {
        Ok(self
            .handler
            .assoc_time_range(src, atype, t_low, t_high, limit)?)
    }
}
