//! # Suffix Store
//!
//! Intermediate compact store for recently-sealed edges. Built at a seal
//! point from the previous suffix store plus the drained log prefix, then
//! immutable; its read contract is identical to the base assoc store. Node
//! writes sealed out of the log are kept as an override table consulted
//! before the base node table.

use std::collections::HashSet;

use rustc_hash::FxHashMap;

use crate::assoc_store::{AssocStore, EncodingConfig};
use crate::model::{Assoc, NodeRecord};

/// Immutable store for sealed log content. Read-shared without locking.
#[derive(Debug)]
pub struct SuffixStore {
    edges: AssocStore,
    node_overrides: FxHashMap<i64, NodeRecord>,
}

impl SuffixStore {
    /// Build from sealed edges and node writes. `previous` is the suffix
    /// store being replaced; its content carries over so no sealed edge is
    /// ever lost by a swap.
    pub fn build(
        previous: Option<&SuffixStore>,
        sealed_edges: Vec<Assoc>,
        sealed_nodes: Vec<(i64, NodeRecord)>,
        encoding: EncodingConfig,
    ) -> Self {
        let mut all_edges = previous.map(|p| p.edges.all_edges()).unwrap_or_default();
        all_edges.extend(sealed_edges);

        let mut node_overrides = previous
            .map(|p| p.node_overrides.clone())
            .unwrap_or_default();
        // Sealed writes arrive in log order, so later writes win.
        for (local_id, record) in sealed_nodes {
            node_overrides.insert(local_id, record);
        }

        Self {
            edges: AssocStore::from_edges(all_edges, encoding),
            node_overrides,
        }
    }

    /// An empty suffix store (fresh shard, nothing sealed yet).
    pub fn empty(encoding: EncodingConfig) -> Self {
        Self {
            edges: AssocStore::from_edges(Vec::new(), encoding),
            node_overrides: FxHashMap::default(),
        }
    }

    pub fn edge_count(&self) -> u64 {
        self.edges.edge_count()
    }

    pub fn assoc_count(&self, src: i64, atype: i64) -> i64 {
        self.edges.assoc_count(src, atype)
    }

    pub fn assoc_range(&self, src: i64, atype: i64, off: usize, len: usize) -> Vec<Assoc> {
        self.edges.assoc_range(src, atype, off, len)
    }

    pub fn assoc_get(
        &self,
        src: i64,
        atype: i64,
        dst_set: &HashSet<i64>,
        t_low: i64,
        t_high: i64,
    ) -> Vec<Assoc> {
        self.edges.assoc_get(src, atype, dst_set, t_low, t_high)
    }

    pub fn assoc_time_range(
        &self,
        src: i64,
        atype: i64,
        t_low: i64,
        t_high: i64,
        limit: usize,
    ) -> Vec<Assoc> {
        self.edges.assoc_time_range(src, atype, t_low, t_high, limit)
    }

    /// The full list for tier merging.
    pub fn assoc_list(&self, src: i64, atype: i64) -> Vec<Assoc> {
        self.edges.cursor(src, atype).collect()
    }

    /// Sealed node-attribute override, if any.
    pub fn node_record(&self, local_id: i64) -> Option<&NodeRecord> {
        self.node_overrides.get(&local_id)
    }

    /// All sealed node-attribute overrides.
    pub fn node_overrides(&self) -> impl Iterator<Item = (i64, &NodeRecord)> {
        self.node_overrides.iter().map(|(id, record)| (*id, record))
    }

    /// Sorted atypes with at least one sealed edge out of `src`.
    pub fn atypes_of(&self, src: i64) -> &[i64] {
        self.edges.atypes_of(src)
    }
}
