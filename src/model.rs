//! # Data Model
//!
//! Core data structures for the sharded graph engine: typed, timestamped,
//! attributed edges (assocs), node attribute records, and the hash partition
//! shared by shards and the aggregator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single directed, typed, timestamped, attributed edge.
///
/// Edges are grouped into assoc-lists keyed by `(src_id, atype)` and kept
/// sorted by descending `time`, ties broken by ascending `dst_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assoc {
    pub src_id: i64,
    pub dst_id: i64,
    pub atype: i64,
    pub time: i64,
    /// Arbitrary byte payload; no delimiter constraints.
    pub attr: Vec<u8>,
}

impl Assoc {
    pub fn new(src_id: i64, dst_id: i64, atype: i64, time: i64, attr: impl Into<Vec<u8>>) -> Self {
        Self {
            src_id,
            dst_id,
            atype,
            time,
            attr: attr.into(),
        }
    }

    /// The assoc-list this edge belongs to.
    pub fn list_key(&self) -> AssocListKey {
        AssocListKey {
            src: self.src_id,
            atype: self.atype,
        }
    }
}

impl fmt::Display for Assoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}-[{}]->{} @{})",
            self.src_id, self.atype, self.dst_id, self.time
        )
    }
}

/// Key of an assoc-list: all edges sharing a source node and an edge type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssocListKey {
    pub src: i64,
    pub atype: i64,
}

impl AssocListKey {
    pub fn new(src: i64, atype: i64) -> Self {
        Self { src, atype }
    }
}

/// Ordering used inside every assoc-list: time DESC, ties dst ASC.
///
/// This is the single definition both store construction and the tier merge
/// rely on; keeping it in one place makes the cross-tier tie-break stable.
pub fn assoc_list_cmp(a: &Assoc, b: &Assoc) -> std::cmp::Ordering {
    b.time.cmp(&a.time).then(a.dst_id.cmp(&b.dst_id))
}

/// A node's attribute record. The attribute count `K` is fixed when the
/// node store is constructed; every record carries exactly `K` strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub attrs: Vec<String>,
}

impl NodeRecord {
    pub fn new(attrs: Vec<String>) -> Self {
        Self { attrs }
    }
}

/// Which store tier a process hosts in a multi-store deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreMode {
    /// Immutable packed base store (edge + node tables).
    #[default]
    Succinct,
    /// Intermediate suffix store for recently-sealed edges.
    Suffix,
    /// Append-only log tail.
    Log,
}

/// Rank of a tier inside a shard; lower ranks are newer and win full ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TierRank {
    Log = 0,
    Suffix = 1,
    Base = 2,
}

/// Hash partition shared by shards and the aggregator.
///
/// A node with global id `g` lives on shard `g mod num_shards` and its local
/// id there is `g / num_shards`; local ids are dense within a shard. Both
/// sides of the wire use this one definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub shard_id: u32,
    pub num_shards: u32,
}

impl Partition {
    pub fn new(shard_id: u32, num_shards: u32) -> Self {
        assert!(num_shards > 0, "partition needs at least one shard");
        assert!(shard_id < num_shards, "shard_id out of range");
        Self {
            shard_id,
            num_shards,
        }
    }

    /// Shard owning a global node id.
    pub fn owner_of(&self, global_id: i64) -> u32 {
        (global_id.rem_euclid(self.num_shards as i64)) as u32
    }

    /// Whether this shard owns the global id.
    pub fn owns(&self, global_id: i64) -> bool {
        self.owner_of(global_id) == self.shard_id
    }

    /// Local id of a global id on its owning shard.
    pub fn local_of(&self, global_id: i64) -> i64 {
        global_id.div_euclid(self.num_shards as i64)
    }

    /// Global id of a local id on this shard.
    pub fn global_of(&self, local_id: i64) -> i64 {
        local_id * self.num_shards as i64 + self.shard_id as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assoc_list_cmp_orders_time_desc_then_dst_asc() {
        let newer = Assoc::new(10, 40, 7, 200, b"c".to_vec());
        let newer_smaller_dst = Assoc::new(10, 30, 7, 200, b"b".to_vec());
        let older = Assoc::new(10, 20, 7, 100, b"a".to_vec());

        let mut edges = vec![older.clone(), newer.clone(), newer_smaller_dst.clone()];
        edges.sort_by(assoc_list_cmp);
        assert_eq!(edges, vec![newer_smaller_dst, newer, older]);
    }

    #[test]
    fn partition_round_trips_global_and_local_ids() {
        let p0 = Partition::new(0, 2);
        let p1 = Partition::new(1, 2);

        assert_eq!(p0.global_of(0), 0);
        assert_eq!(p0.global_of(2), 4);
        assert_eq!(p1.global_of(1), 3);

        for global in 0..16 {
            let owner = if global % 2 == 0 { p0 } else { p1 };
            assert!(owner.owns(global));
            assert_eq!(owner.global_of(owner.local_of(global)), global);
        }
    }

    #[test]
    fn partition_owner_is_consistent_across_sides() {
        let shards: Vec<Partition> = (0..4).map(|id| Partition::new(id, 4)).collect();
        for global in 0..64 {
            let owners: Vec<_> = shards.iter().filter(|p| p.owns(global)).collect();
            assert_eq!(owners.len(), 1);
            assert_eq!(owners[0].shard_id, shards[0].owner_of(global));
        }
    }
}
