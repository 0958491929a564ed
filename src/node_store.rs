//! # Node Store
//!
//! Immutable per-node attribute records with an exact-match inverted index
//! per attribute position. Node ids are local to the shard (dense, starting
//! at zero); the aggregator owns the rewrite to global ids.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use hashbrown::HashMap;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::model::NodeRecord;

const ARTIFACT_MAGIC: &[u8; 4] = b"TAON";
const ARTIFACT_VERSION: u32 = 1;

/// Immutable node attribute store with exact-match point lookup by
/// `(attr_id, key)`. Safe to share across readers without locking.
#[derive(Debug, Default)]
pub struct NodeStore {
    /// One record per local node id; every record has exactly `num_attrs`
    /// entries.
    records: Vec<NodeRecord>,
    /// Inverted index: `(attr_id, value) -> sorted local ids`.
    index: HashMap<(u32, String), Vec<i64>>,
    num_attrs: usize,
}

#[derive(Serialize, Deserialize)]
struct NodeArtifact {
    num_attrs: usize,
    records: Vec<Vec<String>>,
}

impl NodeStore {
    /// Build from per-node attribute vectors. `num_attrs` is fixed here;
    /// every record must carry exactly that many attributes.
    pub fn from_records(records: Vec<NodeRecord>, num_attrs: usize) -> Result<Self> {
        for (local_id, record) in records.iter().enumerate() {
            if record.attrs.len() != num_attrs {
                return Err(StoreError::Parse(format!(
                    "node {local_id} has {} attributes, expected {num_attrs}",
                    record.attrs.len()
                )));
            }
        }

        let mut index: HashMap<(u32, String), Vec<i64>> = HashMap::new();
        for (local_id, record) in records.iter().enumerate() {
            for (attr_id, value) in record.attrs.iter().enumerate() {
                index
                    .entry((attr_id as u32, value.clone()))
                    .or_default()
                    .push(local_id as i64);
            }
        }
        // Ids arrive in increasing order, so each posting list is sorted.

        Ok(Self {
            records,
            index,
            num_attrs,
        })
    }

    pub fn node_count(&self) -> usize {
        self.records.len()
    }

    pub fn num_attrs(&self) -> usize {
        self.num_attrs
    }

    /// Full attribute vector of a local node; empty when the id is unknown.
    pub fn obj_get(&self, local_id: i64) -> Vec<String> {
        usize::try_from(local_id)
            .ok()
            .and_then(|i| self.records.get(i))
            .map(|r| r.attrs.clone())
            .unwrap_or_default()
    }

    /// One attribute of a local node.
    pub fn get_attribute(&self, local_id: i64, attr_id: u32) -> Option<String> {
        usize::try_from(local_id)
            .ok()
            .and_then(|i| self.records.get(i))
            .and_then(|r| r.attrs.get(attr_id as usize))
            .cloned()
    }

    /// Local ids whose `attrs[attr_id]` is byte-identical to `key`.
    pub fn get_nodes(&self, attr_id: u32, key: &str) -> Vec<i64> {
        self.index
            .get(&(attr_id, key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Intersection of two point lookups, walked from the smaller side.
    pub fn get_nodes2(&self, attr_id1: u32, key1: &str, attr_id2: u32, key2: &str) -> Vec<i64> {
        let first = self.get_nodes(attr_id1, key1);
        let second = self.get_nodes(attr_id2, key2);
        let (small, large) = if first.len() <= second.len() {
            (&first, &second)
        } else {
            (&second, &first)
        };
        let large: std::collections::HashSet<i64> = large.iter().copied().collect();
        small
            .iter()
            .copied()
            .filter(|id| large.contains(id))
            .collect()
    }

    /// Subset of `ids` whose attribute matches, preserving input order.
    pub fn filter_nodes(&self, ids: &[i64], attr_id: u32, key: &str) -> Vec<i64> {
        ids.iter()
            .copied()
            .filter(|&id| self.get_attribute(id, attr_id).as_deref() == Some(key))
            .collect()
    }

    /// Persist the store next to the input file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let artifact = NodeArtifact {
            num_attrs: self.num_attrs,
            records: self.records.iter().map(|r| r.attrs.clone()).collect(),
        };
        let body = bincode::serialize(&artifact)?;
        let mut file = File::create(path)?;
        file.write_all(ARTIFACT_MAGIC)?;
        file.write_all(&ARTIFACT_VERSION.to_le_bytes())?;
        file.write_all(&body)?;
        file.sync_all()?;
        Ok(())
    }

    /// Load a prebuilt artifact (read-only map) and rebuild the index.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }?;
        if mmap.len() < 8 || &mmap[..4] != ARTIFACT_MAGIC {
            return Err(StoreError::Artifact("bad node artifact header".into()));
        }
        let version = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
        if version != ARTIFACT_VERSION {
            return Err(StoreError::Artifact(format!(
                "unsupported node artifact version {version}"
            )));
        }
        let artifact: NodeArtifact = bincode::deserialize(&mmap[8..])?;
        Self::from_records(
            artifact.records.into_iter().map(NodeRecord::new).collect(),
            artifact.num_attrs,
        )
    }
}
