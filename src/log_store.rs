//! # Log Store
//!
//! Append-only mutable tail of a shard. New edges and node-attribute writes
//! land here first and are later sealed into the suffix tier. A single
//! append lane totally orders writes; readers snapshot the commit index at
//! request start and only see the prefix `[0, snapshot)`, so a read never
//! observes a half-applied batch.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::model::{assoc_list_cmp, Assoc, AssocListKey, NodeRecord};

#[derive(Debug, Clone)]
enum LogEntry {
    Edge(Assoc),
    Node { local_id: i64, record: NodeRecord },
}

#[derive(Debug, Default)]
struct LogInner {
    entries: Vec<LogEntry>,
    edge_index: FxHashMap<AssocListKey, Vec<u32>>,
    node_index: FxHashMap<i64, Vec<u32>>,
}

/// Append-only tail with a sparse `(src, atype)` index. Writers append under
/// the write lock; readers work against an explicit commit-index snapshot.
#[derive(Debug, Default)]
pub struct LogStore {
    inner: RwLock<LogInner>,
}

/// Edges and node writes drained from the log prefix at a seal point.
#[derive(Debug)]
pub struct DrainedPrefix {
    pub edges: Vec<Assoc>,
    pub nodes: Vec<(i64, NodeRecord)>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit index: number of durable entries. Reads against this value see
    /// a stable prefix regardless of concurrent appends.
    pub fn commit_index(&self) -> u64 {
        self.inner.read().entries.len() as u64
    }

    /// Append one edge; visible to any snapshot taken afterwards.
    pub fn append_assoc(&self, assoc: Assoc) -> u64 {
        let mut inner = self.inner.write();
        let offset = inner.entries.len() as u32;
        inner
            .edge_index
            .entry(assoc.list_key())
            .or_default()
            .push(offset);
        inner.entries.push(LogEntry::Edge(assoc));
        inner.entries.len() as u64
    }

    /// Append a node-attribute write. The newest write for a local id wins
    /// on read.
    pub fn append_node(&self, local_id: i64, record: NodeRecord) -> u64 {
        let mut inner = self.inner.write();
        let offset = inner.entries.len() as u32;
        inner.node_index.entry(local_id).or_default().push(offset);
        inner.entries.push(LogEntry::Node { local_id, record });
        inner.entries.len() as u64
    }

    /// Matching edges in the snapshot prefix, ordered time-DESC / dst-ASC.
    /// Full ties keep reverse insertion order (newest append first).
    pub fn assoc_list(&self, src: i64, atype: i64, snapshot: u64) -> Vec<Assoc> {
        let inner = self.inner.read();
        let Some(offsets) = inner.edge_index.get(&AssocListKey::new(src, atype)) else {
            return Vec::new();
        };
        let mut out: Vec<Assoc> = offsets
            .iter()
            .rev()
            .filter(|&&off| (off as u64) < snapshot)
            .map(|&off| match &inner.entries[off as usize] {
                LogEntry::Edge(assoc) => assoc.clone(),
                LogEntry::Node { .. } => unreachable!("edge index points at node entry"),
            })
            .collect();
        out.sort_by(assoc_list_cmp);
        out
    }

    pub fn assoc_count(&self, src: i64, atype: i64, snapshot: u64) -> i64 {
        let inner = self.inner.read();
        inner
            .edge_index
            .get(&AssocListKey::new(src, atype))
            .map(|offsets| {
                offsets
                    .iter()
                    .filter(|&&off| (off as u64) < snapshot)
                    .count() as i64
            })
            .unwrap_or(0)
    }

    /// Newest node-attribute write for a local id inside the snapshot.
    pub fn node_record(&self, local_id: i64, snapshot: u64) -> Option<NodeRecord> {
        let inner = self.inner.read();
        let offsets = inner.node_index.get(&local_id)?;
        offsets
            .iter()
            .rev()
            .find(|&&off| (off as u64) < snapshot)
            .map(|&off| match &inner.entries[off as usize] {
                LogEntry::Node { record, .. } => record.clone(),
                LogEntry::Edge(_) => unreachable!("node index points at edge entry"),
            })
    }

    /// Total edges in the snapshot prefix.
    pub fn edge_count(&self, snapshot: u64) -> u64 {
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .take(snapshot as usize)
            .filter(|e| matches!(e, LogEntry::Edge(_)))
            .count() as u64
    }

    /// Atypes with at least one edge out of `src` in the snapshot prefix.
    pub fn atypes_of(&self, src: i64, snapshot: u64) -> Vec<i64> {
        let inner = self.inner.read();
        let mut atypes: Vec<i64> = inner
            .edge_index
            .iter()
            .filter(|(key, offsets)| {
                key.src == src && offsets.iter().any(|&off| (off as u64) < snapshot)
            })
            .map(|(key, _)| key.atype)
            .collect();
        atypes.sort_unstable();
        atypes
    }

    /// Effective node-attribute writes in the snapshot prefix, newest write
    /// per local id.
    pub fn node_overrides(&self, snapshot: u64) -> Vec<(i64, NodeRecord)> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for (&local_id, offsets) in &inner.node_index {
            if let Some(&off) = offsets.iter().rev().find(|&&off| (off as u64) < snapshot) {
                match &inner.entries[off as usize] {
                    LogEntry::Node { record, .. } => out.push((local_id, record.clone())),
                    LogEntry::Edge(_) => unreachable!("node index points at edge entry"),
                }
            }
        }
        out
    }

    /// Whether the log has grown past `threshold` entries.
    pub fn should_seal(&self, threshold: u64) -> bool {
        self.commit_index() >= threshold
    }

    /// Copy of the prefix `[0, snapshot)` for a seal build. Non-destructive:
    /// in-flight readers keep seeing the same log, which is what makes the
    /// seal swap untearable.
    pub fn prefix(&self, snapshot: u64) -> DrainedPrefix {
        let inner = self.inner.read();
        let mut edges = Vec::new();
        let mut nodes = Vec::new();
        for entry in inner.entries.iter().take(snapshot as usize) {
            match entry {
                LogEntry::Edge(assoc) => edges.push(assoc.clone()),
                LogEntry::Node { local_id, record } => nodes.push((*local_id, record.clone())),
            }
        }
        DrainedPrefix { edges, nodes }
    }

    /// A fresh log holding only the entries at and after `snapshot`. The
    /// seal swap installs this as the new tail while the old store is freed
    /// once its last in-flight reader drops it.
    pub fn tail_store(&self, snapshot: u64) -> LogStore {
        let inner = self.inner.read();
        let tail = LogStore::new();
        for entry in inner.entries.iter().skip(snapshot as usize) {
            match entry {
                LogEntry::Edge(assoc) => {
                    tail.append_assoc(assoc.clone());
                }
                LogEntry::Node { local_id, record } => {
                    tail.append_node(*local_id, record.clone());
                }
            }
        }
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_are_visible_newest_first_in_desc_order() {
        let log = LogStore::new();
        log.append_assoc(Assoc::new(10, 50, 7, 50, b"d".to_vec()));
        log.append_assoc(Assoc::new(10, 60, 7, 300, b"e".to_vec()));
        let snapshot = log.commit_index();

        let list = log.assoc_list(10, 7, snapshot);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].dst_id, 60);
        assert_eq!(list[1].dst_id, 50);
        assert_eq!(log.assoc_count(10, 7, snapshot), 2);
    }

    #[test]
    fn snapshot_hides_later_appends() {
        let log = LogStore::new();
        log.append_assoc(Assoc::new(10, 50, 7, 50, b"d".to_vec()));
        let snapshot = log.commit_index();
        log.append_assoc(Assoc::new(10, 60, 7, 300, b"e".to_vec()));

        assert_eq!(log.assoc_count(10, 7, snapshot), 1);
        assert_eq!(log.assoc_list(10, 7, snapshot)[0].dst_id, 50);
        assert_eq!(log.assoc_count(10, 7, log.commit_index()), 2);
    }

    #[test]
    fn newest_node_write_wins() {
        let log = LogStore::new();
        log.append_node(3, NodeRecord::new(vec!["a".into(), "x".into()]));
        log.append_node(3, NodeRecord::new(vec!["a".into(), "y".into()]));
        let snapshot = log.commit_index();

        let record = log.node_record(3, snapshot).unwrap();
        assert_eq!(record.attrs[1], "y");
        assert!(log.node_record(4, snapshot).is_none());
        // A snapshot before the second write still sees the first.
        assert_eq!(log.node_record(3, 1).unwrap().attrs[1], "x");
    }

    #[test]
    fn prefix_and_tail_split_without_touching_the_source() {
        let log = LogStore::new();
        log.append_assoc(Assoc::new(10, 50, 7, 50, b"d".to_vec()));
        log.append_node(0, NodeRecord::new(vec!["n".into()]));
        let snapshot = log.commit_index();
        log.append_assoc(Assoc::new(10, 60, 7, 300, b"e".to_vec()));

        let prefix = log.prefix(snapshot);
        assert_eq!(prefix.edges.len(), 1);
        assert_eq!(prefix.nodes.len(), 1);
        assert_eq!(prefix.edges[0].dst_id, 50);

        let tail = log.tail_store(snapshot);
        assert_eq!(tail.commit_index(), 1);
        let tail_list = tail.assoc_list(10, 7, tail.commit_index());
        assert_eq!(tail_list.len(), 1);
        assert_eq!(tail_list[0].dst_id, 60);
        assert!(tail.node_record(0, tail.commit_index()).is_none());

        // The source log is untouched; an old reader still sees its prefix.
        assert_eq!(log.commit_index(), 3);
        assert_eq!(log.assoc_count(10, 7, snapshot), 1);
    }

    #[test]
    fn node_overrides_and_atypes_respect_the_snapshot() {
        let log = LogStore::new();
        log.append_node(1, NodeRecord::new(vec!["old".into()]));
        log.append_assoc(Assoc::new(4, 5, 9, 10, b"".to_vec()));
        let snapshot = log.commit_index();
        log.append_node(1, NodeRecord::new(vec!["new".into()]));
        log.append_assoc(Assoc::new(4, 5, 2, 11, b"".to_vec()));

        let overrides = log.node_overrides(snapshot);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].1.attrs[0], "old");
        assert_eq!(log.atypes_of(4, snapshot), vec![9]);
        assert_eq!(log.atypes_of(4, log.commit_index()), vec![2, 9]);
    }
}
