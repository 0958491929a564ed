//! # Shard Handler
//!
//! Hosts one shard's store tuple (base edge + node tables, optional suffix
//! store, optional log tail) and answers every query primitive against the
//! local node-id space. Reads compose the tiers newest-to-oldest
//! (log → suffix → base) through the heap merge; edge primitives assert
//! ownership of the global source id before touching any tier.
//!
//! The seal protocol promotes the log prefix into a fresh suffix store and
//! swaps `(suffix', log')` in one step. In-flight readers hold `Arc`s to the
//! pre-seal tier set and the old log is never mutated, so a request sees the
//! pre-seal union or the post-seal union and nothing in between; the old
//! tiers are freed when their last reader drops them.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::assoc_store::{AssocStore, EncodingConfig};
use crate::error::{Result, StoreError};
use crate::log_store::LogStore;
use crate::merge::{TierCursor, TierMerge};
use crate::model::{Assoc, NodeRecord, Partition, StoreMode, TierRank};
use crate::node_store::NodeStore;
use crate::suffix_store::SuffixStore;

/// How many times a reader re-tries the tier latch before degrading to a
/// base-only view.
const TIER_ACQUIRE_RETRIES: usize = 16;

/// Mutable tiers of a shard, swapped wholesale at a seal point.
#[derive(Clone)]
struct TierSet {
    suffix: Option<Arc<SuffixStore>>,
    log: Option<Arc<LogStore>>,
}

/// Per-request snapshot of the tier stack. Cheap to take (two `Arc` clones
/// plus the log commit index) and stable for the request's whole lifetime.
struct ReadView {
    suffix: Option<Arc<SuffixStore>>,
    log: Option<(Arc<LogStore>, u64)>,
}

/// Deployment options for a shard's tier stack.
#[derive(Debug, Clone)]
pub struct ShardOptions {
    pub with_suffix: bool,
    pub with_log: bool,
    /// Log entries before an automatic seal fires.
    pub seal_threshold: u64,
    pub encoding: EncodingConfig,
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self {
            with_suffix: true,
            with_log: true,
            seal_threshold: 65_536,
            encoding: EncodingConfig::default(),
        }
    }
}

impl ShardOptions {
    /// Tier stack for a given store mode: the base process runs immutable
    /// tables only, a suffix process adds the sealed tier, and a log process
    /// carries the mutable tail plus the suffix tier it seals into.
    pub fn for_mode(mode: StoreMode) -> Self {
        match mode {
            StoreMode::Succinct => Self {
                with_suffix: false,
                with_log: false,
                ..Self::default()
            },
            StoreMode::Suffix => Self {
                with_suffix: true,
                with_log: false,
                ..Self::default()
            },
            StoreMode::Log => Self::default(),
        }
    }
}

/// One shard of the graph: stores plus query composition.
pub struct ShardHandler {
    partition: Partition,
    base_edges: Arc<AssocStore>,
    base_nodes: Arc<NodeStore>,
    tiers: RwLock<TierSet>,
    /// One seal at a time.
    seal_lock: Mutex<()>,
    options: ShardOptions,
    /// Set when a read detects index corruption; the process must not keep
    /// serving from a store it cannot trust.
    poisoned: AtomicBool,
}

impl ShardHandler {
    pub fn new(
        partition: Partition,
        base_edges: AssocStore,
        base_nodes: NodeStore,
        options: ShardOptions,
    ) -> Self {
        let tiers = TierSet {
            suffix: options
                .with_suffix
                .then(|| Arc::new(SuffixStore::empty(options.encoding))),
            log: options.with_log.then(|| Arc::new(LogStore::new())),
        };
        Self {
            partition,
            base_edges: Arc::new(base_edges),
            base_nodes: Arc::new(base_nodes),
            tiers: RwLock::new(tiers),
            seal_lock: Mutex::new(()),
            options,
            poisoned: AtomicBool::new(false),
        }
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn node_count(&self) -> usize {
        self.base_nodes.node_count()
    }

    /// Snapshot the tier stack for one request. The latch is only held for
    /// the clone; a seal mid-acquire is retried a bounded number of times
    /// and then degraded to a base-only view rather than blocking the read.
    fn read_view(&self) -> ReadView {
        for _ in 0..TIER_ACQUIRE_RETRIES {
            if let Some(tiers) = self.tiers.try_read() {
                return ReadView {
                    suffix: tiers.suffix.clone(),
                    log: tiers
                        .log
                        .as_ref()
                        .map(|log| (log.clone(), log.commit_index())),
                };
            }
            std::thread::yield_now();
        }
        warn!(
            shard_id = self.partition.shard_id,
            "tier latch contended; serving base-only view"
        );
        ReadView {
            suffix: None,
            log: None,
        }
    }

    fn check_routing(&self, node_id: i64) -> Result<()> {
        if !self.partition.owns(node_id) {
            return Err(StoreError::Routing {
                node_id,
                shard_id: self.partition.shard_id,
                num_shards: self.partition.num_shards,
            });
        }
        Ok(())
    }

    fn check_health(&self) -> Result<()> {
        if self.poisoned.load(Ordering::Relaxed) {
            return Err(StoreError::IndexCorruption {
                context: "shard",
                detail: "shard poisoned by earlier corruption".into(),
            });
        }
        Ok(())
    }

    fn poison<T>(&self, err: StoreError) -> Result<T> {
        if matches!(err, StoreError::IndexCorruption { .. }) {
            self.poisoned.store(true, Ordering::Relaxed);
        }
        Err(err)
    }

    /// Tier cursors for one list, newest tier first.
    fn list_cursors<'a>(
        &'a self,
        view: &'a ReadView,
        src: i64,
        atype: i64,
    ) -> Vec<(TierRank, TierCursor<'a>)> {
        let mut sources: Vec<(TierRank, TierCursor<'a>)> = Vec::with_capacity(3);
        if let Some((log, snapshot)) = &view.log {
            sources.push((
                TierRank::Log,
                Box::new(log.assoc_list(src, atype, *snapshot).into_iter()),
            ));
        }
        if let Some(suffix) = &view.suffix {
            sources.push((
                TierRank::Suffix,
                Box::new(suffix.assoc_list(src, atype).into_iter()),
            ));
        }
        sources.push((TierRank::Base, Box::new(self.base_edges.cursor(src, atype))));
        sources
    }

    // ---- edge primitives -------------------------------------------------

    pub fn assoc_range(&self, src: i64, atype: i64, off: usize, len: usize) -> Result<Vec<Assoc>> {
        self.check_health()?;
        self.check_routing(src)?;
        let view = self.read_view();
        let result = TierMerge::new(self.list_cursors(&view, src, atype))
            .and_then(|merge| merge.window(off, len));
        match result {
            Ok(out) => Ok(out),
            Err(err) => self.poison(err),
        }
    }

    pub fn assoc_count(&self, src: i64, atype: i64) -> Result<i64> {
        self.check_health()?;
        self.check_routing(src)?;
        let view = self.read_view();
        let mut count = self.base_edges.assoc_count(src, atype);
        if let Some(suffix) = &view.suffix {
            count += suffix.assoc_count(src, atype);
        }
        if let Some((log, snapshot)) = &view.log {
            count += log.assoc_count(src, atype, *snapshot);
        }
        Ok(count)
    }

    pub fn assoc_get(
        &self,
        src: i64,
        atype: i64,
        dst_set: &HashSet<i64>,
        t_low: i64,
        t_high: i64,
    ) -> Result<Vec<Assoc>> {
        self.check_health()?;
        self.check_routing(src)?;
        let view = self.read_view();
        let mut out = Vec::new();
        if let Some((log, snapshot)) = &view.log {
            out.extend(
                log.assoc_list(src, atype, *snapshot)
                    .into_iter()
                    .filter(|a| {
                        a.time >= t_low
                            && a.time <= t_high
                            && (dst_set.is_empty() || dst_set.contains(&a.dst_id))
                    }),
            );
        }
        if let Some(suffix) = &view.suffix {
            out.extend(suffix.assoc_get(src, atype, dst_set, t_low, t_high));
        }
        out.extend(self.base_edges.assoc_get(src, atype, dst_set, t_low, t_high));
        Ok(out)
    }

    pub fn assoc_time_range(
        &self,
        src: i64,
        atype: i64,
        t_low: i64,
        t_high: i64,
        limit: usize,
    ) -> Result<Vec<Assoc>> {
        self.check_health()?;
        self.check_routing(src)?;
        let view = self.read_view();
        let result = TierMerge::new(self.list_cursors(&view, src, atype))
            .and_then(|merge| merge.time_window(t_low, t_high, limit));
        match result {
            Ok(out) => Ok(out),
            Err(err) => self.poison(err),
        }
    }

    // ---- neighbor primitives --------------------------------------------

    /// All destination ids out of `node_id`, grouped by ascending atype with
    /// each group in time-DESC order.
    pub fn get_neighbors(&self, node_id: i64) -> Result<Vec<i64>> {
        self.check_health()?;
        self.check_routing(node_id)?;
        let view = self.read_view();

        let mut atypes: BTreeSet<i64> = self.base_edges.atypes_of(node_id).iter().copied().collect();
        if let Some(suffix) = &view.suffix {
            atypes.extend(suffix.atypes_of(node_id).iter().copied());
        }
        if let Some((log, snapshot)) = &view.log {
            atypes.extend(log.atypes_of(node_id, *snapshot));
        }

        let mut out = Vec::new();
        for atype in atypes {
            let result = TierMerge::new(self.list_cursors(&view, node_id, atype))
                .and_then(|merge| merge.window(0, usize::MAX));
            let list = match result {
                Ok(list) => list,
                Err(err) => return self.poison(err),
            };
            out.extend(list.into_iter().map(|a| a.dst_id));
        }
        Ok(out)
    }

    pub fn get_neighbors_atype(&self, node_id: i64, atype: i64) -> Result<Vec<i64>> {
        Ok(self
            .assoc_range(node_id, atype, 0, usize::MAX)?
            .into_iter()
            .map(|a| a.dst_id)
            .collect())
    }

    pub fn get_edge_attrs(&self, node_id: i64, atype: i64) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .assoc_range(node_id, atype, 0, usize::MAX)?
            .into_iter()
            .map(|a| a.attr)
            .collect())
    }

    // ---- node primitives (local id space) -------------------------------

    /// Full attribute vector; first hit wins in newest-to-oldest tier order.
    pub fn obj_get(&self, local_id: i64) -> Result<Vec<String>> {
        self.check_health()?;
        let view = self.read_view();
        if let Some((log, snapshot)) = &view.log {
            if let Some(record) = log.node_record(local_id, *snapshot) {
                return Ok(record.attrs);
            }
        }
        if let Some(suffix) = &view.suffix {
            if let Some(record) = suffix.node_record(local_id) {
                return Ok(record.attrs.clone());
            }
        }
        Ok(self.base_nodes.obj_get(local_id))
    }

    pub fn get_attribute(&self, local_id: i64, attr_id: u32) -> Result<Option<String>> {
        Ok(self
            .obj_get(local_id)?
            .into_iter()
            .nth(attr_id as usize))
    }

    /// Local ids whose attribute matches exactly, with log/suffix overrides
    /// applied so the index stays consistent with `obj_get`.
    pub fn get_nodes(&self, attr_id: u32, key: &str) -> Result<Vec<i64>> {
        self.check_health()?;
        let view = self.read_view();
        let mut set: BTreeSet<i64> = self.base_nodes.get_nodes(attr_id, key).into_iter().collect();

        // Suffix overrides first, then log writes on top (newest wins).
        let mut apply = |local_id: i64, record: &NodeRecord| {
            if record.attrs.get(attr_id as usize).map(String::as_str) == Some(key) {
                set.insert(local_id);
            } else {
                set.remove(&local_id);
            }
        };
        if let Some(suffix) = &view.suffix {
            for (local_id, record) in suffix.node_overrides() {
                apply(local_id, record);
            }
        }
        if let Some((log, snapshot)) = &view.log {
            for (local_id, record) in log.node_overrides(*snapshot) {
                apply(local_id, &record);
            }
        }
        Ok(set.into_iter().collect())
    }

    pub fn get_nodes2(
        &self,
        attr_id1: u32,
        key1: &str,
        attr_id2: u32,
        key2: &str,
    ) -> Result<Vec<i64>> {
        let first = self.get_nodes(attr_id1, key1)?;
        let second = self.get_nodes(attr_id2, key2)?;
        let (small, large) = if first.len() <= second.len() {
            (&first, &second)
        } else {
            (&second, &first)
        };
        let large: HashSet<i64> = large.iter().copied().collect();
        Ok(small
            .iter()
            .copied()
            .filter(|id| large.contains(id))
            .collect())
    }

    /// Subset of candidate local ids whose attribute matches, in input
    /// order. Candidates come from the aggregator's neighbor fan-out.
    pub fn filter_nodes(&self, ids: &[i64], attr_id: u32, key: &str) -> Result<Vec<i64>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            if self.get_attribute(id, attr_id)?.as_deref() == Some(key) {
                out.push(id);
            }
        }
        Ok(out)
    }

    // ---- writes (log tier) ----------------------------------------------

    /// Append an edge to the log tail. Returns after the write is durable in
    /// the log; a later read that snapshots the commit index sees it.
    pub fn append_assoc(&self, assoc: Assoc) -> Result<()> {
        self.check_health()?;
        self.check_routing(assoc.src_id)?;
        let log = {
            let tiers = self.tiers.read();
            tiers
                .log
                .as_ref()
                .cloned()
                .ok_or(StoreError::TierUnavailable { tier: "log" })?
        };
        log.append_assoc(assoc);
        if log.should_seal(self.options.seal_threshold) {
            self.seal()?;
        }
        Ok(())
    }

    /// Append a node-attribute write for a local id.
    pub fn append_node(&self, local_id: i64, record: NodeRecord) -> Result<()> {
        self.check_health()?;
        let log = {
            let tiers = self.tiers.read();
            tiers
                .log
                .as_ref()
                .cloned()
                .ok_or(StoreError::TierUnavailable { tier: "log" })?
        };
        log.append_node(local_id, record);
        Ok(())
    }

    /// Promote the current log prefix into a fresh suffix store.
    ///
    /// The expensive build runs outside the tier latch against a frozen
    /// snapshot offset; the swap itself installs `(suffix', log-tail')` in
    /// one write-locked step. Appends that land between the snapshot and the
    /// swap are migrated into the new tail.
    pub fn seal(&self) -> Result<u64> {
        let _sealing = self.seal_lock.lock();
        let (old_log, old_suffix) = {
            let tiers = self.tiers.read();
            let Some(log) = tiers.log.as_ref().cloned() else {
                return Err(StoreError::TierUnavailable { tier: "log" });
            };
            (log, tiers.suffix.clone())
        };

        let snapshot = old_log.commit_index();
        if snapshot == 0 {
            return Ok(0);
        }
        let prefix = old_log.prefix(snapshot);
        let sealed_edges = prefix.edges.len() as u64;
        let new_suffix = Arc::new(SuffixStore::build(
            old_suffix.as_deref(),
            prefix.edges,
            prefix.nodes,
            self.options.encoding,
        ));

        {
            let mut tiers = self.tiers.write();
            let new_log = Arc::new(old_log.tail_store(snapshot));
            tiers.suffix = Some(new_suffix);
            tiers.log = Some(new_log);
        }
        info!(
            shard_id = self.partition.shard_id,
            sealed_edges, "sealed log prefix into suffix store"
        );
        Ok(sealed_edges)
    }

    /// Edges currently visible across all tiers; used by consistency checks.
    pub fn total_edge_count(&self) -> u64 {
        let view = self.read_view();
        let mut count = self.base_edges.edge_count();
        if let Some(suffix) = &view.suffix {
            count += suffix.edge_count();
        }
        if let Some((log, snapshot)) = &view.log {
            count += log.edge_count(*snapshot);
        }
        debug!(
            shard_id = self.partition.shard_id,
            count, "total edge count"
        );
        count
    }
}
