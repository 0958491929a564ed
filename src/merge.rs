//! # Tier Merge
//!
//! Lazy merge of per-tier assoc-list cursors into one time-DESC stream.
//! A small binary heap keyed by `(time, dst, tier rank)` pops the newest
//! edge across tiers; dst ASC breaks time ties and the newer tier wins full
//! ties, which keeps the composed order stable no matter where an edge
//! currently lives.
//!
//! Each source cursor must already be in list order. A cursor that yields a
//! row newer than its previous one has a corrupted index, which is fatal to
//! the hosting shard; the merge surfaces that instead of silently
//! reordering.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Result, StoreError};
use crate::model::{assoc_list_cmp, Assoc, TierRank};

/// One tier's cursor over a single assoc-list, in time-DESC order.
pub type TierCursor<'a> = Box<dyn Iterator<Item = Assoc> + 'a>;

struct HeapEntry {
    assoc: Assoc,
    tier: TierRank,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: newest time first, then smallest dst, then newest tier.
        self.assoc
            .time
            .cmp(&other.assoc.time)
            .then_with(|| other.assoc.dst_id.cmp(&self.assoc.dst_id))
            .then_with(|| (other.tier as u8).cmp(&(self.tier as u8)))
    }
}

/// Merging iterator over tier cursors for one `(src, atype)` list.
pub struct TierMerge<'a> {
    cursors: Vec<TierCursor<'a>>,
    heap: BinaryHeap<HeapEntry>,
    last_per_source: Vec<Option<Assoc>>,
}

impl<'a> TierMerge<'a> {
    pub fn new(sources: Vec<(TierRank, TierCursor<'a>)>) -> Result<Self> {
        let mut cursors = Vec::with_capacity(sources.len());
        let mut tiers = Vec::with_capacity(sources.len());
        for (tier, cursor) in sources {
            tiers.push(tier);
            cursors.push(cursor);
        }

        let mut merge = Self {
            last_per_source: vec![None; cursors.len()],
            heap: BinaryHeap::with_capacity(cursors.len()),
            cursors,
        };
        for (source, tier) in tiers.into_iter().enumerate() {
            merge.advance(source, tier)?;
        }
        Ok(merge)
    }

    fn advance(&mut self, source: usize, tier: TierRank) -> Result<()> {
        if let Some(assoc) = self.cursors[source].next() {
            if let Some(prev) = &self.last_per_source[source] {
                if assoc_list_cmp(prev, &assoc) == Ordering::Greater {
                    return Err(StoreError::IndexCorruption {
                        context: "tier cursor",
                        detail: format!(
                            "cursor for tier {:?} produced {} after {}",
                            tier, assoc, prev
                        ),
                    });
                }
            }
            self.last_per_source[source] = Some(assoc.clone());
            self.heap.push(HeapEntry {
                assoc,
                tier,
                source,
            });
        }
        Ok(())
    }

    /// Next edge in merged time-DESC order, or `None` when exhausted.
    pub fn next_assoc(&mut self) -> Result<Option<Assoc>> {
        let Some(entry) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(entry.source, entry.tier)?;
        Ok(Some(entry.assoc))
    }

    /// Skip `off` edges, then collect up to `len`.
    pub fn window(mut self, off: usize, len: usize) -> Result<Vec<Assoc>> {
        for _ in 0..off {
            if self.next_assoc()?.is_none() {
                return Ok(Vec::new());
            }
        }
        let mut out = Vec::with_capacity(len.min(64));
        while out.len() < len {
            match self.next_assoc()? {
                Some(assoc) => out.push(assoc),
                None => break,
            }
        }
        Ok(out)
    }

    /// Up to `limit` edges inside `[t_low, t_high]`, stopping at the first
    /// edge older than `t_low`.
    pub fn time_window(mut self, t_low: i64, t_high: i64, limit: usize) -> Result<Vec<Assoc>> {
        let mut out = Vec::new();
        while out.len() < limit {
            match self.next_assoc()? {
                Some(assoc) if assoc.time < t_low => break,
                Some(assoc) => {
                    if assoc.time <= t_high {
                        out.push(assoc);
                    }
                }
                None => break,
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(edges: Vec<Assoc>) -> TierCursor<'static> {
        Box::new(edges.into_iter())
    }

    #[test]
    fn merges_tiers_into_global_desc_order() {
        let base = vec![
            Assoc::new(10, 30, 7, 200, b"b".to_vec()),
            Assoc::new(10, 40, 7, 200, b"c".to_vec()),
            Assoc::new(10, 20, 7, 100, b"a".to_vec()),
        ];
        let log = vec![
            Assoc::new(10, 60, 7, 300, b"e".to_vec()),
            Assoc::new(10, 50, 7, 50, b"d".to_vec()),
        ];

        let merge = TierMerge::new(vec![
            (TierRank::Log, cursor(log)),
            (TierRank::Base, cursor(base)),
        ])
        .unwrap();
        let merged = merge.window(0, 10).unwrap();
        let dsts: Vec<i64> = merged.iter().map(|a| a.dst_id).collect();
        assert_eq!(dsts, vec![60, 30, 40, 20, 50]);
    }

    #[test]
    fn newer_tier_wins_full_ties() {
        let base = vec![Assoc::new(1, 2, 3, 10, b"old".to_vec())];
        let log = vec![Assoc::new(1, 2, 3, 10, b"new".to_vec())];

        let merge = TierMerge::new(vec![
            (TierRank::Base, cursor(base)),
            (TierRank::Log, cursor(log)),
        ])
        .unwrap();
        let merged = merge.window(0, 2).unwrap();
        assert_eq!(merged[0].attr, b"new");
        assert_eq!(merged[1].attr, b"old");
    }

    #[test]
    fn window_skips_and_clamps() {
        let base = vec![
            Assoc::new(1, 1, 1, 30, b"".to_vec()),
            Assoc::new(1, 2, 1, 20, b"".to_vec()),
            Assoc::new(1, 3, 1, 10, b"".to_vec()),
        ];
        let merged = TierMerge::new(vec![(TierRank::Base, cursor(base.clone()))])
            .unwrap()
            .window(1, 10)
            .unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].dst_id, 2);

        let past_end = TierMerge::new(vec![(TierRank::Base, cursor(base))])
            .unwrap()
            .window(5, 2)
            .unwrap();
        assert!(past_end.is_empty());
    }

    #[test]
    fn time_window_early_exits_and_limits() {
        let base = vec![
            Assoc::new(1, 1, 1, 300, b"".to_vec()),
            Assoc::new(1, 2, 1, 200, b"".to_vec()),
            Assoc::new(1, 3, 1, 100, b"".to_vec()),
        ];
        let merged = TierMerge::new(vec![(TierRank::Base, cursor(base))])
            .unwrap()
            .time_window(150, 250, 5)
            .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].dst_id, 2);
    }

    #[test]
    fn out_of_order_cursor_is_corruption() {
        let bad = vec![
            Assoc::new(1, 1, 1, 100, b"".to_vec()),
            Assoc::new(1, 1, 1, 200, b"".to_vec()),
        ];
        let result = TierMerge::new(vec![(TierRank::Base, cursor(bad))])
            .unwrap()
            .window(0, 10);
        assert!(matches!(
            result,
            Err(StoreError::IndexCorruption { .. })
        ));
    }
}
