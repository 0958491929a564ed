//! # Packed Assoc Store
//!
//! Immutable edge store holding assoc-lists grouped by `(src, atype)` and
//! sorted by descending time. Each list is laid out as a header plus three
//! parallel byte-packed columns (`dst`, `time`, `attr_offset`) over a shared
//! attribute pool, so `assoc_count` is O(1) from the header and range scans
//! decode only the rows they touch.
//!
//! The store is built once from an edge list (construct mode) or mapped
//! read-only from a prebuilt `.succinct` artifact (load mode). The bit-level
//! compression collaborator receives the sampling rates recorded in the
//! artifact header; this layer only fixes the lookups demanded of it.

use std::fs::File;
use std::io::Write;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::model::{assoc_list_cmp, Assoc, AssocListKey};

const ARTIFACT_MAGIC: &[u8; 4] = b"TAOG";
const ARTIFACT_VERSION: u32 = 1;
const FIXED_HEAD_LEN: usize = 44;

/// File extension of persisted artifacts, kept next to the input file.
pub const ARTIFACT_EXT: &str = "succinct";

/// Sampling rates forwarded to the compression collaborator and recorded in
/// every artifact header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingConfig {
    pub sa_sampling_rate: u32,
    pub isa_sampling_rate: u32,
    pub npa_sampling_rate: u32,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            sa_sampling_rate: 32,
            isa_sampling_rate: 64,
            npa_sampling_rate: 128,
        }
    }
}

/// Per-list header: length, packed column widths, and bias values that keep
/// the packed cells non-negative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ListHeader {
    count: u32,
    dst_min: i64,
    time_min: i64,
    w_dst: u8,
    w_time: u8,
    w_attr: u8,
    /// Byte offset of this list's columns inside the column region.
    col_off: u64,
}

impl ListHeader {
    fn col_len(&self) -> usize {
        self.count as usize * (self.w_dst as usize + self.w_time as usize + self.w_attr as usize)
    }
}

enum Bytes {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Bytes::Owned(v) => v,
            Bytes::Mapped(m) => m,
        }
    }
}

impl std::fmt::Debug for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bytes::Owned(v) => write!(f, "Owned({} bytes)", v.len()),
            Bytes::Mapped(m) => write!(f, "Mapped({} bytes)", m.len()),
        }
    }
}

/// Immutable packed edge store. Safe to share across readers without locking.
///
/// `data` is either the owned column+pool buffer (construct mode) or the
/// whole artifact mapped read-only (load mode); `columns_base` / `pool_base`
/// locate the two regions inside it.
#[derive(Debug)]
pub struct AssocStore {
    headers: FxHashMap<AssocListKey, ListHeader>,
    /// `src -> sorted atypes`, for whole-node neighbor queries.
    src_index: FxHashMap<i64, Vec<i64>>,
    data: Bytes,
    columns_base: usize,
    pool_base: usize,
    encoding: EncodingConfig,
    edge_count: u64,
}

/// Minimum byte width that can represent `max_delta`.
fn width_for(max_delta: u64) -> u8 {
    let mut w = 1u8;
    while w < 8 && max_delta >= 1u64 << (8 * w) {
        w += 1;
    }
    w
}

fn write_packed(out: &mut Vec<u8>, value: u64, width: u8) {
    out.extend_from_slice(&value.to_le_bytes()[..width as usize]);
}

fn read_packed(data: &[u8], off: usize, width: u8) -> u64 {
    let mut buf = [0u8; 8];
    buf[..width as usize].copy_from_slice(&data[off..off + width as usize]);
    u64::from_le_bytes(buf)
}

impl AssocStore {
    /// Build a packed store from an edge list.
    ///
    /// Edges are grouped by `(src, atype)`, sorted time-DESC with dst-ASC
    /// tie-break, and exact `(src, atype, dst, time)` duplicates are dropped.
    pub fn from_edges(edges: Vec<Assoc>, encoding: EncodingConfig) -> Self {
        let mut lists: std::collections::BTreeMap<AssocListKey, Vec<Assoc>> =
            std::collections::BTreeMap::new();
        for edge in edges {
            lists.entry(edge.list_key()).or_default().push(edge);
        }

        let mut headers = FxHashMap::default();
        let mut columns = Vec::new();
        let mut attr_pool = Vec::new();
        let mut edge_count = 0u64;

        for (key, mut list) in lists {
            list.sort_by(assoc_list_cmp);
            list.dedup_by(|a, b| a.dst_id == b.dst_id && a.time == b.time);
            if list.is_empty() {
                continue;
            }

            // Deltas are computed with wrapping arithmetic: the true
            // difference of two i64 values always fits in a u64.
            let dst_min = list.iter().map(|a| a.dst_id).min().unwrap();
            let time_min = list.iter().map(|a| a.time).min().unwrap();
            let dst_span = list
                .iter()
                .map(|a| a.dst_id.wrapping_sub(dst_min) as u64)
                .max()
                .unwrap();
            let time_span = list
                .iter()
                .map(|a| a.time.wrapping_sub(time_min) as u64)
                .max()
                .unwrap();

            let mut offsets = Vec::with_capacity(list.len());
            for assoc in &list {
                offsets.push(attr_pool.len() as u64);
                attr_pool.extend_from_slice(&(assoc.attr.len() as u32).to_le_bytes());
                attr_pool.extend_from_slice(&assoc.attr);
            }
            let attr_span = *offsets.last().unwrap();

            let header = ListHeader {
                count: list.len() as u32,
                dst_min,
                time_min,
                w_dst: width_for(dst_span),
                w_time: width_for(time_span),
                w_attr: width_for(attr_span),
                col_off: columns.len() as u64,
            };

            for assoc in &list {
                write_packed(
                    &mut columns,
                    assoc.dst_id.wrapping_sub(dst_min) as u64,
                    header.w_dst,
                );
            }
            for assoc in &list {
                write_packed(
                    &mut columns,
                    assoc.time.wrapping_sub(time_min) as u64,
                    header.w_time,
                );
            }
            for offset in &offsets {
                write_packed(&mut columns, *offset, header.w_attr);
            }

            edge_count += list.len() as u64;
            headers.insert(key, header);
        }

        let pool_base = columns.len();
        let mut data = columns;
        data.extend_from_slice(&attr_pool);

        Self {
            src_index: build_src_index(&headers),
            headers,
            data: Bytes::Owned(data),
            columns_base: 0,
            pool_base,
            encoding,
            edge_count,
        }
    }

    pub fn encoding(&self) -> EncodingConfig {
        self.encoding
    }

    /// Total edges across all lists.
    pub fn edge_count(&self) -> u64 {
        self.edge_count
    }

    /// Exact length of the `(src, atype)` list; zero when absent.
    pub fn assoc_count(&self, src: i64, atype: i64) -> i64 {
        self.headers
            .get(&AssocListKey::new(src, atype))
            .map(|h| h.count as i64)
            .unwrap_or(0)
    }

    /// The window `[off, off+len)` of the list in time-DESC order. Empty if
    /// the list is absent or `off` is past the end; `len` is clamped.
    pub fn assoc_range(&self, src: i64, atype: i64, off: usize, len: usize) -> Vec<Assoc> {
        let Some(header) = self.headers.get(&AssocListKey::new(src, atype)) else {
            return Vec::new();
        };
        let count = header.count as usize;
        if off >= count {
            return Vec::new();
        }
        let end = off.saturating_add(len).min(count);
        (off..end)
            .map(|i| self.decode_row(src, atype, header, i))
            .collect()
    }

    /// All edges with `dst ∈ dst_set` (empty set means any destination) and
    /// `t_low ≤ time ≤ t_high`, inclusive on both ends.
    pub fn assoc_get(
        &self,
        src: i64,
        atype: i64,
        dst_set: &std::collections::HashSet<i64>,
        t_low: i64,
        t_high: i64,
    ) -> Vec<Assoc> {
        let Some(header) = self.headers.get(&AssocListKey::new(src, atype)) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for i in 0..header.count as usize {
            let time = self.decode_time(header, i);
            if time < t_low {
                // Rows are time-DESC; nothing older can match.
                break;
            }
            if time > t_high {
                continue;
            }
            let dst = self.decode_dst(header, i);
            if dst_set.is_empty() || dst_set.contains(&dst) {
                out.push(self.decode_row(src, atype, header, i));
            }
        }
        out
    }

    /// Up to `limit` edges inside `[t_low, t_high]`, newest first. A bounded
    /// prefix scan with an early exit once `time < t_low`.
    pub fn assoc_time_range(
        &self,
        src: i64,
        atype: i64,
        t_low: i64,
        t_high: i64,
        limit: usize,
    ) -> Vec<Assoc> {
        let Some(header) = self.headers.get(&AssocListKey::new(src, atype)) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for i in 0..header.count as usize {
            if out.len() >= limit {
                break;
            }
            let time = self.decode_time(header, i);
            if time < t_low {
                break;
            }
            if time <= t_high {
                out.push(self.decode_row(src, atype, header, i));
            }
        }
        out
    }

    /// Cursor over one list in stored (time-DESC) order; used by the tier
    /// merge and the seal path.
    pub fn cursor(&self, src: i64, atype: i64) -> ListCursor<'_> {
        let key = AssocListKey::new(src, atype);
        ListCursor {
            store: self,
            key,
            header: self.headers.get(&key),
            pos: 0,
        }
    }

    /// Sorted atypes with at least one edge out of `src`.
    pub fn atypes_of(&self, src: i64) -> &[i64] {
        self.src_index.get(&src).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Decode the whole store back into an edge list (seal path).
    pub fn all_edges(&self) -> Vec<Assoc> {
        let mut out = Vec::with_capacity(self.edge_count as usize);
        for (key, header) in &self.headers {
            for i in 0..header.count as usize {
                out.push(self.decode_row(key.src, key.atype, header, i));
            }
        }
        out
    }

    fn decode_dst(&self, header: &ListHeader, i: usize) -> i64 {
        let off = self.columns_base + header.col_off as usize + i * header.w_dst as usize;
        header
            .dst_min
            .wrapping_add(read_packed(&self.data, off, header.w_dst) as i64)
    }

    fn decode_time(&self, header: &ListHeader, i: usize) -> i64 {
        let base = self.columns_base
            + header.col_off as usize
            + header.count as usize * header.w_dst as usize;
        let off = base + i * header.w_time as usize;
        header
            .time_min
            .wrapping_add(read_packed(&self.data, off, header.w_time) as i64)
    }

    fn decode_attr(&self, header: &ListHeader, i: usize) -> Vec<u8> {
        let base = self.columns_base
            + header.col_off as usize
            + header.count as usize * (header.w_dst as usize + header.w_time as usize);
        let off = base + i * header.w_attr as usize;
        let pool_off = self.pool_base + read_packed(&self.data, off, header.w_attr) as usize;
        let len = u32::from_le_bytes(
            self.data[pool_off..pool_off + 4]
                .try_into()
                .expect("attr pool length prefix"),
        ) as usize;
        self.data[pool_off + 4..pool_off + 4 + len].to_vec()
    }

    fn decode_row(&self, src: i64, atype: i64, header: &ListHeader, i: usize) -> Assoc {
        Assoc {
            src_id: src,
            dst_id: self.decode_dst(header, i),
            atype,
            time: self.decode_time(header, i),
            attr: self.decode_attr(header, i),
        }
    }

    /// Persist the store as a `.succinct` artifact.
    pub fn save(&self, path: &Path) -> Result<()> {
        // Header offsets are region-relative in both modes, so they persist
        // as-is.
        let mut entries: Vec<(AssocListKey, ListHeader)> =
            self.headers.iter().map(|(k, h)| (*k, *h)).collect();
        entries.sort_by_key(|(k, _)| *k);
        let table = bincode::serialize(&entries)?;

        let columns = &self.data[self.columns_base..self.pool_base];
        let pool = &self.data[self.pool_base..];

        let mut file = File::create(path)?;
        let mut head = Vec::with_capacity(FIXED_HEAD_LEN);
        head.extend_from_slice(ARTIFACT_MAGIC);
        head.extend_from_slice(&ARTIFACT_VERSION.to_le_bytes());
        head.extend_from_slice(&self.encoding.sa_sampling_rate.to_le_bytes());
        head.extend_from_slice(&self.encoding.isa_sampling_rate.to_le_bytes());
        head.extend_from_slice(&self.encoding.npa_sampling_rate.to_le_bytes());
        head.extend_from_slice(&(table.len() as u64).to_le_bytes());
        head.extend_from_slice(&(columns.len() as u64).to_le_bytes());
        head.extend_from_slice(&(pool.len() as u64).to_le_bytes());
        file.write_all(&head)?;
        file.write_all(&table)?;
        file.write_all(columns)?;
        file.write_all(pool)?;
        file.sync_all()?;
        Ok(())
    }

    /// Map a prebuilt artifact read-only and validate its layout.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }?;
        if mmap.len() < FIXED_HEAD_LEN {
            return Err(StoreError::Artifact("artifact too small".into()));
        }
        if &mmap[..4] != ARTIFACT_MAGIC {
            return Err(StoreError::Artifact("bad magic".into()));
        }
        let version = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
        if version != ARTIFACT_VERSION {
            return Err(StoreError::Artifact(format!(
                "unsupported artifact version {version}"
            )));
        }
        let encoding = EncodingConfig {
            sa_sampling_rate: u32::from_le_bytes(mmap[8..12].try_into().unwrap()),
            isa_sampling_rate: u32::from_le_bytes(mmap[12..16].try_into().unwrap()),
            npa_sampling_rate: u32::from_le_bytes(mmap[16..20].try_into().unwrap()),
        };
        let table_len = u64::from_le_bytes(mmap[20..28].try_into().unwrap()) as usize;
        let columns_len = u64::from_le_bytes(mmap[28..36].try_into().unwrap()) as usize;
        let pool_len = u64::from_le_bytes(mmap[36..44].try_into().unwrap()) as usize;

        let columns_base = FIXED_HEAD_LEN + table_len;
        let pool_base = columns_base + columns_len;
        if pool_base + pool_len != mmap.len() {
            return Err(StoreError::Artifact("section lengths disagree".into()));
        }

        let entries: Vec<(AssocListKey, ListHeader)> =
            bincode::deserialize(&mmap[FIXED_HEAD_LEN..columns_base])?;
        let mut headers = FxHashMap::default();
        let mut edge_count = 0u64;
        for (key, header) in entries {
            if header.col_off as usize + header.col_len() > columns_len {
                return Err(StoreError::Artifact(format!(
                    "list ({}, {}) columns out of bounds",
                    key.src, key.atype
                )));
            }
            edge_count += header.count as u64;
            headers.insert(key, header);
        }

        let store = Self {
            src_index: build_src_index(&headers),
            headers,
            data: Bytes::Mapped(mmap),
            columns_base,
            pool_base,
            encoding,
            edge_count,
        };
        store.validate()?;
        Ok(store)
    }

    /// Check the time-DESC / dst-ASC invariant of every list; a violation is
    /// corruption and fatal to the hosting shard.
    pub fn validate(&self) -> Result<()> {
        for (key, header) in &self.headers {
            let mut prev: Option<(i64, i64)> = None;
            for i in 0..header.count as usize {
                let time = self.decode_time(header, i);
                let dst = self.decode_dst(header, i);
                if let Some((pt, pd)) = prev {
                    let ok = time < pt || (time == pt && dst > pd);
                    if !ok {
                        return Err(StoreError::IndexCorruption {
                            context: "assoc list",
                            detail: format!(
                                "list ({}, {}) row {} out of order",
                                key.src, key.atype, i
                            ),
                        });
                    }
                }
                prev = Some((time, dst));
            }
        }
        Ok(())
    }
}

fn build_src_index(headers: &FxHashMap<AssocListKey, ListHeader>) -> FxHashMap<i64, Vec<i64>> {
    let mut index: FxHashMap<i64, Vec<i64>> = FxHashMap::default();
    for key in headers.keys() {
        index.entry(key.src).or_default().push(key.atype);
    }
    for atypes in index.values_mut() {
        atypes.sort_unstable();
    }
    index
}

/// Iterator over one assoc-list in stored order.
pub struct ListCursor<'a> {
    store: &'a AssocStore,
    key: AssocListKey,
    header: Option<&'a ListHeader>,
    pos: usize,
}

impl Iterator for ListCursor<'_> {
    type Item = Assoc;

    fn next(&mut self) -> Option<Assoc> {
        let header = self.header?;
        if self.pos >= header.count as usize {
            return None;
        }
        let row = self
            .store
            .decode_row(self.key.src, self.key.atype, header, self.pos);
        self.pos += 1;
        Some(row)
    }
}
