//! # Input Formats
//!
//! Construct-mode loaders: node and edge TSV tables, and the CSV parameter
//! files the benchmark driver samples from. Shards built here persist
//! `.succinct` artifacts next to their inputs so load mode can map them back
//! without re-parsing.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use rayon::join;
use tracing::info;

use crate::assoc_store::{AssocStore, ARTIFACT_EXT};
use crate::distributed::ShardBootstrap;
use crate::error::{Result, StoreError};
use crate::model::{Assoc, NodeRecord};
use crate::node_store::NodeStore;
use crate::shard::ShardHandler;

/// Delimiter of node-table records. One record per line, exactly `num_attrs`
/// fields.
pub const NODE_FIELD_DELIM: char = '\t';

fn read_lines(path: &Path) -> Result<impl Iterator<Item = std::io::Result<String>>> {
    Ok(BufReader::new(File::open(path)?).lines())
}

/// Parse a node TSV: `attrs[0] .. attrs[K-1]` per line. The local id of a
/// node is its line number.
pub fn parse_node_tsv(path: &Path, num_attrs: usize) -> Result<Vec<NodeRecord>> {
    let mut records = Vec::new();
    for (line_no, line) in read_lines(path)?.enumerate() {
        let line = line?;
        let fields: Vec<String> = line
            .split(NODE_FIELD_DELIM)
            .map(|s| s.to_string())
            .collect();
        if fields.len() != num_attrs {
            return Err(StoreError::Parse(format!(
                "{}:{}: expected {} node attributes, found {}",
                path.display(),
                line_no + 1,
                num_attrs,
                fields.len()
            )));
        }
        records.push(NodeRecord::new(fields));
    }
    Ok(records)
}

/// Parse an edge TSV: `src dst atype time attr` per line, space-separated;
/// the attribute is everything from the fifth field to end of line and may
/// itself contain spaces.
pub fn parse_edge_tsv(path: &Path) -> Result<Vec<Assoc>> {
    let mut edges = Vec::new();
    for (line_no, line) in read_lines(path)?.enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(5, ' ');
        let parse_field = |field: Option<&str>, name: &str| -> Result<i64> {
            field
                .ok_or_else(|| {
                    StoreError::Parse(format!(
                        "{}:{}: missing {name}",
                        path.display(),
                        line_no + 1
                    ))
                })?
                .parse::<i64>()
                .map_err(|err| {
                    StoreError::Parse(format!(
                        "{}:{}: bad {name}: {err}",
                        path.display(),
                        line_no + 1
                    ))
                })
        };
        let src = parse_field(parts.next(), "src")?;
        let dst = parse_field(parts.next(), "dst")?;
        let atype = parse_field(parts.next(), "atype")?;
        let time = parse_field(parts.next(), "time")?;
        let attr = parts.next().unwrap_or_default().as_bytes().to_vec();
        edges.push(Assoc::new(src, dst, atype, time, attr));
    }
    Ok(edges)
}

fn artifact_path(input: &Path) -> PathBuf {
    let mut name = input.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(ARTIFACT_EXT);
    input.with_file_name(name)
}

/// Build a shard's stores per its bootstrap: construct from TSV (persisting
/// artifacts next to the inputs) or map prebuilt artifacts. A missing input
/// yields an empty table, matching deployments that host only one of the
/// two.
pub fn build_shard(bootstrap: &ShardBootstrap) -> Result<ShardHandler> {
    let encoding = bootstrap.options.encoding;
    let node_file = bootstrap.node_file.clone();
    let edge_file = bootstrap.edge_file.clone();
    let num_attrs = bootstrap.num_attrs;

    let (nodes, edges) = if bootstrap.construct {
        let (nodes, edges) = join(
            move || -> Result<NodeStore> {
                match node_file {
                    Some(path) if path.exists() => {
                        let records = parse_node_tsv(&path, num_attrs)?;
                        let store = NodeStore::from_records(records, num_attrs)?;
                        store.save(&artifact_path(&path))?;
                        Ok(store)
                    }
                    _ => NodeStore::from_records(Vec::new(), num_attrs),
                }
            },
            move || -> Result<AssocStore> {
                match edge_file {
                    Some(path) if path.exists() => {
                        let store = AssocStore::from_edges(parse_edge_tsv(&path)?, encoding);
                        store.save(&artifact_path(&path))?;
                        Ok(store)
                    }
                    _ => Ok(AssocStore::from_edges(Vec::new(), encoding)),
                }
            },
        );
        (nodes?, edges?)
    } else {
        let (nodes, edges) = join(
            move || -> Result<NodeStore> {
                match node_file {
                    Some(path) if artifact_path(&path).exists() => {
                        NodeStore::load(&artifact_path(&path))
                    }
                    _ => NodeStore::from_records(Vec::new(), num_attrs),
                }
            },
            move || -> Result<AssocStore> {
                match edge_file {
                    Some(path) if artifact_path(&path).exists() => {
                        AssocStore::load(&artifact_path(&path))
                    }
                    _ => Ok(AssocStore::from_edges(Vec::new(), encoding)),
                }
            },
        );
        (nodes?, edges?)
    };

    info!(
        shard_id = bootstrap.partition.shard_id,
        nodes = nodes.node_count(),
        edges = edges.edge_count(),
        construct = bootstrap.construct,
        "shard stores ready"
    );
    Ok(ShardHandler::new(
        bootstrap.partition,
        edges,
        nodes,
        bootstrap.options.clone(),
    ))
}

// ---------------------------------------------------------------------------
// Benchmark parameter files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssocRangeParams {
    pub node: i64,
    pub atype: i64,
    pub off: i32,
    pub len: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssocGetParams {
    pub node: i64,
    pub atype: i64,
    pub t_low: i64,
    pub t_high: i64,
    pub dst_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssocTimeRangeParams {
    pub node: i64,
    pub atype: i64,
    pub t_low: i64,
    pub t_high: i64,
    pub limit: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAtypeParams {
    pub node: i64,
    pub atype: i64,
}

fn csv_fields(line: &str) -> Vec<&str> {
    line.split(',').collect()
}

fn parse_int<T: std::str::FromStr>(field: &str, path: &Path, line_no: usize) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    field.trim().parse::<T>().map_err(|err| {
        StoreError::Parse(format!(
            "{}:{}: bad integer `{field}`: {err}",
            path.display(),
            line_no + 1
        ))
    })
}

/// `node,atype,off,len` per line.
pub fn read_assoc_range_queries(path: &Path) -> Result<Vec<AssocRangeParams>> {
    let mut out = Vec::new();
    for (line_no, line) in read_lines(path)?.enumerate() {
        let line = line?;
        let fields = csv_fields(&line);
        if fields.len() != 4 {
            return Err(StoreError::Parse(format!(
                "{}:{}: expected 4 fields",
                path.display(),
                line_no + 1
            )));
        }
        out.push(AssocRangeParams {
            node: parse_int(fields[0], path, line_no)?,
            atype: parse_int(fields[1], path, line_no)?,
            off: parse_int(fields[2], path, line_no)?,
            len: parse_int(fields[3], path, line_no)?,
        });
    }
    Ok(out)
}

/// `node,atype,tLow,tHigh,dst1,dst2,...` per line; the destination set may
/// be empty.
pub fn read_assoc_get_queries(path: &Path) -> Result<Vec<AssocGetParams>> {
    let mut out = Vec::new();
    for (line_no, line) in read_lines(path)?.enumerate() {
        let line = line?;
        let fields = csv_fields(&line);
        if fields.len() < 4 {
            return Err(StoreError::Parse(format!(
                "{}:{}: expected at least 4 fields",
                path.display(),
                line_no + 1
            )));
        }
        let dst_ids = fields[4..]
            .iter()
            .filter(|f| !f.trim().is_empty())
            .map(|f| parse_int(f, path, line_no))
            .collect::<Result<Vec<i64>>>()?;
        out.push(AssocGetParams {
            node: parse_int(fields[0], path, line_no)?,
            atype: parse_int(fields[1], path, line_no)?,
            t_low: parse_int(fields[2], path, line_no)?,
            t_high: parse_int(fields[3], path, line_no)?,
            dst_ids,
        });
    }
    Ok(out)
}

/// `node,atype,tLow,tHigh,limit` per line.
pub fn read_assoc_time_range_queries(path: &Path) -> Result<Vec<AssocTimeRangeParams>> {
    let mut out = Vec::new();
    for (line_no, line) in read_lines(path)?.enumerate() {
        let line = line?;
        let fields = csv_fields(&line);
        if fields.len() != 5 {
            return Err(StoreError::Parse(format!(
                "{}:{}: expected 5 fields",
                path.display(),
                line_no + 1
            )));
        }
        out.push(AssocTimeRangeParams {
            node: parse_int(fields[0], path, line_no)?,
            atype: parse_int(fields[1], path, line_no)?,
            t_low: parse_int(fields[2], path, line_no)?,
            t_high: parse_int(fields[3], path, line_no)?,
            limit: parse_int(fields[4], path, line_no)?,
        });
    }
    Ok(out)
}

/// `node,atype` per line, shared by assoc_count and neighbor-atype pools.
pub fn read_node_atype_queries(path: &Path) -> Result<Vec<NodeAtypeParams>> {
    let mut out = Vec::new();
    for (line_no, line) in read_lines(path)?.enumerate() {
        let line = line?;
        let fields = csv_fields(&line);
        if fields.len() != 2 {
            return Err(StoreError::Parse(format!(
                "{}:{}: expected 2 fields",
                path.display(),
                line_no + 1
            )));
        }
        out.push(NodeAtypeParams {
            node: parse_int(fields[0], path, line_no)?,
            atype: parse_int(fields[1], path, line_no)?,
        });
    }
    Ok(out)
}

/// One node id per line (neighbor and obj_get pools).
pub fn read_node_id_queries(path: &Path) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    for (line_no, line) in read_lines(path)?.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(parse_int(&line, path, line_no)?);
    }
    Ok(out)
}
