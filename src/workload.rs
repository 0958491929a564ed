//! # Benchmark Workload
//!
//! The client driver: a fixed TAO-style request mix sampled from pre-loaded
//! parameter pools, run through timed warm-up / measure / cool-down phases.
//! Every driver thread owns one connection, one seeded RNG, and its own
//! counters; nothing is shared but the cooperative stop flag. Results are
//! appended as one summary line per thread.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::input::{
    self, AssocGetParams, AssocRangeParams, AssocTimeRangeParams, NodeAtypeParams,
};
use crate::GraphReader;

/// Base of the per-thread RNG seed; thread `i` seeds with `1618 + i`.
pub const SEED_BASE: u64 = 1618;

// Read workload distribution; from the TAO workload characterization.
const ASSOC_RANGE_PERC: f64 = 0.409;
const OBJ_GET_PERC: f64 = 0.289;
const ASSOC_GET_PERC: f64 = 0.157;
const ASSOC_COUNT_PERC: f64 = 0.117;

/// The five primitive query kinds of the benchmark mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    AssocRange,
    ObjGet,
    AssocGet,
    AssocCount,
    AssocTimeRange,
}

/// Map a uniform draw in `[0, 1)` onto a query kind using the fixed CDF.
pub fn choose_query(r: f64) -> QueryKind {
    if r < ASSOC_RANGE_PERC {
        QueryKind::AssocRange
    } else if r < ASSOC_RANGE_PERC + OBJ_GET_PERC {
        QueryKind::ObjGet
    } else if r < ASSOC_RANGE_PERC + OBJ_GET_PERC + ASSOC_GET_PERC {
        QueryKind::AssocGet
    } else if r < ASSOC_RANGE_PERC + OBJ_GET_PERC + ASSOC_GET_PERC + ASSOC_COUNT_PERC {
        QueryKind::AssocCount
    } else {
        QueryKind::AssocTimeRange
    }
}

/// Zipf sampler over `[0, n)` with skew `theta` (0 = pure zipf,
/// 1 = uniform). Used to synthesize parameter pools when no query files are
/// supplied; the RNG is injected so every thread stays deterministic.
pub struct ZipfGenerator {
    cum_dist: Vec<f64>,
}

impl ZipfGenerator {
    pub fn new(theta: f64, n: usize) -> Self {
        assert!(n > 0);
        assert!((0.0..=1.0).contains(&theta));
        let expo = 1.0 - theta;
        let sum: f64 = (1..=n).map(|i| 1.0 / (i as f64).powf(expo)).sum();
        let c = 1.0 / sum;
        let mut cum = 0.0;
        let cum_dist = (1..=n)
            .map(|i| {
                cum += c / (i as f64).powf(expo);
                cum
            })
            .collect();
        Self { cum_dist }
    }

    pub fn next(&self, rng: &mut impl Rng) -> usize {
        let r: f64 = rng.gen();
        // The cumulative sum can fall a hair short of 1.0; clamp the tail.
        self.cum_dist
            .partition_point(|&p| p <= r)
            .min(self.cum_dist.len() - 1)
    }
}

/// Parameter pools for one benchmark run: a warm-up pool and a measure pool
/// per query kind.
#[derive(Debug, Default)]
pub struct QueryPool {
    pub assoc_range: Vec<AssocRangeParams>,
    pub assoc_get: Vec<AssocGetParams>,
    pub assoc_count: Vec<NodeAtypeParams>,
    pub assoc_time_range: Vec<AssocTimeRangeParams>,
    pub obj_get: Vec<i64>,
}

impl QueryPool {
    /// Load every pool from a directory using the fixed file names
    /// (`assoc_range.csv`, `assoc_get.csv`, `assoc_count.csv`,
    /// `assoc_time_range.csv`, `obj_get.txt`).
    pub fn from_dir(dir: &Path) -> crate::error::Result<Self> {
        Ok(Self {
            assoc_range: input::read_assoc_range_queries(&dir.join("assoc_range.csv"))?,
            assoc_get: input::read_assoc_get_queries(&dir.join("assoc_get.csv"))?,
            assoc_count: input::read_node_atype_queries(&dir.join("assoc_count.csv"))?,
            assoc_time_range: input::read_assoc_time_range_queries(
                &dir.join("assoc_time_range.csv"),
            )?,
            obj_get: input::read_node_id_queries(&dir.join("obj_get.txt"))?,
        })
    }

    /// Synthesize pools over `num_nodes` nodes and `num_atypes` edge types,
    /// with zipf-skewed node popularity.
    pub fn synthetic(num_nodes: i64, num_atypes: i64, size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let zipf = ZipfGenerator::new(0.0, num_nodes as usize);
        let node = |rng: &mut StdRng| zipf.next(rng) as i64;

        let mut pool = Self::default();
        for _ in 0..size {
            let n = node(&mut rng);
            let atype = rng.gen_range(0..num_atypes.max(1));
            pool.assoc_range.push(AssocRangeParams {
                node: n,
                atype,
                off: rng.gen_range(0..32),
                len: rng.gen_range(1..64),
            });
            let t_low = rng.gen_range(0..500_000);
            pool.assoc_get.push(AssocGetParams {
                node: node(&mut rng),
                atype: rng.gen_range(0..num_atypes.max(1)),
                t_low,
                t_high: t_low + rng.gen_range(0..500_000),
                dst_ids: (0..rng.gen_range(0..4)).map(|_| node(&mut rng)).collect(),
            });
            pool.assoc_count.push(NodeAtypeParams {
                node: node(&mut rng),
                atype: rng.gen_range(0..num_atypes.max(1)),
            });
            let t_low = rng.gen_range(0..500_000);
            pool.assoc_time_range.push(AssocTimeRangeParams {
                node: node(&mut rng),
                atype: rng.gen_range(0..num_atypes.max(1)),
                t_low,
                t_high: t_low + rng.gen_range(0..500_000),
                limit: rng.gen_range(1..100),
            });
            pool.obj_get.push(node(&mut rng));
        }
        pool
    }

    fn is_empty(&self) -> bool {
        self.assoc_range.is_empty()
            || self.assoc_get.is_empty()
            || self.assoc_count.is_empty()
            || self.assoc_time_range.is_empty()
            || self.obj_get.is_empty()
    }
}

/// Driver phase; transitions are strictly time-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchPhase {
    Ready,
    Warmup,
    Measure,
    Cooldown,
    Done,
}

impl fmt::Display for BenchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BenchPhase::Ready => "ready",
            BenchPhase::Warmup => "warmup",
            BenchPhase::Measure => "measure",
            BenchPhase::Cooldown => "cooldown",
            BenchPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Wall-clock budgets of the three active phases.
#[derive(Debug, Clone, Copy)]
pub struct PhasePlan {
    pub warmup: Duration,
    pub measure: Duration,
    pub cooldown: Duration,
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(60),
            measure: Duration::from_secs(120),
            cooldown: Duration::from_secs(5),
        }
    }
}

/// Per-thread result written at `Done`.
#[derive(Debug, Clone)]
pub struct DriverReport {
    pub thread_id: usize,
    pub queries: u64,
    pub query_throughput: f64,
    /// Whether the thread stopped early on an RPC error.
    pub aborted: bool,
}

impl DriverReport {
    /// The append-only summary line: `thread qps queries`.
    pub fn summary_line(&self) -> String {
        format!(
            "{} {:.2} {}\n",
            self.thread_id, self.query_throughput, self.queries
        )
    }
}

/// One driver thread: runs the mix against its exclusive reader through the
/// timed phases. The stop flag is checked between queries; in-flight calls
/// run to completion.
pub struct MixDriver<'a> {
    reader: &'a mut dyn GraphReader,
    pool: &'a QueryPool,
    rng: StdRng,
    thread_id: usize,
    phase: BenchPhase,
}

impl<'a> MixDriver<'a> {
    pub fn new(reader: &'a mut dyn GraphReader, pool: &'a QueryPool, thread_id: usize) -> Self {
        Self {
            reader,
            pool,
            rng: StdRng::seed_from_u64(SEED_BASE + thread_id as u64),
            thread_id,
            phase: BenchPhase::Ready,
        }
    }

    pub fn phase(&self) -> BenchPhase {
        self.phase
    }

    fn run_one(&mut self) -> anyhow::Result<()> {
        // The pools are non-empty (checked at entry), so the modulo index is
        // always in range.
        match choose_query(self.rng.gen()) {
            QueryKind::AssocRange => {
                let idx = self.rng.gen_range(0..self.pool.assoc_range.len());
                let q = &self.pool.assoc_range[idx];
                self.reader
                    .assoc_range(q.node, q.atype, q.off as usize, q.len as usize)?;
            }
            QueryKind::ObjGet => {
                let idx = self.rng.gen_range(0..self.pool.obj_get.len());
                self.reader.obj_get(self.pool.obj_get[idx])?;
            }
            QueryKind::AssocGet => {
                let idx = self.rng.gen_range(0..self.pool.assoc_get.len());
                let q = &self.pool.assoc_get[idx];
                self.reader
                    .assoc_get(q.node, q.atype, &q.dst_ids, q.t_low, q.t_high)?;
            }
            QueryKind::AssocCount => {
                let idx = self.rng.gen_range(0..self.pool.assoc_count.len());
                let q = &self.pool.assoc_count[idx];
                self.reader.assoc_count(q.node, q.atype)?;
            }
            QueryKind::AssocTimeRange => {
                let idx = self.rng.gen_range(0..self.pool.assoc_time_range.len());
                let q = &self.pool.assoc_time_range[idx];
                self.reader
                    .assoc_time_range(q.node, q.atype, q.t_low, q.t_high, q.limit as usize)?;
            }
        }
        Ok(())
    }

    /// Issue queries until `budget` elapses or the stop flag is raised.
    /// Returns the query count, or the count so far plus the error that
    /// ended the phase early.
    fn run_phase(&mut self, budget: Duration, stop: &AtomicBool) -> (u64, Option<anyhow::Error>) {
        let start = Instant::now();
        let mut count = 0u64;
        while start.elapsed() < budget {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            if let Err(err) = self.run_one() {
                return (count, Some(err));
            }
            count += 1;
        }
        (count, None)
    }

    /// Run the whole state machine and produce this thread's report.
    pub fn run(mut self, plan: PhasePlan, stop: &AtomicBool) -> DriverReport {
        assert!(
            !self.pool.is_empty(),
            "benchmark pools must be non-empty for every query kind"
        );
        info!(thread_id = self.thread_id, "driver starting warmup");
        self.phase = BenchPhase::Warmup;
        let (_, warmup_err) = self.run_phase(plan.warmup, stop);
        if let Some(err) = warmup_err {
            warn!(thread_id = self.thread_id, error = %err, "warmup aborted");
            self.phase = BenchPhase::Done;
            return DriverReport {
                thread_id: self.thread_id,
                queries: 0,
                query_throughput: 0.0,
                aborted: true,
            };
        }

        self.phase = BenchPhase::Measure;
        let measure_start = Instant::now();
        let (queries, measure_err) = self.run_phase(plan.measure, stop);
        let elapsed = measure_start.elapsed().as_secs_f64();
        let aborted = measure_err.is_some();
        if let Some(err) = measure_err {
            warn!(thread_id = self.thread_id, error = %err, "measure aborted");
        }

        if !aborted {
            self.phase = BenchPhase::Cooldown;
            let (_, cooldown_err) = self.run_phase(plan.cooldown, stop);
            if let Some(err) = cooldown_err {
                warn!(thread_id = self.thread_id, error = %err, "cooldown aborted");
            }
        }
        self.phase = BenchPhase::Done;

        let query_throughput = if elapsed > 0.0 {
            queries as f64 / elapsed
        } else {
            0.0
        };
        info!(
            thread_id = self.thread_id,
            queries, query_throughput, "driver finished"
        );
        DriverReport {
            thread_id: self.thread_id,
            queries,
            query_throughput,
            aborted,
        }
    }
}

/// Append one thread's summary line to the shared output file.
pub fn append_report(path: &Path, report: &DriverReport) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(report.summary_line().as_bytes())
}

/// Raise the stop flag shared by every driver thread.
pub fn request_stop(flag: &Arc<AtomicBool>) {
    flag.store(true, Ordering::Relaxed);
}
