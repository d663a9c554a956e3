//! Runs the pairs of a chunk on a bounded worker pool.
//!
//! Per pair: skip when its row is already committed, claim it with a lock
//! file, align both directions, reduce, and commit the row by renaming a
//! scratch file into place. A failing pair is recorded and never stops its
//! siblings. The chunk table is published only when every pair of the chunk
//! has either a committed row or a recorded failure.

use crate::libs::aligner::Aligner;
use crate::libs::chunk::Chunk;
use crate::libs::context::RunContext;
use crate::libs::error::SimError;
use crate::libs::pair::Pair;
use crate::libs::reduce::{reduce, PairResult, RESULT_HEADER};
use crate::libs::registry::Item;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Computed and committed in this run
    Done,
    /// A committed row already existed
    Skipped,
    /// Another run holds the claim
    Claimed,
    /// Stopped before starting
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairFailure {
    pub pair: Pair,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkReport {
    pub chunk: usize,
    pub done: usize,
    pub skipped: usize,
    pub claimed: usize,
    pub cancelled: usize,
    pub failures: Vec<PairFailure>,
    /// Whether the chunk table was published
    pub published: bool,
}

impl ChunkReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Exclusive claim on one pair, released on drop
struct Claim {
    path: PathBuf,
}

impl Claim {
    /// `None` when somebody else holds the claim
    fn acquire(path: &Path) -> std::io::Result<Option<Claim>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Some(Claim {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct Distributor<'a> {
    ctx: &'a RunContext,
    item_of: HashMap<&'a str, &'a Item>,
    aligner: &'a dyn Aligner,
}

impl<'a> Distributor<'a> {
    pub fn new(ctx: &'a RunContext, items: &'a [Item], aligner: &'a dyn Aligner) -> Self {
        let item_of = items.iter().map(|e| (e.id.as_str(), e)).collect();
        Distributor {
            ctx,
            item_of,
            aligner,
        }
    }

    /// Runs the given chunks one after another; stops early when cancelled
    pub fn run(&self, chunks: &[Chunk]) -> anyhow::Result<Vec<ChunkReport>> {
        let mut reports = vec![];
        for chunk in chunks {
            if self.ctx.is_cancelled() {
                log::warn!("Run cancelled before chunk {}", chunk.id);
                break;
            }
            reports.push(self.run_chunk(chunk)?);
        }

        Ok(reports)
    }

    pub fn run_chunk(&self, chunk: &Chunk) -> anyhow::Result<ChunkReport> {
        log::info!(
            "Chunk {}: {} pairs on {} worker(s)",
            chunk.id,
            chunk.pairs.len(),
            self.ctx.parallel
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.ctx.parallel)
            .build()?;
        let outcomes: Vec<Outcome> = pool.install(|| {
            chunk
                .pairs
                .par_iter()
                .map(|pair| self.process_pair(pair))
                .collect()
        });

        let mut report = ChunkReport {
            chunk: chunk.id,
            ..Default::default()
        };
        for (pair, outcome) in chunk.pairs.iter().zip(outcomes) {
            match outcome {
                Outcome::Done => report.done += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Claimed => report.claimed += 1,
                Outcome::Cancelled => report.cancelled += 1,
                Outcome::Failed(message) => {
                    log::warn!("Chunk {}: {} vs {} failed: {}", chunk.id, pair.a, pair.b, message);
                    report.failures.push(PairFailure {
                        pair: pair.clone(),
                        message,
                    });
                }
            }
        }

        self.write_failures(&report)?;
        if report.claimed == 0 && report.cancelled == 0 {
            self.publish_table(chunk)?;
            report.published = true;
        } else {
            log::warn!(
                "Chunk {}: {} claimed elsewhere, {} cancelled; table not published",
                chunk.id,
                report.claimed,
                report.cancelled
            );
        }

        log::info!(
            "Chunk {}: {} done, {} skipped, {} failed",
            chunk.id,
            report.done,
            report.skipped,
            report.failed()
        );

        Ok(report)
    }

    fn process_pair(&self, pair: &Pair) -> Outcome {
        if self.ctx.is_cancelled() {
            return Outcome::Cancelled;
        }

        let row_file = self.ctx.row_file(pair);
        if row_file.is_file() {
            log::debug!("{} vs {} already done", pair.a, pair.b);
            return Outcome::Skipped;
        }

        let _claim = match Claim::acquire(&self.ctx.lock_file(pair)) {
            Ok(Some(claim)) => claim,
            Ok(None) => return Outcome::Claimed,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        // committed by another run between the check and the claim
        if row_file.is_file() {
            return Outcome::Skipped;
        }

        let result = match self.compute(pair) {
            Ok(result) => result,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        match crate::publish(&row_file, self.ctx.scratch_dir(), result.to_row().as_bytes()) {
            Ok(()) => {
                log::debug!("{} vs {} committed: {:.4}", pair.a, pair.b, result.final_avg);
                Outcome::Done
            }
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    fn compute(&self, pair: &Pair) -> Result<PairResult, SimError> {
        let lookup = |id: &str| {
            self.item_of.get(id).copied().ok_or_else(|| {
                SimError::Configuration(format!("{} is not in the registry", id))
            })
        };
        let a = lookup(&pair.a)?;
        let b = lookup(&pair.b)?;

        let (hits_ab, hits_ba) = rayon::join(
            || self.aligner.search(a, b),
            || self.aligner.search(b, a),
        );

        Ok(reduce(pair, hits_ab?, hits_ba?, a.count, b.count))
    }

    /// Concatenates the committed rows of the chunk in work-list order
    fn publish_table(&self, chunk: &Chunk) -> anyhow::Result<()> {
        let mut content = format!("{}\n", RESULT_HEADER);
        for pair in &chunk.pairs {
            let row_file = self.ctx.row_file(pair);
            if row_file.is_file() {
                content.push_str(&std::fs::read_to_string(&row_file)?);
            }
        }

        let table = self.ctx.chunk_table(chunk.id);
        if let Some(parent) = table.parent() {
            std::fs::create_dir_all(parent)?;
        }
        crate::publish(&table, self.ctx.scratch_dir(), content.as_bytes())?;

        Ok(())
    }

    fn write_failures(&self, report: &ChunkReport) -> anyhow::Result<()> {
        let path = self.ctx.failure_table(report.chunk);
        if report.failures.is_empty() {
            if path.is_file() {
                std::fs::remove_file(&path)?;
            }
            return Ok(());
        }

        let mut content = "#speciesA\tspeciesB\terror\n".to_string();
        for failure in &report.failures {
            let message = failure.message.replace(&['\t', '\n'][..], " ");
            content.push_str(&format!("{}\t{}\n", failure.pair, message));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        crate::publish(&path, self.ctx.scratch_dir(), content.as_bytes())?;

        Ok(())
    }
}

/// Removes claims left behind by a run that died mid-pair
pub fn clear_locks(ctx: &RunContext, chunk: &Chunk) -> std::io::Result<usize> {
    let mut removed = 0;
    for pair in &chunk.pairs {
        let lock = ctx.lock_file(pair);
        if lock.is_file() {
            std::fs::remove_file(&lock)?;
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::aligner::Hits;
    use crate::libs::chunk::partition;
    use crate::libs::hit::HitRecord;
    use crate::libs::pair::generate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Identity of every hit is fixed per direction; `fail` directions error out
    struct FakeAligner {
        identity_of: HashMap<(String, String), Vec<f64>>,
        fail: Vec<(String, String)>,
        calls: AtomicUsize,
        // searches running right now and the most seen at once
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Option<Duration>,
        // cancels the run once this many searches have finished
        cancel_after: Option<(usize, RunContext)>,
    }

    impl FakeAligner {
        fn new() -> Self {
            FakeAligner {
                identity_of: HashMap::new(),
                fail: vec![],
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay: None,
                cancel_after: None,
            }
        }

        fn with(mut self, q: &str, t: &str, identities: &[f64]) -> Self {
            self.identity_of
                .insert((q.to_string(), t.to_string()), identities.to_vec());
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Aligner for FakeAligner {
        fn search(&self, query: &Item, target: &Item) -> Result<Hits, SimError> {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, ctx)) = &self.cancel_after {
                if calls >= *after {
                    ctx.cancel();
                }
            }

            let key = (query.id.clone(), target.id.clone());
            if self.fail.contains(&key) {
                return Err(SimError::adapter(&query.id, &target.id, "boom"));
            }
            let hits: Vec<HitRecord> = self
                .identity_of
                .get(&key)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(i, e)| HitRecord::new(&format!("{}{}", query.id, i), &target.id, e))
                .collect();
            Ok(Box::new(hits.into_iter()))
        }
    }

    fn items(ids: &[&str]) -> Vec<Item> {
        ids.iter()
            .map(|id| Item {
                id: id.to_string(),
                path: PathBuf::from(format!("{}.faa", id)),
                count: 2,
                index: PathBuf::from(format!("{}.faa", id)),
            })
            .collect()
    }

    fn abc_aligner() -> FakeAligner {
        FakeAligner::new()
            .with("A", "B", &[70.0, 90.0])
            .with("B", "A", &[90.0])
            .with("B", "C", &[70.0])
            .with("C", "B", &[60.0, 80.0])
    }

    #[test]
    fn test_run_and_resume() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), 2);
        let items = items(&["A", "B", "C"]);
        let chunks = partition(&generate(&items), 2).unwrap();
        let aligner = abc_aligner();

        let reports = Distributor::new(&ctx, &items, &aligner).run(&chunks).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].done, 2);
        assert_eq!(reports[1].done, 1);
        assert!(reports.iter().all(|e| e.published && e.failed() == 0));
        assert_eq!(aligner.calls(), 6);

        let table0 = std::fs::read_to_string(ctx.chunk_table(0)).unwrap();
        assert_eq!(
            table0,
            format!(
                "{}\nA\tB\t2\t2\t80.0000\t90.0000\t85.0000\nA\tC\t2\t2\t0.0000\t0.0000\t0.0000\n",
                RESULT_HEADER
            )
        );

        // second run: nothing to compute, same tables
        let reports = Distributor::new(&ctx, &items, &aligner).run(&chunks).unwrap();
        assert_eq!(aligner.calls(), 6);
        assert_eq!(reports[0].skipped, 2);
        assert_eq!(reports[1].skipped, 1);
        assert_eq!(std::fs::read_to_string(ctx.chunk_table(0)).unwrap(), table0);

        // no claims or scratch files left behind
        let leftovers: Vec<_> = std::fs::read_dir(ctx.rows_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|e| !e.ends_with(".tsv"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(std::fs::read_dir(ctx.scratch_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_fault_isolation() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), 3);
        let items = items(&["A", "B", "C"]);
        let chunks = partition(&generate(&items), 10).unwrap();
        let mut aligner = abc_aligner();
        aligner.fail.push(("C".to_string(), "A".to_string()));

        let report = Distributor::new(&ctx, &items, &aligner)
            .run_chunk(&chunks[0])
            .unwrap();
        assert_eq!(report.done, 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].pair, Pair::new("A", "C"));
        assert!(report.published);

        let table = std::fs::read_to_string(ctx.chunk_table(0)).unwrap();
        assert_eq!(table.lines().count(), 3);
        assert!(!table.contains("A\tC\t"));
        let failed = std::fs::read_to_string(ctx.failure_table(0)).unwrap();
        assert!(failed.contains("A\tC\talignment failed for C -> A: boom"));

        // the failed pair is retried on the next run and the failure record goes away
        aligner.fail.clear();
        let report = Distributor::new(&ctx, &items, &aligner)
            .run_chunk(&chunks[0])
            .unwrap();
        assert_eq!(report.done, 1);
        assert_eq!(report.skipped, 2);
        assert!(!ctx.failure_table(0).exists());
        let table = std::fs::read_to_string(ctx.chunk_table(0)).unwrap();
        assert_eq!(table.lines().count(), 4);
    }

    #[test]
    fn test_unknown_item_fails_pair() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), 1);
        let items = items(&["A", "B"]);
        let chunk = Chunk {
            id: 0,
            pairs: vec![Pair::new("A", "B"), Pair::new("A", "Z")],
        };
        let aligner = abc_aligner();

        let report = Distributor::new(&ctx, &items, &aligner)
            .run_chunk(&chunk)
            .unwrap();
        assert_eq!(report.done, 1);
        assert_eq!(report.failed(), 1);
        assert!(report.failures[0].message.contains("Z is not in the registry"));
    }

    #[test]
    fn test_claimed_elsewhere() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), 1);
        let items = items(&["A", "B", "C"]);
        let chunks = partition(&generate(&items), 10).unwrap();
        let aligner = abc_aligner();

        std::fs::create_dir_all(ctx.rows_dir()).unwrap();
        std::fs::write(ctx.lock_file(&Pair::new("B", "C")), "12345\n").unwrap();

        let report = Distributor::new(&ctx, &items, &aligner)
            .run_chunk(&chunks[0])
            .unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.done, 2);
        assert!(!report.published);
        assert!(!ctx.chunk_table(0).exists());

        assert_eq!(clear_locks(&ctx, &chunks[0]).unwrap(), 1);
        let report = Distributor::new(&ctx, &items, &aligner)
            .run_chunk(&chunks[0])
            .unwrap();
        assert_eq!(report.done, 1);
        assert!(report.published);
    }

    #[test]
    fn test_bounded_parallelism() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), 2);
        let items = items(&["A", "B", "C", "D", "E", "F"]);
        let chunks = partition(&generate(&items), 100).unwrap();
        assert_eq!(chunks[0].pairs.len(), 15);

        let mut aligner = abc_aligner();
        aligner.delay = Some(Duration::from_millis(10));

        let report = Distributor::new(&ctx, &items, &aligner)
            .run_chunk(&chunks[0])
            .unwrap();
        assert_eq!(report.done, 15);
        assert_eq!(aligner.calls(), 30);

        // both directions of a pair share the pool, so searches never outnumber workers
        let peak = aligner.peak.load(Ordering::SeqCst);
        assert!(peak >= 1);
        assert!(peak <= ctx.parallel, "peak {} > {}", peak, ctx.parallel);
    }

    #[test]
    fn test_cancelled_mid_chunk() {
        let dir = tempdir().unwrap();
        // one worker keeps the pairs in work-list order
        let ctx = RunContext::new(dir.path(), 1);
        let items = items(&["A", "B", "C"]);
        let chunks = partition(&generate(&items), 10).unwrap();

        let mut aligner = abc_aligner();
        aligner.cancel_after = Some((2, ctx.clone()));

        let report = Distributor::new(&ctx, &items, &aligner)
            .run_chunk(&chunks[0])
            .unwrap();
        assert_eq!(report.done, 1);
        assert_eq!(report.cancelled, 2);
        assert_eq!(aligner.calls(), 2);
        assert!(!report.published);
        assert!(!ctx.chunk_table(0).exists());

        // the finished pair stays committed
        assert!(ctx.row_file(&Pair::new("A", "B")).is_file());
        assert!(!ctx.row_file(&Pair::new("A", "C")).exists());
    }

    #[test]
    fn test_cancelled() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), 2);
        let items = items(&["A", "B", "C"]);
        let chunks = partition(&generate(&items), 2).unwrap();
        let aligner = abc_aligner();

        ctx.cancel();
        let distributor = Distributor::new(&ctx, &items, &aligner);
        let reports = distributor.run(&chunks).unwrap();
        assert!(reports.is_empty());

        let report = distributor.run_chunk(&chunks[0]).unwrap();
        assert_eq!(report.cancelled, 2);
        assert!(!report.published);
        assert_eq!(aligner.calls(), 0);
    }
}
