use crate::libs::pair::Pair;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything a run needs to know about where its files live and how wide it
/// may go. Passed explicitly to every stage.
///
/// Layout under `outdir`:
///
/// ```text
/// items.tsv                      registry
/// chunks.tsv                     static work list
/// rows/<a>_vs_<b>.tsv            committed row of one pair
/// rows/<a>_vs_<b>.lock           claim held while the pair runs
/// scratch/                       private scratch files
/// chunks/<id>.tsv                chunk result table
/// chunks/<id>.failed.tsv         failed pairs of the chunk
/// ```
#[derive(Debug, Clone)]
pub struct RunContext {
    pub outdir: PathBuf,
    /// Worker threads per chunk
    pub parallel: usize,
    cancel: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new<P: AsRef<Path>>(outdir: P, parallel: usize) -> Self {
        RunContext {
            outdir: outdir.as_ref().to_path_buf(),
            parallel: parallel.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Asks running chunks to stop before their next pair
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn items_file(&self) -> PathBuf {
        self.outdir.join("items.tsv")
    }

    pub fn chunks_file(&self) -> PathBuf {
        self.outdir.join("chunks.tsv")
    }

    pub fn rows_dir(&self) -> PathBuf {
        self.outdir.join("rows")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.outdir.join("scratch")
    }

    /// Depends on the pair alone, so a re-planned run still finds old rows
    pub fn row_file(&self, pair: &Pair) -> PathBuf {
        self.rows_dir().join(format!("{}.tsv", pair.key()))
    }

    pub fn lock_file(&self, pair: &Pair) -> PathBuf {
        self.rows_dir().join(format!("{}.lock", pair.key()))
    }

    pub fn chunk_table(&self, chunk: usize) -> PathBuf {
        self.outdir.join("chunks").join(format!("{}.tsv", chunk))
    }

    pub fn failure_table(&self, chunk: usize) -> PathBuf {
        self.outdir.join("chunks").join(format!("{}.failed.tsv", chunk))
    }

    pub fn result_file(&self) -> PathBuf {
        self.outdir.join("result.tsv")
    }

    pub fn gaps_file(&self) -> PathBuf {
        self.outdir.join("gaps.tsv")
    }
}
