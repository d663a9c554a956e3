//! The external search capability: given a query sequence set and a target
//! index, produce the best hit of every query sequence.
//!
//! Calls are independent. Nothing is retried or cached here; a failed call is
//! reported as `SimError::Adapter` and the caller decides what to do with it.

use crate::libs::error::SimError;
use crate::libs::hit::{best_hits, HitFilter, HitReader, HitRecord};
use crate::libs::registry::Item;
use std::path::PathBuf;

pub type Hits = Box<dyn Iterator<Item = HitRecord> + Send>;

pub trait Aligner: Sync {
    /// Best hits of `query`'s sequences against `target`'s index. Zero hits
    /// is a valid, empty result.
    fn search(&self, query: &Item, target: &Item) -> Result<Hits, SimError>;
}

/// Runs `diamond blastp` once per call
#[derive(Debug, Clone)]
pub struct DiamondAligner {
    pub bin: String,
    pub threads: Option<usize>,
    pub evalue: Option<f64>,
    /// Extra arguments passed through to diamond
    pub extra: Vec<String>,
    pub filter: HitFilter,
    /// Where raw diamond output lives until it is parsed
    pub scratch_dir: PathBuf,
}

impl DiamondAligner {
    pub fn new(bin: &str, scratch_dir: PathBuf) -> Self {
        DiamondAligner {
            bin: bin.to_string(),
            threads: None,
            evalue: None,
            extra: vec![],
            filter: HitFilter::default(),
            scratch_dir,
        }
    }

    fn command(&self, query: &Item, target: &Item, out: &std::path::Path) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.bin);
        cmd.arg("blastp")
            .arg("-q")
            .arg(&query.path)
            .arg("-d")
            .arg(&target.index)
            .arg("-o")
            .arg(out)
            .args(["-f", "6", "-k", "1", "--quiet"]);

        if let Some(threads) = self.threads {
            cmd.arg("--threads").arg(threads.to_string());
        }
        if let Some(evalue) = self.evalue {
            cmd.arg("--evalue").arg(evalue.to_string());
        }
        for arg in &self.extra {
            cmd.arg(arg);
        }

        cmd
    }
}

impl Aligner for DiamondAligner {
    fn search(&self, query: &Item, target: &Item) -> Result<Hits, SimError> {
        let adapter_err = |e: &dyn std::fmt::Display| SimError::adapter(&query.id, &target.id, e);

        std::fs::create_dir_all(&self.scratch_dir).map_err(|e| adapter_err(&e))?;
        let out = tempfile::Builder::new()
            .prefix(&format!("{}_vs_{}.", query.id, target.id))
            .suffix(".tsv")
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| adapter_err(&e))?;

        let mut cmd = self.command(query, target, out.path());
        log::debug!("Running {:?}", cmd);
        let output = cmd.output().map_err(|e| adapter_err(&e))?;
        if !output.status.success() {
            let msg = format!(
                "{} exited with {}: {}",
                self.bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(adapter_err(&msg));
        }

        // `out` is removed on drop, so parse eagerly
        let source = out.path().to_string_lossy().to_string();
        let reader = crate::reader(&source).map_err(|e| adapter_err(&e))?;
        let hits = best_hits(HitReader::new(reader, &source), &self.filter)
            .map_err(|e| adapter_err(&e))?;

        Ok(Box::new(hits.into_iter()))
    }
}

/// Reads hit tables produced earlier, one file per direction named
/// `<query>_vs_<target>.tsv` (optionally gzipped) in `dir`.
#[derive(Debug, Clone)]
pub struct PrecomputedAligner {
    pub dir: PathBuf,
    pub filter: HitFilter,
}

impl PrecomputedAligner {
    pub fn new(dir: PathBuf) -> Self {
        PrecomputedAligner {
            dir,
            filter: HitFilter::default(),
        }
    }

    fn locate(&self, query: &Item, target: &Item) -> Option<PathBuf> {
        let base = format!("{}_vs_{}.tsv", query.id, target.id);
        [base.clone(), format!("{}.gz", base)]
            .into_iter()
            .map(|e| self.dir.join(e))
            .find(|e| e.is_file())
    }
}

impl Aligner for PrecomputedAligner {
    fn search(&self, query: &Item, target: &Item) -> Result<Hits, SimError> {
        let path = self.locate(query, target).ok_or_else(|| {
            SimError::adapter(
                &query.id,
                &target.id,
                format!("no hit table in {}", self.dir.display()),
            )
        })?;

        let source = path.to_string_lossy().to_string();
        let reader = crate::reader(&source)
            .map_err(|e| SimError::adapter(&query.id, &target.id, e))?;
        let hits = best_hits(HitReader::new(reader, &source), &self.filter)
            .map_err(|e| SimError::adapter(&query.id, &target.id, e))?;

        Ok(Box::new(hits.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn item(id: &str) -> Item {
        Item {
            id: id.to_string(),
            path: PathBuf::from(format!("{}.faa", id)),
            count: 2,
            index: PathBuf::from(format!("db/{}", id)),
        }
    }

    #[test]
    fn test_precomputed() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("A_vs_B.tsv"),
            "a1\tb1\t80\na1\tb2\t90\na2\tb2\t70\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("B_vs_A.tsv"), "").unwrap();

        let aligner = PrecomputedAligner::new(dir.path().to_path_buf());

        let hits: Vec<_> = aligner.search(&item("A"), &item("B")).unwrap().collect();
        // one hit per query; without bitscores the first one wins
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].identity, 80.0);
        assert_eq!(hits[1].identity, 70.0);

        let hits: Vec<_> = aligner.search(&item("B"), &item("A")).unwrap().collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_precomputed_missing() {
        let dir = tempdir().unwrap();
        let aligner = PrecomputedAligner::new(dir.path().to_path_buf());

        let err = aligner.search(&item("A"), &item("C")).err().unwrap();
        assert!(matches!(err, SimError::Adapter { .. }));
        assert!(err.to_string().starts_with("alignment failed for A -> C"));
    }

    #[test]
    fn test_precomputed_bad_identity() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("A_vs_B.tsv"), "a1\tb1\tnan\na2\tb1\t250\n").unwrap();
        let aligner = PrecomputedAligner::new(dir.path().to_path_buf());

        let err = aligner.search(&item("A"), &item("B")).err().unwrap();
        assert!(matches!(err, SimError::Adapter { .. }));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_diamond_command() {
        let mut aligner = DiamondAligner::new("diamond", PathBuf::from("scratch"));
        aligner.threads = Some(4);
        aligner.extra = vec!["--sensitive".to_string()];

        let cmd = aligner.command(&item("A"), &item("B"), std::path::Path::new("out.tsv"));
        let args: Vec<_> = cmd
            .get_args()
            .map(|e| e.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            vec![
                "blastp", "-q", "A.faa", "-d", "db/B", "-o", "out.tsv", "-f", "6", "-k", "1",
                "--quiet", "--threads", "4", "--sensitive"
            ]
        );
    }

    #[test]
    fn test_diamond_missing_binary() {
        let dir = tempdir().unwrap();
        let aligner = DiamondAligner::new(
            "spsim-no-such-diamond",
            dir.path().join("scratch"),
        );

        let err = aligner.search(&item("A"), &item("B")).err().unwrap();
        assert!(matches!(err, SimError::Adapter { .. }));
    }
}
