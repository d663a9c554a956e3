use crate::libs::chunk::Chunk;
use crate::libs::context::RunContext;
use crate::libs::error::SimError;
use crate::libs::pair::Pair;
use crate::libs::reduce::{PairResult, RESULT_HEADER};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Write;

/// Similarity of every item with itself
pub const SELF_SIMILARITY: f64 = 100.0;

/// Square, symmetric similarity matrix keyed by item id.
/// Cells without a recorded result hold `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    names: Vec<String>,
    index_of: HashMap<String, usize>,
    values: Vec<Option<f64>>,
}

impl SimilarityMatrix {
    /// All off-diagonal cells empty, the diagonal set to `SELF_SIMILARITY`
    pub fn new(names: Vec<String>) -> Self {
        let size = names.len();
        let index_of = names
            .iter()
            .enumerate()
            .map(|(i, e)| (e.clone(), i))
            .collect();
        let mut values = vec![None; size * size];
        for i in 0..size {
            values[i * size + i] = Some(SELF_SIMILARITY);
        }

        SimilarityMatrix {
            names,
            index_of,
            values,
        }
    }

    pub fn size(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = *self.index_of.get(a)?;
        let j = *self.index_of.get(b)?;
        self.values[i * self.size() + j]
    }

    fn get_ij(&self, i: usize, j: usize) -> Option<f64> {
        self.values[i * self.size() + j]
    }

    /// Sets both `(a, b)` and `(b, a)`. Unknown ids and the diagonal are ignored.
    fn set(&mut self, a: &str, b: &str, value: f64) {
        if let (Some(&i), Some(&j)) = (self.index_of.get(a), self.index_of.get(b)) {
            if i == j {
                return;
            }
            let size = self.size();
            self.values[i * size + j] = Some(value);
            self.values[j * size + i] = Some(value);
        }
    }

    /// Same matrix with rows and columns ordered by decreasing row mean
    /// (empty cells left out of the mean); ties keep name order.
    pub fn ordered_by_mean(&self) -> Self {
        let size = self.size();
        let mut order: Vec<(usize, f64)> = (0..size)
            .map(|i| {
                let defined: Vec<f64> = (0..size).filter_map(|j| self.get_ij(i, j)).collect();
                let mean = defined.iter().sum::<f64>() / defined.len().max(1) as f64;
                (i, mean)
            })
            .collect();
        order.sort_by(|x, y| y.1.total_cmp(&x.1));

        let names: Vec<String> = order.iter().map(|(i, _)| self.names[*i].clone()).collect();
        let mut reordered = SimilarityMatrix::new(names);
        for (ni, (i, _)) in order.iter().enumerate() {
            for (nj, (j, _)) in order.iter().enumerate() {
                reordered.values[ni * size + nj] = self.get_ij(*i, *j);
            }
        }

        reordered
    }

    /// CSV with ids as header and first column; empty cells are written as `NA`
    pub fn write_csv(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        writer.write_fmt(format_args!(",{}\n", self.names.join(",")))?;
        for (i, name) in self.names.iter().enumerate() {
            let cells: Vec<String> = (0..self.size())
                .map(|j| match self.get_ij(i, j) {
                    Some(v) => format!("{:.4}", v),
                    None => "NA".to_string(),
                })
                .collect();
            writer.write_fmt(format_args!("{},{}\n", name, cells.join(",")))?;
        }

        Ok(())
    }

    /// Upper-triangle pairs with a similarity of at least `min_sim`
    pub fn write_pairs(&self, writer: &mut dyn Write, min_sim: f64) -> std::io::Result<usize> {
        writer.write_fmt(format_args!("#i\tj\tname_i\tname_j\tsimilarity\n"))?;
        let mut count = 0;
        for i in 0..self.size() {
            for j in (i + 1)..self.size() {
                if let Some(v) = self.get_ij(i, j) {
                    if v >= min_sim {
                        writer.write_fmt(format_args!(
                            "{}\t{}\t{}\t{}\t{:.4}\n",
                            i, j, self.names[i], self.names[j], v
                        ))?;
                        count += 1;
                    }
                }
            }
        }

        Ok(count)
    }
}

/// Everything assembly produced
#[derive(Debug, Clone)]
pub struct Assembly {
    pub matrix: SimilarityMatrix,
    /// Rows of all chunk tables, in chunk order
    pub results: Vec<PairResult>,
    /// Expected pairs without a result, in work-list order
    pub gaps: Vec<Pair>,
    /// Chunks whose table was missing (only non-empty when forced)
    pub missing_chunks: Vec<usize>,
}

impl Assembly {
    pub fn gap_error(&self) -> Option<SimError> {
        if self.gaps.is_empty() {
            None
        } else {
            Some(SimError::GapInMatrix {
                gaps: self
                    .gaps
                    .iter()
                    .map(|e| (e.a.clone(), e.b.clone()))
                    .collect(),
            })
        }
    }

    /// Combined result table, header once
    pub fn write_results(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        writer.write_fmt(format_args!("{}\n", RESULT_HEADER))?;
        for result in &self.results {
            writer.write_all(result.to_row().as_bytes())?;
        }

        Ok(())
    }

    pub fn write_gaps(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        writer.write_fmt(format_args!("#speciesA\tspeciesB\n"))?;
        for gap in &self.gaps {
            writer.write_fmt(format_args!("{}\n", gap))?;
        }

        Ok(())
    }
}

/// Reads the result table of every expected chunk.
///
/// Missing tables are an `IncompleteResults` error unless `force` is set, in
/// which case they are logged and assembly continues with what exists.
pub fn read_tables(
    ctx: &RunContext,
    chunks: &[Chunk],
    force: bool,
) -> Result<(Vec<PairResult>, Vec<usize>), SimError> {
    let missing: Vec<usize> = chunks
        .iter()
        .map(|e| e.id)
        .filter(|&id| !ctx.chunk_table(id).is_file())
        .collect();

    if !missing.is_empty() {
        if !force {
            return Err(SimError::IncompleteResults { missing });
        }
        log::warn!(
            "Forced assembly with {} of {} chunk table(s) missing",
            missing.len(),
            chunks.len()
        );
    }

    let mut results = vec![];
    for chunk in chunks.iter().filter(|e| !missing.contains(&e.id)) {
        let table = ctx.chunk_table(chunk.id);
        let source = table.to_string_lossy().to_string();
        for (line, fields) in crate::read_tsv(&source)? {
            results.push(PairResult::from_fields(&fields, &source, line)?);
        }
    }

    if results.is_empty() && !chunks.is_empty() && !missing.is_empty() {
        // nothing at all to build from
        return Err(SimError::IncompleteResults { missing });
    }

    Ok((results, missing))
}

/// Builds the matrix from pair results.
///
/// Dimension and order: the sorted union of ids in `results` and in
/// `expected`. Every result sets both symmetric cells; expected pairs that
/// have no result are returned as gaps and their cells stay empty.
pub fn assemble_results(
    results: Vec<PairResult>,
    expected: &[Pair],
) -> (SimilarityMatrix, Vec<PairResult>, Vec<Pair>) {
    let mut names: BTreeSet<String> = BTreeSet::new();
    for result in &results {
        names.insert(result.a.clone());
        names.insert(result.b.clone());
    }
    for pair in expected {
        names.insert(pair.a.clone());
        names.insert(pair.b.clone());
    }

    let mut matrix = SimilarityMatrix::new(names.into_iter().collect());
    let mut seen: HashSet<Pair> = HashSet::new();
    let mut kept = vec![];
    for result in results {
        if !seen.insert(result.pair().canonical()) {
            log::warn!("Duplicate result for {} vs {}, keep the first", result.a, result.b);
            continue;
        }
        matrix.set(&result.a, &result.b, result.final_avg);
        kept.push(result);
    }

    let gaps: Vec<Pair> = expected
        .iter()
        .filter(|e| !seen.contains(&e.canonical()))
        .cloned()
        .collect();

    (matrix, kept, gaps)
}

/// Reads chunk tables and assembles the final matrix
pub fn assemble(ctx: &RunContext, chunks: &[Chunk], force: bool) -> Result<Assembly, SimError> {
    let (results, missing_chunks) = read_tables(ctx, chunks, force)?;
    let expected: Vec<Pair> = chunks.iter().flat_map(|e| e.pairs.clone()).collect();

    let (matrix, results, gaps) = assemble_results(results, &expected);
    log::info!(
        "Assembled a {0}x{0} matrix from {1} pair(s)",
        matrix.size(),
        results.len()
    );

    Ok(Assembly {
        matrix,
        results,
        gaps,
        missing_chunks,
    })
}
