use crate::libs::error::SimError;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

const FASTA_EXTS: [&str; 5] = ["fa", "faa", "fas", "fasta", "fna"];

/// One comparable sequence set, e.g. one species' proteome
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: String,
    pub path: PathBuf,
    /// Number of sequence records in `path`
    pub count: usize,
    /// Searchable index built from `path`; opaque to everything but the aligner
    pub index: PathBuf,
}

/// Builds (or finds) the searchable index for one sequence set.
///
/// Implementations must be idempotent: an existing artifact is reused.
pub trait Indexer: Sync {
    fn ensure(&self, id: &str, path: &Path) -> Result<PathBuf, SimError>;
}

/// The sequence file itself serves as the index
#[derive(Debug, Default)]
pub struct PlainIndexer;

impl Indexer for PlainIndexer {
    fn ensure(&self, _id: &str, path: &Path) -> Result<PathBuf, SimError> {
        Ok(path.to_path_buf())
    }
}

/// `diamond makedb`, one database per item under `db_dir`
#[derive(Debug)]
pub struct DiamondIndexer {
    pub bin: String,
    pub db_dir: PathBuf,
}

impl Indexer for DiamondIndexer {
    fn ensure(&self, id: &str, path: &Path) -> Result<PathBuf, SimError> {
        let db = self.db_dir.join(id);
        let artifact = self.db_dir.join(format!("{}.dmnd", id));
        if artifact.is_file() {
            log::debug!("Index for {} exists, skip building", id);
            return Ok(db);
        }

        std::fs::create_dir_all(&self.db_dir)?;
        log::info!("Building index for {}", id);
        let output = std::process::Command::new(&self.bin)
            .arg("makedb")
            .arg("--in")
            .arg(path)
            .arg("-d")
            .arg(&db)
            .output()
            .map_err(|e| {
                SimError::Configuration(format!("failed to execute {}: {}", self.bin, e))
            })?;

        if !output.status.success() {
            return Err(SimError::Configuration(format!(
                "{} makedb failed for {}: {}",
                self.bin,
                id,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(db)
    }
}

/// Expands directories into the FASTA files they contain; plain files are
/// kept as given. The result is sorted and deduplicated.
pub fn collect_inputs(inputs: &[String]) -> Result<Vec<PathBuf>, SimError> {
    let mut files = vec![];
    for input in inputs {
        let path = PathBuf::from(input);
        if path.is_dir() {
            for entry in std::fs::read_dir(&path)? {
                let entry_path = entry?.path();
                if entry_path.is_file() && is_fasta_name(&entry_path) {
                    files.push(entry_path);
                }
            }
        } else if path.is_file() {
            files.push(path);
        } else {
            return Err(SimError::Configuration(format!(
                "input {} is neither a file nor a directory",
                input
            )));
        }
    }
    files.sort();
    files.dedup();

    Ok(files)
}

fn is_fasta_name(path: &Path) -> bool {
    let name = match path.file_name().and_then(|e| e.to_str()) {
        Some(name) => name.trim_end_matches(".gz"),
        None => return false,
    };
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => FASTA_EXTS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Derives an item id from a file name: the stem (without `.gz` and the last
/// extension), cut at the first `sep` when one is given.
///
/// ```
/// use spsim::libs::registry::derive_id;
/// use std::path::Path;
///
/// assert_eq!(derive_id(Path::new("dir/562.faa"), None).unwrap(), "562");
/// assert_eq!(
///     derive_id(Path::new("562_nonredundant.faa.gz"), Some('_')).unwrap(),
///     "562"
/// );
/// ```
pub fn derive_id(path: &Path, sep: Option<char>) -> Result<String, SimError> {
    let name = path
        .file_name()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            SimError::Configuration(format!("can't derive an id from {}", path.display()))
        })?;
    let name = name.strip_suffix(".gz").unwrap_or(name);
    let stem = match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    };
    let id = match sep {
        Some(c) => stem.split(c).next().unwrap_or(stem),
        None => stem,
    };

    if id.is_empty() {
        return Err(SimError::Configuration(format!(
            "empty id derived from {}",
            path.display()
        )));
    }
    // pair files are named <a>_vs_<b>, which must split back in one way only
    if id.contains("_vs_") || id.starts_with("vs_") || id.ends_with("_vs") {
        return Err(SimError::Configuration(format!(
            "id {} derived from {} would make pair file names ambiguous (\"_vs_\", \"vs_\" prefix or \"_vs\" suffix)",
            id,
            path.display()
        )));
    }

    Ok(id.to_string())
}

/// Counts the records of a FASTA file
pub fn count_records(path: &Path) -> Result<usize, SimError> {
    let reader = crate::reader(&path.to_string_lossy())?;
    let mut fa_in = noodles_fasta::io::Reader::new(reader);

    let mut count = 0;
    for result in fa_in.records() {
        result.map_err(|e| SimError::parse(&path.to_string_lossy(), count + 1, e))?;
        count += 1;
    }

    Ok(count)
}

/// Loads the registry: ids, record counts and indexes, ordered by id.
pub fn load(
    inputs: &[String],
    sep: Option<char>,
    indexer: &dyn Indexer,
) -> Result<Vec<Item>, SimError> {
    let files = collect_inputs(inputs)?;

    let mut path_of: BTreeMap<String, PathBuf> = BTreeMap::new();
    for file in files {
        let id = derive_id(&file, sep)?;
        if let Some(prev) = path_of.get(&id) {
            return Err(SimError::Configuration(format!(
                "duplicate id {} from {} and {}",
                id,
                prev.display(),
                file.display()
            )));
        }
        path_of.insert(id, file);
    }

    if path_of.len() < 2 {
        return Err(SimError::Configuration(format!(
            "at least 2 sequence sets are needed, found {}",
            path_of.len()
        )));
    }

    let entries: Vec<(String, PathBuf)> = path_of.into_iter().collect();
    let counts = entries
        .par_iter()
        .map(|(_, path)| count_records(path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut items = vec![];
    for ((id, path), count) in entries.into_iter().zip(counts) {
        let index = indexer.ensure(&id, &path)?;
        items.push(Item {
            id,
            path,
            count,
            index,
        });
    }
    log::info!("Registry loaded with {} items", items.len());

    Ok(items)
}

pub fn write_items(items: &[Item], writer: &mut dyn Write) -> std::io::Result<()> {
    writer.write_fmt(format_args!("#id\tpath\tcount\tindex\n"))?;
    for item in items {
        writer.write_fmt(format_args!(
            "{}\t{}\t{}\t{}\n",
            item.id,
            item.path.display(),
            item.count,
            item.index.display()
        ))?;
    }

    Ok(())
}

pub fn read_items(input: &str) -> Result<Vec<Item>, SimError> {
    let mut items = vec![];
    for (line, fields) in crate::read_tsv(input)? {
        if fields.len() < 4 {
            return Err(SimError::parse(input, line, "expected 4 fields"));
        }
        let count = fields[2]
            .parse::<usize>()
            .map_err(|e| SimError::parse(input, line, e))?;
        items.push(Item {
            id: fields[0].clone(),
            path: PathBuf::from(&fields[1]),
            count,
            index: PathBuf::from(&fields[3]),
        });
    }

    Ok(items)
}
