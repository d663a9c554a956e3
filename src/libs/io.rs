use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Opens `input` for buffered reading. `stdin` reads the standard input and
/// files ending in `.gz` are decompressed on the fly.
///
/// ```
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("list.txt");
/// std::fs::write(&path, "A\nB\nC\n").unwrap();
///
/// use std::io::BufRead;
/// let reader = spsim::reader(path.to_str().unwrap()).unwrap();
/// assert_eq!(reader.lines().count(), 3);
/// ```
pub fn reader(input: &str) -> std::io::Result<Box<dyn BufRead>> {
    let reader: Box<dyn BufRead> = if input == "stdin" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let path = Path::new(input);
        let file = std::fs::File::open(path).map_err(|e| {
            std::io::Error::new(e.kind(), format!("could not open {}: {}", path.display(), e))
        })?;

        if path.extension() == Some(std::ffi::OsStr::new("gz")) {
            Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        }
    };

    Ok(reader)
}

pub fn writer(output: &str) -> std::io::Result<Box<dyn Write>> {
    let writer: Box<dyn Write> = if output == "stdout" {
        Box::new(BufWriter::new(std::io::stdout()))
    } else {
        Box::new(BufWriter::new(std::fs::File::create(output)?))
    };

    Ok(writer)
}

/// Writes `content` to a scratch file inside `scratch_dir` and renames it onto
/// `path`. Readers of `path` see either the old file or the complete new one.
///
/// `scratch_dir` must live on the same filesystem as `path`.
pub fn publish<P: AsRef<Path>, Q: AsRef<Path>>(
    path: P,
    scratch_dir: Q,
    content: &[u8],
) -> std::io::Result<()> {
    std::fs::create_dir_all(scratch_dir.as_ref())?;
    let mut tmp = tempfile::NamedTempFile::new_in(scratch_dir.as_ref())?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path.as_ref()).map_err(|e| e.error)?;

    Ok(())
}

/// Reads a tab-separated file, skipping blank lines and `#` comments.
/// Returns `(line_number, fields)` pairs, line numbers are 1-based.
pub fn read_tsv(input: &str) -> std::io::Result<Vec<(usize, Vec<String>)>> {
    let reader = reader(input)?;
    let mut rows = vec![];

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = line.split('\t').map(|e| e.to_string()).collect();
        rows.push((i + 1, fields));
    }

    Ok(rows)
}
