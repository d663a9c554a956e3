use crate::libs::error::SimError;
use crate::libs::pair::Pair;
use std::collections::BTreeMap;
use std::io::Write;

pub const CHUNK_HEADER: &str = "#chunk\tspeciesA\tspeciesB";

/// A contiguous slice of the pair sequence, the unit of distribution
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: usize,
    pub pairs: Vec<Pair>,
}

/// Cuts `pairs` into chunks of `size` pairs; the last one may be shorter.
/// Ids start at 0 and follow generation order.
pub fn partition(pairs: &[Pair], size: usize) -> Result<Vec<Chunk>, SimError> {
    if size == 0 {
        return Err(SimError::Configuration(
            "chunk size must be positive".to_string(),
        ));
    }

    Ok(pairs
        .chunks(size)
        .enumerate()
        .map(|(id, e)| Chunk {
            id,
            pairs: e.to_vec(),
        })
        .collect())
}

/// Cuts `pairs` into at most `count` chunks of equal size (rounded up)
pub fn partition_into(pairs: &[Pair], count: usize) -> Result<Vec<Chunk>, SimError> {
    if count == 0 {
        return Err(SimError::Configuration(
            "chunk count must be positive".to_string(),
        ));
    }
    let size = pairs.len().div_ceil(count).max(1);
    partition(pairs, size)
}

/// Writes the static work list, one line per pair
pub fn write_chunks(chunks: &[Chunk], writer: &mut dyn Write) -> std::io::Result<()> {
    writer.write_fmt(format_args!("{}\n", CHUNK_HEADER))?;
    for chunk in chunks {
        for pair in &chunk.pairs {
            writer.write_fmt(format_args!("{}\t{}\n", chunk.id, pair))?;
        }
    }

    Ok(())
}

pub fn read_chunks(input: &str) -> Result<Vec<Chunk>, SimError> {
    let mut pairs_of: BTreeMap<usize, Vec<Pair>> = BTreeMap::new();
    for (line, fields) in crate::read_tsv(input)? {
        if fields.len() < 3 {
            return Err(SimError::parse(input, line, "expected 3 fields"));
        }
        let id = fields[0]
            .parse::<usize>()
            .map_err(|e| SimError::parse(input, line, e))?;
        pairs_of
            .entry(id)
            .or_default()
            .push(Pair::new(&fields[1], &fields[2]));
    }

    Ok(pairs_of
        .into_iter()
        .map(|(id, pairs)| Chunk { id, pairs })
        .collect())
}
