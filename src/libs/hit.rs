use crate::libs::error::SimError;
use indexmap::IndexMap;
use std::io::BufRead;

/// One tabular hit. Only the first three columns are mandatory; the others
/// come from the standard 12-column BLAST/DIAMOND layout
///
/// qseqid sseqid pident length mismatch gapopen qstart qend sstart send evalue bitscore
#[derive(Debug, Clone, PartialEq)]
pub struct HitRecord {
    pub query: String,
    pub target: String,
    pub identity: f64,
    pub length: Option<u32>,
    pub evalue: Option<f64>,
    pub bitscore: Option<f64>,
}

impl HitRecord {
    pub fn new(query: &str, target: &str, identity: f64) -> Self {
        HitRecord {
            query: query.to_string(),
            target: target.to_string(),
            identity,
            length: None,
            evalue: None,
            bitscore: None,
        }
    }

    fn parse(line: &str, source: &str, line_no: usize) -> Result<Self, SimError> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(SimError::parse(
                source,
                line_no,
                format!("expected at least 3 columns, got {}", fields.len()),
            ));
        }

        let number = |s: &str| -> Result<f64, SimError> {
            let value = s
                .trim()
                .parse::<f64>()
                .map_err(|e| SimError::parse(source, line_no, format!("{}: {:?}", e, s)))?;
            if value.is_nan() {
                return Err(SimError::parse(source, line_no, format!("not a number: {:?}", s)));
            }
            Ok(value)
        };

        let identity = number(fields[2])?;
        if !(0.0..=100.0).contains(&identity) {
            return Err(SimError::parse(
                source,
                line_no,
                format!("identity {:?} is outside [0, 100]", fields[2]),
            ));
        }

        let mut hit = HitRecord::new(fields[0], fields[1], identity);
        if fields.len() >= 12 {
            hit.length = Some(number(fields[3])? as u32);
            hit.evalue = Some(number(fields[10])?);
            hit.bitscore = Some(number(fields[11])?);
        }

        Ok(hit)
    }
}

/// Lazily parses tabular hits, skipping blank lines and `#` header lines
pub struct HitReader<R: BufRead> {
    reader: R,
    source: String,
    line_no: usize,
    buf: String,
}

impl<R: BufRead> HitReader<R> {
    pub fn new(reader: R, source: &str) -> Self {
        HitReader {
            reader,
            source: source.to_string(),
            line_no: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> Iterator for HitReader<R> {
    type Item = Result<HitRecord, SimError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_no += 1;
                    let line = self.buf.trim_end_matches(&['\n', '\r'][..]);
                    if line.trim().is_empty() || line.starts_with('#') {
                        continue;
                    }
                    return Some(HitRecord::parse(line, &self.source, self.line_no));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Optional thresholds applied to raw hits before the best hit is chosen
#[derive(Debug, Clone, Copy, Default)]
pub struct HitFilter {
    pub max_evalue: Option<f64>,
    pub min_length: Option<u32>,
}

impl HitFilter {
    pub fn accepts(&self, hit: &HitRecord) -> bool {
        if let (Some(max), Some(evalue)) = (self.max_evalue, hit.evalue) {
            if evalue > max {
                return false;
            }
        }
        if let (Some(min), Some(length)) = (self.min_length, hit.length) {
            if length < min {
                return false;
            }
        }
        true
    }

    /// Name of a column the filter needs but the hit does not carry
    fn missing_column(&self, hit: &HitRecord) -> Option<&'static str> {
        if self.max_evalue.is_some() && hit.evalue.is_none() {
            Some("e-value")
        } else if self.min_length.is_some() && hit.length.is_none() {
            Some("alignment length")
        } else {
            None
        }
    }
}

/// Keeps one hit per query: the highest bitscore, the first one on ties.
/// Queries stay in order of first appearance.
pub fn best_hits<I>(hits: I, filter: &HitFilter) -> Result<Vec<HitRecord>, SimError>
where
    I: IntoIterator<Item = Result<HitRecord, SimError>>,
{
    let mut best_of: IndexMap<String, HitRecord> = IndexMap::new();
    for hit in hits {
        let hit = hit?;
        if let Some(column) = filter.missing_column(&hit) {
            return Err(SimError::Configuration(format!(
                "hit {} -> {} has no {} column to filter on, 12-column tables are needed",
                hit.query, hit.target, column
            )));
        }
        if !filter.accepts(&hit) {
            continue;
        }
        match best_of.get_mut(&hit.query) {
            Some(prev) => {
                if hit.bitscore.unwrap_or(f64::MIN) > prev.bitscore.unwrap_or(f64::MIN) {
                    *prev = hit;
                }
            }
            None => {
                best_of.insert(hit.query.clone(), hit);
            }
        }
    }

    Ok(best_of.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTFMT6: &str = "\
# DIAMOND v2.1.8.162 | https://github.com/bbuchfink/diamond
# Fields: Query ID, Subject ID, Percentage of identical matches, ...
q1\ts1\t80.5\t300\t10\t1\t1\t300\t1\t300\t1e-50\t200.0
q1\ts2\t95.0\t100\t1\t0\t1\t100\t1\t100\t1e-40\t150.0
q2\ts3\t60.0\t50\t20\t2\t1\t50\t1\t50\t0.5\t30.0

q3\ts1\t70.0\t250\t30\t2\t1\t250\t1\t250\t1e-30\t120.0
";

    #[test]
    fn test_read_hits() {
        let hits: Vec<HitRecord> = HitReader::new(OUTFMT6.as_bytes(), "test")
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].query, "q1");
        assert_eq!(hits[0].target, "s1");
        assert_eq!(hits[0].identity, 80.5);
        assert_eq!(hits[0].length, Some(300));
        assert_eq!(hits[2].evalue, Some(0.5));
        assert_eq!(hits[3].bitscore, Some(120.0));
    }

    #[test]
    fn test_read_three_columns() {
        let hits: Vec<HitRecord> = HitReader::new("a\tb\t42\n".as_bytes(), "test")
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(hits, vec![HitRecord::new("a", "b", 42.0)]);
    }

    #[test]
    fn test_read_malformed() {
        let mut reader = HitReader::new("a\tb\n".as_bytes(), "bad.tsv");
        let err = reader.next().unwrap().unwrap_err();
        assert_eq!(
            err.to_string(),
            "parse error in bad.tsv, line 1: expected at least 3 columns, got 2"
        );

        let mut reader = HitReader::new("#c\na\tb\tx\n".as_bytes(), "bad.tsv");
        let err = reader.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_read_bad_identity() {
        let input = "a1\tb1\tnan\na2\tb1\t250\na3\tb1\t-1\n";
        let mut reader = HitReader::new(input.as_bytes(), "bad.tsv");

        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, SimError::Parse { line: 1, .. }));
        assert!(err.to_string().contains("not a number"));

        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, SimError::Parse { line: 2, .. }));
        assert!(err.to_string().contains("outside [0, 100]"));

        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, SimError::Parse { line: 3, .. }));

        // a poisoned table never reaches the best hits
        let reader = HitReader::new("a1\tb1\t90\na2\tb1\tnan\n".as_bytes(), "bad.tsv");
        assert!(best_hits(reader, &HitFilter::default()).is_err());
    }

    #[test]
    fn test_filter_needs_columns() {
        let filter = HitFilter {
            max_evalue: Some(1e-5),
            min_length: None,
        };
        let reader = HitReader::new("a1\tb1\t90\n".as_bytes(), "short.tsv");
        let err = best_hits(reader, &filter).unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
        assert!(err.to_string().contains("no e-value column"));

        let filter = HitFilter {
            max_evalue: None,
            min_length: Some(50),
        };
        let reader = HitReader::new("a1\tb1\t90\n".as_bytes(), "short.tsv");
        let err = best_hits(reader, &filter).unwrap_err();
        assert!(err.to_string().contains("no alignment length column"));

        // without a filter three columns are fine
        let reader = HitReader::new("a1\tb1\t90\n".as_bytes(), "short.tsv");
        assert_eq!(best_hits(reader, &HitFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_best_hits() {
        let reader = HitReader::new(OUTFMT6.as_bytes(), "test");
        let best = best_hits(reader, &HitFilter::default()).unwrap();

        let picked: Vec<_> = best
            .iter()
            .map(|e| (e.query.as_str(), e.target.as_str()))
            .collect();
        // q1 keeps the higher bitscore, not the higher identity
        assert_eq!(picked, vec![("q1", "s1"), ("q2", "s3"), ("q3", "s1")]);
    }

    #[test]
    fn test_best_hits_filtered() {
        let filter = HitFilter {
            max_evalue: Some(1e-10),
            min_length: Some(260),
        };
        let reader = HitReader::new(OUTFMT6.as_bytes(), "test");
        let best = best_hits(reader, &filter).unwrap();

        assert_eq!(best.len(), 1);
        assert_eq!(best[0].query, "q1");
        assert_eq!(best[0].target, "s1");
    }
}
