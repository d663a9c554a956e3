use crate::libs::error::SimError;
use crate::libs::hit::HitRecord;
use crate::libs::pair::Pair;

pub const RESULT_HEADER: &str = "#speciesA\tspeciesB\tcountA\tcountB\tavgAtoB\tavgBtoA\tfinalAvg";

/// Mean identity of one directed comparison
#[derive(Debug, Clone, PartialEq)]
pub struct DirectedScore {
    pub from: String,
    pub to: String,
    pub mean_identity: f64,
    pub hit_count: usize,
}

impl DirectedScore {
    /// Streams over `hits` once. No hits gives a mean of 0.
    pub fn from_hits<I>(from: &str, to: &str, hits: I) -> Self
    where
        I: IntoIterator<Item = HitRecord>,
    {
        let (sum, n) = hits
            .into_iter()
            .fold((0.0f64, 0usize), |(sum, n), hit| (sum + hit.identity, n + 1));

        DirectedScore {
            from: from.to_string(),
            to: to.to_string(),
            mean_identity: if n == 0 { 0.0 } else { sum / n as f64 },
            hit_count: n,
        }
    }
}

/// One row of a chunk result table
#[derive(Debug, Clone, PartialEq)]
pub struct PairResult {
    pub a: String,
    pub b: String,
    pub count_a: usize,
    pub count_b: usize,
    pub avg_a_to_b: f64,
    pub avg_b_to_a: f64,
    pub final_avg: f64,
}

impl PairResult {
    pub fn pair(&self) -> Pair {
        Pair::new(&self.a, &self.b)
    }

    pub fn to_row(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{:.4}\t{:.4}\t{:.4}\n",
            self.a,
            self.b,
            self.count_a,
            self.count_b,
            self.avg_a_to_b,
            self.avg_b_to_a,
            self.final_avg
        )
    }

    pub fn from_fields(fields: &[String], source: &str, line: usize) -> Result<Self, SimError> {
        if fields.len() < 7 {
            return Err(SimError::parse(
                source,
                line,
                format!("expected 7 fields, got {}", fields.len()),
            ));
        }
        let int = |s: &str| s.parse::<usize>().map_err(|e| SimError::parse(source, line, e));
        let float = |s: &str| s.parse::<f64>().map_err(|e| SimError::parse(source, line, e));

        Ok(PairResult {
            a: fields[0].clone(),
            b: fields[1].clone(),
            count_a: int(&fields[2])?,
            count_b: int(&fields[3])?,
            avg_a_to_b: float(&fields[4])?,
            avg_b_to_a: float(&fields[5])?,
            final_avg: float(&fields[6])?,
        })
    }
}

/// Reduces both directions of `pair` to one score, the plain mean of the two
/// directed means. An empty direction counts as 0.
pub fn reduce<I, J>(pair: &Pair, hits_ab: I, hits_ba: J, count_a: usize, count_b: usize) -> PairResult
where
    I: IntoIterator<Item = HitRecord>,
    J: IntoIterator<Item = HitRecord>,
{
    let ab = DirectedScore::from_hits(&pair.a, &pair.b, hits_ab);
    let ba = DirectedScore::from_hits(&pair.b, &pair.a, hits_ba);
    from_scores(&ab, &ba, count_a, count_b)
}

pub fn from_scores(
    ab: &DirectedScore,
    ba: &DirectedScore,
    count_a: usize,
    count_b: usize,
) -> PairResult {
    PairResult {
        a: ab.from.clone(),
        b: ab.to.clone(),
        count_a,
        count_b,
        avg_a_to_b: ab.mean_identity,
        avg_b_to_a: ba.mean_identity,
        final_avg: (ab.mean_identity + ba.mean_identity) / 2.0,
    }
}
