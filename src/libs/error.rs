use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    /// Invalid or insufficient input, e.g. fewer than two items
    #[error("configuration error: {0}")]
    Configuration(String),

    /// One direction of one pair failed to align
    #[error("alignment failed for {query} -> {target}: {message}")]
    Adapter {
        query: String,
        target: String,
        message: String,
    },

    /// Assembly was asked for while expected chunk tables are missing
    #[error("incomplete results: missing chunk table(s) {}", join_ids(.missing))]
    IncompleteResults { missing: Vec<usize> },

    /// Informational: pairs without a recorded result after a forced assembly
    #[error("{} pair(s) have no recorded result", .gaps.len())]
    GapInMatrix { gaps: Vec<(String, String)> },

    #[error("parse error in {file}, line {line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    pub fn adapter(query: &str, target: &str, message: impl ToString) -> Self {
        SimError::Adapter {
            query: query.to_string(),
            target: target.to_string(),
            message: message.to_string(),
        }
    }

    pub fn parse(file: &str, line: usize, message: impl ToString) -> Self {
        SimError::Parse {
            file: file.to_string(),
            line,
            message: message.to_string(),
        }
    }
}

fn join_ids(ids: &[usize]) -> String {
    ids.iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = SimError::IncompleteResults {
            missing: vec![1, 3],
        };
        assert_eq!(
            err.to_string(),
            "incomplete results: missing chunk table(s) 1, 3"
        );

        let err = SimError::adapter("A", "B", "exit code 1");
        assert_eq!(err.to_string(), "alignment failed for A -> B: exit code 1");

        let err = SimError::GapInMatrix {
            gaps: vec![("A".to_string(), "C".to_string())],
        };
        assert_eq!(err.to_string(), "1 pair(s) have no recorded result");
    }
}
