use crate::libs::registry::Item;
use itertools::Itertools;
use std::fmt;

/// An unordered pair of two distinct items; `a` precedes `b` in registry order
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pair {
    pub a: String,
    pub b: String,
}

impl Pair {
    pub fn new(a: &str, b: &str) -> Self {
        Pair {
            a: a.to_string(),
            b: b.to_string(),
        }
    }

    /// Base name of files keyed by this pair
    pub fn key(&self) -> String {
        format!("{}_vs_{}", self.a, self.b)
    }

    /// Same pair with the ids in lexical order, for lookups that must not
    /// depend on direction
    pub fn canonical(&self) -> Self {
        if self.a <= self.b {
            self.clone()
        } else {
            Pair::new(&self.b, &self.a)
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.a, self.b)
    }
}

/// Emits `(items[i], items[j])` for all `i < j`, in that order.
///
/// ```
/// use spsim::libs::pair::{generate, Pair};
/// use spsim::libs::registry::Item;
///
/// let items: Vec<Item> = ["A", "B", "C"]
///     .iter()
///     .map(|id| Item {
///         id: id.to_string(),
///         path: Default::default(),
///         count: 0,
///         index: Default::default(),
///     })
///     .collect();
/// let pairs = generate(&items);
/// assert_eq!(
///     pairs,
///     vec![Pair::new("A", "B"), Pair::new("A", "C"), Pair::new("B", "C")]
/// );
/// ```
pub fn generate(items: &[Item]) -> Vec<Pair> {
    items
        .iter()
        .tuple_combinations()
        .map(|(a, b)| Pair::new(&a.id, &b.id))
        .collect()
}
