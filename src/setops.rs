//! Set algebra over record-id collections: the final composition step a
//! query can apply once independent field lookups have each produced a
//! candidate set. The document layer's own query resolution folds
//! intersections incrementally field-by-field; these free functions are the
//! general form, useful for composing ID sets gathered any other way (e.g.
//! unioning results from more than one query).

use std::collections::HashSet;
use std::hash::Hash;

use itertools::Itertools;

/// An element belongs to the result iff it appears in every set in `sets`.
pub fn intersections<T: Eq + Hash + Clone>(sets: &[HashSet<T>]) -> HashSet<T> {
    match sets.split_first() {
        None => HashSet::new(),
        Some((first, rest)) => {
            let mut acc = first.clone();
            for s in rest {
                acc = acc.intersection(s).cloned().collect();
            }
            acc
        }
    }
}

/// Order-preserving deduplication across one or more iterables.
pub fn union<T, I>(iters: impl IntoIterator<Item = I>) -> Vec<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    iters.into_iter().flatten().unique().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn intersections_of_empty_input_is_empty() {
        let result: HashSet<String> = intersections(&[]);
        assert!(result.is_empty());
    }

    #[test]
    fn intersections_requires_membership_in_every_set() {
        let a = set(&["1", "2", "3"]);
        let b = set(&["2", "3", "4"]);
        let c = set(&["2", "3", "5"]);
        let result = intersections(&[a, b, c]);
        assert_eq!(result, set(&["2", "3"]));
    }

    #[test]
    fn union_dedups_preserving_first_occurrence_order() {
        let a = vec!["1".to_string(), "2".to_string()];
        let b = vec!["2".to_string(), "3".to_string()];
        let result = union(vec![a, b]);
        assert_eq!(result, vec!["1", "2", "3"]);
    }
}
