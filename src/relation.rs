//! Small combinator helpers over in-memory tuple sequences, used by
//! operator construction and tests.
//!
//! Adapted from the teacher's `db/relational_operators.rs`, which
//! defines `project`/`select`/`union_all` as `IntoIterator` combinators
//! over `ProductValue`. Here they operate over [`Tuple`] and are
//! internal helpers rather than additional physical operators — the
//! Volcano pipeline in [`crate::operator`] is the actual execution path.

use crate::tuple::Tuple;
use std::collections::HashSet;

pub trait Relation: IntoIterator<Item = Tuple> {
    fn project(self, cols: Vec<usize>) -> Project<Self::IntoIter>
    where
        Self: Sized,
    {
        Project {
            source: self.into_iter(),
            cols,
        }
    }

    fn select<F>(self, filter: F) -> Select<Self, F>
    where
        Self: Sized,
        F: Fn(&Tuple) -> bool,
    {
        Select { source: self, filter }
    }

    fn union_all<O: Relation>(self, other: O) -> UnionAll<Self, O>
    where
        Self: Sized,
    {
        UnionAll { s: self, u: other }
    }
}

impl<T> Relation for T where T: IntoIterator<Item = Tuple> {}

pub struct Project<S: Iterator<Item = Tuple>> {
    source: S,
    cols: Vec<usize>,
}

impl<S: Iterator<Item = Tuple>> Iterator for Project<S> {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        self.source.next().map(|row| {
            let values = self.cols.iter().map(|&i| row.values[i].clone()).collect();
            Tuple { values }
        })
    }
}

pub struct Select<S, F> {
    source: S,
    filter: F,
}

impl<S, F> IntoIterator for Select<S, F>
where
    S: Relation,
    F: Fn(&Tuple) -> bool,
{
    type Item = Tuple;
    type IntoIter = std::iter::Filter<S::IntoIter, F>;

    fn into_iter(self) -> Self::IntoIter {
        self.source.into_iter().filter(self.filter)
    }
}

pub struct UnionAll<S: Relation, U: Relation> {
    s: S,
    u: U,
}

impl<S: Relation, U: Relation> IntoIterator for UnionAll<S, U> {
    type Item = Tuple;
    type IntoIter = std::iter::Chain<S::IntoIter, U::IntoIter>;

    fn into_iter(self) -> Self::IntoIter {
        itertools::chain(self.s, self.u)
    }
}

/// Deduplicates a tuple sequence by canonical byte encoding of every
/// column, used by tests asserting multiset equality.
pub fn dedup_multiset_eq(a: &[Tuple], b: &[Tuple]) -> bool {
    fn counts(rows: &[Tuple]) -> std::collections::HashMap<Vec<u8>, usize> {
        let mut m = std::collections::HashMap::new();
        for t in rows {
            let key: Vec<u8> = t.values.iter().flat_map(|v| v.canonical_bytes()).collect();
            *m.entry(key).or_insert(0) += 1;
        }
        m
    }
    counts(a) == counts(b)
}

pub fn distinct_keys(rows: &[Tuple], cols: &[usize]) -> HashSet<Vec<u8>> {
    rows.iter().map(|t| t.canonical_key(cols)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn row(vals: impl IntoIterator<Item = i32>) -> Tuple {
        Tuple::new(vals.into_iter().map(Value::I32))
    }

    #[test]
    fn project_keeps_only_the_requested_columns() {
        let rows = vec![row([1, 2, 3]), row([4, 5, 6])];
        let projected: Vec<Tuple> = rows.project(vec![2, 0]).collect();
        assert_eq!(projected, vec![row([3, 1]), row([6, 4])]);
    }

    #[test]
    fn select_keeps_rows_matching_the_predicate() {
        let rows = vec![row([1]), row([2]), row([3])];
        let kept: Vec<Tuple> = rows.select(|t| matches!(t.get(0), Some(Value::I32(v)) if *v > 1)).into_iter().collect();
        assert_eq!(kept, vec![row([2]), row([3])]);
    }

    #[test]
    fn union_all_concatenates_without_deduplicating() {
        let left = vec![row([1])];
        let right = vec![row([1]), row([2])];
        let combined: Vec<Tuple> = left.union_all(right).into_iter().collect();
        assert_eq!(combined, vec![row([1]), row([1]), row([2])]);
    }

    #[test]
    fn dedup_multiset_eq_ignores_order_but_not_multiplicity() {
        let a = vec![row([1]), row([1]), row([2])];
        let b = vec![row([2]), row([1]), row([1])];
        let c = vec![row([1]), row([2])];
        assert!(dedup_multiset_eq(&a, &b));
        assert!(!dedup_multiset_eq(&a, &c));
    }

    #[test]
    fn distinct_keys_collapses_duplicate_rows_on_the_given_columns() {
        let rows = vec![row([1, 9]), row([1, 0]), row([2, 9])];
        let keys = distinct_keys(&rows, &[0]);
        assert_eq!(keys.len(), 2);
    }
}
