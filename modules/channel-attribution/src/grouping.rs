//! Grouped folds over record sequences.
//!
//! Keys come back in ascending order and records within a group keep their
//! input order, so every stage built on these folds is deterministic.

use std::collections::BTreeMap;

/// Fold `items` into one accumulator per key.
pub fn fold_by_key<T, K, A, I, KF, F>(items: I, key: KF, mut fold: F) -> BTreeMap<K, A>
where
    I: IntoIterator<Item = T>,
    K: Ord,
    A: Default,
    KF: Fn(&T) -> K,
    F: FnMut(&mut A, T),
{
    let mut groups: BTreeMap<K, A> = BTreeMap::new();
    for item in items {
        fold(groups.entry(key(&item)).or_default(), item);
    }
    groups
}

/// Collect `items` into per-key vectors.
pub fn group_by_key<T, K, I, KF>(items: I, key: KF) -> BTreeMap<K, Vec<T>>
where
    I: IntoIterator<Item = T>,
    K: Ord,
    KF: Fn(&T) -> K,
{
    fold_by_key(items, key, |group: &mut Vec<T>, item| group.push(item))
}
