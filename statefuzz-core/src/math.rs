/// Type alias for sets, we use this to hide which kind of set we are actually using.
/// Iteration follows insertion order, which keeps logs and reports stable across runs.
pub type Set<S> = indexmap::IndexSet<S>;
/// Type alias for maps, we use this to hide which kind of map we are actually using.
pub type Map<K, V> = indexmap::IndexMap<K, V>;

/// Counts how often each distinct item occurs in `iter`, keeping the order in which
/// items were first seen.
pub fn tally<T, I>(iter: I) -> Map<T, usize>
where
    T: std::hash::Hash + Eq,
    I: IntoIterator<Item = T>,
{
    let mut counts = Map::default();
    for item in iter {
        *counts.entry(item).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    #[test]
    fn tally_keeps_first_seen_order() {
        let counts = super::tally(["b", "a", "b", "c", "b"]);
        assert_eq!(
            counts.into_iter().collect::<Vec<_>>(),
            vec![("b", 3), ("a", 1), ("c", 1)]
        );
    }
}
