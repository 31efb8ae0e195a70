use statefuzz_core::{symbol::AbstractInput, word::OutputWord, Show};
use tracing::{debug, trace};

use super::MembershipOracle;
use crate::{tree::SharedTree, OracleError};

/// Answers queries from the observation tree where possible and stores every answer it had to
/// obtain from the inner oracle. A lookup-only instance never stores.
///
/// Once a stored path ends in a terminating output, the answer to every extension of the path
/// is known: the tree's continuation of that output repeats until the end of the query.
pub struct CachingOracle<O> {
    inner: O,
    tree: SharedTree,
    lookup_only: bool,
}

impl<O: MembershipOracle> CachingOracle<O> {
    pub fn new(inner: O, tree: SharedTree) -> Self {
        Self {
            inner,
            tree,
            lookup_only: false,
        }
    }

    pub fn lookup_only(inner: O, tree: SharedTree) -> Self {
        Self {
            inner,
            tree,
            lookup_only: true,
        }
    }

    pub fn tree(&self) -> &SharedTree {
        &self.tree
    }

    fn cached(&self, input: &[AbstractInput]) -> Option<OutputWord> {
        let tree = self.tree.borrow();
        let mut cached = tree.lookup(input)?;
        if cached.len() < input.len() {
            let last = cached.last().filter(|o| tree.is_terminating(o))?;
            let padding = tree.continuation(last);
            cached.resize(input.len(), padding);
        }
        Some(cached)
    }
}

impl<O: MembershipOracle> MembershipOracle for CachingOracle<O> {
    fn answer_query(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError> {
        if let Some(cached) = self.cached(input) {
            trace!("cache hit for {}", input.show());
            return Ok(cached);
        }
        let answer = self.inner.answer_query(input)?;
        if !self.inner.last_answer_observed() {
            debug!("not storing substituted answer to {}", input.show());
        } else if !self.lookup_only {
            self.tree.borrow_mut().insert(input, &answer)?;
        }
        Ok(answer)
    }

    fn last_answer_observed(&self) -> bool {
        self.inner.last_answer_observed()
    }
}

#[cfg(test)]
mod tests {
    use statefuzz_core::symbol::AbstractOutput;

    use super::*;
    use crate::{oracle::FnOracle, tree::ObservationTree};

    fn word(names: &str) -> Vec<AbstractInput> {
        names.split_whitespace().map(AbstractInput::new).collect()
    }

    #[test]
    fn answers_are_stored_once() {
        let tree = ObservationTree::default().shared();
        let mut oracle = CachingOracle::new(
            FnOracle::new(|w: &[AbstractInput]| vec![AbstractOutput::new("x"); w.len()]),
            tree.clone(),
        );
        oracle.answer_query(&word("A B")).unwrap();
        oracle.answer_query(&word("A B")).unwrap();
        oracle.answer_query(&word("A")).unwrap();
        assert_eq!(oracle.inner.queries(), 1);
        assert_eq!(tree.borrow().size(), 2);
    }

    #[test]
    fn lookup_only_does_not_store() {
        let tree = ObservationTree::default().shared();
        let mut oracle = CachingOracle::lookup_only(
            FnOracle::new(|w: &[AbstractInput]| vec![AbstractOutput::new("x"); w.len()]),
            tree.clone(),
        );
        oracle.answer_query(&word("A")).unwrap();
        oracle.answer_query(&word("A")).unwrap();
        assert_eq!(oracle.inner.queries(), 2);
        assert_eq!(tree.borrow().size(), 0);
    }

    #[test]
    fn extensions_of_a_dead_path_answer_the_sink() {
        let closed = AbstractOutput::socket_closed();
        let tree = ObservationTree::new([closed.clone()])
            .with_sink(AbstractOutput::timeout())
            .shared();
        tree.borrow_mut()
            .insert(&word("A B"), &[AbstractOutput::new("x"), closed.clone()])
            .unwrap();
        let mut oracle = CachingOracle::lookup_only(
            FnOracle::new(|w: &[AbstractInput]| vec![AbstractOutput::new("y"); w.len()]),
            tree,
        );
        let answer = oracle.answer_query(&word("A B C D")).unwrap();
        assert_eq!(
            answer,
            vec![
                AbstractOutput::new("x"),
                closed,
                AbstractOutput::timeout(),
                AbstractOutput::timeout()
            ]
        );
        assert_eq!(oracle.inner.queries(), 0);
    }

    #[test]
    fn conflicting_answer_is_an_inconsistency() {
        let tree = ObservationTree::default().shared();
        tree.borrow_mut()
            .insert(&word("A"), &[AbstractOutput::new("x")])
            .unwrap();
        let mut oracle = CachingOracle::new(
            FnOracle::new(|w: &[AbstractInput]| vec![AbstractOutput::new("y"); w.len()]),
            tree,
        );
        let err = oracle.answer_query(&word("A B")).unwrap_err();
        assert!(matches!(err, OracleError::CacheInconsistency(_)));
        assert!(err.is_non_determinism());
    }
}
