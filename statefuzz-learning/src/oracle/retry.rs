use statefuzz_core::{symbol::AbstractInput, word::OutputWord, Show};
use tracing::{info, warn};

use super::MembershipOracle;
use crate::{log::NonDeterminismLog, tree::SharedTree, OracleError};

/// Checks fresh answers against the observation tree and re-executes queries whose answer
/// contradicts it, up to `retries` times. A contradiction that persists is reported as
/// non-determinism.
pub struct NonDeterminismRetryOracle<O> {
    inner: O,
    tree: SharedTree,
    retries: usize,
    log: Option<NonDeterminismLog>,
}

impl<O: MembershipOracle> NonDeterminismRetryOracle<O> {
    pub fn new(inner: O, tree: SharedTree, retries: usize) -> Self {
        Self {
            inner,
            tree,
            retries,
            log: None,
        }
    }

    pub fn with_log(mut self, log: NonDeterminismLog) -> Self {
        self.log = Some(log);
        self
    }
}

impl<O: MembershipOracle> MembershipOracle for NonDeterminismRetryOracle<O> {
    fn answer_query(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError> {
        let mut answer = self.inner.answer_query(input)?;
        let mut attempt = 0;
        loop {
            let conflict = match self.tree.borrow().check(input, &answer) {
                Ok(()) => return Ok(answer),
                Err(conflict) => conflict,
            };
            if let Some(log) = self.log.as_ref() {
                log.disagreement(&conflict.input, &conflict.stored, &conflict.observed);
            }
            if attempt == self.retries {
                warn!("{conflict}, giving up after {attempt} retries");
                return Err(OracleError::NonDeterminism {
                    input: input.to_vec(),
                    expected: conflict.stored,
                    observed: answer,
                });
            }
            attempt += 1;
            info!(
                "{conflict}, retrying {} ({attempt} of {})",
                input.show(),
                self.retries
            );
            answer = self.inner.answer_query(input)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use statefuzz_core::symbol::AbstractOutput;

    use super::*;
    use crate::{oracle::FnOracle, tree::ObservationTree};

    fn word() -> Vec<AbstractInput> {
        vec![AbstractInput::new("A"), AbstractInput::new("B")]
    }

    fn out(names: [&str; 2]) -> OutputWord {
        names.into_iter().map(AbstractOutput::new).collect()
    }

    #[test_log::test]
    fn retry_until_consistent() {
        let tree = ObservationTree::default().shared();
        tree.borrow_mut().insert(&word(), &out(["x", "y"])).unwrap();

        let mut answers = vec![out(["x", "y"]), out(["x", "z"])];
        let mut oracle = NonDeterminismRetryOracle::new(
            FnOracle::new(move |_: &[AbstractInput]| answers.pop().unwrap()),
            tree,
            3,
        );
        assert_eq!(oracle.answer_query(&word()).unwrap(), out(["x", "y"]));
        assert_eq!(oracle.inner.queries(), 2);
    }

    #[test_log::test]
    fn persistent_disagreement() {
        let tree = ObservationTree::default().shared();
        tree.borrow_mut().insert(&word(), &out(["x", "y"])).unwrap();
        let mut oracle = NonDeterminismRetryOracle::new(
            FnOracle::new(|_: &[AbstractInput]| out(["x", "z"])),
            tree,
            2,
        );
        match oracle.answer_query(&word()) {
            Err(OracleError::NonDeterminism {
                input,
                expected,
                observed,
            }) => {
                assert_eq!(input, word());
                assert_eq!(expected, out(["x", "y"]));
                assert_eq!(observed, out(["x", "z"]));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(oracle.inner.queries(), 3);
    }
}
