use statefuzz_core::{symbol::AbstractInput, word::OutputWord, Show};
use tracing::{debug, warn};

use super::MembershipOracle;
use crate::{log::NonDeterminismLog, OracleError};

/// Executes every query `runs` times and only answers if all runs agree.
pub struct RepeatedRunOracle<O> {
    inner: O,
    runs: usize,
    log: Option<NonDeterminismLog>,
}

impl<O: MembershipOracle> RepeatedRunOracle<O> {
    pub fn new(inner: O, runs: usize) -> Self {
        debug_assert!(runs > 0);
        Self {
            inner,
            runs: runs.max(1),
            log: None,
        }
    }

    pub fn with_log(mut self, log: NonDeterminismLog) -> Self {
        self.log = Some(log);
        self
    }
}

impl<O: MembershipOracle> MembershipOracle for RepeatedRunOracle<O> {
    fn answer_query(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError> {
        let first = self.inner.answer_query(input)?;
        for run in 1..self.runs {
            let next = self.inner.answer_query(input)?;
            if next != first {
                warn!(
                    "run {} of {} answered {} with {} instead of {}",
                    run + 1,
                    self.runs,
                    input.show(),
                    next.show(),
                    first.show()
                );
                if let Some(log) = self.log.as_ref() {
                    log.disagreement(input, &first, &next);
                }
                return Err(OracleError::NonDeterminism {
                    input: input.to_vec(),
                    expected: first,
                    observed: next,
                });
            }
        }
        debug!("{} runs agree on {}", self.runs, input.show());
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use statefuzz_core::symbol::AbstractOutput;

    use super::*;
    use crate::oracle::FnOracle;

    #[test]
    fn agreeing_runs() {
        let mut oracle = RepeatedRunOracle::new(
            FnOracle::new(|w: &[AbstractInput]| vec![AbstractOutput::new("x"); w.len()]),
            3,
        );
        let word = [AbstractInput::new("A")];
        assert_eq!(oracle.answer_query(&word).unwrap(), vec![AbstractOutput::new("x")]);
        assert_eq!(oracle.inner.queries(), 3);
    }
}
