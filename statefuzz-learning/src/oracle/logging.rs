use statefuzz_core::{symbol::AbstractInput, word::OutputWord, Show};

use super::MembershipOracle;
use crate::{log::QueryLog, OracleError};

/// Writes every query and its answer to a log, one line each.
pub struct LoggingOracle<O> {
    inner: O,
    log: QueryLog,
}

impl<O: MembershipOracle> LoggingOracle<O> {
    pub fn new(inner: O, log: QueryLog) -> Self {
        Self { inner, log }
    }
}

impl<O: MembershipOracle> MembershipOracle for LoggingOracle<O> {
    fn answer_query(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError> {
        match self.inner.answer_query(input) {
            Ok(output) => {
                self.log
                    .line(format!("{} / {}", input.show(), output.show()));
                Ok(output)
            }
            Err(e) => {
                self.log.line(format!("{} failed: {e}", input.show()));
                Err(e)
            }
        }
    }

    fn last_answer_observed(&self) -> bool {
        self.inner.last_answer_observed()
    }
}
