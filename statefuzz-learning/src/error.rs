use statefuzz::sul::SulError;
use statefuzz_core::{
    word::{InputWord, OutputWord},
    Show,
};
use thiserror::Error;

use crate::tree::Conflict;

#[derive(Debug, Error)]
pub enum OracleError {
    /// The SUL answered the same query in different ways.
    #[error("non-deterministic answer to {}: {} and {}", input.show(), expected.show(), observed.show())]
    NonDeterminism {
        input: InputWord,
        expected: OutputWord,
        observed: OutputWord,
    },
    #[error("cache inconsistency: {0}")]
    CacheInconsistency(#[from] Conflict),
    #[error(transparent)]
    Sul(#[from] SulError),
}

impl OracleError {
    pub fn is_limit(&self) -> bool {
        matches!(self, OracleError::Sul(e) if e.is_limit())
    }

    pub fn is_non_determinism(&self) -> bool {
        matches!(
            self,
            OracleError::NonDeterminism { .. } | OracleError::CacheInconsistency(_)
        )
    }
}
