use std::{cell::RefCell, rc::Rc};

use statefuzz::sul::Sul;
use statefuzz_core::{symbol::AbstractInput, word::OutputWord, Show};
use tracing::trace;

use crate::OracleError;

mod caching;
pub use caching::CachingOracle;

mod logging;
pub use logging::LoggingOracle;

mod repeated;
pub use repeated::RepeatedRunOracle;

mod retry;
pub use retry::NonDeterminismRetryOracle;

/// Answers membership queries: for a word of inputs, the outputs the system produces when the
/// inputs are executed one after the other from the initial state.
pub trait MembershipOracle {
    fn answer_query(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError>;

    /// False if the last answer was substituted instead of observed on the system. Such
    /// answers must not be stored.
    fn last_answer_observed(&self) -> bool {
        true
    }
}

impl<O: MembershipOracle + ?Sized> MembershipOracle for Box<O> {
    fn answer_query(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError> {
        (**self).answer_query(input)
    }

    fn last_answer_observed(&self) -> bool {
        (**self).last_answer_observed()
    }
}

impl<O: MembershipOracle + ?Sized> MembershipOracle for &mut O {
    fn answer_query(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError> {
        (**self).answer_query(input)
    }

    fn last_answer_observed(&self) -> bool {
        (**self).last_answer_observed()
    }
}

/// Runs every query as one session of a SUL.
pub struct SulOracle<S> {
    sul: S,
}

impl<S: Sul> SulOracle<S> {
    pub fn new(sul: S) -> Self {
        Self { sul }
    }

    pub fn into_inner(self) -> S {
        self.sul
    }

    fn steps(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError> {
        self.sul.pre()?;
        let mut outputs = Vec::with_capacity(input.len());
        for symbol in input {
            outputs.push(self.sul.step(symbol)?);
        }
        Ok(outputs)
    }
}

impl<S: Sul> MembershipOracle for SulOracle<S> {
    fn answer_query(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError> {
        let result = self.steps(input);
        let post = self.sul.post();
        let outputs = result?;
        post?;
        trace!("{} / {}", input.show(), outputs.show());
        Ok(outputs)
    }
}

/// A handle through which several oracle chains use the same oracle.
pub struct SharedOracle<O: ?Sized> {
    inner: Rc<RefCell<O>>,
}

impl<O: ?Sized> Clone for SharedOracle<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<O> SharedOracle<O> {
    pub fn new(oracle: O) -> Self {
        Self {
            inner: Rc::new(RefCell::new(oracle)),
        }
    }
}

impl<O: MembershipOracle + ?Sized> MembershipOracle for SharedOracle<O> {
    fn answer_query(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError> {
        self.inner.borrow_mut().answer_query(input)
    }

    fn last_answer_observed(&self) -> bool {
        self.inner.borrow().last_answer_observed()
    }
}

/// Answers queries with a closure, mostly useful as a stand-in for a SUL in tests.
pub struct FnOracle<F> {
    answer: F,
    queries: usize,
}

impl<F> FnOracle<F>
where
    F: FnMut(&[AbstractInput]) -> OutputWord,
{
    pub fn new(answer: F) -> Self {
        Self { answer, queries: 0 }
    }

    /// Number of queries answered so far.
    pub fn queries(&self) -> usize {
        self.queries
    }
}

impl<F> MembershipOracle for FnOracle<F>
where
    F: FnMut(&[AbstractInput]) -> OutputWord,
{
    fn answer_query(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError> {
        self.queries += 1;
        Ok((self.answer)(input))
    }
}

#[cfg(test)]
mod tests {
    use statefuzz::sul::SulError;
    use statefuzz_core::symbol::AbstractOutput;

    use super::*;

    #[derive(Default)]
    struct Recording {
        calls: Vec<&'static str>,
        fail_at: Option<usize>,
    }

    impl Sul for Recording {
        fn pre(&mut self) -> Result<(), SulError> {
            self.calls.push("pre");
            Ok(())
        }

        fn step(&mut self, _input: &AbstractInput) -> Result<AbstractOutput, SulError> {
            self.calls.push("step");
            if Some(self.calls.len()) == self.fail_at {
                return Err(SulError::Contract("broken".to_string()));
            }
            Ok(AbstractOutput::new("ok"))
        }

        fn post(&mut self) -> Result<(), SulError> {
            self.calls.push("post");
            Ok(())
        }
    }

    #[test]
    fn post_runs_on_every_path() {
        let word = [AbstractInput::new("A"), AbstractInput::new("B")];
        let mut oracle = SulOracle::new(Recording::default());
        assert_eq!(oracle.answer_query(&word).unwrap().len(), 2);

        let mut failing = SulOracle::new(Recording {
            fail_at: Some(2),
            ..Default::default()
        });
        assert!(failing.answer_query(&word).is_err());
        assert_eq!(failing.into_inner().calls, vec!["pre", "step", "post"]);
        assert_eq!(oracle.into_inner().calls, vec!["pre", "step", "step", "post"]);
    }

    #[test]
    fn shared_handles_reach_the_same_oracle() {
        let shared = SharedOracle::new(FnOracle::new(|w: &[AbstractInput]| {
            vec![AbstractOutput::new("x"); w.len()]
        }));
        let (mut a, mut b) = (shared.clone(), shared.clone());
        a.answer_query(&[AbstractInput::new("A")]).unwrap();
        b.answer_query(&[AbstractInput::new("A")]).unwrap();
        assert_eq!(shared.inner.borrow().queries(), 2);
    }
}
