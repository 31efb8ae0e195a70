use std::fmt::Display;

use statefuzz_core::{
    math,
    mealy::MealyMachine,
    symbol::AbstractInput,
    word::{InputWord, OutputWord},
    Show,
};
use tracing::{info, warn};

use crate::{oracle::MembershipOracle, OracleError};

/// The answers a test word received over a number of runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub input: InputWord,
    /// Distinct answers with the number of runs that produced them, most frequent first.
    pub answers: math::Map<OutputWord, usize>,
    /// The answer predicted by the reference machine, if one was given and could execute the word.
    pub expected: Option<OutputWord>,
}

impl TestResult {
    pub fn is_deterministic(&self) -> bool {
        self.answers.len() <= 1
    }

    /// True if a reference machine was given and every run matched it.
    pub fn conforms(&self) -> bool {
        match &self.expected {
            Some(expected) => self.answers.len() == 1 && self.answers.contains_key(expected),
            None => false,
        }
    }
}

impl Display for TestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.input.show())?;
        let mut builder = tabled::builder::Builder::default();
        builder.push_record(["runs".to_string(), "answer".to_string()]);
        for (answer, runs) in &self.answers {
            builder.push_record([runs.to_string(), answer.show()]);
        }
        if let Some(expected) = &self.expected {
            builder.push_record(["expected".to_string(), expected.show()]);
        }
        write!(
            f,
            "{}",
            builder.build().with(tabled::settings::Style::rounded())
        )
    }
}

/// Executes test words outside of learning.
pub struct TestRunner<O> {
    oracle: O,
    reference: Option<MealyMachine>,
}

impl<O: MembershipOracle> TestRunner<O> {
    pub fn new(oracle: O) -> Self {
        Self {
            oracle,
            reference: None,
        }
    }

    /// Compare every answer against the outputs of `reference`.
    pub fn with_reference(mut self, reference: MealyMachine) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn run_test(
        &mut self,
        input: &[AbstractInput],
        times: usize,
    ) -> Result<TestResult, OracleError> {
        let mut runs = Vec::with_capacity(times);
        for _ in 0..times.max(1) {
            runs.push(self.oracle.answer_query(input)?);
        }
        let mut answers = math::tally(runs);
        answers.sort_by(|_, a, _, b| b.cmp(a));

        let expected = self.reference.as_ref().and_then(|s| s.outputs(input));
        let result = TestResult {
            input: input.to_vec(),
            answers,
            expected,
        };
        if !result.is_deterministic() {
            warn!("{} answered in {} ways", input.show(), result.answers.len());
        } else if result.expected.is_some() && !result.conforms() {
            warn!("{} does not conform to the reference machine", input.show());
        } else {
            info!("{} answered consistently", input.show());
        }
        Ok(result)
    }

    pub fn into_inner(self) -> O {
        self.oracle
    }
}
