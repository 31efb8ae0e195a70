use statefuzz_core::{
    mealy::MealyMachine,
    symbol::AbstractInput,
    word::{InputWord, Query},
    Show,
};
use tracing::{debug, info, trace};

use crate::{oracle::MembershipOracle, OracleError};

/// Searches for an input word on which the SUL and a hypothesis disagree.
pub trait EquivalenceOracle {
    /// Returns a counterexample together with the SUL's answer to it, or `None` if no
    /// disagreement was found.
    fn find_counterexample(
        &mut self,
        hypothesis: &MealyMachine,
    ) -> Result<Option<Query>, OracleError>;
}

impl<E: EquivalenceOracle + ?Sized> EquivalenceOracle for Box<E> {
    fn find_counterexample(
        &mut self,
        hypothesis: &MealyMachine,
    ) -> Result<Option<Query>, OracleError> {
        (**self).find_counterexample(hypothesis)
    }
}

fn test_word<O: MembershipOracle>(
    oracle: &mut O,
    hypothesis: &MealyMachine,
    word: &[AbstractInput],
) -> Result<Option<Query>, OracleError> {
    let Some(predicted) = hypothesis.outputs(word) else {
        debug!("hypothesis cannot execute {}", word.show());
        return Ok(None);
    };
    let answer = oracle.answer_query(word)?;
    if answer != predicted {
        info!(
            "counterexample {}: SUL answers {}, hypothesis {}",
            word.show(),
            answer.show(),
            predicted.show()
        );
        return Ok(Some(Query::new(word.to_vec(), answer)));
    }
    trace!("{} agrees with the hypothesis", word.show());
    Ok(None)
}

/// Runs a fixed list of tests.
pub struct SampledTestsOracle<O> {
    oracle: O,
    tests: Vec<InputWord>,
}

impl<O: MembershipOracle> SampledTestsOracle<O> {
    pub fn new(oracle: O, tests: Vec<InputWord>) -> Self {
        Self { oracle, tests }
    }
}

impl<O: MembershipOracle> EquivalenceOracle for SampledTestsOracle<O> {
    fn find_counterexample(
        &mut self,
        hypothesis: &MealyMachine,
    ) -> Result<Option<Query>, OracleError> {
        for test in &self.tests {
            if let Some(ce) = test_word(&mut self.oracle, hypothesis, test)? {
                return Ok(Some(ce));
            }
        }
        Ok(None)
    }
}

/// Runs a number of uniformly random words with lengths in a range.
pub struct RandomWordsOracle<O> {
    oracle: O,
    min_length: usize,
    max_length: usize,
    queries: usize,
    rng: fastrand::Rng,
}

impl<O: MembershipOracle> RandomWordsOracle<O> {
    pub fn new(oracle: O, min_length: usize, max_length: usize, queries: usize, seed: u64) -> Self {
        Self {
            oracle,
            min_length: min_length.max(1),
            max_length: max_length.max(min_length.max(1)),
            queries,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    fn random_word(&mut self, hypothesis: &MealyMachine) -> InputWord {
        let symbols: Vec<&AbstractInput> = hypothesis.alphabet().universe().collect();
        let length = self.rng.usize(self.min_length..=self.max_length);
        (0..length)
            .map(|_| symbols[self.rng.usize(..symbols.len())].clone())
            .collect()
    }
}

impl<O: MembershipOracle> EquivalenceOracle for RandomWordsOracle<O> {
    fn find_counterexample(
        &mut self,
        hypothesis: &MealyMachine,
    ) -> Result<Option<Query>, OracleError> {
        for _ in 0..self.queries {
            let word = self.random_word(hypothesis);
            if let Some(ce) = test_word(&mut self.oracle, hypothesis, &word)? {
                return Ok(Some(ce));
            }
        }
        Ok(None)
    }
}

/// Compares hypotheses against a known Mealy machine.
#[derive(Debug, Clone)]
pub struct ReferenceOracle {
    target: MealyMachine,
}

impl ReferenceOracle {
    pub fn new(target: MealyMachine) -> Self {
        Self { target }
    }
}

impl EquivalenceOracle for ReferenceOracle {
    fn find_counterexample(
        &mut self,
        hypothesis: &MealyMachine,
    ) -> Result<Option<Query>, OracleError> {
        Ok(self.target.witness_inequivalence(hypothesis).and_then(|word| {
            let output = self.target.outputs(&word)?;
            Some(Query::new(word, output))
        }))
    }
}

/// Asks a list of equivalence oracles in order until one of them finds a counterexample.
#[derive(Default)]
pub struct EquivalenceChain {
    oracles: Vec<Box<dyn EquivalenceOracle>>,
}

impl EquivalenceChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<E: EquivalenceOracle + 'static>(mut self, oracle: E) -> Self {
        self.oracles.push(Box::new(oracle));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.oracles.is_empty()
    }
}

impl EquivalenceOracle for EquivalenceChain {
    fn find_counterexample(
        &mut self,
        hypothesis: &MealyMachine,
    ) -> Result<Option<Query>, OracleError> {
        for oracle in &mut self.oracles {
            if let Some(ce) = oracle.find_counterexample(hypothesis)? {
                return Ok(Some(ce));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use statefuzz_core::{mealy::MealyBuilder, symbol::AbstractOutput};

    use super::*;
    use crate::oracle::FnOracle;

    fn toggle() -> MealyMachine {
        MealyBuilder::default()
            .with_transitions([(0, "a", 1, "x"), (1, "a", 0, "y")])
            .into_mealy(0)
            .unwrap()
    }

    fn constant() -> MealyMachine {
        MealyBuilder::default()
            .with_transitions([(0, "a", 0, "x")])
            .into_mealy(0)
            .unwrap()
    }

    fn toggle_oracle() -> FnOracle<impl FnMut(&[AbstractInput]) -> Vec<AbstractOutput>> {
        FnOracle::new(|w: &[AbstractInput]| toggle().outputs(w).unwrap())
    }

    #[test]
    fn sampled_tests_find_disagreement() {
        let word = |n: usize| vec![AbstractInput::new("a"); n];
        let mut oracle = SampledTestsOracle::new(toggle_oracle(), vec![word(1), word(2), word(3)]);
        let ce = oracle.find_counterexample(&constant()).unwrap().unwrap();
        assert_eq!(ce.input(), word(2).as_slice());
        assert!(oracle.find_counterexample(&toggle()).unwrap().is_none());
    }

    #[test]
    fn random_words_are_reproducible() {
        let mut first = RandomWordsOracle::new(toggle_oracle(), 2, 6, 10, 7);
        let mut second = RandomWordsOracle::new(toggle_oracle(), 2, 6, 10, 7);
        let a = first.find_counterexample(&constant()).unwrap().unwrap();
        let b = second.find_counterexample(&constant()).unwrap().unwrap();
        assert_eq!(a, b);
        assert!((2..=6).contains(&a.len()));
    }

    #[test]
    fn reference_and_chain() {
        let mut chain = EquivalenceChain::new()
            .with(SampledTestsOracle::new(toggle_oracle(), vec![]))
            .with(ReferenceOracle::new(toggle()));
        let ce = chain.find_counterexample(&constant()).unwrap().unwrap();
        assert_eq!(toggle().outputs(ce.input()), Some(ce.output().to_vec()));
        assert!(chain.find_counterexample(&toggle()).unwrap().is_none());
    }
}
