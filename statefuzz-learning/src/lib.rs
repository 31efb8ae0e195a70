//! The learning side: membership oracle chains over a [`Sul`], the observation tree they share,
//! counterexample sanitization, Mealy L*, and a driver that runs learning rounds.

use std::{cell::RefCell, io, rc::Rc};

use statefuzz::sul::Sul;
use tracing::debug;

pub mod config;
pub use config::LearningConfig;

pub mod driver;

pub mod equivalence;

mod error;
pub use error::OracleError;

pub mod log;

/// Mealy L* and the learner interface used by the driver.
pub mod lstar;

pub mod oracle;

pub mod runner;

pub mod sanitizer;

pub mod statistics;

/// The prefix tree of all answered queries.
pub mod tree;

use crate::{
    log::{NonDeterminismLog, QueryLog},
    oracle::{
        CachingOracle, LoggingOracle, MembershipOracle, NonDeterminismRetryOracle,
        RepeatedRunOracle, SharedOracle, SulOracle,
    },
    sanitizer::{HypothesisSlot, SanitizingOracle},
    tree::{ObservationTree, SharedTree},
};

/// The logs written by the oracle chains.
#[derive(Debug, Clone, Default)]
pub struct OracleLogs {
    pub queries: Option<QueryLog>,
    pub non_determinism: Option<NonDeterminismLog>,
}

impl OracleLogs {
    /// Opens the files named in `config`.
    pub fn from_config(config: &LearningConfig) -> io::Result<Self> {
        Ok(Self {
            queries: config.query_file.as_deref().map(QueryLog::create).transpose()?,
            non_determinism: config
                .non_det_file
                .as_deref()
                .map(|path| QueryLog::create(path).map(NonDeterminismLog::new))
                .transpose()?,
        })
    }
}

/// The two oracle chains over one SUL.
pub struct Oracles {
    /// Answers the learner's queries.
    pub membership: Box<dyn MembershipOracle>,
    /// Answers the tests of the equivalence oracle, sanitizing answers that disagree with the
    /// hypothesis in `slot`.
    pub testing: Box<dyn MembershipOracle>,
    pub tree: SharedTree,
    pub slot: HypothesisSlot,
}

/// Builds the oracle chains around `sul`. The membership chain consists, from the inside out,
/// of repeated runs (for more than one run), the retry on tree conflicts, the cache and the
/// query log. The testing chain sanitizes answers and only looks up the cache unless
/// `cache_tests` is set.
pub fn build_oracles(sul: Box<dyn Sul>, config: &LearningConfig, logs: &OracleLogs) -> Oracles {
    let tree = ObservationTree::new(config.terminating_outputs.iter().cloned())
        .with_sink(config.sink_output.clone())
        .shared();
    let slot: HypothesisSlot = Rc::new(RefCell::new(None));
    let base = SharedOracle::new(SulOracle::new(sul));

    let mut membership: Box<dyn MembershipOracle> = Box::new(base.clone());
    if config.runs_per_membership_query > 1 {
        debug!(
            "executing membership queries {} times",
            config.runs_per_membership_query
        );
        let mut repeated = RepeatedRunOracle::new(membership, config.runs_per_membership_query);
        if let Some(log) = logs.non_determinism.clone() {
            repeated = repeated.with_log(log);
        }
        membership = Box::new(repeated);
    }
    let mut retry = NonDeterminismRetryOracle::new(
        membership,
        tree.clone(),
        config.membership_query_retries,
    );
    if let Some(log) = logs.non_determinism.clone() {
        retry = retry.with_log(log);
    }
    membership = Box::new(CachingOracle::new(retry, tree.clone()));
    if let Some(log) = logs.queries.clone() {
        membership = Box::new(LoggingOracle::new(membership, log));
    }

    let mut testing: Box<dyn MembershipOracle> = Box::new(base);
    if config.ce_sanitization {
        let mut sanitizing =
            SanitizingOracle::new(testing, slot.clone(), config.sanitizer_policy());
        if let Some(log) = logs.non_determinism.clone() {
            sanitizing = sanitizing.with_log(log);
        }
        testing = Box::new(sanitizing);
    }
    testing = if config.cache_tests {
        Box::new(CachingOracle::new(testing, tree.clone()))
    } else {
        Box::new(CachingOracle::lookup_only(testing, tree.clone()))
    };
    if let Some(log) = logs.queries.clone() {
        testing = Box::new(LoggingOracle::new(testing, log));
    }

    Oracles {
        membership,
        testing,
        tree,
        slot,
    }
}

pub mod prelude {
    pub use super::{
        build_oracles,
        config::LearningConfig,
        driver::{LearnerResult, LearningDriver, NotFinishedReason},
        equivalence::{
            EquivalenceChain, EquivalenceOracle, RandomWordsOracle, ReferenceOracle,
            SampledTestsOracle,
        },
        log::{NonDeterminismLog, QueryLog},
        lstar::{Learner, MealyLStar},
        oracle::{FnOracle, MembershipOracle, SharedOracle, SulOracle},
        runner::{TestResult, TestRunner},
        sanitizer::{HypothesisSlot, SanitizerPolicy, Verdict},
        statistics::{Statistics, StatisticsTracker},
        tree::{ObservationTree, SharedTree},
        OracleError, OracleLogs, Oracles,
    };
}

#[cfg(test)]
mod tests {
    use statefuzz::sul::SulError;
    use statefuzz_core::symbol::{AbstractInput, AbstractOutput};

    use super::*;

    /// Answers every input with its lowercase name.
    struct Echo;

    impl Sul for Echo {
        fn pre(&mut self) -> Result<(), SulError> {
            Ok(())
        }

        fn step(&mut self, input: &AbstractInput) -> Result<AbstractOutput, SulError> {
            Ok(AbstractOutput::new(input.name().to_lowercase()))
        }

        fn post(&mut self) -> Result<(), SulError> {
            Ok(())
        }
    }

    /// Answers with the next name of a fixed cycle in every session.
    struct Cycling {
        answers: Vec<&'static str>,
        session: usize,
    }

    impl Sul for Cycling {
        fn pre(&mut self) -> Result<(), SulError> {
            self.session += 1;
            Ok(())
        }

        fn step(&mut self, _input: &AbstractInput) -> Result<AbstractOutput, SulError> {
            let answer = self.answers[(self.session - 1) % self.answers.len()];
            Ok(AbstractOutput::new(answer))
        }

        fn post(&mut self) -> Result<(), SulError> {
            Ok(())
        }
    }

    #[test_log::test]
    fn cached_tests_keep_discarded_predictions_out_of_the_tree() {
        let config = LearningConfig {
            cache_tests: true,
            skip_non_det_tests: true,
            ..LearningConfig::default()
        };
        let sul = Cycling {
            answers: vec!["y", "y", "z", "w"],
            session: 0,
        };
        let mut oracles = build_oracles(Box::new(sul), &config, &OracleLogs::default());
        let hypothesis = statefuzz_core::mealy::MealyBuilder::default()
            .with_transitions([(0, "A", 0, "x")])
            .into_mealy(0)
            .unwrap();
        *oracles.slot.borrow_mut() = Some(hypothesis);

        let word = [AbstractInput::new("A")];
        let answer = oracles.testing.answer_query(&word).unwrap();
        assert_eq!(answer, vec![AbstractOutput::new("x")]);
        assert_eq!(oracles.tree.borrow().lookup(&word), None);
    }

    #[test_log::test]
    fn query_log_receives_both_chains() {
        let dir = tempfile::tempdir().unwrap();
        let config = LearningConfig {
            query_file: Some(dir.path().join("queries.log")),
            non_det_file: Some(dir.path().join("nondet.log")),
            ..LearningConfig::default()
        };
        let logs = OracleLogs::from_config(&config).unwrap();
        let mut oracles = build_oracles(Box::new(Echo), &config, &logs);

        let word = [AbstractInput::new("A"), AbstractInput::new("B")];
        oracles.membership.answer_query(&word).unwrap();
        oracles.testing.answer_query(&word[..1]).unwrap();
        assert_eq!(oracles.tree.borrow().size(), 2);

        let written = std::fs::read_to_string(dir.path().join("queries.log")).unwrap();
        assert_eq!(written, "[A B] / [a b]\n[A] / [a]\n");
        assert!(dir.path().join("nondet.log").exists());
    }
}
