use std::{fmt::Display, time::Instant};

use statefuzz::cleanup::CleanupTasks;
use statefuzz_core::{mealy::MealyMachine, word::Query};
use tracing::{error, info, warn};

use crate::{
    equivalence::EquivalenceOracle,
    lstar::Learner,
    sanitizer::HypothesisSlot,
    statistics::{Statistics, StatisticsTracker},
    OracleError,
};

/// Why a learning run stopped before the equivalence oracle accepted a hypothesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFinishedReason {
    NonDeterminism(String),
    Limit(String),
    RoundLimit(usize),
    Error(String),
}

impl From<&OracleError> for NotFinishedReason {
    fn from(e: &OracleError) -> Self {
        if e.is_limit() {
            NotFinishedReason::Limit(e.to_string())
        } else if e.is_non_determinism() {
            NotFinishedReason::NonDeterminism(e.to_string())
        } else {
            NotFinishedReason::Error(e.to_string())
        }
    }
}

impl Display for NotFinishedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFinishedReason::NonDeterminism(e) => write!(f, "non-determinism: {e}"),
            NotFinishedReason::Limit(e) => write!(f, "{e}"),
            NotFinishedReason::RoundLimit(n) => write!(f, "round limit of {n} reached"),
            NotFinishedReason::Error(e) => write!(f, "error: {e}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LearnerResult {
    /// The last hypothesis, absent if not even the first one could be built.
    pub model: Option<MealyMachine>,
    pub finished: bool,
    pub reason: Option<NotFinishedReason>,
    pub hypotheses: Vec<MealyMachine>,
    pub counterexamples: Vec<Query>,
    pub statistics: Statistics,
}

/// Alternates hypothesis construction and equivalence queries until no counterexample is found
/// or the run is cut short.
pub struct LearningDriver<L, E> {
    learner: L,
    equivalence: E,
    slot: HypothesisSlot,
    round_limit: Option<usize>,
    tracker: StatisticsTracker,
    cleanup: Option<CleanupTasks>,
}

impl<L: Learner, E: EquivalenceOracle> LearningDriver<L, E> {
    pub fn new(learner: L, equivalence: E, slot: HypothesisSlot) -> Self {
        Self {
            learner,
            equivalence,
            slot,
            round_limit: None,
            tracker: StatisticsTracker::default(),
            cleanup: None,
        }
    }

    pub fn with_round_limit(mut self, limit: Option<usize>) -> Self {
        self.round_limit = limit.filter(|l| *l > 0);
        self
    }

    pub fn with_tracker(mut self, tracker: StatisticsTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Cleanup tasks executed when the run ends, however it ends.
    pub fn with_cleanup(mut self, cleanup: CleanupTasks) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    pub fn learner(&self) -> &L {
        &self.learner
    }

    pub fn run(&mut self) -> LearnerResult {
        let start = Instant::now();
        let mut hypotheses: Vec<MealyMachine> = vec![];
        let mut counterexamples = vec![];
        let mut rounds = 0;

        let reason = self.rounds(&mut hypotheses, &mut counterexamples, &mut rounds);
        match &reason {
            None => info!("learning finished after {rounds} rounds"),
            Some(r @ NotFinishedReason::Error(_)) => error!("learning stopped: {r}"),
            Some(r) => warn!("learning stopped: {r}"),
        }

        self.slot.borrow_mut().take();
        if let Some(cleanup) = self.cleanup.as_ref() {
            cleanup.execute();
        }

        let model = hypotheses.last().cloned();
        let statistics = self.tracker.snapshot(
            rounds,
            counterexamples.len(),
            model.as_ref().map_or(0, MealyMachine::size),
            start.elapsed(),
        );
        LearnerResult {
            model,
            finished: reason.is_none(),
            reason,
            hypotheses,
            counterexamples,
            statistics,
        }
    }

    fn rounds(
        &mut self,
        hypotheses: &mut Vec<MealyMachine>,
        counterexamples: &mut Vec<Query>,
        rounds: &mut usize,
    ) -> Option<NotFinishedReason> {
        if let Err(e) = self.learner.start() {
            return Some((&e).into());
        }
        loop {
            *rounds += 1;
            let hypothesis = self.learner.hypothesis();
            info!("round {rounds}: hypothesis with {} states", hypothesis.size());
            *self.slot.borrow_mut() = Some(hypothesis.clone());
            hypotheses.push(hypothesis.clone());

            let counterexample = match self.equivalence.find_counterexample(&hypothesis) {
                Ok(Some(ce)) => ce,
                Ok(None) => return None,
                Err(e) => return Some((&e).into()),
            };
            info!("counterexample {counterexample}");
            counterexamples.push(counterexample.clone());

            if self.round_limit.is_some_and(|limit| *rounds >= limit) {
                return Some(NotFinishedReason::RoundLimit(*rounds));
            }
            match self.learner.refine(&counterexample) {
                Ok(true) => {}
                Ok(false) => {
                    return Some(NotFinishedReason::Error(format!(
                        "{counterexample} does not contradict the hypothesis"
                    )))
                }
                Err(e) => return Some((&e).into()),
            }
        }
    }
}
