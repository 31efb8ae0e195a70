use std::{cell::RefCell, rc::Rc};

use statefuzz_core::{
    math,
    mealy::MealyMachine,
    symbol::{AbstractInput, AbstractOutput},
    word::OutputWord,
    Show,
};
use tracing::{debug, info, warn};

use crate::{log::NonDeterminismLog, oracle::MembershipOracle, OracleError};

/// The hypothesis currently under test, set by the learning driver before every equivalence
/// query.
pub type HypothesisSlot = Rc<RefCell<Option<MealyMachine>>>;

/// How candidate counterexamples are re-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizerPolicy {
    /// Rerun `reruns` times and decide by majority instead of a single rerun.
    pub probabilistic: bool,
    pub reruns: usize,
    /// Discard candidates whose reruns disagree instead of failing.
    pub skip_non_det: bool,
}

impl Default for SanitizerPolicy {
    fn default() -> Self {
        Self {
            probabilistic: true,
            reruns: 3,
            skip_non_det: false,
        }
    }
}

/// Outcome of sanitizing a candidate counterexample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The SUL really disagrees with the hypothesis, with the given output.
    Confirmed(OutputWord),
    /// Reruns agree with the hypothesis.
    Spurious,
    /// Reruns disagree among themselves, the candidate was dropped.
    Discarded,
}

/// Re-executes `input`, for which the SUL answered `original` while the hypothesis predicts
/// `predicted`, and decides whether it is a counterexample.
pub fn sanitize<O: MembershipOracle + ?Sized>(
    oracle: &mut O,
    input: &[AbstractInput],
    original: &[AbstractOutput],
    predicted: &[AbstractOutput],
    policy: SanitizerPolicy,
    log: Option<&NonDeterminismLog>,
) -> Result<Verdict, OracleError> {
    if !policy.probabilistic {
        let rerun = oracle.answer_query(input)?;
        return Ok(if rerun == predicted {
            debug!("rerun of {} agrees with the hypothesis", input.show());
            Verdict::Spurious
        } else {
            Verdict::Confirmed(rerun)
        });
    }

    let reruns = (0..policy.reruns.max(1))
        .map(|_| oracle.answer_query(input))
        .collect::<Result<Vec<_>, _>>()?;
    let counts = math::tally(reruns.iter());
    let agreeing = counts.get(&original.to_vec()).copied().unwrap_or(0);
    if 2 * agreeing > reruns.len() {
        info!(
            "{agreeing} of {} reruns confirm counterexample {}",
            reruns.len(),
            input.show()
        );
        return Ok(Verdict::Confirmed(original.to_vec()));
    }

    let mut distinct = counts.keys();
    if let (Some(first), Some(other)) = (distinct.next(), distinct.next()) {
        let (first, other) = ((*first).clone(), (*other).clone());
        if let Some(log) = log {
            log.disagreement(input, &first, &other);
        }
        if policy.skip_non_det {
            warn!("skipping non-deterministic test {}", input.show());
            if let Some(log) = log {
                log.note(format!("skipped test {}", input.show()));
            }
            return Ok(Verdict::Discarded);
        }
        return Err(OracleError::NonDeterminism {
            input: input.to_vec(),
            expected: first,
            observed: other,
        });
    }

    let rerun = reruns.into_iter().next().unwrap_or_default();
    if rerun == predicted {
        debug!("reruns of {} agree with the hypothesis", input.show());
        Ok(Verdict::Spurious)
    } else {
        Ok(Verdict::Confirmed(rerun))
    }
}

/// Sits below the equivalence oracle and lets an answer that disagrees with the hypothesis in
/// the slot through only once it has been confirmed by [`sanitize`]. Answers to unconfirmed
/// candidates are replaced by the hypothesis' prediction. A prediction standing in for a
/// discarded candidate is reported as not observed.
pub struct SanitizingOracle<O> {
    inner: O,
    slot: HypothesisSlot,
    policy: SanitizerPolicy,
    log: Option<NonDeterminismLog>,
    substituted: bool,
}

impl<O: MembershipOracle> SanitizingOracle<O> {
    pub fn new(inner: O, slot: HypothesisSlot, policy: SanitizerPolicy) -> Self {
        Self {
            inner,
            slot,
            policy,
            log: None,
            substituted: false,
        }
    }

    pub fn with_log(mut self, log: NonDeterminismLog) -> Self {
        self.log = Some(log);
        self
    }
}

impl<O: MembershipOracle> MembershipOracle for SanitizingOracle<O> {
    fn answer_query(&mut self, input: &[AbstractInput]) -> Result<OutputWord, OracleError> {
        self.substituted = false;
        let output = self.inner.answer_query(input)?;
        let predicted = self
            .slot
            .borrow()
            .as_ref()
            .and_then(|hypothesis| hypothesis.outputs(input));
        let Some(predicted) = predicted.filter(|p| *p != output) else {
            return Ok(output);
        };
        match sanitize(
            &mut self.inner,
            input,
            &output,
            &predicted,
            self.policy,
            self.log.as_ref(),
        )? {
            Verdict::Confirmed(confirmed) => Ok(confirmed),
            Verdict::Spurious => Ok(predicted),
            Verdict::Discarded => {
                self.substituted = true;
                Ok(predicted)
            }
        }
    }

    fn last_answer_observed(&self) -> bool {
        !self.substituted
    }
}
