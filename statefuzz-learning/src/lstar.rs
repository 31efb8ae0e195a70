use itertools::Itertools;
use statefuzz_core::{
    alphabet::InputAlphabet,
    math,
    mealy::MealyMachine,
    word::{InputWord, OutputWord, Query},
    Show,
};
use tracing::{debug, trace, warn};

use crate::{oracle::MembershipOracle, OracleError};

/// An active learning algorithm for Mealy machines.
pub trait Learner {
    /// Poses the initial queries so that [`Learner::hypothesis`] can be built.
    fn start(&mut self) -> Result<(), OracleError>;

    /// Builds the current hypothesis.
    fn hypothesis(&self) -> MealyMachine;

    /// Incorporates a counterexample, returns false if it does not contradict the current
    /// hypothesis.
    fn refine(&mut self, counterexample: &Query) -> Result<bool, OracleError>;
}

/// L* for Mealy machines with counterexample processing after Maler and Pnueli: all suffixes of
/// a counterexample become experiments. The base rows are kept pairwise distinct, so the table
/// only has to be closed.
pub struct MealyLStar<O> {
    alphabet: InputAlphabet,
    oracle: O,
    // access words of the hypothesis states, `base[0]` is the empty word
    base: Vec<InputWord>,
    // the single letters come first, in alphabet order
    experiments: Vec<InputWord>,
    // for every row, the outputs of the experiments after it
    table: math::Map<InputWord, Vec<OutputWord>>,
}

impl<O: MembershipOracle> MealyLStar<O> {
    pub fn new(alphabet: InputAlphabet, oracle: O) -> Self {
        Self {
            experiments: alphabet.universe().map(|a| vec![a.clone()]).collect(),
            alphabet,
            oracle,
            base: vec![vec![]],
            table: math::Map::default(),
        }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    /// Number of experiments, that is of table columns.
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    fn one_letter_extensions(&self) -> Vec<InputWord> {
        self.base
            .iter()
            .flat_map(|w| {
                self.alphabet.universe().map(move |a| {
                    let mut x = w.clone();
                    x.push(a.clone());
                    x
                })
            })
            .filter(|x| !self.base.contains(x))
            .unique()
            .collect()
    }

    fn update_table(&mut self) -> Result<(), OracleError> {
        let rows = self
            .base
            .iter()
            .cloned()
            .chain(self.one_letter_extensions())
            .collect_vec();
        for row in rows {
            let stored = self.table.get(&row).map_or(0, Vec::len);
            for i in stored..self.experiments.len() {
                let experiment = &self.experiments[i];
                let word = row.iter().chain(experiment).cloned().collect_vec();
                let answer = self.oracle.answer_query(&word)?;
                let cell = answer[row.len()..].to_vec();
                trace!("{} maps to {}", word.show(), cell.show());
                self.table.entry(row.clone()).or_default().push(cell);
            }
        }
        trace!("after update the table is\n{:?}", self);
        Ok(())
    }

    fn row(&self, word: &InputWord) -> &[OutputWord] {
        self.table.get(word).map_or(&[], Vec::as_slice)
    }

    fn rows_to_promote(&self) -> math::Set<InputWord> {
        let known = math::Set::from_iter(self.base.iter().map(|b| self.row(b)));
        let mut seen = math::Set::default();
        let mut out = math::Set::default();
        for word in self.one_letter_extensions() {
            let row = self.row(&word);
            if !known.contains(row) && seen.insert(row) {
                out.insert(word);
            }
        }
        out
    }

    fn close(&mut self) -> Result<(), OracleError> {
        loop {
            self.update_table()?;
            let todo = self.rows_to_promote();
            if todo.is_empty() {
                return Ok(());
            }
            debug!(
                "promoting {}",
                todo.iter().map(|w| w.show()).join(", ")
            );
            self.base.extend(todo);
        }
    }
}

impl<O: MembershipOracle> Learner for MealyLStar<O> {
    fn start(&mut self) -> Result<(), OracleError> {
        self.close()
    }

    fn hypothesis(&self) -> MealyMachine {
        let mut mm = MealyMachine::new(self.alphabet.clone());
        let states: math::Map<&[OutputWord], usize> = self
            .base
            .iter()
            .enumerate()
            .map(|(i, b)| {
                if i > 0 {
                    mm.add_state();
                }
                (self.row(b), i)
            })
            .collect();

        for (source, access) in self.base.iter().enumerate() {
            for (i, a) in self.alphabet.universe().enumerate() {
                let mut extended = access.clone();
                extended.push(a.clone());
                let (Some(target), Some(output)) = (
                    states.get(self.row(&extended)),
                    self.row(access).get(i).and_then(|cell| cell.first()),
                ) else {
                    warn!("table is not closed for {}", extended.show());
                    continue;
                };
                mm.add_transition(source, a.clone(), *target, output.clone());
            }
        }
        mm
    }

    fn refine(&mut self, counterexample: &Query) -> Result<bool, OracleError> {
        let hypothesis = self.hypothesis();
        if hypothesis.outputs(counterexample.input()).as_deref() == Some(counterexample.output()) {
            warn!("{counterexample} is not a counterexample");
            return Ok(false);
        }
        let input = counterexample.input();
        for i in 0..input.len() {
            let suffix = input[i..].to_vec();
            if !self.experiments.contains(&suffix) {
                trace!("adding experiment {}", suffix.show());
                self.experiments.push(suffix);
            }
        }
        self.close()?;
        Ok(true)
    }
}

impl<O> std::fmt::Debug for MealyLStar<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut builder = tabled::builder::Builder::default();
        let mut header = vec!["MR".to_string()];
        header.extend(self.experiments.iter().map(|e| e.show()));
        builder.push_record(header);

        for mr in &self.base {
            let mut row = vec![mr.show()];
            if let Some(cells) = self.table.get(mr) {
                row.extend(cells.iter().map(|c| c.show()));
            }
            builder.push_record(row);
        }

        write!(f, "{}", builder.build())
    }
}

#[cfg(test)]
mod tests {
    use statefuzz_core::{mealy::MealyBuilder, symbol::AbstractInput};

    use super::*;
    use crate::oracle::FnOracle;

    /// Outputs `1` on `a` exactly when the number of `a`s seen so far is a multiple of three.
    fn counter() -> MealyMachine {
        MealyBuilder::default()
            .with_transitions([
                (0, "a", 1, "0"),
                (1, "a", 2, "0"),
                (2, "a", 0, "1"),
                (0, "b", 0, "n"),
                (1, "b", 1, "n"),
                (2, "b", 2, "n"),
            ])
            .into_mealy(0)
            .unwrap()
    }

    #[test_log::test]
    fn learns_counter_from_counterexample() {
        let target = counter();
        let oracle_target = target.clone();
        let mut learner = MealyLStar::new(
            target.alphabet().clone(),
            FnOracle::new(move |w: &[AbstractInput]| oracle_target.outputs(w).unwrap()),
        );
        learner.start().unwrap();
        let first = learner.hypothesis();
        assert_eq!(first.size(), 1);

        let ce = target.witness_inequivalence(&first).unwrap();
        let output = target.outputs(&ce).unwrap();
        assert!(learner.refine(&Query::new(ce.clone(), output.clone())).unwrap());

        let second = learner.hypothesis();
        assert!(second.is_complete());
        assert_eq!(second.size(), 3);
        assert_eq!(target.witness_inequivalence(&second), None);
        assert!(!learner.refine(&Query::new(ce, output)).unwrap());
    }

    #[test]
    fn table_renders_base_rows() {
        let target = counter();
        let mut learner = MealyLStar::new(
            target.alphabet().clone(),
            FnOracle::new(move |w: &[AbstractInput]| target.outputs(w).unwrap()),
        );
        learner.start().unwrap();
        let rendered = format!("{learner:?}");
        assert!(rendered.contains("MR"));
        assert!(rendered.contains("[a]"));
        assert_eq!(learner.experiment_count(), 2);
    }
}
