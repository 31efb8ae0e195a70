use std::{collections::VecDeque, fmt::Write};

use itertools::Itertools;
use tracing::trace;

use crate::{
    alphabet::{AlphabetError, InputAlphabet},
    math,
    symbol::{AbstractInput, AbstractOutput},
    word::{InputWord, OutputWord},
};

/// Index of a state in a [`MealyMachine`].
pub type StateIndex = usize;

/// A deterministic Mealy machine over an [`InputAlphabet`]. This is the shape of every
/// hypothesis a learner produces, and it doubles as the reference machine of the test runner.
/// The machine may be partial, in which case [`MealyMachine::outputs`] returns `None` for
/// words that leave the defined part.
#[derive(Debug, Clone)]
pub struct MealyMachine {
    alphabet: InputAlphabet,
    initial: StateIndex,
    states: usize,
    transitions: math::Map<(StateIndex, AbstractInput), (StateIndex, AbstractOutput)>,
}

impl MealyMachine {
    /// Creates a machine with a single initial state and no transitions.
    pub fn new(alphabet: InputAlphabet) -> Self {
        Self {
            alphabet,
            initial: 0,
            states: 1,
            transitions: math::Map::default(),
        }
    }

    /// Adds a fresh state and returns its index.
    pub fn add_state(&mut self) -> StateIndex {
        self.states += 1;
        self.states - 1
    }

    /// Adds or replaces the transition from `source` on `input`.
    pub fn add_transition(
        &mut self,
        source: StateIndex,
        input: AbstractInput,
        target: StateIndex,
        output: AbstractOutput,
    ) -> Option<(StateIndex, AbstractOutput)> {
        debug_assert!(source < self.states && target < self.states);
        let replaced = self
            .transitions
            .insert((source, input.clone()), (target, output));
        if let Some((old_target, old_output)) = &replaced {
            trace!("replaced transition s{source} --{input}/{old_output}--> s{old_target}");
        }
        replaced
    }

    pub fn alphabet(&self) -> &InputAlphabet {
        &self.alphabet
    }

    pub fn initial(&self) -> StateIndex {
        self.initial
    }

    /// Returns the number of states.
    pub fn size(&self) -> usize {
        self.states
    }

    pub fn transition(
        &self,
        state: StateIndex,
        input: &AbstractInput,
    ) -> Option<(StateIndex, &AbstractOutput)> {
        self.transitions
            .get(&(state, input.clone()))
            .map(|(target, output)| (*target, output))
    }

    /// Returns true if every state has a transition for every input.
    pub fn is_complete(&self) -> bool {
        self.transitions.len() == self.states * self.alphabet.size()
    }

    /// Runs `word` from `source` and returns the reached state, if all transitions exist.
    pub fn reached_from(&self, source: StateIndex, word: &[AbstractInput]) -> Option<StateIndex> {
        word.iter()
            .try_fold(source, |state, input| self.transition(state, input).map(|t| t.0))
    }

    /// Runs `word` from the initial state and collects the produced outputs.
    pub fn outputs(&self, word: &[AbstractInput]) -> Option<OutputWord> {
        let mut state = self.initial;
        let mut out = Vec::with_capacity(word.len());
        for input in word {
            let (target, output) = self.transition(state, input)?;
            out.push(output.clone());
            state = target;
        }
        Some(out)
    }

    /// Considers all transitions in `self` and returns a word on which `other` either
    /// produces a different output or lacks a transition. Transitions that exist only
    /// in `other` are not looked at.
    fn witness_restricted_inequivalence(&self, other: &MealyMachine) -> Option<InputWord> {
        let mut seen = math::Set::default();
        let mut queue = VecDeque::from_iter([(self.initial, other.initial, vec![])]);
        seen.insert((self.initial, other.initial));

        while let Some((l, r, access)) = queue.pop_front() {
            for input in self.alphabet.universe() {
                let Some((l_target, l_output)) = self.transition(l, input) else {
                    continue;
                };
                let mut extended = access.clone();
                extended.push(input.clone());
                match other.transition(r, input) {
                    Some((r_target, r_output)) => {
                        if l_output != r_output {
                            return Some(extended);
                        }
                        if seen.insert((l_target, r_target)) {
                            queue.push_back((l_target, r_target, extended));
                        }
                    }
                    None => return Some(extended),
                }
            }
        }
        None
    }

    /// Attempts to construct a shortest word on which the two machines produce different
    /// outputs. If no such word exists, `None` is returned.
    pub fn witness_inequivalence(&self, other: &MealyMachine) -> Option<InputWord> {
        self.witness_restricted_inequivalence(other)
            .or_else(|| other.witness_restricted_inequivalence(self))
    }

    /// Renders the machine in the graphviz dot format.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph mealy {\n  __start [shape=none label=\"\"];\n");
        for state in 0..self.states {
            let _ = writeln!(dot, "  s{state} [shape=circle label=\"s{state}\"];");
        }
        let _ = writeln!(dot, "  __start -> s{};", self.initial);
        for ((source, input), (target, output)) in self
            .transitions
            .iter()
            .sorted_by_key(|((source, _), (target, _))| (*source, *target))
        {
            let _ = writeln!(
                dot,
                "  s{source} -> s{target} [label=\"{input} / {output}\"];"
            );
        }
        dot.push('}');
        dot
    }
}

/// Builds [`MealyMachine`]s from a list of transitions `(source, input, target, output)`.
#[derive(Debug, Clone, Default)]
pub struct MealyBuilder {
    transitions: Vec<(StateIndex, AbstractInput, StateIndex, AbstractOutput)>,
}

impl MealyBuilder {
    pub fn with_transitions<I, X, Y>(mut self, transitions: I) -> Self
    where
        I: IntoIterator<Item = (StateIndex, X, StateIndex, Y)>,
        X: Into<AbstractInput>,
        Y: Into<AbstractOutput>,
    {
        self.transitions.extend(
            transitions
                .into_iter()
                .map(|(p, x, q, y)| (p, x.into(), q, y.into())),
        );
        self
    }

    /// Collects the transitions into a machine whose alphabet consists of all inputs that
    /// appear, in the order of their first appearance.
    pub fn into_mealy(self, initial: StateIndex) -> Result<MealyMachine, AlphabetError> {
        let alphabet = InputAlphabet::new(
            self.transitions
                .iter()
                .map(|(_, input, _, _)| input.clone())
                .unique(),
        )?;
        Ok(self.into_mealy_over(alphabet, initial))
    }

    /// Collects the transitions into a machine over the given alphabet.
    pub fn into_mealy_over(self, alphabet: InputAlphabet, initial: StateIndex) -> MealyMachine {
        let states = self
            .transitions
            .iter()
            .flat_map(|(p, _, q, _)| [*p, *q])
            .chain([initial])
            .max()
            .unwrap_or(0)
            + 1;
        let mut mm = MealyMachine::new(alphabet);
        mm.states = states;
        mm.initial = initial;
        for (p, x, q, y) in self.transitions {
            mm.add_transition(p, x, q, y);
        }
        mm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(names: &[&str]) -> InputWord {
        names.iter().map(|n| AbstractInput::new(n)).collect()
    }

    #[test_log::test]
    fn running_words() {
        let mm = MealyBuilder::default()
            .with_transitions([
                (0, "Start", 1, "Ack"),
                (0, "Ping", 0, "TIMEOUT"),
                (1, "Start", 1, "Ack"),
                (1, "Ping", 1, "Pong"),
            ])
            .into_mealy(0)
            .unwrap();
        assert_eq!(mm.size(), 2);
        assert!(mm.is_complete());
        let expected: OutputWord = vec!["TIMEOUT".into(), "Ack".into(), "Pong".into()];
        assert_eq!(mm.outputs(&word(&["Ping", "Start", "Ping"])), Some(expected));
        assert!(mm.to_dot().contains("s0 -> s1 [label=\"Start / Ack\"]"));
    }

    #[test_log::test]
    fn inequivalence_witness() {
        let left = MealyBuilder::default()
            .with_transitions([
                (0, "a", 1, "0"),
                (0, "b", 0, "0"),
                (1, "a", 1, "1"),
                (1, "b", 0, "0"),
            ])
            .into_mealy(0)
            .unwrap();
        let right = MealyBuilder::default()
            .with_transitions([(0, "a", 0, "0"), (0, "b", 0, "0")])
            .into_mealy(0)
            .unwrap();
        assert_eq!(left.witness_inequivalence(&right), Some(word(&["a", "a"])));
        assert_eq!(left.witness_inequivalence(&left.clone()), None);
    }
}
