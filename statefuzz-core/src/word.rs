use std::fmt::Display;

use crate::{
    symbol::{AbstractInput, AbstractOutput},
    Show,
};

/// A finite sequence of inputs.
pub type InputWord = Vec<AbstractInput>;
/// A finite sequence of outputs.
pub type OutputWord = Vec<AbstractOutput>;

/// An input word together with the output word it produced, either on the SUL or on a
/// hypothesis. Queries are what membership oracles answer and what gets logged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    input: InputWord,
    output: OutputWord,
}

impl Query {
    pub fn new(input: InputWord, output: OutputWord) -> Self {
        debug_assert_eq!(
            input.len(),
            output.len(),
            "a query needs one output per input"
        );
        Self { input, output }
    }

    pub fn input(&self) -> &[AbstractInput] {
        &self.input
    }

    pub fn output(&self) -> &[AbstractOutput] {
        &self.output
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    /// Returns the index of the first position where `self` and `other` disagree in their
    /// output. The inputs are expected to coincide on the common prefix.
    pub fn first_difference(&self, other: &[AbstractOutput]) -> Option<usize> {
        self.output
            .iter()
            .zip(other.iter())
            .position(|(a, b)| a != b)
    }

    pub fn into_parts(self) -> (InputWord, OutputWord) {
        (self.input, self.output)
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.input.show(), self.output.show())
    }
}
