use std::{cell::RefCell, fmt::Display, rc::Rc};

use statefuzz_core::{
    math,
    symbol::{AbstractInput, AbstractOutput},
    word::{InputWord, OutputWord},
    Show,
};
use tracing::trace;

/// An observation that contradicts what is already stored in an [`ObservationTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Inputs up to and including the first diverging one.
    pub input: InputWord,
    pub stored: OutputWord,
    pub observed: OutputWord,
}

impl Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} answered with {} but {} before",
            self.input.show(),
            self.observed.show(),
            self.stored.show()
        )
    }
}

impl std::error::Error for Conflict {}

#[derive(Debug, Clone, Default)]
struct Node {
    children: math::Map<AbstractInput, (AbstractOutput, usize)>,
}

/// A prefix sharing store of all answered queries. Outputs after a terminating output are
/// neither stored nor compared, the SUL is expected to answer every later input with the
/// terminating output itself, or with the sink output if the terminating output is not alive.
#[derive(Debug, Clone)]
pub struct ObservationTree {
    nodes: Vec<Node>,
    terminating: math::Set<AbstractOutput>,
    sink: AbstractOutput,
}

pub type SharedTree = Rc<RefCell<ObservationTree>>;

impl Default for ObservationTree {
    fn default() -> Self {
        Self::new([])
    }
}

impl ObservationTree {
    pub fn new<I: IntoIterator<Item = AbstractOutput>>(terminating: I) -> Self {
        Self {
            nodes: vec![Node::default()],
            terminating: terminating.into_iter().collect(),
            sink: AbstractOutput::socket_closed(),
        }
    }

    /// Sets the output a dead SUL gives after a terminating output that is not alive.
    pub fn with_sink(mut self, sink: AbstractOutput) -> Self {
        self.sink = sink;
        self
    }

    /// The output that follows `terminal` for the rest of a query.
    pub fn continuation(&self, terminal: &AbstractOutput) -> AbstractOutput {
        if terminal.is_alive() {
            terminal.clone()
        } else {
            self.sink.clone()
        }
    }

    pub fn shared(self) -> SharedTree {
        Rc::new(RefCell::new(self))
    }

    pub fn is_terminating(&self, output: &AbstractOutput) -> bool {
        self.terminating.contains(output)
    }

    /// Number of stored observations, that is of edges in the tree.
    pub fn size(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Returns the stored outputs for `input`. If the path reaches a terminating output, the
    /// stored outputs up to and including it are returned, which may be shorter than `input`.
    pub fn lookup(&self, input: &[AbstractInput]) -> Option<OutputWord> {
        let mut node = 0;
        let mut outputs = Vec::with_capacity(input.len());
        for symbol in input {
            let (output, next) = self.nodes[node].children.get(symbol)?;
            outputs.push(output.clone());
            if self.is_terminating(output) {
                break;
            }
            node = *next;
        }
        Some(outputs)
    }

    /// Checks `output` against the stored outputs along `input` without modifying the tree.
    pub fn check(&self, input: &[AbstractInput], output: &[AbstractOutput]) -> Result<(), Conflict> {
        let mut node = 0;
        let mut stored = vec![];
        for (i, (symbol, observed)) in input.iter().zip(output).enumerate() {
            let Some((known, next)) = self.nodes[node].children.get(symbol) else {
                return Ok(());
            };
            stored.push(known.clone());
            if known != observed {
                return Err(Conflict {
                    input: input[..=i].to_vec(),
                    stored,
                    observed: output[..=i].to_vec(),
                });
            }
            if self.is_terminating(known) {
                return Ok(());
            }
            node = *next;
        }
        Ok(())
    }

    /// Stores an answered query. Nothing is stored if the answer conflicts with an earlier one.
    pub fn insert(&mut self, input: &[AbstractInput], output: &[AbstractOutput]) -> Result<(), Conflict> {
        debug_assert_eq!(input.len(), output.len());
        self.check(input, output)?;

        let mut node = 0;
        for (symbol, observed) in input.iter().zip(output) {
            let next = match self.nodes[node].children.get(symbol) {
                Some((_, next)) => *next,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[node]
                        .children
                        .insert(symbol.clone(), (observed.clone(), next));
                    next
                }
            };
            if self.is_terminating(observed) {
                break;
            }
            node = next;
        }
        trace!("stored {} / {}", input.show(), output.show());
        Ok(())
    }
}
