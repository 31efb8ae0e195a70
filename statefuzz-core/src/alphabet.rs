use std::sync::Arc;

use itertools::Itertools;
use thiserror::Error;

use crate::{math, symbol::AbstractInput};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlphabetError {
    #[error("an alphabet must contain at least one input")]
    Empty,
    #[error("input `{0}` appears more than once")]
    Duplicate(String),
    #[error("input `{0}` is not part of the alphabet")]
    Unknown(String),
}

/// An ordered, finite and non-empty collection of [`AbstractInput`]s with pairwise distinct
/// names. The order is the order in which the inputs were given on construction, it determines
/// the order in which learners and test generators enumerate symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputAlphabet {
    symbols: math::Map<Arc<str>, AbstractInput>,
}

impl InputAlphabet {
    /// Creates a new alphabet from the given inputs. Fails if there are none or if two of
    /// them share a name.
    pub fn new<I: IntoIterator<Item = AbstractInput>>(inputs: I) -> Result<Self, AlphabetError> {
        let mut symbols = math::Map::default();
        for input in inputs {
            let key: Arc<str> = Arc::from(input.name());
            if symbols.insert(key, input.clone()).is_some() {
                return Err(AlphabetError::Duplicate(input.name().to_string()));
            }
        }
        if symbols.is_empty() {
            return Err(AlphabetError::Empty);
        }
        Ok(Self { symbols })
    }

    /// Builds an alphabet of plain inputs from their names.
    pub fn from_names<S: AsRef<str>, I: IntoIterator<Item = S>>(
        names: I,
    ) -> Result<Self, AlphabetError> {
        Self::new(names.into_iter().map(AbstractInput::new))
    }

    pub fn size(&self) -> usize {
        self.symbols.len()
    }

    /// Returns an iterator over all inputs in order.
    pub fn universe(&self) -> impl Iterator<Item = &AbstractInput> + '_ {
        self.symbols.values()
    }

    pub fn get(&self, name: &str) -> Option<&AbstractInput> {
        self.symbols.get(name)
    }

    pub fn contains(&self, input: &AbstractInput) -> bool {
        self.symbols.contains_key(input.name())
    }

    /// Parses a word given as input names separated by whitespace or commas.
    pub fn parse_word(&self, word: &str) -> Result<Vec<AbstractInput>, AlphabetError> {
        word.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| AlphabetError::Unknown(name.to_string()))
            })
            .collect()
    }

    /// Replaces every input in `word` by the instance stored in `self`, so that fields other
    /// than the name (kind, extended wait) are taken from the alphabet.
    pub fn resolve(&self, word: &[AbstractInput]) -> Result<Vec<AbstractInput>, AlphabetError> {
        word.iter()
            .map(|input| {
                self.get(input.name())
                    .cloned()
                    .ok_or_else(|| AlphabetError::Unknown(input.name().to_string()))
            })
            .collect()
    }

    /// Lists the names of all inputs, mainly useful for log messages.
    pub fn names(&self) -> String {
        self.symbols.keys().join(", ")
    }
}

impl<'a> IntoIterator for &'a InputAlphabet {
    type Item = &'a AbstractInput;
    type IntoIter = indexmap::map::Values<'a, Arc<str>, AbstractInput>;

    fn into_iter(self) -> Self::IntoIter {
        self.symbols.values()
    }
}
