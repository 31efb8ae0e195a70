//! Value types shared by the SUL and the learning side: abstract input and output symbols,
//! alphabets, words and queries, and Mealy machines used as hypotheses.

/// Collection aliases used throughout the workspace.
pub mod math;

mod show;
pub use show::{show_duration, Show};

/// Abstract input and output symbols together with the reserved output sentinels.
pub mod symbol;

/// Ordered alphabets of inputs.
pub mod alphabet;

pub mod word;

/// Deterministic Mealy machines.
pub mod mealy;

pub mod prelude {
    pub use super::{
        alphabet::{AlphabetError, InputAlphabet},
        math,
        mealy::{MealyBuilder, MealyMachine, StateIndex},
        show_duration,
        symbol::{sentinel, AbstractInput, AbstractOutput, MessageKind},
        word::{InputWord, OutputWord, Query},
        Show,
    };
}
