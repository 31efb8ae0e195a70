use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use statefuzz_core::symbol::{AbstractInput, AbstractOutput};

use crate::sul::{Sul, SulError};

/// A monotonic counter shared by handle.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts every step.
#[derive(Debug)]
pub struct SymbolCounter<S> {
    inner: S,
    counter: Counter,
}

impl<S: Sul> SymbolCounter<S> {
    pub fn new(inner: S, counter: Counter) -> Self {
        Self { inner, counter }
    }
}

impl<S: Sul> Sul for SymbolCounter<S> {
    fn pre(&mut self) -> Result<(), SulError> {
        self.inner.pre()
    }

    fn step(&mut self, input: &AbstractInput) -> Result<AbstractOutput, SulError> {
        self.counter.increment();
        self.inner.step(input)
    }

    fn post(&mut self) -> Result<(), SulError> {
        self.inner.post()
    }
}

/// Counts every reset, that is every call to `pre`.
#[derive(Debug)]
pub struct ResetCounter<S> {
    inner: S,
    counter: Counter,
}

impl<S: Sul> ResetCounter<S> {
    pub fn new(inner: S, counter: Counter) -> Self {
        Self { inner, counter }
    }
}

impl<S: Sul> Sul for ResetCounter<S> {
    fn pre(&mut self) -> Result<(), SulError> {
        self.counter.increment();
        self.inner.pre()
    }

    fn step(&mut self, input: &AbstractInput) -> Result<AbstractOutput, SulError> {
        self.inner.step(input)
    }

    fn post(&mut self) -> Result<(), SulError> {
        self.inner.post()
    }
}
