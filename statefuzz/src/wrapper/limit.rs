use std::time::{Duration, Instant};

use statefuzz_core::symbol::{AbstractInput, AbstractOutput};
use tracing::info;

use crate::sul::{LimitReached, Sul, SulError};

/// Fails every call once more than `limit` has passed since construction.
#[derive(Debug)]
pub struct TimeLimitWrapper<S> {
    inner: S,
    limit: Duration,
    started: Instant,
}

impl<S: Sul> TimeLimitWrapper<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self {
            inner,
            limit,
            started: Instant::now(),
        }
    }

    fn check(&self) -> Result<(), SulError> {
        if self.started.elapsed() > self.limit {
            info!("time limit of {:?} reached", self.limit);
            return Err(LimitReached::Time(self.limit).into());
        }
        Ok(())
    }
}

impl<S: Sul> Sul for TimeLimitWrapper<S> {
    fn pre(&mut self) -> Result<(), SulError> {
        self.check()?;
        self.inner.pre()
    }

    fn step(&mut self, input: &AbstractInput) -> Result<AbstractOutput, SulError> {
        self.check()?;
        self.inner.step(input)
    }

    fn post(&mut self) -> Result<(), SulError> {
        self.inner.post()
    }
}

/// Allows at most `limit` tests, a test being one session.
#[derive(Debug)]
pub struct TestLimitWrapper<S> {
    inner: S,
    limit: u64,
    tests: u64,
}

impl<S: Sul> TestLimitWrapper<S> {
    pub fn new(inner: S, limit: u64) -> Self {
        Self {
            inner,
            limit,
            tests: 0,
        }
    }
}

impl<S: Sul> Sul for TestLimitWrapper<S> {
    fn pre(&mut self) -> Result<(), SulError> {
        if self.tests >= self.limit {
            info!("test limit of {} reached", self.limit);
            return Err(LimitReached::Tests(self.limit).into());
        }
        self.tests += 1;
        self.inner.pre()
    }

    fn step(&mut self, input: &AbstractInput) -> Result<AbstractOutput, SulError> {
        self.inner.step(input)
    }

    fn post(&mut self) -> Result<(), SulError> {
        self.inner.post()
    }
}
