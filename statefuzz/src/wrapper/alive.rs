use statefuzz_core::symbol::{AbstractInput, AbstractOutput};
use tracing::trace;

use crate::sul::{Sul, SulError};

/// Turns the SUL into a sink once an output reports that it is no longer alive: every further
/// step of the session answers the sink output without reaching the inner SUL.
#[derive(Debug)]
pub struct AliveWrapper<S> {
    inner: S,
    alive: bool,
    sink: AbstractOutput,
}

impl<S: Sul> AliveWrapper<S> {
    pub fn new(inner: S, sink: AbstractOutput) -> Self {
        Self {
            inner,
            alive: true,
            sink,
        }
    }
}

impl<S: Sul> Sul for AliveWrapper<S> {
    fn pre(&mut self) -> Result<(), SulError> {
        self.alive = true;
        self.inner.pre()
    }

    fn step(&mut self, input: &AbstractInput) -> Result<AbstractOutput, SulError> {
        if !self.alive {
            trace!("{input} skipped, the SUL is gone");
            return Ok(self.sink.clone());
        }
        let output = self.inner.step(input)?;
        self.alive = output.is_alive();
        Ok(output)
    }

    fn post(&mut self) -> Result<(), SulError> {
        self.inner.post()
    }
}
