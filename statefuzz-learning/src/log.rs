use std::{
    cell::RefCell,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    rc::Rc,
};

use statefuzz_core::{symbol::AbstractOutput, Show};
use tracing::warn;

/// A line oriented log shared between the oracles. Write failures are reported through
/// `tracing` and do not interrupt learning.
#[derive(Clone)]
pub struct QueryLog {
    out: Rc<RefCell<Box<dyn Write>>>,
}

impl std::fmt::Debug for QueryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("QueryLog")
    }
}

impl QueryLog {
    pub fn new<W: Write + 'static>(out: W) -> Self {
        Self {
            out: Rc::new(RefCell::new(Box::new(out))),
        }
    }

    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }

    /// A log that drops everything.
    pub fn sink() -> Self {
        Self::new(io::sink())
    }

    pub fn line(&self, line: impl AsRef<str>) {
        let mut out = self.out.borrow_mut();
        if let Err(e) = writeln!(out, "{}", line.as_ref()).and_then(|_| out.flush()) {
            warn!("could not write to log: {e}");
        }
    }
}

/// Records every disagreement between answers to the same query.
#[derive(Debug, Clone)]
pub struct NonDeterminismLog {
    log: QueryLog,
}

impl NonDeterminismLog {
    pub fn new(log: QueryLog) -> Self {
        Self { log }
    }

    /// Logs that `input` was answered with `observed` where `expected` was known.
    pub fn disagreement<I: Show + ?Sized>(
        &self,
        input: &I,
        expected: &[AbstractOutput],
        observed: &[AbstractOutput],
    ) {
        self.log.line(format!(
            "non-determinism: {} expected {} observed {}",
            input.show(),
            expected.show(),
            observed.show()
        ));
    }

    pub fn note(&self, message: impl AsRef<str>) {
        self.log.line(message);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use statefuzz_core::symbol::AbstractInput;

    use super::*;

    /// Collects everything written, for inspection by tests.
    #[derive(Clone, Default)]
    pub(crate) struct Capture(pub Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn one_line_per_disagreement() {
        let capture = Capture::default();
        let log = NonDeterminismLog::new(QueryLog::new(capture.clone()));
        let input = vec![AbstractInput::new("A"), AbstractInput::new("B")];
        log.disagreement(
            &input,
            &[AbstractOutput::new("x"), AbstractOutput::new("y")],
            &[AbstractOutput::new("x"), AbstractOutput::timeout()],
        );
        let written = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            written,
            "non-determinism: [A B] expected [x y] observed [x TIMEOUT]\n"
        );
    }
}
