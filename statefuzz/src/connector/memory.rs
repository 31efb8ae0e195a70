use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use super::{is_application_kind, Connector, Frame, Received, TransportError};
use crate::protocol::ConcreteMessage;

type Responder = Box<dyn FnMut(&ConcreteMessage) -> Result<Frame, TransportError> + Send>;

/// Counts what happened on a [`MemoryConnector`]. Clones share their counts, so a handle can be
/// kept after the connector has been moved into a SUL.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    opens: Arc<AtomicUsize>,
    sends: Arc<AtomicUsize>,
    receives: Arc<AtomicUsize>,
    timeouts: Arc<Mutex<Vec<Duration>>>,
}

impl MemoryStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn receives(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }

    /// The timeout that was active at each send.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A connector that answers in process, through a closure. Used to drive SULs without a
/// network, mostly in tests.
pub struct MemoryConnector {
    responder: Responder,
    timeout: Duration,
    outcome: Option<Result<Received, TransportError>>,
    stats: MemoryStats,
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("timeout", &self.timeout)
            .field("stats", &self.stats)
            .finish()
    }
}

impl MemoryConnector {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&ConcreteMessage) -> Result<Frame, TransportError> + Send + 'static,
    {
        Self {
            responder: Box::new(responder),
            timeout: Duration::from_millis(100),
            outcome: None,
            stats: MemoryStats::default(),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats.clone()
    }
}

impl Connector for MemoryConnector {
    fn open(&mut self) -> Result<(), TransportError> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        self.outcome = None;
        Ok(())
    }

    fn send(&mut self, message: &ConcreteMessage) -> Result<(), TransportError> {
        self.stats.sends.fetch_add(1, Ordering::SeqCst);
        self.stats
            .timeouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.timeout);
        let application = is_application_kind(message.kind);
        self.outcome =
            Some((self.responder)(message).map(|frame| Received::new(frame, application)));
        Ok(())
    }

    fn receive(&mut self) -> Result<Received, TransportError> {
        self.stats.receives.fetch_add(1, Ordering::SeqCst);
        self.outcome
            .take()
            .unwrap_or(Err(TransportError::Timeout(self.timeout)))
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn shutdown(&mut self) {
        self.outcome = None;
    }
}
