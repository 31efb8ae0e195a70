use std::time::Duration;

use statefuzz_core::symbol::MessageKind;
use thiserror::Error;

use crate::protocol::ConcreteMessage;

pub mod frame;
pub use frame::{Frame, FrameError, FrameType};

mod rendezvous;
pub use rendezvous::{Rendezvous, WaitOutcome};

mod client;
pub use client::{ClientConnector, DynamicPort};

mod server;
pub use server::ServerConnector;

mod memory;
pub use memory::{MemoryConnector, MemoryStats};

mod recorder;
pub use recorder::FrameRecorder;

/// Ways in which sending or receiving can fail. The mapper converts all of them into outputs,
/// none of them leaves the SUL.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("the connection is closed")]
    Closed,
    #[error("a {0:?} message cannot be delivered in the current exchange")]
    Unsupported(MessageKind),
    #[error("the peer's message was rejected below the application layer")]
    Unsuccessful,
    #[error("malformed frame: {0}")]
    Malformed(#[from] FrameError),
}

/// A message received from the SUL, together with what the receiving side knows about the
/// exchange it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub frame: Frame,
    /// Whether the exchange targets the application rather than the key exchange resource.
    pub application: bool,
}

impl Received {
    pub fn new(frame: Frame, application: bool) -> Self {
        Self { frame, application }
    }

    pub fn payload(&self) -> &[u8] {
        &self.frame.payload
    }

    /// Whether the frame is protected with the derived security context.
    pub fn is_protected(&self) -> bool {
        self.frame.has_option(frame::option::OSCORE)
    }

    /// Whether the frame carries a key exchange message.
    pub fn carries_protocol_message(&self) -> bool {
        self.frame.has_option(frame::option::EDHOC)
    }

    pub fn expects_application(&self) -> bool {
        self.application
    }
}

/// Returns true for message kinds that are addressed to the application resource.
pub fn is_application_kind(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::Application | MessageKind::ProtectedApplication | MessageKind::CombinedApplication
    )
}

/// The transport behind the mapper. A connector is opened at the start of every session and
/// carries at most one outstanding exchange at a time.
pub trait Connector: Send {
    /// Prepares the connector for a new session, dropping anything left from the last one.
    fn open(&mut self) -> Result<(), TransportError>;

    fn send(&mut self, message: &ConcreteMessage) -> Result<(), TransportError>;

    /// Blocks for at most the active timeout and returns what the SUL sent.
    fn receive(&mut self) -> Result<Received, TransportError>;

    fn set_timeout(&mut self, timeout: Duration);

    fn timeout(&self) -> Duration;

    /// Releases sockets and threads. Calling this more than once has no effect.
    fn shutdown(&mut self);

    /// Returns a closure that stops background activity of the connector from another owner,
    /// used to register the connector with cleanup tasks.
    fn shutdown_hook(&self) -> Option<Box<dyn FnOnce() + Send>> {
        None
    }
}

impl<C: Connector + ?Sized> Connector for Box<C> {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn send(&mut self, message: &ConcreteMessage) -> Result<(), TransportError> {
        (**self).send(message)
    }

    fn receive(&mut self) -> Result<Received, TransportError> {
        (**self).receive()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }

    fn shutdown_hook(&self) -> Option<Box<dyn FnOnce() + Send>> {
        (**self).shutdown_hook()
    }
}
