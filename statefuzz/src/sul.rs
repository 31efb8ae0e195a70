use std::{thread, time::Duration};

use statefuzz_core::symbol::{AbstractInput, AbstractOutput};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::{
    cleanup::CleanupTasks,
    connector::{ClientConnector, Connector, DynamicPort, ServerConnector, TransportError},
    context::ExecutionContext,
    mapper::Mapper,
    protocol::Protocol,
    SulConfig,
};

/// An experiment budget that has been used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LimitReached {
    #[error("time limit of {0:?} reached")]
    Time(Duration),
    #[error("test limit of {0} tests reached")]
    Tests(u64),
}

#[derive(Debug, Error)]
pub enum SulError {
    /// A component broke its contract, for instance a protocol produced no message.
    #[error("contract violation: {0}")]
    Contract(String),
    #[error("expected {expected} as initial message but received {received}")]
    InitialMessage {
        expected: AbstractOutput,
        received: AbstractOutput,
    },
    /// The transport could not be opened at the start of a session, for instance because an
    /// address does not resolve or a port cannot be bound. Failures while stepping are turned
    /// into outputs by the mapper instead.
    #[error("setting up the transport failed: {0}")]
    Setup(#[from] TransportError),
    #[error("SUL process: {0}")]
    Process(#[source] std::io::Error),
    #[error("reset failed: {0}")]
    Reset(String),
    #[error(transparent)]
    Limit(#[from] LimitReached),
}

impl SulError {
    pub fn is_limit(&self) -> bool {
        matches!(self, SulError::Limit(_))
    }
}

/// A system under learning. Every session starts with [`Sul::pre`], consists of any number
/// of steps and ends with [`Sul::post`], after which the system is back in its initial state.
pub trait Sul {
    fn pre(&mut self) -> Result<(), SulError>;

    fn step(&mut self, input: &AbstractInput) -> Result<AbstractOutput, SulError>;

    fn post(&mut self) -> Result<(), SulError>;
}

impl<S: Sul + ?Sized> Sul for Box<S> {
    fn pre(&mut self) -> Result<(), SulError> {
        (**self).pre()
    }

    fn step(&mut self, input: &AbstractInput) -> Result<AbstractOutput, SulError> {
        (**self).step(input)
    }

    fn post(&mut self) -> Result<(), SulError> {
        (**self).post()
    }
}

/// A SUL at the bottom of a wrapper chain, exposing what the wrappers share with it.
pub trait AbstractSul: Sul {
    fn config(&self) -> &SulConfig;

    fn cleanup_tasks(&self) -> &CleanupTasks;

    fn dynamic_port(&self) -> &DynamicPort;
}

/// Drives a [`Protocol`] over a [`Connector`] through a [`Mapper`].
pub struct ProtocolSul<P: Protocol> {
    config: SulConfig,
    mapper: Mapper<P>,
    connector: Box<dyn Connector>,
    context: Option<ExecutionContext<P::Session>>,
    cleanup: CleanupTasks,
    dynamic_port: DynamicPort,
    hook_registered: bool,
    awaiting_initial: bool,
}

impl<P: Protocol> std::fmt::Debug for ProtocolSul<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSul")
            .field("transport_role", &self.config.transport_role)
            .field("protocol_role", &self.config.protocol_role)
            .field("live", &self.context.is_some())
            .finish()
    }
}

impl<P: Protocol> ProtocolSul<P> {
    pub fn new<C: Connector + 'static>(config: SulConfig, protocol: P, connector: C) -> Self {
        let mut connector: Box<dyn Connector> = Box::new(connector);
        connector.set_timeout(config.response_wait);
        Self {
            mapper: Mapper::new(protocol, &config),
            config,
            connector,
            context: None,
            cleanup: CleanupTasks::new(),
            dynamic_port: DynamicPort::new(),
            hook_registered: false,
            awaiting_initial: false,
        }
    }

    /// Creates a SUL that talks UDP, as client or server depending on the transport role.
    pub fn udp(config: SulConfig, protocol: P) -> Result<Self, SulError> {
        if config.is_server() {
            let connector = ServerConnector::bind(&config)?;
            Ok(Self::new(config, protocol, connector))
        } else {
            let dynamic_port = DynamicPort::new();
            let connector = ClientConnector::new(&config, dynamic_port.clone());
            let mut sul = Self::new(config, protocol, connector);
            sul.dynamic_port = dynamic_port;
            Ok(sul)
        }
    }

    pub fn mapper(&self) -> &Mapper<P> {
        &self.mapper
    }

    /// The context of the current session, if one has been started.
    pub fn context(&self) -> Option<&ExecutionContext<P::Session>> {
        self.context.as_ref()
    }

    fn sleep(what: &str, duration: Duration) {
        if !duration.is_zero() {
            debug!("{what}: sleeping {duration:?}");
            thread::sleep(duration);
        }
    }

    /// Waits for the message with which the SUL opens the conversation in the server role.
    fn await_initial_message(
        &mut self,
        context: &mut ExecutionContext<P::Session>,
    ) -> Result<(), SulError> {
        let original = self.connector.timeout();
        self.connector.set_timeout(self.config.initial_message_wait);
        let received = self.mapper.receive_output(context, self.connector.as_mut());
        self.connector.set_timeout(original);

        let expected = self
            .mapper
            .protocol()
            .expected_initial_output(self.config.protocol_role);
        if received != expected {
            return Err(SulError::InitialMessage { expected, received });
        }
        trace!("initial message {received} arrived");
        Ok(())
    }
}

impl<P: Protocol> Sul for ProtocolSul<P> {
    fn pre(&mut self) -> Result<(), SulError> {
        self.context = Some(ExecutionContext::new(
            self.mapper.protocol().new_session(&self.config),
        ));
        self.connector.set_timeout(self.config.response_wait);
        self.connector.open().map_err(SulError::Setup)?;
        if !self.hook_registered {
            if let Some(hook) = self.connector.shutdown_hook() {
                self.cleanup.submit(hook);
            }
            self.hook_registered = true;
        }

        Self::sleep("start wait", self.config.start_wait);
        if self.config.is_server() {
            Self::sleep("client wait", self.config.client_wait);
            self.awaiting_initial = true;
        }
        Ok(())
    }

    fn step(&mut self, input: &AbstractInput) -> Result<AbstractOutput, SulError> {
        let mut context = self
            .context
            .take()
            .ok_or_else(|| SulError::Contract(format!("{input} executed outside of a session")))?;
        let result = self.step_in(input, &mut context);
        self.context = Some(context);
        result
    }

    fn post(&mut self) -> Result<(), SulError> {
        if let Some(context) = self.context.as_ref() {
            trace!("session ended after {} steps", context.step_count());
        }
        self.awaiting_initial = false;
        Ok(())
    }
}

impl<P: Protocol> ProtocolSul<P> {
    fn step_in(
        &mut self,
        input: &AbstractInput,
        context: &mut ExecutionContext<P::Session>,
    ) -> Result<AbstractOutput, SulError> {
        if self.awaiting_initial {
            self.awaiting_initial = false;
            self.await_initial_message(context)?;
        }
        context.add_step_context();
        context.set_current_input(input);
        let output = self.mapper.execute(input, context, self.connector.as_mut())?;
        trace!("{input} / {output}");
        Ok(output)
    }
}

impl<P: Protocol> AbstractSul for ProtocolSul<P> {
    fn config(&self) -> &SulConfig {
        &self.config
    }

    fn cleanup_tasks(&self) -> &CleanupTasks {
        &self.cleanup
    }

    fn dynamic_port(&self) -> &DynamicPort {
        &self.dynamic_port
    }
}

impl<P: Protocol> Drop for ProtocolSul<P> {
    fn drop(&mut self) {
        info!("shutting down SUL connector");
        self.connector.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use statefuzz_core::symbol::MessageKind;

    use super::*;
    use crate::{
        connector::{frame::code, Frame, FrameType, MemoryConnector, Received},
        protocol::scripted::ScriptedProtocol,
    };

    fn protocol() -> ScriptedProtocol {
        ScriptedProtocol::new()
            .input("Start", MessageKind::Protocol, b"start".to_vec())
            .output(b"ack".to_vec(), "Ack")
    }

    fn connector() -> MemoryConnector {
        MemoryConnector::new(|_| {
            Ok(Frame::new(FrameType::Acknowledgement, code::CHANGED, 1).with_payload(b"ack".to_vec()))
        })
    }

    #[test]
    fn step_outside_session_is_a_contract_violation() {
        let mut sul = ProtocolSul::new(SulConfig::default(), protocol(), connector());
        assert!(matches!(
            sul.step(&AbstractInput::new("Start")),
            Err(SulError::Contract(_))
        ));
    }

    #[test_log::test]
    fn sessions_start_fresh() {
        let connector = connector();
        let stats = connector.stats();
        let mut sul = ProtocolSul::new(SulConfig::default(), protocol(), connector);
        for _ in 0..2 {
            sul.pre().unwrap();
            let out = sul.step(&AbstractInput::new("Start")).unwrap();
            assert_eq!(out, "Ack".into());
            assert_eq!(sul.context().unwrap().step_count(), 1);
            sul.post().unwrap();
        }
        assert_eq!(stats.opens(), 2);
        assert_eq!(sul.context().unwrap().session().sent.len(), 1);
    }

    struct Unbindable;

    impl Connector for Unbindable {
        fn open(&mut self) -> Result<(), TransportError> {
            Err(std::io::Error::from(std::io::ErrorKind::AddrInUse).into())
        }

        fn send(&mut self, _message: &crate::protocol::ConcreteMessage) -> Result<(), TransportError> {
            Err(TransportError::Closed)
        }

        fn receive(&mut self) -> Result<Received, TransportError> {
            Err(TransportError::Closed)
        }

        fn set_timeout(&mut self, _timeout: Duration) {}

        fn timeout(&self) -> Duration {
            Duration::ZERO
        }

        fn shutdown(&mut self) {}
    }

    #[test]
    fn failed_open_is_a_setup_error() {
        let mut sul = ProtocolSul::new(SulConfig::default(), protocol(), Unbindable);
        let err = sul.pre().unwrap_err();
        assert!(matches!(err, SulError::Setup(TransportError::Io(_))));
        assert!(!err.is_limit());
        assert!(err.to_string().starts_with("setting up the transport failed"));
    }

    #[test]
    fn wrong_initial_message_is_fatal() {
        let config = SulConfig {
            transport_role: crate::config::TransportRole::Server,
            initial_message_wait: Duration::from_millis(10),
            ..SulConfig::default()
        };
        // nothing ever arrives, so the initial message is a timeout
        let mut sul = ProtocolSul::new(
            config,
            protocol(),
            MemoryConnector::new(|_| Err(TransportError::Closed)),
        );
        sul.pre().unwrap();
        match sul.step(&AbstractInput::new("Start")) {
            Err(SulError::InitialMessage { received, .. }) => assert!(received.is_timeout()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
