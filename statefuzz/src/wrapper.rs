use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    cleanup::CleanupTasks,
    connector::DynamicPort,
    sul::{AbstractSul, Sul},
    SulConfig,
};

mod alive;
pub use alive::AliveWrapper;

mod counter;
pub use counter::{Counter, ResetCounter, SymbolCounter};

mod limit;
pub use limit::{TestLimitWrapper, TimeLimitWrapper};

mod process;
pub use process::{ProcessHandler, ProcessWrapper};

mod resetting;
pub use resetting::ResettingWrapper;

/// Composes the wrapper chain around a SUL. From the inside out the chain consists of the
/// process wrapper and the resetting wrapper (each only if configured), the liveness wrapper,
/// the symbol and reset counters, and finally the time and test limits if they have been set.
pub struct SulWrapper {
    sul: Box<dyn Sul>,
    config: SulConfig,
    cleanup: CleanupTasks,
    dynamic_port: DynamicPort,
    symbols: Counter,
    resets: Counter,
    time_limit: Option<Duration>,
    test_limit: Option<u64>,
}

impl std::fmt::Debug for SulWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SulWrapper")
            .field("symbols", &self.symbols.get())
            .field("resets", &self.resets.get())
            .field("time_limit", &self.time_limit)
            .field("test_limit", &self.test_limit)
            .finish()
    }
}

impl SulWrapper {
    pub fn wrap<S: AbstractSul + 'static>(sul: S) -> Self {
        let config = sul.config().clone();
        let cleanup = sul.cleanup_tasks().clone();
        let dynamic_port = sul.dynamic_port().clone();
        let mut chain: Box<dyn Sul> = Box::new(sul);

        if let Some(command) = config.command.as_deref() {
            debug!("SUL process launched on {:?}", config.process_trigger);
            let handler = ProcessHandler::new(command, &config);
            chain = Box::new(ProcessWrapper::new(
                chain,
                handler,
                config.process_trigger,
                &cleanup,
            ));
        }
        if let Some(port) = config.reset_port {
            debug!("SUL reset through {}:{port}", config.reset_address);
            chain = Box::new(ResettingWrapper::new(
                chain,
                port,
                &config,
                dynamic_port.clone(),
                &cleanup,
            ));
        }

        let symbols = Counter::new();
        let resets = Counter::new();
        chain = Box::new(AliveWrapper::new(chain, config.sink_output()));
        chain = Box::new(SymbolCounter::new(chain, symbols.clone()));
        chain = Box::new(ResetCounter::new(chain, resets.clone()));

        Self {
            sul: chain,
            config,
            cleanup,
            dynamic_port,
            symbols,
            resets,
            time_limit: None,
            test_limit: None,
        }
    }

    /// Limits the wall clock time of the experiment. Absent or zero limits are ignored, as is
    /// any limit after the first.
    pub fn set_time_limit(&mut self, limit: Option<Duration>) -> &mut Self {
        match limit {
            _ if self.time_limit.is_some() => warn!("time limit already set, ignoring {limit:?}"),
            Some(limit) if !limit.is_zero() => self.time_limit = Some(limit),
            _ => warn!("ignoring invalid time limit {limit:?}"),
        }
        self
    }

    /// Limits the number of tests of the experiment. Absent or non-positive limits are ignored,
    /// as is any limit after the first.
    pub fn set_test_limit(&mut self, limit: Option<i64>) -> &mut Self {
        match limit {
            _ if self.test_limit.is_some() => warn!("test limit already set, ignoring {limit:?}"),
            Some(limit) if limit > 0 => self.test_limit = Some(limit as u64),
            _ => warn!("ignoring invalid test limit {limit:?}"),
        }
        self
    }

    pub fn config(&self) -> &SulConfig {
        &self.config
    }

    pub fn symbol_counter(&self) -> Counter {
        self.symbols.clone()
    }

    pub fn reset_counter(&self) -> Counter {
        self.resets.clone()
    }

    pub fn cleanup_tasks(&self) -> CleanupTasks {
        self.cleanup.clone()
    }

    pub fn dynamic_port(&self) -> DynamicPort {
        self.dynamic_port.clone()
    }

    /// Completes the chain with the configured limits.
    pub fn into_sul(self) -> Box<dyn Sul> {
        let mut chain = self.sul;
        if let Some(limit) = self.time_limit {
            chain = Box::new(TimeLimitWrapper::new(chain, limit));
        }
        if let Some(limit) = self.test_limit {
            chain = Box::new(TestLimitWrapper::new(chain, limit));
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use statefuzz_core::symbol::{AbstractInput, AbstractOutput, MessageKind};

    use super::*;
    use crate::{
        connector::{frame::code, Frame, FrameType, MemoryConnector, MemoryStats, TransportError},
        protocol::scripted::ScriptedProtocol,
        sul::{LimitReached, ProtocolSul, SulError},
    };

    fn wrapped() -> SulWrapper {
        let protocol = ScriptedProtocol::new()
            .input("A", MessageKind::Protocol, b"a".to_vec())
            .output(b"x".to_vec(), "X");
        let connector = MemoryConnector::new(|_| {
            Ok(Frame::new(FrameType::Acknowledgement, code::CHANGED, 1).with_payload(b"x".to_vec()))
        });
        SulWrapper::wrap(ProtocolSul::new(SulConfig::default(), protocol, connector))
    }

    /// A SUL whose connection is gone after the first input of every session.
    fn closing(config: SulConfig) -> (SulWrapper, MemoryStats) {
        let protocol = ScriptedProtocol::new().input("A", MessageKind::Protocol, b"a".to_vec());
        let connector = MemoryConnector::new(|_| Err(TransportError::Closed));
        let stats = connector.stats();
        (
            SulWrapper::wrap(ProtocolSul::new(config, protocol, connector)),
            stats,
        )
    }

    #[test_log::test]
    fn dead_sul_answers_the_chosen_sink() {
        for (as_timeout, sink) in [
            (false, AbstractOutput::socket_closed()),
            (true, AbstractOutput::timeout()),
        ] {
            let config = SulConfig {
                socket_closed_as_timeout: as_timeout,
                ..SulConfig::default()
            };
            let (wrapper, stats) = closing(config);
            let mut sul = wrapper.into_sul();
            sul.pre().unwrap();
            let first = sul.step(&AbstractInput::new("A")).unwrap();
            assert_eq!(first, AbstractOutput::socket_closed());
            assert_eq!(sul.step(&AbstractInput::new("A")).unwrap(), sink);
            assert_eq!(sul.step(&AbstractInput::new("A")).unwrap(), sink);
            sul.post().unwrap();
            assert_eq!(stats.sends(), 1);
        }
    }

    #[test_log::test]
    fn counters() {
        let wrapper = wrapped();
        let (symbols, resets) = (wrapper.symbol_counter(), wrapper.reset_counter());
        let mut sul = wrapper.into_sul();
        for _ in 0..2 {
            sul.pre().unwrap();
            sul.step(&AbstractInput::new("A")).unwrap();
            sul.step(&AbstractInput::new("A")).unwrap();
            sul.post().unwrap();
        }
        assert_eq!(symbols.get(), 4);
        assert_eq!(resets.get(), 2);
    }

    #[test_log::test]
    fn test_limit() {
        let mut wrapper = wrapped();
        wrapper.set_test_limit(Some(0)).set_test_limit(Some(2)).set_test_limit(Some(5));
        let mut sul = wrapper.into_sul();
        for _ in 0..2 {
            sul.pre().unwrap();
            sul.post().unwrap();
        }
        let err = sul.pre().unwrap_err();
        assert!(err.is_limit());
        assert!(matches!(err, SulError::Limit(LimitReached::Tests(2))));
    }

    #[test]
    fn time_limit() {
        let mut wrapper = wrapped();
        wrapper.set_time_limit(Some(Duration::from_millis(1)));
        let mut sul = wrapper.into_sul();
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            sul.pre(),
            Err(SulError::Limit(LimitReached::Time(_)))
        ));
    }
}
