use std::time::Duration;

use statefuzz_core::{
    math,
    symbol::{AbstractInput, AbstractOutput},
};
use tracing::{debug, trace};

use crate::{
    connector::{Connector, Received, TransportError},
    context::ExecutionContext,
    protocol::{output, Protocol},
    sul::SulError,
    SulConfig,
};

/// Translates abstract inputs into concrete messages and received messages back into abstract
/// outputs. Every transport failure becomes an output, only contract violations are errors.
#[derive(Debug, Clone)]
pub struct Mapper<P> {
    protocol: P,
    response_wait: Duration,
    input_timeouts: math::Map<String, Duration>,
}

impl<P: Protocol> Mapper<P> {
    pub fn new(protocol: P, config: &SulConfig) -> Self {
        Self {
            protocol,
            response_wait: config.response_wait,
            input_timeouts: config.input_response_timeout.clone(),
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// The timeout to use while executing `input`, if it is not the connector's usual one.
    /// An extended wait on the input takes precedence over a configured input timeout.
    pub fn timeout_for(&self, input: &AbstractInput) -> Option<Duration> {
        input
            .extended_wait()
            .map(|extra| self.response_wait + extra)
            .or_else(|| self.input_timeouts.get(input.name()).copied())
    }

    /// Executes one input on `connector`. The connector's timeout is raised for the duration
    /// of this call if [`Mapper::timeout_for`] asks for it and is restored before returning.
    ///
    /// A disabled output disables the rest of the session, as does a protocol hook that
    /// disables the context during the step.
    pub fn execute<C: Connector + ?Sized>(
        &self,
        input: &AbstractInput,
        context: &mut ExecutionContext<P::Session>,
        connector: &mut C,
    ) -> Result<AbstractOutput, SulError> {
        if !context.is_execution_enabled() || !self.protocol.is_enabled(input, context) {
            trace!("{input} is disabled");
            context.disable_execution();
            return Ok(AbstractOutput::disabled());
        }

        let original = connector.timeout();
        if let Some(timeout) = self.timeout_for(input) {
            debug!("waiting {timeout:?} for the response to {input}");
            connector.set_timeout(timeout);
        }
        let result = self.exchange(input, context, connector);
        connector.set_timeout(original);

        let output = result?;
        if output.is_disabled() || !context.is_execution_enabled() {
            debug!("{input} disabled the session");
            context.disable_execution();
        }
        Ok(output)
    }

    fn exchange<C: Connector + ?Sized>(
        &self,
        input: &AbstractInput,
        context: &mut ExecutionContext<P::Session>,
        connector: &mut C,
    ) -> Result<AbstractOutput, SulError> {
        self.protocol.pre_send_update(input, context);
        let message = self
            .protocol
            .generate_message(input, context)
            .ok_or_else(|| SulError::Contract(format!("no message generated for {input}")))?;

        let output = match connector.send(&message) {
            Ok(()) => {
                self.protocol.post_send_update(input, context);
                self.receive_output(context, connector)
            }
            Err(e) => {
                debug!("sending {input} failed: {e}");
                output_for_error(&e)
            }
        };
        self.protocol.post_receive_update(&output, context);
        Ok(output)
    }

    /// Receives the next message from `connector` and classifies it.
    pub fn receive_output<C: Connector + ?Sized>(
        &self,
        context: &mut ExecutionContext<P::Session>,
        connector: &mut C,
    ) -> AbstractOutput {
        match connector.receive() {
            Ok(received) => self.classify(&received, context),
            Err(e) => {
                trace!("receiving failed: {e}");
                output_for_error(&e)
            }
        }
    }

    fn classify(
        &self,
        received: &Received,
        context: &mut ExecutionContext<P::Session>,
    ) -> AbstractOutput {
        let protocol = &self.protocol;
        let output = protocol
            .classify_combined(received, context)
            .or_else(|| protocol.classify_application(received, context))
            .or_else(|| protocol.classify_protocol(received, context))
            .or_else(|| protocol.classify_control(received, context))
            .unwrap_or_else(AbstractOutput::unknown);
        if output.messages().is_empty() && !received.payload().is_empty() {
            output.with_message(received.payload().to_vec())
        } else {
            output
        }
    }
}

fn output_for_error(error: &TransportError) -> AbstractOutput {
    match error {
        TransportError::Timeout(_) => AbstractOutput::timeout(),
        TransportError::Io(_) | TransportError::Closed => AbstractOutput::socket_closed(),
        TransportError::Unsupported(_) => AbstractOutput::new(output::UNSUPPORTED_MESSAGE),
        TransportError::Unsuccessful => AbstractOutput::new(output::UNSUCCESSFUL_MESSAGE),
        TransportError::Malformed(_) => AbstractOutput::unknown(),
    }
}
