use statefuzz_core::symbol::{AbstractInput, AbstractOutput, MessageKind};

use crate::{config::ProtocolRole, connector::Received, context::ExecutionContext, SulConfig};

pub mod scripted;

/// Names of the outputs produced by classification.
pub mod output {
    pub const EDHOC_MESSAGE_1: &str = "EDHOC_MESSAGE_1";
    pub const EDHOC_MESSAGE_2: &str = "EDHOC_MESSAGE_2";
    pub const EDHOC_MESSAGE_3: &str = "EDHOC_MESSAGE_3";
    pub const EDHOC_MESSAGE_4: &str = "EDHOC_MESSAGE_4";
    pub const EDHOC_ERROR_MESSAGE: &str = "EDHOC_ERROR_MESSAGE";
    pub const EDHOC_MESSAGE_3_OSCORE_APP: &str = "EDHOC_MESSAGE_3_OSCORE_APP";
    pub const OSCORE_APP_MESSAGE: &str = "OSCORE_APP_MESSAGE";
    pub const COAP_APP_MESSAGE: &str = "COAP_APP_MESSAGE";
    pub const COAP_MESSAGE: &str = "COAP_MESSAGE";
    pub const COAP_ERROR_MESSAGE: &str = "COAP_ERROR_MESSAGE";
    pub const COAP_EMPTY_MESSAGE: &str = "COAP_EMPTY_MESSAGE";
    /// The requested message could not be sent in the current exchange.
    pub const UNSUPPORTED_MESSAGE: &str = "UNSUPPORTED_MESSAGE";
    /// The peer's message was rejected before it reached the application.
    pub const UNSUCCESSFUL_MESSAGE: &str = "UNSUCCESSFUL_MESSAGE";
}

/// A message ready to be handed to a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteMessage {
    pub payload: Vec<u8>,
    pub kind: MessageKind,
    /// Request method or response code. If absent, the connector picks the usual code for
    /// its role and the message kind.
    pub code: Option<u8>,
}

impl ConcreteMessage {
    pub fn new(kind: MessageKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            kind,
            code: None,
        }
    }

    pub fn with_code(mut self, code: u8) -> Self {
        self.code = Some(code);
        self
    }
}

/// The codec between abstract symbols and concrete messages. Implementations keep all
/// protocol state in [`Protocol::Session`], which lives exactly as long as one session.
///
/// Classification runs through the `classify_*` methods in a fixed order: combined application
/// messages, plain application messages, protocol messages and finally transport control
/// messages. The first method that returns an output wins, if none does the output is
/// `UNKNOWN`.
pub trait Protocol {
    type Session;

    fn new_session(&self, config: &SulConfig) -> Self::Session;

    /// Returns false if `input` cannot be executed in the current state of the session, the
    /// step then yields the disabled output without touching the transport.
    fn is_enabled(&self, input: &AbstractInput, context: &ExecutionContext<Self::Session>) -> bool {
        let _ = (input, context);
        true
    }

    fn pre_send_update(
        &self,
        input: &AbstractInput,
        context: &mut ExecutionContext<Self::Session>,
    ) {
        let _ = (input, context);
    }

    /// Produces the concrete message for `input`. Returning `None` is a contract violation.
    fn generate_message(
        &self,
        input: &AbstractInput,
        context: &mut ExecutionContext<Self::Session>,
    ) -> Option<ConcreteMessage>;

    fn post_send_update(
        &self,
        input: &AbstractInput,
        context: &mut ExecutionContext<Self::Session>,
    ) {
        let _ = (input, context);
    }

    /// A final key exchange flight carrying a protected application message.
    fn classify_combined(
        &self,
        received: &Received,
        context: &mut ExecutionContext<Self::Session>,
    ) -> Option<AbstractOutput> {
        let _ = context;
        (received.is_protected() && received.carries_protocol_message())
            .then(|| AbstractOutput::new(output::EDHOC_MESSAGE_3_OSCORE_APP))
    }

    fn classify_application(
        &self,
        received: &Received,
        context: &mut ExecutionContext<Self::Session>,
    ) -> Option<AbstractOutput> {
        let _ = context;
        (received.is_protected() && !received.carries_protocol_message())
            .then(|| AbstractOutput::new(output::OSCORE_APP_MESSAGE))
    }

    /// Recognizes protocol messages by their structure.
    fn classify_protocol(
        &self,
        received: &Received,
        context: &mut ExecutionContext<Self::Session>,
    ) -> Option<AbstractOutput>;

    fn classify_control(
        &self,
        received: &Received,
        context: &mut ExecutionContext<Self::Session>,
    ) -> Option<AbstractOutput> {
        let _ = context;
        let frame = &received.frame;
        if frame.is_error() {
            Some(AbstractOutput::new(output::COAP_ERROR_MESSAGE))
        } else if frame.payload.is_empty() {
            Some(AbstractOutput::new(output::COAP_EMPTY_MESSAGE))
        } else if received.expects_application() {
            Some(AbstractOutput::new(output::COAP_APP_MESSAGE))
        } else {
            Some(AbstractOutput::new(output::COAP_MESSAGE))
        }
    }

    fn post_receive_update(
        &self,
        output: &AbstractOutput,
        context: &mut ExecutionContext<Self::Session>,
    ) {
        let _ = (output, context);
    }

    /// The output the first message of a session must be classified as when the SUL starts
    /// the conversation.
    fn expected_initial_output(&self, role: ProtocolRole) -> AbstractOutput {
        match role {
            ProtocolRole::Responder => AbstractOutput::new(output::EDHOC_MESSAGE_1),
            ProtocolRole::Initiator => AbstractOutput::new(output::COAP_EMPTY_MESSAGE),
        }
    }
}
