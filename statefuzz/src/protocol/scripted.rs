//! A protocol defined by a small table, used to drive simple SULs from the command line and
//! in tests.
//!
//! ```text
//! # input <name> <kind> <payload>, `-` stands for an empty payload
//! input Start protocol start
//! input Ping application ping
//! # output <payload> <name>, a payload ending in `*` matches by prefix
//! output ack Ack
//! output pong* Pong
//! # outputs after which all further inputs of the session are disabled
//! disable-on Bye
//! # output expected as initial message in the server role
//! initial responder Hello
//! ```

use statefuzz_core::{
    math,
    symbol::{AbstractInput, AbstractOutput, MessageKind},
};
use thiserror::Error;
use tracing::trace;

use super::{ConcreteMessage, Protocol};
use crate::{config::ProtocolRole, connector::Received, context::ExecutionContext, SulConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("line {line}: unknown directive `{directive}`")]
    UnknownDirective { line: usize, directive: String },
    #[error("line {line}: expected {expected}")]
    MissingField { line: usize, expected: &'static str },
    #[error("line {line}: unknown message kind `{kind}`")]
    UnknownKind { line: usize, kind: String },
    #[error("line {line}: unknown protocol role `{role}`")]
    UnknownRole { line: usize, role: String },
    #[error("line {line}: input `{name}` is defined twice")]
    DuplicateInput { line: usize, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(Vec<u8>),
    Prefix(Vec<u8>),
}

impl Pattern {
    fn parse(text: &str) -> Self {
        match text.strip_suffix('*') {
            Some(prefix) => Pattern::Prefix(payload(prefix)),
            None => Pattern::Exact(payload(text)),
        }
    }

    fn matches(&self, bytes: &[u8]) -> bool {
        match self {
            Pattern::Exact(p) => p == bytes,
            Pattern::Prefix(p) => bytes.starts_with(p),
        }
    }
}

fn payload(text: &str) -> Vec<u8> {
    if text == "-" {
        vec![]
    } else {
        text.as_bytes().to_vec()
    }
}

fn parse_kind(text: &str) -> Option<MessageKind> {
    Some(match text {
        "protocol" => MessageKind::Protocol,
        "application" => MessageKind::Application,
        "protected" => MessageKind::ProtectedApplication,
        "combined" => MessageKind::CombinedApplication,
        "control" => MessageKind::Control,
        _ => return None,
    })
}

/// What happened in a session of a [`ScriptedProtocol`].
#[derive(Debug, Clone, Default)]
pub struct ScriptSession {
    pub sent: Vec<AbstractInput>,
    pub received: Vec<AbstractOutput>,
}

/// A [`Protocol`] that maps input names to fixed payloads and classifies payloads by a table.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProtocol {
    messages: math::Map<String, ConcreteMessage>,
    responses: Vec<(Pattern, AbstractOutput)>,
    disabling: math::Set<AbstractOutput>,
    initial: math::Map<ProtocolRole, AbstractOutput>,
}

impl ScriptedProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, name: &str, kind: MessageKind, payload: impl Into<Vec<u8>>) -> Self {
        self.messages
            .insert(name.to_string(), ConcreteMessage::new(kind, payload));
        self
    }

    pub fn output(mut self, payload: impl Into<Vec<u8>>, name: &str) -> Self {
        self.responses
            .push((Pattern::Exact(payload.into()), AbstractOutput::new(name)));
        self
    }

    pub fn disable_on(mut self, name: &str) -> Self {
        self.disabling.insert(AbstractOutput::new(name));
        self
    }

    pub fn initial(mut self, role: ProtocolRole, name: &str) -> Self {
        self.initial.insert(role, AbstractOutput::new(name));
        self
    }

    /// Names of all inputs, in the order they were defined.
    pub fn input_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.messages.keys().map(String::as_str)
    }

    /// The inputs of the script with their message kinds.
    pub fn inputs(&self) -> Vec<AbstractInput> {
        self.messages
            .iter()
            .map(|(name, message)| AbstractInput::new(name).with_kind(message.kind))
            .collect()
    }

    pub fn parse(script: &str) -> Result<Self, ScriptError> {
        let mut protocol = Self::new();
        for (index, raw) in script.lines().enumerate() {
            let line = index + 1;
            let content = raw.split('#').next().unwrap_or_default().trim();
            let mut fields = content.split_whitespace();
            let Some(directive) = fields.next() else {
                continue;
            };
            let mut field = |expected: &'static str| {
                fields
                    .next()
                    .ok_or(ScriptError::MissingField { line, expected })
            };
            match directive {
                "input" => {
                    let name = field("an input name")?;
                    let kind_text = field("a message kind")?;
                    let payload_text = field("a payload")?;
                    let kind = parse_kind(kind_text).ok_or_else(|| ScriptError::UnknownKind {
                        line,
                        kind: kind_text.to_string(),
                    })?;
                    if protocol.messages.contains_key(name) {
                        return Err(ScriptError::DuplicateInput {
                            line,
                            name: name.to_string(),
                        });
                    }
                    protocol = protocol.input(name, kind, payload(payload_text));
                }
                "output" => {
                    let pattern = field("a payload pattern")?;
                    let name = field("an output name")?;
                    protocol
                        .responses
                        .push((Pattern::parse(pattern), AbstractOutput::new(name)));
                }
                "disable-on" => {
                    let name = field("an output name")?;
                    protocol = protocol.disable_on(name);
                }
                "initial" => {
                    let role_text = field("a protocol role")?;
                    let name = field("an output name")?;
                    let role = match role_text {
                        "initiator" => ProtocolRole::Initiator,
                        "responder" => ProtocolRole::Responder,
                        _ => {
                            return Err(ScriptError::UnknownRole {
                                line,
                                role: role_text.to_string(),
                            })
                        }
                    };
                    protocol = protocol.initial(role, name);
                }
                other => {
                    return Err(ScriptError::UnknownDirective {
                        line,
                        directive: other.to_string(),
                    })
                }
            }
        }
        Ok(protocol)
    }
}

impl Protocol for ScriptedProtocol {
    type Session = ScriptSession;

    fn new_session(&self, _config: &SulConfig) -> Self::Session {
        ScriptSession::default()
    }

    fn is_enabled(&self, input: &AbstractInput, _context: &ExecutionContext<ScriptSession>) -> bool {
        self.messages.contains_key(input.name())
    }

    fn generate_message(
        &self,
        input: &AbstractInput,
        _context: &mut ExecutionContext<ScriptSession>,
    ) -> Option<ConcreteMessage> {
        self.messages.get(input.name()).cloned()
    }

    fn post_send_update(&self, input: &AbstractInput, context: &mut ExecutionContext<ScriptSession>) {
        context.session_mut().sent.push(input.clone());
    }

    fn classify_protocol(
        &self,
        received: &Received,
        _context: &mut ExecutionContext<ScriptSession>,
    ) -> Option<AbstractOutput> {
        let output = self
            .responses
            .iter()
            .find(|(pattern, _)| pattern.matches(received.payload()))
            .map(|(_, output)| output.clone().with_message(received.payload().to_vec()));
        trace!(
            "classified {} payload bytes as {:?}",
            received.payload().len(),
            output
        );
        output
    }

    fn post_receive_update(
        &self,
        output: &AbstractOutput,
        context: &mut ExecutionContext<ScriptSession>,
    ) {
        context.session_mut().received.push(output.clone());
        if self.disabling.contains(output) {
            context.disable_execution();
        }
    }

    fn expected_initial_output(&self, role: ProtocolRole) -> AbstractOutput {
        match self.initial.get(&role) {
            Some(output) => output.clone(),
            None => match role {
                ProtocolRole::Responder => {
                    AbstractOutput::new(super::output::EDHOC_MESSAGE_1)
                }
                ProtocolRole::Initiator => {
                    AbstractOutput::new(super::output::COAP_EMPTY_MESSAGE)
                }
            },
        }
    }
}
