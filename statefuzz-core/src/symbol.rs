use std::{
    cmp::Ordering,
    fmt::{Debug, Display},
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};

/// Names of the outputs that are reserved by the pipeline and never produced by a
/// protocol classifier.
pub mod sentinel {
    /// No response arrived within the active timeout.
    pub const TIMEOUT: &str = "TIMEOUT";
    /// A response arrived but could not be classified.
    pub const UNKNOWN: &str = "UNKNOWN";
    /// The transport or the process of the SUL is gone.
    pub const SOCKET_CLOSED: &str = "SOCKET_CLOSED";
    /// Execution was disabled earlier in the session.
    pub const DISABLED: &str = "DISABLED";

    /// All reserved names.
    pub const ALL: [&str; 4] = [TIMEOUT, UNKNOWN, SOCKET_CLOSED, DISABLED];
}

/// Coarse classification of a message, used both as the tag of an [`AbstractInput`]
/// and to describe how a concrete message is delivered by a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum MessageKind {
    /// A message of the key exchange itself, for example one of its flights or an error.
    #[default]
    Protocol,
    /// An unprotected application message.
    Application,
    /// An application message protected with the derived security context.
    ProtectedApplication,
    /// A final key exchange flight that carries a protected application request.
    CombinedApplication,
    /// Transport level control, such as an empty acknowledgement.
    Control,
}

/// An input symbol of the learning alphabet. Inputs are identified by their name, two
/// inputs with the same name are considered equal regardless of their other fields.
#[derive(Clone)]
pub struct AbstractInput {
    name: Arc<str>,
    kind: MessageKind,
    extended_wait: Option<Duration>,
}

impl AbstractInput {
    /// Creates a new input of kind [`MessageKind::Protocol`] without extended wait.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            kind: MessageKind::default(),
            extended_wait: None,
        }
    }

    /// Sets the message kind of `self`.
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Makes the input wait `wait` longer than the configured response wait for a reply.
    pub fn with_extended_wait(mut self, wait: Duration) -> Self {
        self.extended_wait = Some(wait);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn extended_wait(&self) -> Option<Duration> {
        self.extended_wait
    }
}

impl PartialEq for AbstractInput {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for AbstractInput {}

impl Hash for AbstractInput {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state)
    }
}

impl PartialOrd for AbstractInput {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for AbstractInput {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl Debug for AbstractInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Display for AbstractInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl From<&str> for AbstractInput {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An output symbol. Like inputs, outputs are compared and hashed by name only. The concrete
/// messages that were classified into the output and the liveness flag travel along for
/// inspection but do not influence learning.
#[derive(Clone)]
pub struct AbstractOutput {
    name: Arc<str>,
    messages: Vec<Vec<u8>>,
    alive: bool,
}

impl AbstractOutput {
    /// Creates a live output without attached messages.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            messages: vec![],
            alive: true,
        }
    }

    pub fn timeout() -> Self {
        Self::new(sentinel::TIMEOUT)
    }

    pub fn unknown() -> Self {
        Self::new(sentinel::UNKNOWN)
    }

    /// The closed output is the only sentinel that is not alive, it moves a session into
    /// its sink state.
    pub fn socket_closed() -> Self {
        Self::new(sentinel::SOCKET_CLOSED).with_alive(false)
    }

    pub fn disabled() -> Self {
        Self::new(sentinel::DISABLED)
    }

    /// Attaches a concrete message that produced this output.
    pub fn with_message(mut self, message: impl Into<Vec<u8>>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_alive(mut self, alive: bool) -> Self {
        self.alive = alive;
        self
    }

    pub fn set_alive(&mut self, alive: bool) {
        self.alive = alive;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[Vec<u8>] {
        &self.messages
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_timeout(&self) -> bool {
        &*self.name == sentinel::TIMEOUT
    }

    pub fn is_socket_closed(&self) -> bool {
        &*self.name == sentinel::SOCKET_CLOSED
    }

    pub fn is_disabled(&self) -> bool {
        &*self.name == sentinel::DISABLED
    }

    /// Returns true if the name of `self` is one of the reserved [`sentinel`] names.
    pub fn is_sentinel(&self) -> bool {
        sentinel::ALL.contains(&&*self.name)
    }
}

impl PartialEq for AbstractOutput {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for AbstractOutput {}

impl Hash for AbstractOutput {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state)
    }
}

impl PartialOrd for AbstractOutput {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for AbstractOutput {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl Debug for AbstractOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Display for AbstractOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl From<&str> for AbstractOutput {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn identity_is_the_name() {
        let a = AbstractInput::new("EDHOC_MESSAGE_1").with_extended_wait(Duration::from_millis(5));
        let b = AbstractInput::new("EDHOC_MESSAGE_1").with_kind(MessageKind::Application);
        assert_eq!(a, b);

        let x = AbstractOutput::new("EDHOC_MESSAGE_2").with_message(vec![1, 2, 3]);
        assert_eq!(x, AbstractOutput::new("EDHOC_MESSAGE_2"));
        assert_ne!(x, AbstractOutput::timeout());
    }

    #[test]
    fn sentinels() {
        assert!(!AbstractOutput::socket_closed().is_alive());
        assert!(AbstractOutput::timeout().is_alive());
        assert!(AbstractOutput::disabled().is_sentinel());
        assert!(!AbstractOutput::new("COAP_APP_MESSAGE").is_sentinel());
    }
}
