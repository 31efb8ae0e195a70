use std::{path::PathBuf, time::Duration};

use statefuzz_core::{math, symbol::AbstractOutput};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("expected `input:milliseconds` but found `{0}`")]
    MalformedEntry(String),
    #[error("`{value}` is not a valid timeout for input `{input}`")]
    InvalidTimeout { input: String, value: String },
    #[error("input `{0}` is given more than one timeout")]
    DuplicateInput(String),
}

/// The transport role taken by the fuzzer. In the [`TransportRole::Client`] role the fuzzer
/// sends requests to a SUL that acts as server, in the [`TransportRole::Server`] role the
/// SUL is a client that sends requests which the fuzzer answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportRole {
    #[default]
    Client,
    Server,
}

/// The role the fuzzer takes in the key exchange, independent of the transport role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolRole {
    #[default]
    Initiator,
    Responder,
}

/// When the SUL process is launched by the process wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessTrigger {
    /// A fresh process for every test, terminated after it.
    #[default]
    NewTest,
    /// One process for the whole learning run.
    StartOfLearning,
}

/// Everything the SUL side needs to know, supplied by the caller as plain data.
#[derive(Debug, Clone)]
pub struct SulConfig {
    pub transport_role: TransportRole,
    pub protocol_role: ProtocolRole,
    /// Address of the SUL in the client role, the address to listen on in the server role.
    pub address: String,
    pub protocol_resource: String,
    pub application_resource: String,

    /// Time to wait for a response to an input.
    pub response_wait: Duration,
    /// Input specific response waits, replacing `response_wait` for the named inputs.
    pub input_response_timeout: math::Map<String, Duration>,
    /// In the server role, wait for a follow-up request after replying.
    pub wait_after_send: bool,
    /// Upper bound on the wait for the initial message of a session in the server role.
    pub initial_message_wait: Duration,

    /// Command that launches the SUL, if it should be managed as a process.
    pub command: Option<String>,
    pub terminate_command: Option<String>,
    pub process_dir: Option<PathBuf>,
    pub process_trigger: ProcessTrigger,
    /// Time to wait after launching the process.
    pub run_wait: Duration,

    /// Port of a launcher that restarts the SUL on a `reset` command.
    pub reset_port: Option<u16>,
    pub reset_address: String,
    /// Time to wait before connecting to the launcher.
    pub reset_command_wait: Duration,
    /// Read and connect timeout of the reset channel.
    pub reset_ack_wait: Duration,

    /// Time to wait at the start of every session.
    pub start_wait: Duration,
    /// Additional time to wait at the start of every session in the server role.
    pub client_wait: Duration,

    /// Directory into which every sent and received frame is recorded.
    pub concretize_dir: Option<PathBuf>,
    /// Answer the steps after the SUL went away with `TIMEOUT` instead of `SOCKET_CLOSED`.
    pub socket_closed_as_timeout: bool,
}

impl Default for SulConfig {
    fn default() -> Self {
        Self {
            transport_role: TransportRole::Client,
            protocol_role: ProtocolRole::Initiator,
            address: "127.0.0.1:5683".to_string(),
            protocol_resource: ".well-known/edhoc".to_string(),
            application_resource: "app".to_string(),
            response_wait: Duration::from_millis(100),
            input_response_timeout: math::Map::default(),
            wait_after_send: true,
            initial_message_wait: Duration::from_secs(60),
            command: None,
            terminate_command: None,
            process_dir: None,
            process_trigger: ProcessTrigger::NewTest,
            run_wait: Duration::ZERO,
            reset_port: None,
            reset_address: "localhost".to_string(),
            reset_command_wait: Duration::ZERO,
            reset_ack_wait: Duration::from_secs(20),
            start_wait: Duration::ZERO,
            client_wait: Duration::ZERO,
            concretize_dir: None,
            socket_closed_as_timeout: false,
        }
    }
}

impl SulConfig {
    pub fn is_server(&self) -> bool {
        self.transport_role == TransportRole::Server
    }

    /// The output of every step after the SUL stopped being alive.
    pub fn sink_output(&self) -> AbstractOutput {
        if self.socket_closed_as_timeout {
            AbstractOutput::timeout()
        } else {
            AbstractOutput::socket_closed()
        }
    }

    /// Returns the response wait that applies to the input named `input` when it carries no
    /// extended wait of its own, if it differs from the default.
    pub fn response_timeout_for(&self, input: &str) -> Option<Duration> {
        self.input_response_timeout.get(input).copied()
    }
}

/// Parses input specific timeouts given as `input1:value1,input2:value2`, values being
/// milliseconds. Whitespace around entries is ignored and an empty string yields an empty map.
pub fn parse_input_timeouts(text: &str) -> Result<math::Map<String, Duration>, ConfigError> {
    let mut out = math::Map::default();
    for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((input, value)) = entry.split_once(':') else {
            return Err(ConfigError::MalformedEntry(entry.to_string()));
        };
        let (input, value) = (input.trim(), value.trim());
        if input.is_empty() {
            return Err(ConfigError::MalformedEntry(entry.to_string()));
        }
        let millis: u64 = value.parse().map_err(|_| ConfigError::InvalidTimeout {
            input: input.to_string(),
            value: value.to_string(),
        })?;
        if out
            .insert(input.to_string(), Duration::from_millis(millis))
            .is_some()
        {
            return Err(ConfigError::DuplicateInput(input.to_string()));
        }
    }
    Ok(out)
}
