//! The SUL side of the learning setup: a [`Protocol`](protocol::Protocol) turns abstract
//! inputs into messages, a [`Mapper`](mapper::Mapper) exchanges them with the system under
//! learning through a [`Connector`](connector::Connector), and the [`Sul`](sul::Sul) wrapper
//! chain adds process management, resets, liveness tracking, counters and limits.

pub mod cleanup;

pub mod config;
pub use config::SulConfig;

pub mod connector;

pub mod context;

pub mod mapper;

pub mod protocol;

pub mod sul;

pub mod wrapper;

pub mod prelude {
    pub use super::{
        cleanup::CleanupTasks,
        config::{parse_input_timeouts, ProcessTrigger, ProtocolRole, SulConfig, TransportRole},
        connector::{
            ClientConnector, Connector, DynamicPort, MemoryConnector, ServerConnector,
            TransportError,
        },
        context::ExecutionContext,
        mapper::Mapper,
        protocol::{scripted::ScriptedProtocol, ConcreteMessage, Protocol},
        sul::{AbstractSul, LimitReached, ProtocolSul, Sul, SulError},
        wrapper::{Counter, SulWrapper},
    };
    pub use statefuzz_core::prelude::*;
}
