use std::{
    io::ErrorKind,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use statefuzz_core::symbol::MessageKind;
use tracing::{debug, trace, warn};

use super::{
    frame::{code, option},
    is_application_kind, Connector, Frame, FrameRecorder, FrameType, Received, TransportError,
};
use crate::{protocol::ConcreteMessage, SulConfig};

const DATAGRAM_SIZE: usize = 2048;

/// A port announced at runtime, for instance by a launcher that restarts the SUL on a fresh
/// port. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct DynamicPort(Arc<AtomicU16>);

impl DynamicPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, port: u16) {
        self.0.store(port, Ordering::SeqCst)
    }

    /// Returns the announced port, if any was announced yet.
    pub fn get(&self) -> Option<u16> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            port => Some(port),
        }
    }
}

/// Connector for the client role: every `send` is a confirmable request to the SUL and the
/// matching response is stored until the following `receive`.
#[derive(Debug)]
pub struct ClientConnector {
    address: String,
    protocol_resource: String,
    application_resource: String,
    dynamic_port: DynamicPort,
    timeout: Duration,
    socket: Option<UdpSocket>,
    peer: Option<SocketAddr>,
    next_mid: u16,
    outcome: Option<Result<Received, TransportError>>,
    recorder: Option<FrameRecorder>,
}

impl ClientConnector {
    pub fn new(config: &SulConfig, dynamic_port: DynamicPort) -> Self {
        let recorder = config
            .concretize_dir
            .as_deref()
            .and_then(|dir| match FrameRecorder::create(dir) {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    warn!("not recording frames to {}: {e}", dir.display());
                    None
                }
            });
        Self {
            address: config.address.clone(),
            protocol_resource: config.protocol_resource.clone(),
            application_resource: config.application_resource.clone(),
            dynamic_port,
            timeout: config.response_wait,
            socket: None,
            peer: None,
            next_mid: std::process::id() as u16,
            outcome: None,
            recorder,
        }
    }

    /// The local address of the socket of the current session.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        let mut peer = self
            .address
            .to_socket_addrs()?
            .next()
            .ok_or(TransportError::Closed)?;
        if let Some(port) = self.dynamic_port.get() {
            peer.set_port(port);
        }
        Ok(peer)
    }

    fn request(&mut self, message: &ConcreteMessage) -> Frame {
        let mid = self.next_mid;
        self.next_mid = self.next_mid.wrapping_add(1);
        if message.kind == MessageKind::Control {
            return Frame::empty(FrameType::Confirmable, mid);
        }

        let path = if is_application_kind(message.kind) {
            &self.application_resource
        } else {
            &self.protocol_resource
        };
        let mut frame = Frame::new(
            FrameType::Confirmable,
            message.code.unwrap_or(code::POST),
            mid,
        )
        .with_token(mid.to_be_bytes())
        .with_path(path)
        .with_payload(message.payload.clone());
        match message.kind {
            MessageKind::ProtectedApplication => {
                frame = frame.with_option(option::OSCORE, Vec::<u8>::new());
            }
            MessageKind::CombinedApplication => {
                frame = frame
                    .with_option(option::EDHOC, Vec::<u8>::new())
                    .with_option(option::OSCORE, Vec::<u8>::new());
            }
            _ => {}
        }
        frame
    }

    /// Waits for the response to `request`. An empty acknowledgement is only returned if no
    /// separate response follows it before the deadline.
    fn await_response(&mut self, request: &Frame, application: bool) -> Result<Received, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;
        let deadline = Instant::now() + self.timeout;
        let mut acknowledged: Option<Frame> = None;
        let mut buf = [0u8; DATAGRAM_SIZE];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            socket.set_read_timeout(Some(remaining))?;
            let (n, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => return Err(e.into()),
            };
            let frame = match Frame::decode(&buf[..n]) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("ignoring malformed datagram from {from}: {e}");
                    continue;
                }
            };

            if frame.mid == request.mid && frame.ty == FrameType::Acknowledgement {
                if frame.is_empty() && !request.is_empty() {
                    trace!("request {} acknowledged, awaiting separate response", request.mid);
                    acknowledged = Some(frame);
                    continue;
                }
                return Ok(Received::new(frame, application));
            }
            if frame.mid == request.mid && frame.ty == FrameType::Reset {
                return Ok(Received::new(frame, application));
            }
            if frame.ty == FrameType::Confirmable && frame.token == request.token && !frame.token.is_empty() {
                let ack = Frame::empty(FrameType::Acknowledgement, frame.mid);
                socket.send_to(&ack.encode(), from)?;
                return Ok(Received::new(frame, application));
            }
            trace!("ignoring unrelated frame {frame} from {from}");
        }

        match acknowledged {
            Some(ack) => Ok(Received::new(ack, application)),
            None => Err(TransportError::Timeout(self.timeout)),
        }
    }
}

impl Connector for ClientConnector {
    fn open(&mut self) -> Result<(), TransportError> {
        let peer = self.resolve()?;
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        debug!(
            "client connector bound to {} for {peer}",
            socket.local_addr()?
        );
        self.socket = Some(socket);
        self.peer = Some(peer);
        self.outcome = None;
        Ok(())
    }

    fn send(&mut self, message: &ConcreteMessage) -> Result<(), TransportError> {
        self.outcome = None;
        let peer = self.peer.ok_or(TransportError::Closed)?;
        let request = self.request(message);
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record_sent(&request);
        }
        self.socket
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send_to(&request.encode(), peer)?;
        trace!("sent {request} to {peer}");

        let outcome = self.await_response(&request, is_application_kind(message.kind));
        if let (Ok(received), Some(recorder)) = (&outcome, self.recorder.as_mut()) {
            recorder.record_received(&received.frame);
        }
        self.outcome = Some(outcome);
        Ok(())
    }

    fn receive(&mut self) -> Result<Received, TransportError> {
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
        if self.socket.take().is_some() {
            debug!("client connector closed");
        }
        self.peer = None;
        self.outcome = None;
    }
}
