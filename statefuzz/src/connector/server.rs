use std::{
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use statefuzz_core::symbol::MessageKind;
use tracing::{debug, trace, warn};

use super::{
    frame::{code, option},
    Connector, Frame, FrameRecorder, FrameType, Received, Rendezvous, TransportError,
};
use crate::{protocol::ConcreteMessage, SulConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DATAGRAM_SIZE: usize = 2048;

/// A request of the SUL waiting for a reply.
#[derive(Debug, Clone)]
struct Exchange {
    request: Frame,
    peer: SocketAddr,
    /// The request was rejected before reaching a resource.
    unsuccessful: bool,
    application: bool,
}

/// Resources served by the listener.
#[derive(Debug, Clone)]
struct Resources {
    protocol: String,
    application: String,
}

impl Resources {
    fn classify(&self, path: &str) -> Option<bool> {
        if path == self.protocol {
            Some(false)
        } else if path == self.application {
            Some(true)
        } else {
            None
        }
    }
}

/// Connector for the server role. A listener thread owns the socket and deposits every new
/// request into a single slot [`Rendezvous`], from which the stepping thread takes it.
pub struct ServerConnector {
    socket: UdpSocket,
    cell: Arc<Rendezvous<Exchange>>,
    stop: Sender<()>,
    listener: Option<JoinHandle<()>>,
    timeout: Duration,
    wait_after_send: bool,
    current: Option<Exchange>,
    /// Whether the last send already waited for the follow-up request.
    awaited: bool,
    recorder: Option<FrameRecorder>,
}

impl std::fmt::Debug for ServerConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnector")
            .field("local", &self.socket.local_addr().ok())
            .field("timeout", &self.timeout)
            .field("current", &self.current.as_ref().map(|e| e.request.mid))
            .finish()
    }
}

impl ServerConnector {
    /// Binds to the configured address and starts listening right away, so requests sent
    /// before the first session are not lost.
    pub fn bind(config: &SulConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(config.address.as_str())?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let cell = Arc::new(Rendezvous::new());
        let (stop, stopped) = crossbeam_channel::bounded(1);
        let resources = Resources {
            protocol: config.protocol_resource.clone(),
            application: config.application_resource.clone(),
        };

        let listener = {
            let socket = socket.try_clone()?;
            let cell = Arc::clone(&cell);
            thread::Builder::new()
                .name("sfz-listener".to_string())
                .spawn(move || listen(socket, cell, stopped, resources))?
        };
        debug!("server connector listening on {}", socket.local_addr()?);

        let recorder = config
            .concretize_dir
            .as_deref()
            .and_then(|dir| FrameRecorder::create(dir).ok());
        Ok(Self {
            socket,
            cell,
            stop,
            listener: Some(listener),
            timeout: config.response_wait,
            wait_after_send: config.wait_after_send,
            current: None,
            awaited: false,
            recorder,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    fn reply(&self, exchange: &Exchange, message: &ConcreteMessage) -> Frame {
        let request = &exchange.request;
        if message.kind == MessageKind::Control {
            return Frame::empty(FrameType::Acknowledgement, request.mid);
        }
        let mut frame = Frame::new(
            FrameType::Acknowledgement,
            message.code.unwrap_or(code::CHANGED),
            request.mid,
        )
        .with_token(request.token.clone())
        .with_payload(message.payload.clone());
        if message.kind == MessageKind::ProtectedApplication {
            frame = frame.with_option(option::OSCORE, Vec::<u8>::new());
        }
        frame
    }
}

impl Connector for ServerConnector {
    fn open(&mut self) -> Result<(), TransportError> {
        self.current = None;
        self.awaited = false;
        if let Some(stale) = self.cell.clear() {
            debug!("dropping request {} left from the previous session", stale.request.mid);
        }
        Ok(())
    }

    fn send(&mut self, message: &ConcreteMessage) -> Result<(), TransportError> {
        let Some(exchange) = self.current.take().or_else(|| self.cell.try_take()) else {
            debug!("no pending request to reply to");
            return Err(TransportError::Unsupported(message.kind));
        };
        let unsupported = match message.kind {
            MessageKind::CombinedApplication => true,
            MessageKind::ProtectedApplication => !exchange.request.has_option(option::OSCORE),
            _ => false,
        };
        if unsupported {
            debug!(
                "a {:?} message is no reply to request {}",
                message.kind, exchange.request.mid
            );
            self.current = Some(exchange);
            return Err(TransportError::Unsupported(message.kind));
        }

        if let Some(stale) = self.cell.clear() {
            debug!("discarding request {} that arrived before the reply", stale.request.mid);
        }
        let reply = self.reply(&exchange, message);
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record_sent(&reply);
        }
        self.socket.send_to(&reply.encode(), exchange.peer)?;
        trace!("replied {reply} to {}", exchange.peer);

        self.awaited = self.wait_after_send;
        if self.wait_after_send {
            self.current = self.cell.take_timeout(self.timeout);
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Received, TransportError> {
        if self.current.is_none() && !self.awaited {
            self.current = self.cell.take_timeout(self.timeout);
        }
        self.awaited = false;
        let Some(exchange) = self.current.as_ref() else {
            return Err(TransportError::Timeout(self.timeout));
        };
        if exchange.unsuccessful {
            self.current = None;
            return Err(TransportError::Unsuccessful);
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record_received(&exchange.request);
        }
        Ok(Received::new(exchange.request.clone(), exchange.application))
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                warn!("listener thread panicked");
            }
            debug!("server connector stopped");
        }
    }

    fn shutdown_hook(&self) -> Option<Box<dyn FnOnce() + Send>> {
        let stop = self.stop.clone();
        Some(Box::new(move || {
            let _ = stop.try_send(());
        }))
    }
}

impl Drop for ServerConnector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn listen(
    socket: UdpSocket,
    cell: Arc<Rendezvous<Exchange>>,
    stopped: Receiver<()>,
    resources: Resources,
) {
    let mut buf = [0u8; DATAGRAM_SIZE];
    let mut last: Option<(SocketAddr, u16)> = None;
    loop {
        match stopped.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                warn!("listener stopped: {e}");
                break;
            }
        };
        let request = match Frame::decode(&buf[..n]) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("ignoring malformed datagram from {peer}: {e}");
                continue;
            }
        };
        if matches!(request.ty, FrameType::Acknowledgement | FrameType::Reset) {
            trace!("ignoring {request} from {peer}");
            continue;
        }
        if last == Some((peer, request.mid)) {
            trace!("ignoring retransmission of {}", request.mid);
            continue;
        }
        last = Some((peer, request.mid));

        if request.is_empty() {
            let pong = Frame::empty(FrameType::Reset, request.mid);
            if let Err(e) = socket.send_to(&pong.encode(), peer) {
                debug!("could not answer ping from {peer}: {e}");
            }
            continue;
        }

        let path = request.path();
        let exchange = match resources.classify(&path) {
            Some(application) => Exchange {
                request,
                peer,
                unsuccessful: false,
                application,
            },
            None => {
                debug!("request for unknown resource `{path}` from {peer}");
                let not_found = Frame::new(FrameType::Acknowledgement, code::NOT_FOUND, request.mid)
                    .with_token(request.token.clone());
                if let Err(e) = socket.send_to(&not_found.encode(), peer) {
                    debug!("could not reject request from {peer}: {e}");
                }
                Exchange {
                    request,
                    peer,
                    unsuccessful: true,
                    application: false,
                }
            }
        };
        if let Err(dropped) = cell.offer(exchange) {
            warn!(
                "request {} dropped, another request is still pending",
                dropped.request.mid
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    struct Peer {
        socket: UdpSocket,
        server: SocketAddr,
        mid: u16,
    }

    impl Peer {
        fn new(server: SocketAddr) -> Self {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            socket
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            Self {
                socket,
                server,
                mid: 100,
            }
        }

        fn request(&mut self, path: &str, payload: &[u8]) -> u16 {
            self.mid += 1;
            let frame = Frame::new(FrameType::Confirmable, code::POST, self.mid)
                .with_token(self.mid.to_be_bytes())
                .with_path(path)
                .with_payload(payload.to_vec());
            self.socket.send_to(&frame.encode(), self.server).unwrap();
            self.mid
        }

        fn response(&self) -> Frame {
            let mut buf = [0u8; 512];
            let (n, _) = self.socket.recv_from(&mut buf).unwrap();
            Frame::decode(&buf[..n]).unwrap()
        }
    }

    fn connector() -> ServerConnector {
        let config = SulConfig {
            address: "127.0.0.1:0".to_string(),
            response_wait: Duration::from_millis(300),
            ..SulConfig::default()
        };
        let mut connector = ServerConnector::bind(&config).unwrap();
        connector.open().unwrap();
        connector
    }

    #[test_log::test]
    fn one_request_in_flight() {
        let mut connector = connector();
        let mut peer = Peer::new(connector.local_addr().unwrap());

        let first = peer.request(".well-known/edhoc", b"m1");
        let received = connector.receive().unwrap();
        assert_eq!(received.frame.mid, first);
        assert!(!received.expects_application());

        // a second request before the reply does not replace the pending one
        peer.request(".well-known/edhoc", b"m1 again");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(connector.receive().unwrap().frame.mid, first);

        connector
            .send(&ConcreteMessage::new(MessageKind::Protocol, b"m2".to_vec()))
            .unwrap();
        let reply = peer.response();
        assert_eq!(reply.mid, first);
        assert_eq!(reply.payload, b"m2");

        // nothing follows the reply, so the next receive times out instead of hanging
        let start = Instant::now();
        assert!(matches!(connector.receive(), Err(TransportError::Timeout(_))));
        assert!(start.elapsed() < Duration::from_secs(2));
        connector.shutdown();
    }

    #[test_log::test]
    fn unknown_resource_is_unsuccessful() {
        let mut connector = connector();
        let mut peer = Peer::new(connector.local_addr().unwrap());
        peer.request("teapot", b"tea");
        assert!(matches!(connector.receive(), Err(TransportError::Unsuccessful)));
        assert_eq!(peer.response().code, code::NOT_FOUND);
    }

    #[test_log::test]
    fn protected_reply_needs_protected_request() {
        let mut connector = connector();
        let mut peer = Peer::new(connector.local_addr().unwrap());
        peer.request("app", b"plain");
        assert!(connector.receive().unwrap().expects_application());
        assert!(matches!(
            connector.send(&ConcreteMessage::new(
                MessageKind::ProtectedApplication,
                b"secret".to_vec()
            )),
            Err(TransportError::Unsupported(MessageKind::ProtectedApplication))
        ));
        // the request is still there for a supported reply
        connector
            .send(&ConcreteMessage::new(MessageKind::Application, b"ok".to_vec()))
            .unwrap();
        assert_eq!(peer.response().payload, b"ok");
    }

    #[test]
    fn reply_without_request_is_unsupported() {
        let mut connector = connector();
        assert!(matches!(
            connector.send(&ConcreteMessage::new(MessageKind::Protocol, b"m2".to_vec())),
            Err(TransportError::Unsupported(MessageKind::Protocol))
        ));
    }
}
