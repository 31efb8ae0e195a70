use std::{net::UdpSocket, thread, time::Duration};

use statefuzz::{
    connector::{frame::code, Frame, FrameType},
    prelude::*,
};

fn ping_protocol() -> ScriptedProtocol {
    ScriptedProtocol::new()
        .input("Start", MessageKind::Protocol, b"start".to_vec())
        .input("Ping", MessageKind::Protocol, b"ping".to_vec())
        .output(b"ack".to_vec(), "Ack")
        .output(b"pong".to_vec(), "Pong")
}

/// Answers `start` with `ack` and `ping` with `pong`, and crashes on the third message.
fn crashing_connector() -> MemoryConnector {
    let mut messages = 0;
    MemoryConnector::new(move |message| {
        messages += 1;
        if messages >= 3 {
            return Err(TransportError::Closed);
        }
        let payload: &[u8] = match message.payload.as_slice() {
            b"start" => b"ack",
            _ => b"pong",
        };
        Ok(Frame::new(FrameType::Acknowledgement, code::CHANGED, messages as u16)
            .with_payload(payload.to_vec()))
    })
}

fn run(sul: &mut dyn Sul, alphabet: &InputAlphabet, word: &str) -> Vec<AbstractOutput> {
    let word = alphabet.parse_word(word).unwrap();
    sul.pre().unwrap();
    let outputs = word.iter().map(|i| sul.step(i).unwrap()).collect();
    sul.post().unwrap();
    outputs
}

#[test_log::test]
fn crashed_sul_stays_closed() {
    let alphabet = InputAlphabet::from_names(["Start", "Ping"]).unwrap();
    let connector = crashing_connector();
    let stats = connector.stats();
    let wrapper = SulWrapper::wrap(ProtocolSul::new(
        SulConfig::default(),
        ping_protocol(),
        connector,
    ));
    let symbols = wrapper.symbol_counter();
    let mut sul = wrapper.into_sul();

    let outputs = run(sul.as_mut(), &alphabet, "Start Ping Ping Ping");
    let expected: Vec<AbstractOutput> = vec![
        "Ack".into(),
        "Pong".into(),
        AbstractOutput::socket_closed(),
        AbstractOutput::socket_closed(),
    ];
    assert_eq!(outputs, expected);

    // the last step never reached the transport
    assert_eq!(stats.sends(), 3);
    assert_eq!(stats.receives(), 3);
    assert_eq!(symbols.get(), 4);
}

#[test_log::test]
fn extended_wait_is_restored_after_each_step() {
    let config = SulConfig {
        response_wait: Duration::from_millis(80),
        ..SulConfig::default()
    };
    let alphabet = InputAlphabet::new([
        AbstractInput::new("Start").with_extended_wait(Duration::from_millis(120)),
        AbstractInput::new("Ping"),
    ])
    .unwrap();
    let connector = MemoryConnector::new(|_| Err(TransportError::Timeout(Duration::ZERO)));
    let stats = connector.stats();
    let mut sul = ProtocolSul::new(config, ping_protocol(), connector);

    sul.pre().unwrap();
    for input in alphabet.parse_word("Start Ping Start").unwrap() {
        assert!(sul.step(&input).unwrap().is_timeout());
    }
    sul.post().unwrap();

    let (short, long) = (Duration::from_millis(80), Duration::from_millis(200));
    assert_eq!(stats.timeouts(), vec![long, short, long]);
}

/// A SUL acting as client: it opens every session with a key exchange request, and sends a
/// follow-up request after every reply until it has sent three requests.
fn udp_client_sul(server: std::net::SocketAddr) -> thread::JoinHandle<Vec<Frame>> {
    thread::spawn(move || {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut replies = vec![];
        let mut buf = [0u8; 512];
        for mid in 1..=3u16 {
            let payload: &[u8] = if mid == 1 { b"m1" } else { b"m3" };
            let request = Frame::new(FrameType::Confirmable, code::POST, mid)
                .with_token(mid.to_be_bytes())
                .with_path(".well-known/edhoc")
                .with_payload(payload.to_vec());
            socket.send_to(&request.encode(), server).unwrap();
            match socket.recv_from(&mut buf) {
                Ok((n, _)) => replies.push(Frame::decode(&buf[..n]).unwrap()),
                Err(_) => break,
            }
        }
        replies
    })
}

#[test_log::test]
fn server_role_session() {
    let protocol = ScriptedProtocol::new()
        .input("M2", MessageKind::Protocol, b"m2".to_vec())
        .output(b"m1".to_vec(), "EDHOC_MESSAGE_1")
        .output(b"m3".to_vec(), "EDHOC_MESSAGE_3");
    let config = SulConfig {
        transport_role: TransportRole::Server,
        protocol_role: ProtocolRole::Responder,
        address: "127.0.0.1:0".to_string(),
        response_wait: Duration::from_millis(500),
        initial_message_wait: Duration::from_secs(2),
        ..SulConfig::default()
    };
    let connector = ServerConnector::bind(&config).unwrap();
    let client = udp_client_sul(connector.local_addr().unwrap());
    let mut sul = ProtocolSul::new(config, protocol, connector);

    sul.pre().unwrap();
    let m2 = AbstractInput::new("M2");
    assert_eq!(sul.step(&m2).unwrap(), "EDHOC_MESSAGE_3".into());
    assert_eq!(sul.step(&m2).unwrap(), "EDHOC_MESSAGE_3".into());
    sul.post().unwrap();

    let replies = client.join().unwrap();
    assert!(replies.iter().all(|r| r.payload == b"m2"));
    assert_eq!(replies.iter().map(|r| r.mid).collect::<Vec<_>>(), vec![1, 2]);
}
