use std::{
    cell::Cell,
    rc::Rc,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use statefuzz::{
    connector::{frame::code, Frame, FrameType, Received},
    prelude::*,
};
use statefuzz_learning::prelude::*;

/// Answers every step of a session with the same output, alternating between `X` and `Y` from
/// one session to the next.
struct Flaky {
    sessions: Rc<Cell<usize>>,
}

impl Sul for Flaky {
    fn pre(&mut self) -> Result<(), SulError> {
        self.sessions.set(self.sessions.get() + 1);
        Ok(())
    }

    fn step(&mut self, _input: &AbstractInput) -> Result<AbstractOutput, SulError> {
        Ok(if self.sessions.get() % 2 == 1 {
            "X".into()
        } else {
            "Y".into()
        })
    }

    fn post(&mut self) -> Result<(), SulError> {
        Ok(())
    }
}

/// Closes the connection on the second input of every session.
struct ClosesEarly {
    steps: Rc<Cell<usize>>,
    position: usize,
}

impl Sul for ClosesEarly {
    fn pre(&mut self) -> Result<(), SulError> {
        self.position = 0;
        Ok(())
    }

    fn step(&mut self, _input: &AbstractInput) -> Result<AbstractOutput, SulError> {
        self.steps.set(self.steps.get() + 1);
        self.position += 1;
        Ok(if self.position == 1 {
            "o1".into()
        } else {
            AbstractOutput::socket_closed()
        })
    }

    fn post(&mut self) -> Result<(), SulError> {
        Ok(())
    }
}

fn word(names: &str) -> InputWord {
    names.split_whitespace().map(AbstractInput::new).collect()
}

#[test_log::test]
fn repeated_runs_expose_flaky_answers() {
    let sessions = Rc::new(Cell::new(0));
    let config = LearningConfig {
        runs_per_membership_query: 3,
        ..LearningConfig::default()
    };
    let mut oracles = build_oracles(
        Box::new(Flaky {
            sessions: Rc::clone(&sessions),
        }),
        &config,
        &OracleLogs::default(),
    );
    let err = oracles.membership.answer_query(&word("A")).unwrap_err();
    match err {
        OracleError::NonDeterminism {
            input,
            expected,
            observed,
        } => {
            assert_eq!(input, word("A"));
            assert_eq!(expected, vec![AbstractOutput::new("X")]);
            assert_eq!(observed, vec![AbstractOutput::new("Y")]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(sessions.get(), 2);
    assert_eq!(oracles.tree.borrow().size(), 0);
}

#[test_log::test]
fn terminating_output_answers_extensions_from_the_cache() {
    let steps = Rc::new(Cell::new(0));
    let mut oracles = build_oracles(
        Box::new(ClosesEarly {
            steps: Rc::clone(&steps),
            position: 0,
        }),
        &LearningConfig::default(),
        &OracleLogs::default(),
    );
    let closed = AbstractOutput::socket_closed();

    let answer = oracles.membership.answer_query(&word("A B")).unwrap();
    assert_eq!(answer, vec!["o1".into(), closed.clone()]);
    assert_eq!(steps.get(), 2);

    let answer = oracles.membership.answer_query(&word("A B C")).unwrap();
    assert_eq!(answer, vec!["o1".into(), closed.clone(), closed.clone()]);
    assert_eq!(steps.get(), 2);

    let answer = oracles.testing.answer_query(&word("A B C D")).unwrap();
    assert_eq!(answer.len(), 4);
    assert_eq!(steps.get(), 2);
}

/// A server that acknowledges `start` and answers `ping` only after a `start` in the same
/// session.
#[derive(Default)]
struct PingServer {
    started: bool,
    outcome: Option<Result<Received, TransportError>>,
    timeout: Duration,
    opens: Arc<AtomicUsize>,
}

impl Connector for PingServer {
    fn open(&mut self) -> Result<(), TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.started = false;
        self.outcome = None;
        Ok(())
    }

    fn send(&mut self, message: &ConcreteMessage) -> Result<(), TransportError> {
        let reply = match message.payload.as_slice() {
            b"start" => {
                self.started = true;
                Ok(b"ack".to_vec())
            }
            b"ping" if self.started => Ok(b"pong".to_vec()),
            _ => Err(TransportError::Timeout(self.timeout)),
        };
        self.outcome = Some(reply.map(|payload| {
            Received::new(
                Frame::new(FrameType::Acknowledgement, code::CHANGED, 1).with_payload(payload),
                false,
            )
        }));
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
        self.outcome = None;
    }
}

#[test_log::test]
fn learns_ping_server() {
    let protocol = ScriptedProtocol::new()
        .input("Start", MessageKind::Protocol, b"start".to_vec())
        .input("Ping", MessageKind::Protocol, b"ping".to_vec())
        .output(b"ack".to_vec(), "Ack")
        .output(b"pong".to_vec(), "Pong");
    let alphabet = InputAlphabet::new(protocol.inputs()).unwrap();
    let opens = Arc::new(AtomicUsize::new(0));
    let connector = PingServer {
        opens: Arc::clone(&opens),
        ..PingServer::default()
    };

    let config = LearningConfig {
        min_length: 2,
        max_length: 6,
        queries: 30,
        seed: 5,
        ..LearningConfig::default()
    };
    let mut wrapper = SulWrapper::wrap(ProtocolSul::new(SulConfig::default(), protocol, connector));
    wrapper.set_test_limit(Some(10_000));
    let tracker = StatisticsTracker::new(wrapper.symbol_counter(), wrapper.reset_counter());
    let cleanup = wrapper.cleanup_tasks();
    let oracles = build_oracles(wrapper.into_sul(), &config, &OracleLogs::default());

    let learner = MealyLStar::new(alphabet, oracles.membership);
    let equivalence = RandomWordsOracle::new(
        oracles.testing,
        config.min_length,
        config.max_length,
        config.queries,
        config.seed,
    );
    let result = LearningDriver::new(learner, equivalence, oracles.slot)
        .with_tracker(tracker)
        .with_cleanup(cleanup)
        .run();

    assert!(result.finished, "{:?}", result.reason);
    let model = result.model.unwrap();
    assert_eq!(model.size(), 2);
    let outputs = model.outputs(&word("Ping Start Ping")).unwrap();
    assert_eq!(
        outputs,
        vec![AbstractOutput::timeout(), "Ack".into(), "Pong".into()]
    );
    assert_eq!(result.statistics.resets, opens.load(Ordering::SeqCst) as u64);
    assert!(result.statistics.inputs > 0);
    assert!(oracles.tree.borrow().size() > 0);
}
