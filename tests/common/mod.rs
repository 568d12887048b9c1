#![allow(unused)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dcoap::message::{Code, Message, MessageId, MessageType};
use dcoap::{
    Channel, Classification, Config, Context, Event, Handlers, NackReason, ServerEndpoint, Session,
    SessionState,
};

type Responder = Box<dyn FnMut(&Message) -> Vec<Message>>;

/// In-memory channel. The handshake completes on the first receive, and
/// every datagram sent is answered by a responder closure.
pub struct ScriptedChannel {
    state: SessionState,
    fail_handshake: bool,
    events: VecDeque<Event>,
    inbox: VecDeque<Vec<u8>>,
    responder: Responder,
    sent: Rc<RefCell<Vec<Message>>>,
}

impl ScriptedChannel {
    pub fn new(responder: impl FnMut(&Message) -> Vec<Message> + 'static) -> Self {
        ScriptedChannel {
            state: SessionState::Handshaking,
            fail_handshake: false,
            events: VecDeque::new(),
            inbox: VecDeque::new(),
            responder: Box::new(responder),
            sent: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Drops everything, nothing ever comes back.
    pub fn black_hole() -> Self {
        ScriptedChannel::new(|_| Vec::new())
    }

    pub fn failing_handshake() -> Self {
        let mut channel = ScriptedChannel::black_hole();
        channel.fail_handshake = true;
        channel
    }

    /// Messages the session sent, shared so it survives the session.
    pub fn sent(&self) -> Rc<RefCell<Vec<Message>>> {
        self.sent.clone()
    }
}

impl Channel for ScriptedChannel {
    fn state(&self) -> SessionState {
        self.state
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        if self.state == SessionState::Handshaking {
            if self.fail_handshake {
                self.state = SessionState::Failed;
                self.events.push_back(Event::DtlsError);
            } else {
                self.state = SessionState::Established;
                self.events.push_back(Event::DtlsConnected);
            }
            return Ok(None);
        }

        match self.inbox.pop_front() {
            Some(datagram) => {
                buf[..datagram.len()].copy_from_slice(&datagram);
                Ok(Some(datagram.len()))
            }
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let message = Message::decode(datagram).expect("session sent a valid message");
        for reply in (self.responder)(&message) {
            self.inbox.push_back(reply.to_vec());
        }
        self.sent.borrow_mut().push(message);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn close(&mut self) {
        if self.state.is_usable() {
            self.state = SessionState::Closed;
            self.events.push_back(Event::DtlsClosed);
        }
    }
}

/// What the handlers saw.
#[derive(Default)]
pub struct Recorder {
    pub responses: Vec<(MessageId, Classification)>,
    pub nacks: Vec<(MessageId, NackReason)>,
    pub events: Vec<Event>,
}

pub fn recorder() -> Rc<RefCell<Recorder>> {
    Rc::new(RefCell::new(Recorder::default()))
}

pub fn handlers(recorder: &Rc<RefCell<Recorder>>) -> Handlers {
    let (a, b, c) = (recorder.clone(), recorder.clone(), recorder.clone());
    Handlers::default()
        .on_response(move |id, _, classification| {
            a.borrow_mut().responses.push((id, classification.clone()))
        })
        .on_nack(move |id, reason| b.borrow_mut().nacks.push((id, reason)))
        .on_event(move |event| c.borrow_mut().events.push(event))
}

/// Fast timers and a fixed seed.
pub fn config() -> Config {
    Config::builder()
        .server("127.0.0.1")
        .ephemeral_identity()
        .ack_timeout(Duration::from_millis(10))
        .ack_random_factor(1.0)
        .poll_timeout(Duration::from_millis(50))
        .keepalive(None)
        .rng_seed(Some(42))
        .build()
        .unwrap()
}

pub fn setup(
    config: Config,
    channel: ScriptedChannel,
) -> (Context, Session<ScriptedChannel>, Rc<RefCell<Recorder>>) {
    let recorder = recorder();
    let ctx = Context::with_handlers(Arc::new(config), handlers(&recorder));
    let endpoint = ServerEndpoint::new("127.0.0.1", "127.0.0.1:5684".parse().unwrap());
    let session = Session::new(&ctx, channel, endpoint, Instant::now());
    (ctx, session, recorder)
}

/// Piggybacked response to `request`.
pub fn piggybacked(request: &Message, code: Code, payload: &[u8]) -> Message {
    let mut m = Message::new(MessageType::Acknowledgement, code, request.message_id);
    m.token = request.token;
    m.payload = payload.to_vec();
    m
}
