mod common;

use std::time::Duration;

use common::{config, piggybacked, setup, ScriptedChannel};
use dcoap::message::{Code, Message, MessageId, MessageType, Method};
use dcoap::{
    Classification, Error, Event, Exchange, ExchangeState, NackReason, RequestBuilder,
    SessionState,
};

fn request_builder() -> RequestBuilder {
    RequestBuilder::new(Method::Post)
        .host("127.0.0.1")
        .port(5684)
        .path("mydata")
        .payload("this is the payload")
}

fn poll_timeout() -> Duration {
    Duration::from_millis(50)
}

#[test]
fn content_response() {
    let _ = env_logger::try_init();

    let channel = ScriptedChannel::new(|req| {
        if req.mtype == MessageType::Confirmable {
            vec![piggybacked(req, Code::CONTENT, b"ok")]
        } else {
            vec![]
        }
    });
    let (mut ctx, mut session, rec) = setup(config(), channel);

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    assert_eq!(exchange.state(), ExchangeState::Idle);

    let id = exchange.send(&mut session, request).unwrap();
    assert_eq!(exchange.state(), ExchangeState::AwaitingCompletion);
    assert_eq!(exchange.id(), Some(id));

    exchange.run(&mut ctx, &mut session);
    assert!(exchange.is_done());

    let rec = rec.borrow();
    assert_eq!(rec.events, vec![Event::DtlsConnected]);
    assert!(rec.nacks.is_empty());
    assert_eq!(rec.responses.len(), 1);

    let (rid, classification) = &rec.responses[0];
    assert_eq!(*rid, id);
    let data = classification.data().unwrap();
    assert_eq!(data.as_bytes(), b"ok");
    assert!(!data.is_truncated());
}

#[test]
fn not_found_still_completes() {
    let channel = ScriptedChannel::new(|req| vec![piggybacked(req, Code::NOT_FOUND, b"")]);
    let (mut ctx, mut session, rec) = setup(config(), channel);

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    exchange.send(&mut session, request).unwrap();
    exchange.run(&mut ctx, &mut session);

    assert!(exchange.is_done());
    assert_eq!(
        rec.borrow().responses[0].1,
        Classification::ClientError(Code::NOT_FOUND)
    );
}

#[test]
fn server_error_still_completes() {
    let channel =
        ScriptedChannel::new(|req| vec![piggybacked(req, Code::INTERNAL_SERVER_ERROR, b"")]);
    let (mut ctx, mut session, rec) = setup(config(), channel);

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    exchange.send(&mut session, request).unwrap();
    exchange.run(&mut ctx, &mut session);

    assert!(exchange.is_done());
    assert_eq!(
        rec.borrow().responses[0].1,
        Classification::ServerError(Code::INTERNAL_SERVER_ERROR)
    );
}

#[test]
fn total_loss_gives_up() {
    let channel = ScriptedChannel::black_hole();
    let sent = channel.sent();
    let (mut ctx, mut session, rec) = setup(config(), channel);

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    let id = exchange.send(&mut session, request).unwrap();
    exchange.run(&mut ctx, &mut session);

    assert!(exchange.is_done());
    assert_eq!(rec.borrow().nacks, vec![(id, NackReason::TooManyRetries)]);
    assert!(rec.borrow().responses.is_empty());

    // First transmission plus max_retransmit (4) copies of the same message.
    let sent = sent.borrow();
    assert_eq!(sent.len(), 5);
    assert!(sent.iter().all(|m| m.message_id == id));
}

#[test]
fn poll_after_done_is_noop() {
    let channel = ScriptedChannel::new(|req| vec![piggybacked(req, Code::CHANGED, b"")]);
    let sent = channel.sent();
    let (mut ctx, mut session, rec) = setup(config(), channel);

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    exchange.send(&mut session, request).unwrap();
    exchange.run(&mut ctx, &mut session);
    assert!(exchange.is_done());

    let responses = rec.borrow().responses.len();
    let events = rec.borrow().events.len();
    let datagrams = sent.borrow().len();

    for _ in 0..3 {
        assert_eq!(exchange.poll(&mut ctx, &mut session), ExchangeState::Done);
    }

    assert_eq!(rec.borrow().responses.len(), responses);
    assert_eq!(rec.borrow().events.len(), events);
    assert_eq!(sent.borrow().len(), datagrams);
}

#[test]
fn poll_when_idle_is_noop() {
    let (mut ctx, mut session, rec) = setup(config(), ScriptedChannel::black_hole());
    let mut exchange = Exchange::new(poll_timeout());

    assert_eq!(exchange.poll(&mut ctx, &mut session), ExchangeState::Idle);
    exchange.run(&mut ctx, &mut session);
    assert_eq!(exchange.state(), ExchangeState::Idle);
    assert!(rec.borrow().events.is_empty());
}

#[test]
fn separate_response() {
    let channel = ScriptedChannel::new(|req| {
        if req.mtype != MessageType::Confirmable {
            return vec![];
        }
        let ack = Message::empty(MessageType::Acknowledgement, req.message_id);
        let mut separate =
            Message::new(MessageType::Confirmable, Code::CHANGED, MessageId(4711));
        separate.token = req.token;
        separate.payload = b"later".to_vec();
        vec![ack, separate]
    });
    let sent = channel.sent();
    let (mut ctx, mut session, rec) = setup(config(), channel);

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    let id = exchange.send(&mut session, request).unwrap();
    exchange.run(&mut ctx, &mut session);

    assert!(exchange.is_done());
    let rec = rec.borrow();
    assert_eq!(rec.responses.len(), 1);
    assert_eq!(rec.responses[0].0, id);
    assert_eq!(rec.responses[0].1.data().unwrap().as_bytes(), b"later");

    let sent = sent.borrow();
    let ack = sent.last().unwrap();
    assert_eq!(ack.mtype, MessageType::Acknowledgement);
    assert_eq!(ack.message_id, MessageId(4711));
    assert!(ack.is_empty());
}

#[test]
fn reset_is_nacked() {
    let channel = ScriptedChannel::new(|req| {
        vec![Message::empty(MessageType::Reset, req.message_id)]
    });
    let (mut ctx, mut session, rec) = setup(config(), channel);

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    let id = exchange.send(&mut session, request).unwrap();
    exchange.run(&mut ctx, &mut session);

    assert!(exchange.is_done());
    assert_eq!(rec.borrow().nacks, vec![(id, NackReason::Rst)]);
}

#[test]
fn failed_handshake_nacks_tls_failed() {
    let (mut ctx, mut session, rec) = setup(config(), ScriptedChannel::failing_handshake());

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    let id = exchange.send(&mut session, request).unwrap();
    exchange.run(&mut ctx, &mut session);

    assert!(exchange.is_done());
    assert_eq!(session.state(), SessionState::Failed);
    let rec = rec.borrow();
    assert_eq!(rec.events, vec![Event::DtlsError]);
    assert_eq!(rec.nacks, vec![(id, NackReason::TlsFailed)]);
}

#[test]
fn send_on_failed_session_is_refused() {
    let (mut ctx, mut session, _rec) = setup(config(), ScriptedChannel::failing_handshake());

    // Fail the handshake first.
    ctx.run_once(&mut session, Duration::from_millis(1));
    assert_eq!(session.state(), SessionState::Failed);

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    let err = exchange.send(&mut session, request).unwrap_err();

    assert!(matches!(err, Error::Send(_)));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(exchange.state(), ExchangeState::Idle);
}

#[test]
fn second_send_is_refused() {
    let channel = ScriptedChannel::new(|req| vec![piggybacked(req, Code::CONTENT, b"")]);
    let (_ctx, mut session, _rec) = setup(config(), channel);

    let mut exchange = Exchange::new(poll_timeout());
    let first = request_builder().build(&mut session).unwrap();
    let second = request_builder().build(&mut session).unwrap();
    exchange.send(&mut session, first).unwrap();
    assert!(matches!(
        exchange.send(&mut session, second),
        Err(Error::Send(_))
    ));
}

#[test]
fn release_dispatches_closing_events() {
    let channel = ScriptedChannel::new(|req| vec![piggybacked(req, Code::CONTENT, b"")]);
    let (mut ctx, mut session, rec) = setup(config(), channel);

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    exchange.send(&mut session, request).unwrap();
    exchange.run(&mut ctx, &mut session);

    ctx.release(session);
    assert_eq!(
        rec.borrow().events,
        vec![
            Event::DtlsConnected,
            Event::DtlsClosed,
            Event::SessionClosed
        ]
    );
}

#[test]
fn truncated_payload_is_flagged() {
    let big = vec![b'x'; 600];
    let channel = ScriptedChannel::new(move |req| vec![piggybacked(req, Code::CONTENT, &big)]);
    let config = dcoap::Config::builder()
        .server("127.0.0.1")
        .ephemeral_identity()
        .keepalive(None)
        .rng_seed(Some(1))
        .build()
        .unwrap();
    let (mut ctx, mut session, rec) = setup(config, channel);

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    exchange.send(&mut session, request).unwrap();
    exchange.run(&mut ctx, &mut session);

    let rec = rec.borrow();
    let data = rec.responses[0].1.data().unwrap();
    assert_eq!(data.len(), dcoap::RECEIVE_CAPACITY);
    assert_eq!(data.received_len(), 600);
    assert!(data.is_truncated());
}

#[test]
fn keepalive_ping_while_waiting() {
    let channel = ScriptedChannel::new(|req| {
        if req.is_empty() && req.mtype == MessageType::Confirmable {
            // Answer pings with RST, like RFC 7252 servers do.
            vec![Message::empty(MessageType::Reset, req.message_id)]
        } else if req.mtype == MessageType::Confirmable {
            vec![Message::empty(MessageType::Acknowledgement, req.message_id)]
        } else {
            vec![]
        }
    });
    let sent = channel.sent();
    let config = dcoap::Config::builder()
        .server("127.0.0.1")
        .ephemeral_identity()
        .ack_timeout(Duration::from_millis(10))
        .ack_random_factor(1.0)
        .keepalive(Some(Duration::from_millis(30)))
        .response_timeout(Duration::from_millis(200))
        .rng_seed(Some(3))
        .build()
        .unwrap();
    let (mut ctx, mut session, rec) = setup(config, channel);

    let request = request_builder().build(&mut session).unwrap();
    let mut exchange = Exchange::new(poll_timeout());
    let id = exchange.send(&mut session, request).unwrap();
    exchange.run(&mut ctx, &mut session);

    assert!(exchange.is_done());
    assert_eq!(rec.borrow().nacks, vec![(id, NackReason::NotDeliverable)]);

    let pings = sent
        .borrow()
        .iter()
        .filter(|m| m.is_empty() && m.mtype == MessageType::Confirmable)
        .count();
    assert!(pings >= 2, "expected keepalive pings, got {}", pings);
}
