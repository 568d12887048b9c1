//! One CoAP session over a secure channel.
//!
//! The session owns the channel and implements the RFC 7252 message layer on
//! top of it: retransmission of confirmable messages with exponential
//! back-off, matching of piggybacked and separate responses, duplicate
//! detection, and keepalive pings while a separate response is outstanding.
//!
//! Apart from [`Session::receive`], which waits on the channel, everything is
//! driven by the caller passing in the current time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::channel::{Channel, SessionState};
use crate::context::Context;
use crate::event::{Event, NackReason};
use crate::message::{Message, MessageId, MessageType, Token};
use crate::resolve::ServerEndpoint;
use crate::rng::SeededRng;
use crate::timer::ExponentialBackoff;
use crate::{Config, Error, SecurityPolicy};

/// Inbound message ids remembered for duplicate detection.
const DEDUPE_WINDOW: usize = 16;

const MIN_RECV_BUFFER: usize = 2048;

/// Things the session wants the application to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Event(Event),
    /// A response to the request sent with message id `id`.
    Response { id: MessageId, message: Message },
    /// The request sent with message id `id` failed.
    Nack { id: MessageId, reason: NackReason },
}

struct Transmission {
    id: MessageId,
    token: Token,
    datagram: Vec<u8>,
    confirmable: bool,
    ping: bool,
    backoff: ExponentialBackoff,
    /// `None` while held back for the handshake.
    next_send: Option<Instant>,
}

/// A request acknowledged with an empty ACK.
struct AwaitingResponse {
    id: MessageId,
    token: Token,
    deadline: Instant,
}

struct Received {
    id: MessageId,
    /// What we answered, resent when the peer retransmits.
    reply: Option<Vec<u8>>,
}

pub struct Session<C: Channel> {
    config: Arc<Config>,
    endpoint: ServerEndpoint,
    channel: C,
    rng: SeededRng,
    keepalive: Option<Duration>,
    next_message_id: u16,

    /// Outgoing messages not yet acknowledged.
    queue_tx: VecDeque<Transmission>,

    awaiting: Vec<AwaitingResponse>,

    /// Queue of Output events
    queue_events: VecDeque<Output>,

    received: VecDeque<Received>,

    last_activity: Instant,
    recv_buf: Vec<u8>,
    closed: bool,
}

impl<C: Channel> Session<C> {
    /// Wrap a channel. The keepalive interval is taken from the context here
    /// and not consulted again.
    pub fn new(ctx: &Context, channel: C, endpoint: ServerEndpoint, now: Instant) -> Self {
        let config = ctx.config().clone();
        let mut rng = SeededRng::new(config.rng_seed());
        let next_message_id = rng.random();
        let recv_buf = vec![0; config.mtu().max(MIN_RECV_BUFFER)];

        Session {
            config,
            endpoint,
            channel,
            rng,
            keepalive: ctx.keepalive(),
            next_message_id,
            queue_tx: VecDeque::new(),
            awaiting: Vec::new(),
            queue_events: VecDeque::new(),
            received: VecDeque::new(),
            last_activity: now,
            recv_buf,
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.channel.state()
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn policy(&self) -> &SecurityPolicy {
        self.config.policy()
    }

    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive
    }

    /// Largest datagram the session will send.
    pub fn mtu(&self) -> usize {
        self.config.mtu()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn next_message_id(&mut self) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id = id.wrapping_add(1);
        MessageId(id)
    }

    pub fn new_token(&mut self) -> Token {
        let bytes: [u8; 8] = self.rng.random();
        Token::from(bytes)
    }

    /// Queue a message for sending.
    ///
    /// Sent at once when the channel is established, otherwise held until the
    /// handshake completes. Confirmable messages stay queued until
    /// acknowledged, reset or given up on.
    pub fn send(&mut self, message: Message, now: Instant) -> Result<MessageId, Error> {
        let state = self.channel.state();
        if !state.is_usable() {
            return Err(Error::Send(format!("session is {}", state)));
        }

        let id = message.message_id;
        if self.queue_tx.iter().any(|t| t.id == id) {
            return Err(Error::Send(format!("message id {} already queued", id)));
        }

        let datagram = message.to_vec();
        if datagram.len() > self.config.mtu() {
            return Err(Error::Send(format!(
                "message of {} bytes exceeds MTU {}",
                datagram.len(),
                self.config.mtu()
            )));
        }

        let backoff = self.new_backoff();
        self.queue_tx.push_back(Transmission {
            id,
            token: message.token,
            datagram,
            confirmable: message.mtype == MessageType::Confirmable,
            ping: false,
            backoff,
            next_send: None,
        });

        if state == SessionState::Established {
            self.transmit_deferred(now);
        } else {
            debug!("Holding id={} until the handshake completes", id);
        }

        Ok(id)
    }

    /// Wait at most `timeout` for a datagram and process it.
    pub fn receive(&mut self, timeout: Duration) {
        if !self.channel.state().is_usable() {
            return;
        }

        let mut buf = std::mem::take(&mut self.recv_buf);
        match self.channel.recv(&mut buf, timeout) {
            Ok(Some(n)) => self.handle_datagram(&buf[..n], Instant::now()),
            Ok(None) => {}
            Err(e) => debug!("Receive from {} failed: {}", self.endpoint, e),
        }
        self.recv_buf = buf;
    }

    /// Process one decrypted datagram from the peer.
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) {
        let message = match Message::decode(datagram) {
            Ok(v) => v,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", self.endpoint, e);
                return;
            }
        };

        self.last_activity = now;
        trace!(
            "Received {:?} id={} code={}",
            message.mtype,
            message.message_id,
            message.code
        );

        match message.mtype {
            MessageType::Acknowledgement => self.handle_ack(message, now),
            MessageType::Reset => self.handle_reset(message),
            MessageType::Confirmable | MessageType::NonConfirmable => {
                self.handle_peer_message(message)
            }
        }
    }

    /// Run timers: channel events, retransmissions, keepalive and response
    /// deadlines.
    pub fn handle_timeout(&mut self, now: Instant) {
        self.poll_channel(now);

        if self.channel.state() == SessionState::Established {
            self.retransmit(now);
            self.send_keepalive(now);
        }

        self.expire_responses(now);
        self.poll_channel(now);
    }

    /// When [`Session::handle_timeout`] next has work to do.
    pub fn poll_timeout(&self) -> Option<Instant> {
        let retransmit = self.queue_tx.iter().filter_map(|t| t.next_send).min();
        let response = self.awaiting.iter().map(|a| a.deadline).min();
        let keepalive = self
            .keepalive
            .filter(|_| self.wants_keepalive())
            .map(|interval| self.last_activity + interval);

        [retransmit, response, keepalive].into_iter().flatten().min()
    }

    pub fn poll_output(&mut self) -> Option<Output> {
        self.queue_events.pop_front()
    }

    /// True when nothing is in flight, awaited or undelivered.
    pub fn can_exit(&self) -> bool {
        self.queue_tx.iter().all(|t| t.ping)
            && self.awaiting.is_empty()
            && self.queue_events.is_empty()
    }

    /// Close the channel and queue the closing events. Anything still in
    /// flight is nacked.
    pub fn close(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        self.closed = true;

        debug!("Closing session to {}", self.endpoint);
        self.channel.close();
        self.poll_channel(now);
        self.nack_all(NackReason::NotDeliverable);
        self.queue_events
            .push_back(Output::Event(Event::SessionClosed));
    }

    fn new_backoff(&mut self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.config.ack_timeout(),
            self.config.ack_random_factor(),
            self.config.max_retransmit(),
            &mut self.rng,
        )
    }

    fn handle_ack(&mut self, message: Message, now: Instant) {
        let Some(pos) = self.queue_tx.iter().position(|t| t.id == message.message_id) else {
            trace!("Ignoring ACK for unknown id={}", message.message_id);
            return;
        };
        let Some(t) = self.queue_tx.remove(pos) else {
            return;
        };

        if t.ping {
            trace!("Keepalive id={} acknowledged", t.id);
            return;
        }

        if message.is_empty() {
            debug!("Empty ACK for id={}, waiting for separate response", t.id);
            self.awaiting.push(AwaitingResponse {
                id: t.id,
                token: t.token,
                deadline: now + self.config.response_timeout(),
            });
            return;
        }

        if message.token != t.token {
            warn!(
                "Piggybacked response for id={} has wrong token, waiting for separate response",
                t.id
            );
            self.awaiting.push(AwaitingResponse {
                id: t.id,
                token: t.token,
                deadline: now + self.config.response_timeout(),
            });
            return;
        }

        self.queue_events
            .push_back(Output::Response { id: t.id, message });
    }

    fn handle_reset(&mut self, message: Message) {
        let Some(pos) = self.queue_tx.iter().position(|t| t.id == message.message_id) else {
            trace!("Ignoring RST for unknown id={}", message.message_id);
            return;
        };
        let Some(t) = self.queue_tx.remove(pos) else {
            return;
        };

        if t.ping {
            trace!("Keepalive id={} answered with RST", t.id);
            return;
        }

        self.queue_events.push_back(Output::Nack {
            id: t.id,
            reason: NackReason::Rst,
        });
    }

    /// Confirmable and non-confirmable messages initiated by the peer.
    fn handle_peer_message(&mut self, message: Message) {
        let id = message.message_id;
        let confirmable = message.mtype == MessageType::Confirmable;

        if let Some(seen) = self.received.iter().find(|r| r.id == id) {
            trace!("Duplicate id={}", id);
            if let Some(reply) = seen.reply.clone() {
                transmit(&mut self.channel, &reply, id);
            }
            return;
        }

        if message.is_empty() || !message.code.is_response() {
            debug!("Rejecting {} id={} from {}", message.code, id, self.endpoint);
            let reply = confirmable.then(|| Message::empty(MessageType::Reset, id).to_vec());
            self.reply(id, reply);
            return;
        }

        let matched = if let Some(pos) = self.awaiting.iter().position(|a| a.token == message.token) {
            Some(self.awaiting.remove(pos).id)
        } else if let Some(pos) = self
            .queue_tx
            .iter()
            .position(|t| !t.ping && t.token == message.token)
        {
            // Separate response overtook the empty ACK.
            self.queue_tx.remove(pos).map(|t| t.id)
        } else {
            None
        };

        match matched {
            Some(request_id) => {
                let reply =
                    confirmable.then(|| Message::empty(MessageType::Acknowledgement, id).to_vec());
                self.reply(id, reply);
                self.queue_events.push_back(Output::Response {
                    id: request_id,
                    message,
                });
            }
            None => {
                debug!("Unexpected response id={}, rejecting", id);
                let reply = confirmable.then(|| Message::empty(MessageType::Reset, id).to_vec());
                self.reply(id, reply);
            }
        }
    }

    fn reply(&mut self, id: MessageId, reply: Option<Vec<u8>>) {
        if let Some(datagram) = &reply {
            transmit(&mut self.channel, datagram, id);
        }
        self.received.push_back(Received { id, reply });
        while self.received.len() > DEDUPE_WINDOW {
            self.received.pop_front();
        }
    }

    fn poll_channel(&mut self, now: Instant) {
        while let Some(event) = self.channel.poll_event() {
            self.queue_events.push_back(Output::Event(event));

            match event {
                Event::DtlsConnected => self.transmit_deferred(now),
                Event::DtlsClosed | Event::TcpClosed | Event::SessionClosed => {
                    self.nack_all(NackReason::NotDeliverable)
                }
                e if e.is_failure() => self.nack_all(NackReason::TlsFailed),
                _ => {}
            }
        }
    }

    fn transmit_deferred(&mut self, now: Instant) {
        if self.channel.state() != SessionState::Established {
            return;
        }

        let channel = &mut self.channel;
        let mut sent = false;
        for t in self.queue_tx.iter_mut().filter(|t| t.next_send.is_none()) {
            trace!("Sending id={} ({} bytes)", t.id, t.datagram.len());
            transmit(channel, &t.datagram, t.id);
            t.next_send = Some(now + t.backoff.rto());
            sent = true;
        }

        if sent {
            self.queue_tx.retain(|t| t.confirmable);
            self.last_activity = now;
        }
    }

    fn retransmit(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.queue_tx.len() {
            let due = matches!(self.queue_tx[i].next_send, Some(at) if at <= now);
            if !due {
                i += 1;
                continue;
            }

            if !self.queue_tx[i].backoff.can_retry() {
                let Some(t) = self.queue_tx.remove(i) else {
                    break;
                };
                if t.ping {
                    self.keepalive_failed();
                    return;
                }
                debug!("Giving up on id={} to {}", t.id, self.endpoint);
                self.queue_events.push_back(Output::Nack {
                    id: t.id,
                    reason: NackReason::TooManyRetries,
                });
                continue;
            }

            let t = &mut self.queue_tx[i];
            t.backoff.attempt();
            t.next_send = Some(now + t.backoff.rto());
            debug!("Retransmitting id={}, next timeout {:?}", t.id, t.backoff.rto());
            transmit(&mut self.channel, &t.datagram, t.id);
            i += 1;
        }
    }

    fn wants_keepalive(&self) -> bool {
        !self.awaiting.is_empty() && !self.queue_tx.iter().any(|t| t.ping)
    }

    fn send_keepalive(&mut self, now: Instant) {
        let Some(interval) = self.keepalive else {
            return;
        };
        if !self.wants_keepalive() || now < self.last_activity + interval {
            return;
        }

        let id = self.next_message_id();
        let datagram = Message::empty(MessageType::Confirmable, id).to_vec();
        let backoff = self.new_backoff();

        debug!("Sending keepalive ping id={} to {}", id, self.endpoint);
        transmit(&mut self.channel, &datagram, id);

        self.queue_tx.push_back(Transmission {
            id,
            token: Token::default(),
            datagram,
            confirmable: true,
            ping: true,
            next_send: Some(now + backoff.rto()),
            backoff,
        });
        self.last_activity = now;
    }

    fn keepalive_failed(&mut self) {
        warn!("Keepalive to {} not acknowledged", self.endpoint);
        self.queue_events
            .push_back(Output::Event(Event::SessionFailed));
        self.nack_all(NackReason::NotDeliverable);
        self.channel.close();
    }

    fn expire_responses(&mut self, now: Instant) {
        let events = &mut self.queue_events;
        self.awaiting.retain(|a| {
            if a.deadline > now {
                return true;
            }
            debug!("No separate response for id={}", a.id);
            events.push_back(Output::Nack {
                id: a.id,
                reason: NackReason::NotDeliverable,
            });
            false
        });
    }

    fn nack_all(&mut self, reason: NackReason) {
        for t in self.queue_tx.drain(..) {
            if t.ping || !t.confirmable {
                continue;
            }
            self.queue_events
                .push_back(Output::Nack { id: t.id, reason });
        }
        for a in self.awaiting.drain(..) {
            self.queue_events
                .push_back(Output::Nack { id: a.id, reason });
        }
    }
}

impl<C: Channel> Drop for Session<C> {
    fn drop(&mut self) {
        self.channel.close();
    }
}

fn transmit<C: Channel>(channel: &mut C, datagram: &[u8], id: MessageId) {
    if let Err(e) = channel.send(datagram) {
        debug!("Send of id={} failed: {}", id, e);
    }
}
