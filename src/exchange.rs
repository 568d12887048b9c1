use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::context::Context;
use crate::message::{Message, MessageId};
use crate::session::Session;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Nothing sent yet.
    Idle,
    /// Request handed to the session, polling until it has nothing left.
    AwaitingCompletion,
    Done,
}

/// Drives one request to completion.
///
/// There is no cancellation: the exchange ends when the session has nothing
/// in flight, which retransmission limits and response timeouts guarantee.
#[derive(Debug)]
pub struct Exchange {
    state: ExchangeState,
    id: Option<MessageId>,
    poll_timeout: Duration,
}

impl Exchange {
    pub fn new(poll_timeout: Duration) -> Self {
        Exchange {
            state: ExchangeState::Idle,
            id: None,
            poll_timeout,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Message id of the request, once sent.
    pub fn id(&self) -> Option<MessageId> {
        self.id
    }

    pub fn is_done(&self) -> bool {
        self.state == ExchangeState::Done
    }

    /// Hand the request to the session. On error the exchange stays idle.
    pub fn send<C: Channel>(
        &mut self,
        session: &mut Session<C>,
        message: Message,
    ) -> Result<MessageId, Error> {
        if self.state != ExchangeState::Idle {
            return Err(Error::Send("request already sent".to_string()));
        }

        let id = session.send(message, Instant::now())?;
        debug!("Sent request id={} to {}", id, session.endpoint());

        self.id = Some(id);
        self.state = ExchangeState::AwaitingCompletion;
        Ok(id)
    }

    /// One iteration of the loop. Does nothing unless awaiting completion.
    pub fn poll<C: Channel>(&mut self, ctx: &mut Context, session: &mut Session<C>) -> ExchangeState {
        if self.state != ExchangeState::AwaitingCompletion {
            return self.state;
        }

        let elapsed = ctx.run_once(session, self.poll_timeout);
        trace!("Poll iteration took {:?}", elapsed);

        if session.can_exit() {
            debug!("Exchange complete");
            self.state = ExchangeState::Done;
        }

        self.state
    }

    /// Poll until done. Returns at once when nothing was sent.
    pub fn run<C: Channel>(&mut self, ctx: &mut Context, session: &mut Session<C>) {
        while self.poll(ctx, session) == ExchangeState::AwaitingCompletion {}
    }
}
