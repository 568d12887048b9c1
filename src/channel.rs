//! The secure datagram transport a [`Session`][crate::Session] runs on.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::event::Event;

/// Lifecycle of the secure channel, and so of the session on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake in progress. Confirmable messages are held back.
    Handshaking,
    /// Handshake done and the peer accepted by policy.
    Established,
    /// Handshake failed, peer rejected or fatal alert. Nothing more is sent.
    Failed,
    /// Closed by either side.
    Closed,
}

impl SessionState {
    pub fn is_usable(&self) -> bool {
        matches!(self, SessionState::Handshaking | SessionState::Established)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Handshaking => write!(f, "handshaking"),
            SessionState::Established => write!(f, "established"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// A connected, secured datagram transport to one peer.
///
/// Implementations do their own I/O. Handshake progress, alerts and peer
/// closure surface through [`Channel::poll_event`], and the session picks
/// them up on its next timeout handling.
pub trait Channel {
    fn state(&self) -> SessionState;

    /// Wait at most `timeout` for one datagram of application data and copy
    /// it into `buf`.
    ///
    /// `Ok(None)` when the wait ended without application data, which is also
    /// the case when only handshake records arrived.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;

    /// Send one datagram of application data. Only valid when established.
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Next pending lifecycle event.
    fn poll_event(&mut self) -> Option<Event>;

    /// Close the channel, notifying the peer when possible. Idempotent.
    fn close(&mut self);
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn state(&self) -> SessionState {
        (**self).state()
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        (**self).recv(buf, timeout)
    }

    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        (**self).send(datagram)
    }

    fn poll_event(&mut self) -> Option<Event> {
        (**self).poll_event()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
