use std::io::{self, Read, Write};
use std::mem;

use openssl::ssl::{HandshakeError, MidHandshakeSslStream, Ssl, SslRef, SslStream};

/// OpenSSL client stream that is driven through the handshake one flight at a
/// time, without blocking.
pub(super) struct TlsStream<S> {
    state: State<S>,
}

enum State<S> {
    Init(Ssl, S),
    Handshaking(MidHandshakeSslStream<S>),
    Established(SslStream<S>),
    /// Kept so any alert OpenSSL queued can still be sent.
    Failed(MidHandshakeSslStream<S>),
    Empty,
}

impl<S: Read + Write> TlsStream<S> {
    pub fn new(ssl: Ssl, stream: S) -> Self {
        TlsStream {
            state: State::Init(ssl, stream),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Established(_))
    }

    /// Move the handshake along as far as buffered input allows. `Ok(true)`
    /// once established.
    pub fn complete_handshake_until_block(&mut self) -> io::Result<bool> {
        let result = match mem::replace(&mut self.state, State::Empty) {
            State::Init(ssl, stream) => ssl.connect(stream),
            State::Handshaking(mid) => mid.handshake(),
            State::Established(stream) => {
                self.state = State::Established(stream);
                return Ok(true);
            }
            State::Failed(mid) => {
                self.state = State::Failed(mid);
                return Err(io::Error::new(io::ErrorKind::Other, "handshake failed"));
            }
            State::Empty => {
                return Err(io::Error::new(io::ErrorKind::Other, "no stream"));
            }
        };

        match result {
            Ok(stream) => {
                self.state = State::Established(stream);
                Ok(true)
            }
            Err(HandshakeError::WouldBlock(mid)) => {
                self.state = State::Handshaking(mid);
                Ok(false)
            }
            Err(HandshakeError::Failure(mid)) => {
                let message = mid.error().to_string();
                self.state = State::Failed(mid);
                Err(io::Error::new(io::ErrorKind::Other, message))
            }
            Err(HandshakeError::SetupFailure(e)) => {
                Err(io::Error::new(io::ErrorKind::Other, e.to_string()))
            }
        }
    }

    pub fn ssl(&self) -> Option<&SslRef> {
        match &self.state {
            State::Init(ssl, _) => Some(&**ssl),
            State::Handshaking(mid) | State::Failed(mid) => Some(mid.ssl()),
            State::Established(stream) => Some(stream.ssl()),
            State::Empty => None,
        }
    }

    pub fn inner_mut(&mut self) -> Option<&mut S> {
        match &mut self.state {
            State::Init(_, stream) => Some(stream),
            State::Handshaking(mid) | State::Failed(mid) => Some(mid.get_mut()),
            State::Established(stream) => Some(stream.get_mut()),
            State::Empty => None,
        }
    }

    /// Send close_notify. Nothing to do unless established.
    pub fn shutdown(&mut self) -> io::Result<()> {
        if let State::Established(stream) = &mut self.state {
            stream
                .shutdown()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        }
        Ok(())
    }
}

impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.state {
            State::Established(stream) => stream.read(buf),
            _ => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.state {
            State::Established(stream) => stream.write(buf),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            State::Established(stream) => stream.flush(),
            _ => Ok(()),
        }
    }
}
