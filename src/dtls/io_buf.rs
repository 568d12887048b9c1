use std::collections::VecDeque;
use std::io;

/// In-memory transport under the OpenSSL stream.
///
/// Every `write` from OpenSSL is one outgoing datagram. Incoming bytes queue up
/// until OpenSSL reads them.
#[derive(Default)]
pub(super) struct IoBuffer {
    incoming: Vec<u8>,
    outgoing: VecDeque<Vec<u8>>,
}

impl IoBuffer {
    pub fn push_incoming(&mut self, datagram: &[u8]) {
        if !self.incoming.is_empty() {
            trace!("Appending to {} unread bytes", self.incoming.len());
        }
        self.incoming.extend_from_slice(datagram);
    }

    pub fn pop_outgoing(&mut self) -> Option<Vec<u8>> {
        self.outgoing.pop_front()
    }
}

impl io::Read for IoBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.incoming.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = buf.len().min(self.incoming.len());
        buf[..n].copy_from_slice(&self.incoming[..n]);
        self.incoming.drain(..n);

        Ok(n)
    }
}

impl io::Write for IoBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.push_back(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
