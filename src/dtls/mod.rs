//! DTLS 1.2 over UDP with OpenSSL.
//!
//! OpenSSL runs the record layer and handshake against an in-memory buffer;
//! [`DtlsChannel`] moves datagrams between that buffer and a connected UDP
//! socket. OpenSSL accepts any server certificate during the handshake. The
//! chain is judged afterwards by [`PeerVerifier`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant, SystemTime};

use openssl::pkey::PKey;
use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslOptions, SslVerifyMode};
use openssl::x509::X509;

use crate::certificate::{calculate_fingerprint, format_fingerprint, Credentials};
use crate::channel::{Channel, SessionState};
use crate::context::Context;
use crate::event::Event;
use crate::policy::SecurityPolicy;
use crate::resolve::ServerEndpoint;
use crate::session::Session;
use crate::verify::PeerVerifier;
use crate::Error;

mod io_buf;
mod stream;

use io_buf::IoBuffer;
use stream::TlsStream;

// Ephemeral ECDH only. CCM8 first, it is what constrained CoAP servers offer.
const DTLS_CIPHERS: &str = "ECDHE-ECDSA-AES128-CCM8:ECDHE+AESGCM:ECDHE+AESCCM:ECDHE+AES256";

/// OpenSSL 1.1.0, the first release where `DTLS_method` negotiates 1.2.
const MIN_OPENSSL_VERSION: i64 = 0x1010_0000;

/// OpenSSL retransmits handshake flights on its own timer, which only runs
/// when the handshake is driven. Drive it at least this often.
const HANDSHAKE_POLL: Duration = Duration::from_millis(500);

const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Largest datagram we accept from the socket.
const MAX_DATAGRAM: usize = 17 * 1024;

/// Check that the linked OpenSSL can do DTLS 1.2.
pub fn check_support() -> Result<(), Error> {
    if openssl::version::number() < MIN_OPENSSL_VERSION {
        return Err(Error::Precondition(format!(
            "{} does not support DTLS 1.2",
            openssl::version::version()
        )));
    }
    Ok(())
}

/// Open a DTLS client session to `server`.
///
/// The returned session is still handshaking. The handshake progresses while
/// the session is polled, and queued requests go out once it completes and
/// the server certificate passes `policy`.
///
/// Does not call [`check_support`]; do that first, [`crate::run`] does.
/// Unparseable trust anchors or CRLs in `credentials` fail with
/// [`Error::Certificate`].
pub fn connect(
    ctx: &Context,
    local: SocketAddr,
    server: &ServerEndpoint,
    policy: &SecurityPolicy,
    credentials: &Credentials,
) -> Result<Session<DtlsChannel>, Error> {
    let config = ctx.config();

    let mut builder = create_context()?;
    load_identity(&mut builder, credentials)?;
    let context = builder.build();

    let verifier = PeerVerifier::new(
        policy.clone(),
        credentials.trust_anchors(),
        credentials.crls(),
    )?;

    let socket = UdpSocket::bind(local)
        .map_err(|e| Error::session(format!("bind {}: {}", local, e)))?;
    socket
        .connect(server.addr())
        .map_err(|e| Error::session(format!("connect {}: {}", server.addr(), e)))?;

    let mut ssl = Ssl::new(&context).map_err(Error::session)?;
    ssl.set_mtu(config.mtu() as u32).map_err(Error::session)?;
    if server.host().parse::<IpAddr>().is_err() {
        ssl.set_hostname(server.host()).map_err(Error::session)?;
    }

    let now = Instant::now();
    let mut channel = DtlsChannel {
        socket,
        _context: context,
        tls: TlsStream::new(ssl, IoBuffer::default()),
        verifier,
        state: SessionState::Handshaking,
        events: VecDeque::new(),
        handshake_deadline: now + config.handshake_timeout(),
        datagram: vec![0; MAX_DATAGRAM],
    };

    info!("Starting DTLS handshake with {}", server);
    channel.drive_handshake(now);

    Ok(Session::new(ctx, channel, server.clone(), now))
}

fn create_context() -> Result<SslContextBuilder, Error> {
    let mut ctx = SslContextBuilder::new(SslMethod::dtls()).map_err(Error::context)?;

    ctx.set_cipher_list(DTLS_CIPHERS).map_err(Error::context)?;

    // Accept anything here, PeerVerifier decides after the handshake.
    ctx.set_verify_callback(SslVerifyMode::PEER, |_ok, _ctx| true);

    let mut options = SslOptions::empty();
    options.insert(SslOptions::SINGLE_ECDH_USE);
    options.insert(SslOptions::NO_DTLSV1);
    ctx.set_options(options);

    Ok(ctx)
}

fn load_identity(ctx: &mut SslContextBuilder, credentials: &Credentials) -> Result<(), Error> {
    let certificate = X509::from_der(credentials.certificate()).map_err(Error::session)?;
    ctx.set_certificate(&certificate).map_err(Error::session)?;

    for der in credentials.certificate_chain().iter().skip(1) {
        let extra = X509::from_der(der).map_err(Error::session)?;
        ctx.add_extra_chain_cert(extra).map_err(Error::session)?;
    }

    let key = PKey::private_key_from_der(credentials.private_key()).map_err(Error::session)?;
    ctx.set_private_key(&key).map_err(Error::session)?;
    ctx.check_private_key().map_err(Error::session)?;

    debug!(
        "Client certificate fingerprint: {}",
        format_fingerprint(&calculate_fingerprint(credentials.certificate()))
    );

    Ok(())
}

enum Record {
    Data(usize),
    /// Nothing buffered, wait for a datagram.
    NeedInput,
    /// Input used up without application data (close, alert, failure).
    Consumed,
}

/// A DTLS client connection on a connected UDP socket.
pub struct DtlsChannel {
    socket: UdpSocket,

    /// Pins the OpenSSL context the `Ssl` was created from.
    _context: SslContext,

    tls: TlsStream<IoBuffer>,
    verifier: PeerVerifier,
    state: SessionState,
    events: VecDeque<Event>,
    handshake_deadline: Instant,
    datagram: Vec<u8>,
}

impl DtlsChannel {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn drive_handshake(&mut self, now: Instant) {
        if now >= self.handshake_deadline {
            warn!("DTLS handshake timed out");
            self.fail();
            return;
        }

        let result = self.tls.complete_handshake_until_block();
        self.flush();

        match result {
            Ok(true) => self.handshake_complete(),
            Ok(false) => {}
            Err(e) => {
                warn!("DTLS handshake failed: {}", e);
                self.fail();
            }
        }
    }

    fn handshake_complete(&mut self) {
        let chain = self.peer_chain();

        if let Some(leaf) = chain.first() {
            info!(
                "Server certificate fingerprint: {}",
                format_fingerprint(&calculate_fingerprint(leaf))
            );
        }

        match self.verifier.verify(&chain, SystemTime::now()) {
            Ok(()) => {
                debug!("DTLS handshake complete");
                self.state = SessionState::Established;
                self.events.push_back(Event::DtlsConnected);
            }
            Err(e) => {
                warn!("Server certificate rejected: {}", e);
                if let Err(e) = self.tls.shutdown() {
                    trace!("Shutdown after rejection failed: {}", e);
                }
                self.flush();
                self.fail();
            }
        }
    }

    /// Leaf first. On the client side OpenSSL includes the leaf in the chain.
    fn peer_chain(&self) -> Vec<Vec<u8>> {
        let Some(ssl) = self.tls.ssl() else {
            return Vec::new();
        };

        if let Some(stack) = ssl.peer_cert_chain() {
            return stack.iter().filter_map(|c| c.to_der().ok()).collect();
        }

        ssl.peer_certificate()
            .and_then(|c| c.to_der().ok())
            .into_iter()
            .collect()
    }

    fn fail(&mut self) {
        if self.state.is_usable() {
            self.state = SessionState::Failed;
            self.events.push_back(Event::DtlsError);
        }
    }

    fn flush(&mut self) {
        let Some(io) = self.tls.inner_mut() else {
            return;
        };
        while let Some(datagram) = io.pop_outgoing() {
            if let Err(e) = self.socket.send(&datagram) {
                debug!("UDP send failed: {}", e);
            }
        }
    }

    /// Read one record of application data from what OpenSSL has buffered.
    fn read_record(&mut self, buf: &mut [u8]) -> Record {
        let result = self.tls.read(buf);
        self.flush();

        match result {
            Ok(0) => {
                debug!("Server closed the DTLS session");
                self.state = SessionState::Closed;
                self.events.push_back(Event::DtlsClosed);
                Record::Consumed
            }
            Ok(n) => Record::Data(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Record::NeedInput,
            Err(e) => {
                warn!("DTLS read failed: {}", e);
                self.fail();
                Record::Consumed
            }
        }
    }

    /// Wait for one datagram and hand it to OpenSSL. `Ok(false)` on timeout.
    fn wait_for_datagram(&mut self, timeout: Duration) -> io::Result<bool> {
        self.socket
            .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;

        match self.socket.recv(&mut self.datagram) {
            Ok(n) => {
                if let Some(io) = self.tls.inner_mut() {
                    io.push_incoming(&self.datagram[..n]);
                }
                Ok(true)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("Datagram refused by peer");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

impl Channel for DtlsChannel {
    fn state(&self) -> SessionState {
        self.state
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        match self.state {
            SessionState::Handshaking => {
                let left = self
                    .handshake_deadline
                    .saturating_duration_since(Instant::now());
                self.wait_for_datagram(timeout.min(HANDSHAKE_POLL).min(left))?;
                self.drive_handshake(Instant::now());
                Ok(None)
            }
            SessionState::Established => {
                // A datagram may carry several records. Drain those first.
                match self.read_record(buf) {
                    Record::NeedInput => {}
                    Record::Data(n) => return Ok(Some(n)),
                    Record::Consumed => return Ok(None),
                }

                if !self.wait_for_datagram(timeout)? {
                    return Ok(None);
                }

                match self.read_record(buf) {
                    Record::Data(n) => Ok(Some(n)),
                    Record::NeedInput | Record::Consumed => Ok(None),
                }
            }
            SessionState::Failed | SessionState::Closed => Ok(None),
        }
    }

    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        if !self.tls.is_connected() || self.state != SessionState::Established {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "DTLS session not established",
            ));
        }

        self.tls.write_all(datagram)?;
        self.flush();
        Ok(())
    }

    fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn close(&mut self) {
        match self.state {
            SessionState::Established => {
                if let Err(e) = self.tls.shutdown() {
                    debug!("DTLS shutdown failed: {}", e);
                }
                self.flush();
            }
            SessionState::Handshaking => {}
            SessionState::Failed | SessionState::Closed => return,
        }

        self.state = SessionState::Closed;
        self.events.push_back(Event::DtlsClosed);
    }
}
