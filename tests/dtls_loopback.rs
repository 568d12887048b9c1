//! Full client runs against an OpenSSL DTLS server on loopback.

mod common;

use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use openssl::pkey::PKey;
use openssl::ssl::{Ssl, SslContextBuilder, SslMethod, SslVerifyMode};
use openssl::x509::X509;

use common::{handlers, recorder};
use dcoap::message::{Code, Message, MessageId, MessageType, Method, OptionNumber};
use dcoap::{Classification, Config, ConfigBuilder, Event, NackReason, SecurityPolicy};

/// Connected UDP socket as a byte stream, one datagram per read/write.
struct UdpStream(UdpSocket);

impl Read for UdpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.recv(buf)
    }
}

impl Write for UdpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serve a single request with a piggybacked 2.04 Changed.
///
/// Returns the request the server saw, or `None` when the client went away
/// before sending one.
fn serve_once() -> (SocketAddr, JoinHandle<Option<Message>>) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap();

    let identity = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = X509::from_der(&identity.serialize_der().unwrap()).unwrap();
    let key = PKey::private_key_from_der(&identity.serialize_private_key_der()).unwrap();

    let handle = thread::spawn(move || {
        socket
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();

        let mut buf = [0u8; 2048];
        let (_, peer) = socket.peek_from(&mut buf).ok()?;
        socket.connect(peer).unwrap();

        let mut ctx = SslContextBuilder::new(SslMethod::dtls()).unwrap();
        ctx.set_certificate(&cert).unwrap();
        ctx.set_private_key(&key).unwrap();
        ctx.set_verify(SslVerifyMode::NONE);
        let ctx = ctx.build();

        let mut ssl = Ssl::new(&ctx).unwrap();
        ssl.set_mtu(1200).unwrap();
        let mut stream = ssl.accept(UdpStream(socket)).ok()?;

        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        let request = Message::decode(&buf[..n]).unwrap();

        let mut response =
            Message::new(MessageType::Acknowledgement, Code::CHANGED, request.message_id);
        response.token = request.token;
        response.payload = b"stored".to_vec();
        stream.write_all(&response.to_vec()).unwrap();

        // Wait for close_notify.
        let _ = stream.read(&mut buf);

        Some(request)
    });

    (addr, handle)
}

/// Like [`UdpStream`], but while holding, writes collect into one pending
/// datagram instead of going out one by one.
struct CoalescingStream {
    socket: UdpSocket,
    held: Option<Vec<u8>>,
}

impl CoalescingStream {
    fn hold(&mut self) {
        self.held = Some(Vec::new());
    }

    fn release(&mut self) -> io::Result<()> {
        match self.held.take() {
            Some(datagram) => self.socket.send(&datagram).map(|_| ()),
            None => Ok(()),
        }
    }
}

impl Read for CoalescingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }
}

impl Write for CoalescingStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.held {
            Some(pending) => {
                pending.extend_from_slice(buf);
                Ok(buf.len())
            }
            None => self.socket.send(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Answer a single request with an empty ACK and a separate confirmable
/// 2.04 Changed, both records packed into one datagram.
///
/// Returns the client's acknowledgement of the separate response.
fn serve_separate_in_one_datagram() -> (SocketAddr, JoinHandle<Option<Message>>) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap();

    let identity = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = X509::from_der(&identity.serialize_der().unwrap()).unwrap();
    let key = PKey::private_key_from_der(&identity.serialize_private_key_der()).unwrap();

    let handle = thread::spawn(move || {
        socket
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();

        let mut buf = [0u8; 2048];
        let (_, peer) = socket.peek_from(&mut buf).ok()?;
        socket.connect(peer).unwrap();

        let mut ctx = SslContextBuilder::new(SslMethod::dtls()).unwrap();
        ctx.set_certificate(&cert).unwrap();
        ctx.set_private_key(&key).unwrap();
        ctx.set_verify(SslVerifyMode::NONE);
        let ctx = ctx.build();

        let mut ssl = Ssl::new(&ctx).unwrap();
        ssl.set_mtu(1200).unwrap();
        let transport = CoalescingStream { socket, held: None };
        let mut stream = ssl.accept(transport).ok()?;

        let n = stream.read(&mut buf).ok()?;
        let request = Message::decode(&buf[..n]).unwrap();

        let ack = Message::empty(MessageType::Acknowledgement, request.message_id);
        let mut separate = Message::new(
            MessageType::Confirmable,
            Code::CHANGED,
            MessageId(request.message_id.0.wrapping_add(1000)),
        );
        separate.token = request.token;
        separate.payload = b"later".to_vec();

        stream.get_mut().hold();
        stream.write_all(&ack.to_vec()).unwrap();
        stream.write_all(&separate.to_vec()).unwrap();
        stream.get_mut().release().unwrap();

        let n = stream.read(&mut buf).ok()?;
        let client_ack = Message::decode(&buf[..n]).unwrap();

        // Wait for close_notify.
        let _ = stream.read(&mut buf);

        Some(client_ack)
    });

    (addr, handle)
}

fn client_config(addr: SocketAddr, policy: SecurityPolicy) -> Config {
    client_builder(addr, policy).build().unwrap()
}

fn client_builder(addr: SocketAddr, policy: SecurityPolicy) -> ConfigBuilder {
    Config::builder()
        .server("127.0.0.1")
        .port(addr.port())
        .local("127.0.0.1")
        .ephemeral_identity()
        .ca_file(None)
        .policy(policy)
        .keepalive(None)
        .method(Method::Put)
        .path("/sensors/temp")
        .payload("21.5")
        .poll_timeout(Duration::from_millis(100))
        .handshake_timeout(Duration::from_secs(5))
}

#[test]
fn request_over_dtls() {
    let _ = env_logger::try_init();

    let (addr, server) = serve_once();
    let rec = recorder();

    dcoap::run_with_handlers(
        client_config(addr, SecurityPolicy::default()),
        handlers(&rec),
    )
    .unwrap();

    let request = server.join().unwrap().expect("server saw a request");
    assert_eq!(request.code, Code::PUT);
    let paths: Vec<&[u8]> = request
        .options
        .get_all(OptionNumber::URI_PATH)
        .map(|o| o.value.as_slice())
        .collect();
    assert_eq!(paths, vec![&b"sensors"[..], &b"temp"[..]]);
    assert_eq!(request.payload, b"21.5");

    let rec = rec.borrow();
    assert!(rec.nacks.is_empty());
    assert_eq!(rec.responses.len(), 1);
    match &rec.responses[0].1 {
        Classification::Success(code, Some(data)) => {
            assert_eq!(*code, Code::CHANGED);
            assert_eq!(data.as_bytes(), b"stored");
        }
        other => panic!("unexpected classification {:?}", other),
    }
    assert_eq!(
        rec.events,
        vec![Event::DtlsConnected, Event::DtlsClosed, Event::SessionClosed]
    );
}

#[test]
fn self_signed_server_rejected() {
    let _ = env_logger::try_init();

    let (addr, server) = serve_once();
    let rec = recorder();

    let policy = SecurityPolicy {
        allow_self_signed: false,
        ..SecurityPolicy::default()
    };
    dcoap::run_with_handlers(client_config(addr, policy), handlers(&rec)).unwrap();

    assert!(server.join().unwrap().is_none());

    let rec = rec.borrow();
    assert!(rec.responses.is_empty());
    assert_eq!(rec.nacks.len(), 1);
    assert_eq!(rec.nacks[0].1, NackReason::TlsFailed);
    assert_eq!(rec.events[0], Event::DtlsError);
}

#[test]
fn records_sharing_a_datagram() {
    let _ = env_logger::try_init();

    let (addr, server) = serve_separate_in_one_datagram();
    let rec = recorder();

    let config = client_builder(addr, SecurityPolicy::default())
        .response_timeout(Duration::from_secs(3))
        .build()
        .unwrap();
    dcoap::run_with_handlers(config, handlers(&rec)).unwrap();

    let client_ack = server.join().unwrap().expect("client acknowledged");
    assert_eq!(client_ack.mtype, MessageType::Acknowledgement);
    assert_eq!(client_ack.code, Code::EMPTY);

    let rec = rec.borrow();
    assert!(rec.nacks.is_empty());
    assert_eq!(rec.responses.len(), 1);
    match &rec.responses[0].1 {
        Classification::Success(code, Some(data)) => {
            assert_eq!(*code, Code::CHANGED);
            assert_eq!(data.as_bytes(), b"later");
        }
        other => panic!("unexpected classification {:?}", other),
    }
}
