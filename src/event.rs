//! Session lifecycle events and negative acknowledgements.
//!
//! Numeric codes follow the libcoap event and nack numbering, so a code seen in
//! a peer implementation's logs maps to the same variant here. Codes we do not
//! know are kept as `Unknown`/`Other` rather than rejected.

use std::fmt;

use crate::message::MessageId;

/// Something that happened to the session while polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Secure channel handshake completed and the peer was accepted.
    DtlsConnected,
    /// Secure channel closed.
    DtlsClosed,
    /// Peer requested renegotiation.
    DtlsRenegotiate,
    /// Handshake failure, peer rejected or fatal alert.
    DtlsError,
    TcpConnected,
    TcpClosed,
    TcpFailed,
    /// Session ready for CoAP messages.
    SessionConnected,
    SessionClosed,
    SessionFailed,
    Unknown(u16),
}

impl Event {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => Event::DtlsClosed,
            0x01DE => Event::DtlsConnected,
            0x01DF => Event::DtlsRenegotiate,
            0x0200 => Event::DtlsError,
            0x1001 => Event::TcpConnected,
            0x1002 => Event::TcpClosed,
            0x1003 => Event::TcpFailed,
            0x2001 => Event::SessionConnected,
            0x2002 => Event::SessionClosed,
            0x2003 => Event::SessionFailed,
            _ => Event::Unknown(code),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Event::DtlsClosed => 0x0000,
            Event::DtlsConnected => 0x01DE,
            Event::DtlsRenegotiate => 0x01DF,
            Event::DtlsError => 0x0200,
            Event::TcpConnected => 0x1001,
            Event::TcpClosed => 0x1002,
            Event::TcpFailed => 0x1003,
            Event::SessionConnected => 0x2001,
            Event::SessionClosed => 0x2002,
            Event::SessionFailed => 0x2003,
            Event::Unknown(code) => *code,
        }
    }

    /// Whether this event signals a failure of the transport or session.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Event::DtlsError | Event::TcpFailed | Event::SessionFailed
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::DtlsClosed => write!(f, "DTLS closed"),
            Event::DtlsConnected => write!(f, "DTLS connected"),
            Event::DtlsRenegotiate => write!(f, "DTLS renegotiate"),
            Event::DtlsError => write!(f, "DTLS error"),
            Event::TcpConnected => write!(f, "TCP connected"),
            Event::TcpClosed => write!(f, "TCP closed"),
            Event::TcpFailed => write!(f, "TCP failed"),
            Event::SessionConnected => write!(f, "Session connected"),
            Event::SessionClosed => write!(f, "Session closed"),
            Event::SessionFailed => write!(f, "Session failed"),
            Event::Unknown(code) => write!(f, "Unknown CoAP event: {:04x}", code),
        }
    }
}

/// Why a confirmable message was not acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    /// Retransmission ceiling reached without an ACK.
    TooManyRetries,
    /// The message could not be handed to the transport, or the response never came.
    NotDeliverable,
    /// The peer answered with RST.
    Rst,
    /// The secure channel could not be established.
    TlsFailed,
    Other(u16),
}

impl NackReason {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => NackReason::TooManyRetries,
            1 => NackReason::NotDeliverable,
            2 => NackReason::Rst,
            3 => NackReason::TlsFailed,
            _ => NackReason::Other(code),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            NackReason::TooManyRetries => 0,
            NackReason::NotDeliverable => 1,
            NackReason::Rst => 2,
            NackReason::TlsFailed => 3,
            NackReason::Other(code) => *code,
        }
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NackReason::TooManyRetries => write!(f, "too many retries"),
            NackReason::NotDeliverable => write!(f, "not deliverable"),
            NackReason::Rst => write!(f, "RST"),
            NackReason::TlsFailed => write!(f, "TLS failed"),
            NackReason::Other(code) => write!(f, "reason={}", code),
        }
    }
}

/// Default event observer.
pub fn report_event(event: Event) {
    match event {
        Event::DtlsError | Event::TcpFailed | Event::SessionFailed => {
            warn!("Event: {}", event)
        }
        Event::Unknown(_) => warn!("{}", event),
        _ => info!("Event: {}", event),
    }
}

/// Default nack observer.
pub fn report_nack(id: MessageId, reason: NackReason) {
    warn!("CoAP NACK: reason: {} id={}", reason, id);
}
