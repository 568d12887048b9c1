use std::fmt;

use thiserror::Error;

use crate::message::OptionNumber;
use crate::verify::CertificateError;

/// Which allocation failed while creating a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStage {
    /// The DTLS context shared by sessions (ciphers, credentials, verify mode).
    Context,
    /// The session itself (socket, key material, SSL object).
    Session,
}

impl fmt::Display for CreationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreationStage::Context => write!(f, "context"),
            CreationStage::Session => write!(f, "session"),
        }
    }
}

/// Errors that abort a run.
///
/// Delivery failures (nacks) and 4.xx/5.xx responses are not errors; they are
/// reported through [`Handlers`][crate::Handlers] while the exchange drains.
#[derive(Debug, Error)]
pub enum Error {
    /// The linked TLS library cannot do DTLS.
    #[error("No DTLS support in TLS library: {0}")]
    Precondition(String),

    /// Host name or address lookup failed.
    #[error("Error resolving address {host}: {reason}")]
    Resolution { host: String, reason: String },

    /// Context or session allocation failed.
    #[error("Could not create CoAP {stage}: {reason}")]
    SessionCreation { stage: CreationStage, reason: String },

    /// The request could not be constructed.
    #[error("Could not create CoAP request: {0}")]
    MessageBuild(String),

    /// Options must be added in ascending option number order.
    #[error("Option {number} added after option {previous}")]
    OptionOrder {
        number: OptionNumber,
        previous: OptionNumber,
    },

    /// The session refused the request, no message id was assigned.
    #[error("Error sending request: {0}")]
    Send(String),

    /// A datagram did not contain a well formed CoAP message.
    ///
    /// Returned by [`Message::decode`](crate::message::Message::decode). A
    /// session drops such datagrams rather than failing.
    #[error("Malformed CoAP message: {0}")]
    Parse(String),

    /// Peer certificate rejected by the security policy.
    #[error("Peer certificate rejected: {0}")]
    Certificate(#[from] CertificateError),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Process exit code for this error.
    ///
    /// * 1 - missing DTLS support, context creation or configuration
    /// * 2 - address resolution or session creation
    /// * 3 - request construction or send
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Precondition(_) | Error::Config(_) => 1,
            Error::SessionCreation {
                stage: CreationStage::Context,
                ..
            } => 1,
            Error::Resolution { .. } => 2,
            Error::SessionCreation {
                stage: CreationStage::Session,
                ..
            } => 2,
            Error::Certificate(_) => 2,
            Error::MessageBuild(_) | Error::OptionOrder { .. } | Error::Send(_) => 3,
            Error::Parse(_) => 3,
        }
    }

    pub(crate) fn context(reason: impl fmt::Display) -> Self {
        Error::SessionCreation {
            stage: CreationStage::Context,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn session(reason: impl fmt::Display) -> Self {
        Error::SessionCreation {
            stage: CreationStage::Session,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(Error::Precondition("none".into()).exit_code(), 1);
        assert_eq!(Error::context("ctx").exit_code(), 1);
        assert_eq!(
            Error::Resolution {
                host: "nope".into(),
                reason: "no such host".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(Error::session("bind").exit_code(), 2);
        assert_eq!(Error::MessageBuild("too big".into()).exit_code(), 3);
    }

    #[test]
    fn display_names_stage() {
        let err = Error::session("address in use");
        assert_eq!(
            err.to_string(),
            "Could not create CoAP session: address in use"
        );
    }
}
