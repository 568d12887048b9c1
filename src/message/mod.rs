//! CoAP message (PDU) model and wire codec, RFC 7252 section 3.

use std::fmt;

use nom::bytes::complete::take;
use nom::error::{make_error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};
use tinyvec::ArrayVec;

mod code;
mod option;

pub use code::{Code, Method};
pub use option::{CoapOption, OptionList, OptionNumber, MAX_OPTION_LEN};

use crate::Error;

pub(crate) const PAYLOAD_MARKER: u8 = 0xFF;

const VERSION: u8 = 1;

/// Size of the fixed header (version, type, token length, code, message id).
pub const HEADER_LEN: usize = 4;

/// Up to 8 bytes correlating a request with its response.
pub type Token = ArrayVec<[u8; 8]>;

/// Message id. Identifies one transmission (and its retransmissions).
///
/// This is the transaction id handed back when a message is sent, and the id
/// reported with nacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u16);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// The peer must acknowledge, or the message is retransmitted.
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub mtype: MessageType,
    pub code: Code,
    pub message_id: MessageId,
    pub token: Token,
    pub options: OptionList,
    /// Empty means no payload, the marker is then omitted on the wire.
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(mtype: MessageType, code: Code, message_id: MessageId) -> Self {
        Message {
            mtype,
            code,
            message_id,
            token: Token::default(),
            options: OptionList::new(),
            payload: Vec::new(),
        }
    }

    /// Empty ACK/RST, or with `Confirmable` a CoAP ping.
    pub fn empty(mtype: MessageType, message_id: MessageId) -> Self {
        Message::new(mtype, Code::EMPTY, message_id)
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Message> {
        let original = input;

        let (input, first) = be_u8(input)?;
        if first >> 6 != VERSION {
            return Err(Err::Failure(make_error(original, ErrorKind::Verify)));
        }
        let mtype = MessageType::from_u8(first >> 4);
        let token_len = first & 0x0f;
        if token_len > 8 {
            return Err(Err::Failure(make_error(original, ErrorKind::Verify)));
        }

        let (input, code) = be_u8(input)?;
        let code = Code::from_u8(code);
        let (input, message_id) = be_u16(input)?;
        let (input, token) = take(token_len as usize)(input)?;

        if code.is_empty() {
            // An empty message is only the 4 byte header.
            if token_len != 0 || !input.is_empty() {
                return Err(Err::Failure(make_error(input, ErrorKind::Verify)));
            }
        }

        let (input, options) = OptionList::parse(input)?;

        let (input, payload) = if input.first() == Some(&PAYLOAD_MARKER) {
            let rest = &input[1..];
            if rest.is_empty() {
                // Marker followed by a zero length payload is a format error.
                return Err(Err::Failure(make_error(input, ErrorKind::Eof)));
            }
            (&rest[rest.len()..], rest)
        } else {
            (input, &[][..])
        };

        let mut t = Token::default();
        t.extend_from_slice(token);

        Ok((
            input,
            Message {
                mtype,
                code,
                message_id: MessageId(message_id),
                token: t,
                options,
                payload: payload.to_vec(),
            },
        ))
    }

    /// Parse a whole datagram as one message.
    pub fn decode(datagram: &[u8]) -> Result<Message, Error> {
        match Message::parse(datagram) {
            Ok((rest, message)) if rest.is_empty() => Ok(message),
            Ok((rest, _)) => Err(Error::Parse(format!("{} trailing bytes", rest.len()))),
            Err(e) => Err(Error::Parse(e.to_string())),
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push((VERSION << 6) | (self.mtype.as_u8() << 4) | self.token.len() as u8);
        output.push(self.code.as_u8());
        output.extend_from_slice(&self.message_id.0.to_be_bytes());
        output.extend_from_slice(&self.token);
        self.options.serialize(output);
        if !self.payload.is_empty() {
            output.push(PAYLOAD_MARKER);
            output.extend_from_slice(&self.payload);
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.token.len() + self.payload.len() + 32);
        self.serialize(&mut out);
        out
    }
}
