//! Classification of received responses.

use std::fmt;

use tinyvec::ArrayVec;

use crate::message::{Code, Message, MessageId};

/// Bytes of payload kept from a response.
pub const RECEIVE_CAPACITY: usize = 512;

/// Payload copied out of a 2.xx response.
///
/// Payloads longer than [`RECEIVE_CAPACITY`] are cut at the capacity and
/// flagged with [`ResponseData::is_truncated`]. Nothing past the capacity is
/// kept.
#[derive(Clone, PartialEq, Eq)]
pub struct ResponseData {
    buf: ArrayVec<[u8; RECEIVE_CAPACITY]>,
    received_len: usize,
}

impl ResponseData {
    pub fn copy_from(payload: &[u8]) -> Self {
        let n = payload.len().min(RECEIVE_CAPACITY);
        let mut buf = ArrayVec::default();
        buf.extend_from_slice(&payload[..n]);
        ResponseData {
            buf,
            received_len: payload.len(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Length of the payload as received, before truncation.
    pub fn received_len(&self) -> usize {
        self.received_len
    }

    pub fn is_truncated(&self) -> bool {
        self.received_len > self.buf.len()
    }
}

impl fmt::Debug for ResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseData")
            .field("data", &String::from_utf8_lossy(&self.buf))
            .field("received_len", &self.received_len)
            .finish()
    }
}

/// What a response means for the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// 2.xx, with the payload if there was one.
    Success(Code, Option<ResponseData>),
    /// 4.xx. The request is invalid and was not processed.
    ClientError(Code),
    /// 5.xx. The server failed to process the request.
    ServerError(Code),
    /// Any other class.
    UnhandledResponseCode(Code),
}

impl Classification {
    pub fn is_success(&self) -> bool {
        matches!(self, Classification::Success(..))
    }

    pub fn data(&self) -> Option<&ResponseData> {
        match self {
            Classification::Success(_, data) => data.as_ref(),
            _ => None,
        }
    }
}

pub fn classify(message: &Message) -> Classification {
    let code = message.code;
    match code.class() {
        2 => {
            let data = if message.payload.is_empty() {
                None
            } else {
                Some(ResponseData::copy_from(&message.payload))
            };
            Classification::Success(code, data)
        }
        4 => Classification::ClientError(code),
        5 => Classification::ServerError(code),
        _ => Classification::UnhandledResponseCode(code),
    }
}

/// Default response observer.
pub fn report_response(id: MessageId, classification: &Classification) {
    match classification {
        Classification::ClientError(code) => {
            warn!(
                "Got {} response from server for id={}. The request is invalid",
                code, id
            );
        }
        Classification::ServerError(code) => {
            warn!(
                "Got {} response from server for id={}. Request failed",
                code, id
            );
        }
        Classification::Success(code, None) => {
            info!("Got {} response from server. Request successful", code);
            info!("No data in response");
        }
        Classification::Success(code, Some(data)) => {
            info!("Got {} response from server. Request successful", code);
            if data.is_truncated() {
                warn!(
                    "Response payload truncated from {} to {} bytes",
                    data.received_len(),
                    data.len()
                );
            }
            info!(
                "Got data from server: {}",
                String::from_utf8_lossy(data.as_bytes())
            );
        }
        Classification::UnhandledResponseCode(code) => {
            warn!(
                "Got response code {} from server. Don't know how to handle it",
                code
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    fn response(code: Code, payload: &[u8]) -> Message {
        let mut message = Message::new(MessageType::Acknowledgement, code, MessageId(1));
        message.payload = payload.to_vec();
        message
    }

    #[test]
    fn success_with_data() {
        let c = classify(&response(Code::CONTENT, b"ok"));
        assert!(c.is_success());
        let data = c.data().unwrap();
        assert_eq!(data.as_bytes(), b"ok");
        assert!(!data.is_truncated());
    }

    #[test]
    fn success_without_data() {
        let c = classify(&response(Code::CHANGED, b""));
        assert_eq!(c, Classification::Success(Code::CHANGED, None));
    }

    #[test]
    fn client_and_server_errors() {
        assert_eq!(
            classify(&response(Code::NOT_FOUND, b"")),
            Classification::ClientError(Code::NOT_FOUND)
        );
        assert_eq!(
            classify(&response(Code::BAD_OPTION, b"bad")),
            Classification::ClientError(Code::BAD_OPTION)
        );
        assert_eq!(
            classify(&response(Code::SERVICE_UNAVAILABLE, b"")),
            Classification::ServerError(Code::SERVICE_UNAVAILABLE)
        );
    }

    #[test]
    fn other_classes_unhandled() {
        let weird = Code::new(3, 1);
        assert_eq!(
            classify(&response(weird, b"")),
            Classification::UnhandledResponseCode(weird)
        );
        assert_eq!(
            classify(&response(Code::POST, b"")),
            Classification::UnhandledResponseCode(Code::POST)
        );
    }

    #[test]
    fn truncates_to_capacity() {
        let payload = vec![b'z'; RECEIVE_CAPACITY + 100];
        let c = classify(&response(Code::CONTENT, &payload));
        let data = c.data().unwrap();
        assert_eq!(data.len(), RECEIVE_CAPACITY);
        assert_eq!(data.received_len(), RECEIVE_CAPACITY + 100);
        assert!(data.is_truncated());
        assert_eq!(data.as_bytes(), &payload[..RECEIVE_CAPACITY]);
    }

    #[test]
    fn exactly_capacity_is_not_truncated() {
        let payload = vec![b'a'; RECEIVE_CAPACITY];
        let c = classify(&response(Code::CONTENT, &payload));
        assert!(!c.data().unwrap().is_truncated());
    }
}
