use crate::channel::Channel;
use crate::message::{CoapOption, Message, MessageType, Method, OptionNumber};
use crate::session::Session;
use crate::Error;

/// Longest Uri-Host or Uri-Path segment value.
const MAX_URI_COMPONENT: usize = 255;

/// Builds a confirmable request.
///
/// Options are added in ascending option number: Uri-Host, Uri-Port, one
/// Uri-Path per path segment, then any extras in the order given. Extras
/// that would break the ordering fail the build with
/// [`Error::OptionOrder`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    mtype: MessageType,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    extra: Vec<CoapOption>,
    payload: Vec<u8>,
}

impl RequestBuilder {
    pub fn new(method: Method) -> Self {
        RequestBuilder {
            method,
            mtype: MessageType::Confirmable,
            host: None,
            port: None,
            path: None,
            extra: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Resource path, `/` separated. Empty segments are skipped.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn option(mut self, option: CoapOption) -> Self {
        self.extra.push(option);
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Send as non-confirmable. Nothing tracks the response then.
    pub fn non_confirmable(mut self) -> Self {
        self.mtype = MessageType::NonConfirmable;
        self
    }

    /// Assign a message id and token from the session and encode the
    /// options. No I/O happens here.
    pub fn build<C: Channel>(self, session: &mut Session<C>) -> Result<Message, Error> {
        let mut message = Message::new(self.mtype, self.method.code(), session.next_message_id());
        message.token = session.new_token();

        if let Some(host) = &self.host {
            check_component("host", host)?;
            message
                .options
                .push(CoapOption::new(OptionNumber::URI_HOST, host.as_bytes()))?;
        }

        if let Some(port) = self.port {
            message
                .options
                .push(CoapOption::uint(OptionNumber::URI_PORT, u32::from(port)))?;
        }

        if let Some(path) = &self.path {
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                check_component("path segment", segment)?;
                message
                    .options
                    .push(CoapOption::new(OptionNumber::URI_PATH, segment.as_bytes()))?;
            }
        }

        for option in self.extra {
            message.options.push(option)?;
        }

        message.payload = self.payload;

        let len = message.to_vec().len();
        if len > session.mtu() {
            return Err(Error::MessageBuild(format!(
                "request of {} bytes exceeds MTU {}",
                len,
                session.mtu()
            )));
        }

        Ok(message)
    }
}

fn check_component(what: &str, value: &str) -> Result<(), Error> {
    if value.len() > MAX_URI_COMPONENT {
        return Err(Error::MessageBuild(format!(
            "{} longer than {} bytes",
            what, MAX_URI_COMPONENT
        )));
    }
    Ok(())
}
