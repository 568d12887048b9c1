use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::event::{report_event, report_nack, Event, NackReason};
use crate::message::{Message, MessageId};
use crate::response::{classify, report_response, Classification};
use crate::session::{Output, Session};
use crate::Config;

type ResponseHandler = Box<dyn FnMut(MessageId, &Message, &Classification)>;
type NackHandler = Box<dyn FnMut(MessageId, NackReason)>;
type EventHandler = Box<dyn FnMut(Event)>;

/// Callbacks invoked from [`Context::run_once`].
///
/// The defaults log through the `log` facade. Handlers run synchronously on
/// the polling thread and cannot influence when the exchange completes.
pub struct Handlers {
    response: ResponseHandler,
    nack: NackHandler,
    event: EventHandler,
}

impl Default for Handlers {
    fn default() -> Self {
        Handlers {
            response: Box::new(|id, _, classification| report_response(id, classification)),
            nack: Box::new(report_nack),
            event: Box::new(report_event),
        }
    }
}

impl Handlers {
    pub fn on_response(
        mut self,
        f: impl FnMut(MessageId, &Message, &Classification) + 'static,
    ) -> Self {
        self.response = Box::new(f);
        self
    }

    pub fn on_nack(mut self, f: impl FnMut(MessageId, NackReason) + 'static) -> Self {
        self.nack = Box::new(f);
        self
    }

    pub fn on_event(mut self, f: impl FnMut(Event) + 'static) -> Self {
        self.event = Box::new(f);
        self
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers").finish_non_exhaustive()
    }
}

/// State shared by the sessions of one run: configuration, keepalive
/// interval and handlers.
#[derive(Debug)]
pub struct Context {
    config: Arc<Config>,
    keepalive: Option<Duration>,
    handlers: Handlers,
}

impl Context {
    pub fn new(config: Arc<Config>) -> Self {
        Context {
            keepalive: config.keepalive(),
            config,
            handlers: Handlers::default(),
        }
    }

    pub fn with_handlers(config: Arc<Config>, handlers: Handlers) -> Self {
        Context {
            handlers,
            ..Context::new(config)
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive
    }

    /// Applies to sessions created afterwards.
    pub fn set_keepalive(&mut self, keepalive: Option<Duration>) {
        self.keepalive = keepalive;
    }

    pub fn set_handlers(&mut self, handlers: Handlers) {
        self.handlers = handlers;
    }

    /// One bounded iteration: wait for input (at most `timeout`, less if a
    /// timer is due sooner), run timers and dispatch everything the session
    /// produced. Returns the time spent.
    pub fn run_once<C: Channel>(&mut self, session: &mut Session<C>, timeout: Duration) -> Duration {
        let start = Instant::now();

        let wait = match session.poll_timeout() {
            Some(at) => at.saturating_duration_since(start).min(timeout),
            None => timeout,
        };

        session.receive(wait);
        session.handle_timeout(Instant::now());

        while let Some(output) = session.poll_output() {
            self.dispatch(output);
        }

        start.elapsed()
    }

    pub fn dispatch(&mut self, output: Output) {
        match output {
            Output::Event(event) => (self.handlers.event)(event),
            Output::Response { id, message } => {
                let classification = classify(&message);
                (self.handlers.response)(id, &message, &classification);
            }
            Output::Nack { id, reason } => (self.handlers.nack)(id, reason),
        }
    }

    /// Close the session and dispatch the closing events.
    pub fn release<C: Channel>(&mut self, mut session: Session<C>) {
        session.close(Instant::now());
        while let Some(output) = session.poll_output() {
            self.dispatch(output);
        }
    }
}
