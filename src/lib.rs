//! CoAP over DTLS client.
//!
//! Sends one request to a CoAP server over a DTLS 1.2 session and drives the
//! exchange until the session has nothing left in flight. Responses, delivery
//! failures and session events are reported through [`Handlers`].
//!
//! ```no_run
//! use dcoap::{Config, Error};
//!
//! fn main() -> Result<(), Error> {
//!     let config = Config::builder()
//!         .server("192.0.2.1")
//!         .path("mydata")
//!         .payload("this is the payload")
//!         .build()?;
//!
//!     dcoap::run(config)
//! }
//! ```
//!
//! The pieces can also be used one by one: [`resolve`], [`dtls::connect`],
//! [`RequestBuilder`], [`Exchange`] and [`Context`].

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod certificate;
mod channel;
mod client;
mod config;
mod context;
pub mod dtls;
mod error;
mod event;
mod exchange;
pub mod message;
mod policy;
mod request;
mod resolve;
mod response;
mod rng;
mod session;
mod timer;
mod verify;

pub use certificate::{calculate_fingerprint, format_fingerprint, generate_self_signed_certificate};
pub use certificate::Credentials;
pub use channel::{Channel, SessionState};
pub use client::{run, run_with_handlers};
pub use config::{Config, ConfigBuilder, COAPS_PORT};
pub use context::{Context, Handlers};
pub use error::{CreationStage, Error};
pub use event::{report_event, report_nack, Event, NackReason};
pub use exchange::{Exchange, ExchangeState};
pub use policy::SecurityPolicy;
pub use request::RequestBuilder;
pub use resolve::{resolve, ServerEndpoint};
pub use response::{classify, report_response, Classification, ResponseData, RECEIVE_CAPACITY};
pub use session::{Output, Session};
pub use verify::{CertificateError, PeerVerifier};
