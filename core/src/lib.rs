//! Blocking SOAP client core for the Neolane (Adobe Campaign) SOAP router.
//!
//! # Overview
//! Builds SOAP envelopes for `xtk:queryDef#ExecuteQuery` and
//! `xtk:persist#Write`, and unwraps the envelopes the router sends back.
//! `NeolaneClient` never touches the network: it produces `HttpRequest`
//! values and consumes `HttpResponse` values. `Session` pairs it with a
//! `Transport` for callers that just want the round-trip done.
//!
//! # Design
//! - `NeolaneClient` is stateless apart from the endpoint and session token.
//! - Each method is split into `build_*` (produces request) and `parse_*`
//!   (consumes response), so the I/O boundary is explicit.
//! - Results come back as generic `Record` trees; no typed mapping onto
//!   platform schemas is attempted.

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod http;
pub mod response;
pub mod session;
pub mod transport;
pub mod types;

pub use client::NeolaneClient;
pub use config::ClientConfig;
pub use envelope::SoapMethod;
pub use error::{ApiError, Result};
pub use http::{HttpRequest, HttpResponse};
pub use response::Fault;
pub use session::Session;
pub use transport::{Transport, UreqTransport};
pub use types::{Clause, LinkedEntity, Record, SelectQuery, WriteEntity};
