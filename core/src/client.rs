//! Stateless request builder and response parser for the SOAP router.
//!
//! # Design
//! `NeolaneClient` holds only the router endpoint and the session token and
//! carries no mutable state between calls. Each method is split into a
//! `build_*` function that produces an `HttpRequest` and a `parse_*` function
//! that consumes an `HttpResponse`. The caller (usually `Session`) executes
//! the actual HTTP round-trip.

use std::fmt;

use crate::config::ClientConfig;
use crate::envelope::{self, SoapMethod};
use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse, SOAP_CONTENT_TYPE};
use crate::response;
use crate::types::{Record, SelectQuery, WriteEntity};

/// Synchronous, stateless client for the SOAP router.
#[derive(Clone)]
pub struct NeolaneClient {
    endpoint: String,
    session_token: String,
}

impl NeolaneClient {
    pub fn new(endpoint: &str, session_token: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            session_token: session_token.to_string(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.endpoint, &config.session_token)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn build_select(&self, query: &SelectQuery) -> Result<HttpRequest> {
        let body = envelope::execute_query(&self.session_token, query)?;
        Ok(self.request(SoapMethod::ExecuteQuery, body))
    }

    pub fn build_write(&self, entity: &WriteEntity) -> Result<HttpRequest> {
        let body = envelope::write(&self.session_token, entity)?;
        Ok(self.request(SoapMethod::Write, body))
    }

    pub fn parse_select(&self, response: HttpResponse) -> Result<Vec<Record>> {
        let element = response::unwrap_response(&response, SoapMethod::ExecuteQuery)?;
        response::select_records(&element)
    }

    pub fn parse_write(&self, response: HttpResponse) -> Result<()> {
        response::unwrap_response(&response, SoapMethod::Write)?;
        Ok(())
    }

    fn request(&self, method: SoapMethod, body: String) -> HttpRequest {
        HttpRequest {
            url: self.endpoint.clone(),
            headers: vec![
                ("content-type".to_string(), SOAP_CONTENT_TYPE.to_string()),
                ("soapaction".to_string(), method.soap_action()),
            ],
            body,
        }
    }
}

impl fmt::Debug for NeolaneClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeolaneClient")
            .field("endpoint", &self.endpoint)
            .field("session_token", &"<redacted>")
            .finish()
    }
}
