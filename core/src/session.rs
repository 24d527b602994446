//! One blocking round-trip per call: build, send, unwrap.
//!
//! # Design
//! `Session` is the convenience layer over `NeolaneClient` for callers who
//! do not want to run the HTTP exchange themselves. It adds the optional
//! envelope dumps: with a dump directory configured, the last request and
//! response of every call are written to `request.xml` and `response.xml`.
//! Dumps are diagnostics only; failing to write one never fails the call.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::NeolaneClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{Transport, UreqTransport};
use crate::types::{Record, SelectQuery, WriteEntity};

pub const REQUEST_DUMP: &str = "request.xml";
pub const RESPONSE_DUMP: &str = "response.xml";

pub struct Session<T = UreqTransport> {
    client: NeolaneClient,
    transport: T,
    dump_dir: Option<PathBuf>,
}

impl Session<UreqTransport> {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            client: NeolaneClient::from_config(config),
            transport: UreqTransport::new(Duration::from_secs(config.timeout_secs)),
            dump_dir: config.dump_dir.clone(),
        }
    }
}

impl<T: Transport> Session<T> {
    pub fn new(client: NeolaneClient, transport: T) -> Self {
        Self {
            client,
            transport,
            dump_dir: None,
        }
    }

    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    pub fn client(&self) -> &NeolaneClient {
        &self.client
    }

    /// Run a select and return the result collection.
    pub fn select(&self, query: &SelectQuery) -> Result<Vec<Record>> {
        let request = self.client.build_select(query)?;
        let response = self.send(request)?;
        let records = self.client.parse_select(response)?;
        tracing::debug!(schema = %query.schema_ref(), count = records.len(), "select returned");
        Ok(records)
    }

    /// Run a select and flatten each record to its attributes.
    pub fn select_rows(&self, query: &SelectQuery) -> Result<Vec<BTreeMap<String, String>>> {
        Ok(self
            .select(query)?
            .into_iter()
            .map(Record::into_row)
            .collect())
    }

    /// Persist one entity.
    pub fn write(&self, entity: &WriteEntity) -> Result<()> {
        let request = self.client.build_write(entity)?;
        let response = self.send(request)?;
        self.client.parse_write(response)?;
        tracing::debug!(schema = %entity.schema_ref(), "write accepted");
        Ok(())
    }

    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let action = request.header("soapaction").unwrap_or_default().to_string();
        tracing::debug!(%action, endpoint = %request.url, "sending SOAP request");
        tracing::trace!(body = %request.body, "request envelope");
        self.dump(REQUEST_DUMP, &request.body);

        let response = self.transport.execute(request)?;

        tracing::debug!(%action, status = response.status, "SOAP response received");
        tracing::trace!(body = %response.body, "response envelope");
        self.dump(RESPONSE_DUMP, &response.body);
        Ok(response)
    }

    fn dump(&self, file_name: &str, contents: &str) {
        if let Some(dir) = &self.dump_dir {
            let path = dir.join(file_name);
            if let Err(err) = write_dump(&path, contents) {
                tracing::warn!(path = %path.display(), %err, "could not write envelope dump");
            }
        }
    }
}

fn write_dump(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}
