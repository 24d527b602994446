//! Error types for the SOAP client.
//!
//! # Design
//! SOAP faults get a dedicated variant carrying the parsed `Fault`, because
//! the router answers application errors with HTTP 500 and a fault body.
//! Callers usually care about the fault string, not the status. Any other
//! non-200 response lands in `HttpError` with the raw status and body.

use thiserror::Error;

use crate::response::Fault;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors returned by `NeolaneClient`, `Session` and `ClientConfig`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The router returned a non-200 status without a SOAP fault body.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response envelope carried a `SOAP-ENV:Fault`.
    #[error("SOAP fault {}: {}", .0.code, .0.message)]
    SoapFault(Fault),

    /// The response body was not the envelope we expected.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The request envelope could not be written.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// A schema, attribute or link name is not a valid XML name.
    #[error("invalid XML name: {0:?}")]
    InvalidName(String),

    /// The same attribute name appears twice on one element.
    #[error("duplicate attribute: {0:?}")]
    DuplicateAttribute(String),

    /// Parallel name/value lists had different lengths.
    #[error("{names} attribute names but {values} values")]
    MismatchedColumns { names: usize, values: usize },

    /// The HTTP round-trip itself failed (DNS, connect, timeout, ...).
    #[error("transport failed: {0}")]
    Transport(String),

    /// Client configuration is missing or unreadable.
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soap_fault_display_includes_code_and_message() {
        let err = ApiError::SoapFault(Fault {
            code: "SOAP-ENV:Client".to_string(),
            message: "Session has expired".to_string(),
            actor: None,
            detail: None,
        });
        assert_eq!(err.to_string(), "SOAP fault SOAP-ENV:Client: Session has expired");
    }

    #[test]
    fn mismatched_columns_display() {
        let err = ApiError::MismatchedColumns { names: 3, values: 2 };
        assert_eq!(err.to_string(), "3 attribute names but 2 values");
    }

    #[test]
    fn http_error_display() {
        let err = ApiError::HttpError {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 502: bad gateway");
    }
}
