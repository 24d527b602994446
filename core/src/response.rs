//! Response envelope unwrapping.
//!
//! # Design
//! Responses are small, so the body is read into a minimal element tree with
//! `quick-xml`'s pull reader instead of being deserialized into fixed
//! structs. Result collections are shaped by the queried schema, and a tree
//! keeps nested link elements without knowing that shape in advance.
//! Element names are stored without their namespace prefix; attribute names
//! keep theirs.

use std::collections::BTreeMap;
use std::fmt;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::envelope::SoapMethod;
use crate::error::{ApiError, Result};
use crate::http::HttpResponse;
use crate::types::Record;

/// A `SOAP-ENV:Fault` returned by the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// `faultcode`, e.g. `SOAP-ENV:Client`.
    pub code: String,
    /// `faultstring`, the human-readable message.
    pub message: String,
    pub actor: Option<String>,
    /// Text content of `detail`, usually the platform error code and message.
    pub detail: Option<String>,
}

/// An XML element with its attributes, child elements and text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Concatenated text of this element and all its descendants.
    pub fn text_content(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push_str(&child.text_content());
        }
        out
    }

    /// Convert to a `Record`, dropping namespace declarations.
    pub fn to_record(&self) -> Record {
        let attributes: BTreeMap<String, String> = self
            .attributes
            .iter()
            .filter(|(key, _)| key != "xmlns" && !key.starts_with("xmlns:"))
            .cloned()
            .collect();
        Record {
            name: self.name.clone(),
            attributes,
            children: self.children.iter().map(Element::to_record).collect(),
        }
    }
}

/// Parse a whole document into its root element.
pub fn parse_document(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => stack.push(element_from(&start)?),
            Event::Empty(start) => {
                let element = element_from(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| malformed("unexpected closing tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape().map_err(malformed)?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    let raw = data.into_inner();
                    current
                        .text
                        .push_str(std::str::from_utf8(&raw).map_err(malformed)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(malformed(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or_else(|| malformed("empty document"))
}

fn element_from(start: &BytesStart<'_>) -> Result<Element> {
    let name = std::str::from_utf8(start.local_name().as_ref())
        .map_err(malformed)?
        .to_string();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(malformed)?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(malformed)?
            .to_string();
        let value = attribute.unescape_value().map_err(malformed)?.into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(malformed("more than one root element"));
    }
    Ok(())
}

/// Find the method response element inside a response, turning faults and
/// bad statuses into errors.
///
/// A fault wins over the status code: the router reports faults as HTTP 500.
pub fn unwrap_response(response: &HttpResponse, method: SoapMethod) -> Result<Element> {
    let document = match parse_document(&response.body) {
        Ok(document) => document,
        Err(err) if response.status == 200 => return Err(err),
        Err(_) => return Err(http_error(response)),
    };

    if document.name != "Envelope" {
        if response.status != 200 {
            return Err(http_error(response));
        }
        return Err(malformed(format!(
            "expected a SOAP Envelope, found <{}>",
            document.name
        )));
    }

    let Some(mut body) = document.children.into_iter().find(|child| child.name == "Body") else {
        if response.status != 200 {
            return Err(http_error(response));
        }
        return Err(malformed("envelope has no Body"));
    };

    if let Some(fault) = body.child("Fault") {
        return Err(ApiError::SoapFault(fault_from(fault)));
    }
    if response.status != 200 {
        return Err(http_error(response));
    }

    let expected = method.response_name();
    let position = body
        .children
        .iter()
        .position(|child| child.name == expected)
        .ok_or_else(|| malformed(format!("body has no <{expected}>")))?;
    Ok(body.children.swap_remove(position))
}

/// The result collection of an `ExecuteQueryResponse`: the first child of
/// its first child (`pdomOutput/<schema>-collection`).
pub fn select_records(response: &Element) -> Result<Vec<Record>> {
    let collection = response
        .children
        .first()
        .and_then(|output| output.children.first())
        .ok_or_else(|| malformed("ExecuteQueryResponse has no result collection"))?;
    Ok(collection.children.iter().map(Element::to_record).collect())
}

fn fault_from(fault: &Element) -> Fault {
    let text = |name: &str| fault.child(name).map(|el| el.text_content());
    Fault {
        code: text("faultcode").unwrap_or_default(),
        message: text("faultstring").unwrap_or_default(),
        actor: text("faultactor"),
        detail: text("detail"),
    }
}

fn http_error(response: &HttpResponse) -> ApiError {
    ApiError::HttpError {
        status: response.status,
        body: response.body.clone(),
    }
}

fn malformed(err: impl fmt::Display) -> ApiError {
    ApiError::MalformedResponse(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    const QUERY_RESPONSE: &str = r#"<?xml version='1.0'?>
<SOAP-ENV:Envelope xmlns:xsd='http://www.w3.org/2001/XMLSchema' xmlns:xsi='http://www.w3.org/2001/XMLSchema-instance' xmlns:ns='urn:xtk:queryDef' xmlns:SOAP-ENV='http://schemas.xmlsoap.org/soap/envelope/'>
  <SOAP-ENV:Body>
    <ExecuteQueryResponse xmlns='urn:xtk:queryDef' SOAP-ENV:encodingStyle='http://schemas.xmlsoap.org/soap/encoding/'>
      <pdomOutput xsi:type='ns:Element' SOAP-ENV:encodingStyle='http://xml.apache.org/xml-soap/literalxml'>
        <recipient-collection>
          <recipient email="john@example.com" lastName="Doe &amp; Sons"><folder label="Root"/></recipient>
          <recipient email="jane@example.com" lastName="Roe"/>
        </recipient-collection>
      </pdomOutput>
    </ExecuteQueryResponse>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

    const FAULT_RESPONSE: &str = r#"<?xml version='1.0'?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV='http://schemas.xmlsoap.org/soap/envelope/'>
  <SOAP-ENV:Body>
    <SOAP-ENV:Fault>
      <faultcode>SOAP-ENV:Client</faultcode>
      <faultstring xsi:type="xsd:string">Session has expired or is invalid.</faultstring>
      <detail xsi:type="xsd:string"><![CDATA[XSV-350008 Session has expired]]></detail>
    </SOAP-ENV:Fault>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

    #[test]
    fn parse_document_builds_tree() {
        let root = parse_document(r#"<a x="1"><b>hi</b><c/></a>"#).unwrap();
        assert_eq!(root.name, "a");
        assert_eq!(root.attribute("x"), Some("1"));
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.child("b").unwrap().text, "hi");
        assert_eq!(root.text_content(), "hi");
    }

    #[test]
    fn parse_document_rejects_garbage() {
        assert!(matches!(parse_document(""), Err(ApiError::MalformedResponse(_))));
        assert!(matches!(parse_document("<a><b></a>"), Err(ApiError::MalformedResponse(_))));
        assert!(matches!(parse_document("<a/><b/>"), Err(ApiError::MalformedResponse(_))));
        assert!(matches!(parse_document("<a>"), Err(ApiError::MalformedResponse(_))));
    }

    #[test]
    fn select_records_reads_collection() {
        let element =
            unwrap_response(&response(200, QUERY_RESPONSE), SoapMethod::ExecuteQuery).unwrap();
        let records = select_records(&element).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "recipient");
        assert_eq!(records[0].get("lastName"), Some("Doe & Sons"));
        assert_eq!(records[0].child("folder").unwrap().get("label"), Some("Root"));
        assert_eq!(records[1].get("email"), Some("jane@example.com"));
    }

    #[test]
    fn empty_collection_is_empty_list() {
        let body = QUERY_RESPONSE
            .replace(r#"<recipient email="john@example.com" lastName="Doe &amp; Sons"><folder label="Root"/></recipient>"#, "")
            .replace(r#"<recipient email="jane@example.com" lastName="Roe"/>"#, "");
        let element = unwrap_response(&response(200, &body), SoapMethod::ExecuteQuery).unwrap();
        assert!(select_records(&element).unwrap().is_empty());
    }

    #[test]
    fn fault_is_reported_even_with_500() {
        let err = unwrap_response(&response(500, FAULT_RESPONSE), SoapMethod::Write).unwrap_err();
        match err {
            ApiError::SoapFault(fault) => {
                assert_eq!(fault.code, "SOAP-ENV:Client");
                assert_eq!(fault.message, "Session has expired or is invalid.");
                assert_eq!(fault.detail.as_deref(), Some("XSV-350008 Session has expired"));
                assert!(fault.actor.is_none());
            }
            other => panic!("expected SoapFault, got {other:?}"),
        }
    }

    #[test]
    fn fault_actor_is_extracted() {
        let body = FAULT_RESPONSE.replace(
            "</faultstring>",
            "</faultstring><faultactor>http://router/nl/jsp/soaprouter.jsp</faultactor>",
        );
        let err = unwrap_response(&response(500, &body), SoapMethod::ExecuteQuery).unwrap_err();
        assert!(matches!(
            err,
            ApiError::SoapFault(ref fault) if fault.actor.as_deref() == Some("http://router/nl/jsp/soaprouter.jsp")
        ));
    }

    #[test]
    fn bodyless_envelope_with_error_status_is_http_error() {
        let body = "<SOAP-ENV:Envelope xmlns:SOAP-ENV='http://schemas.xmlsoap.org/soap/envelope/'/>";
        let err = unwrap_response(&response(500, body), SoapMethod::Write).unwrap_err();
        assert!(matches!(err, ApiError::HttpError { status: 500, .. }));

        let err = unwrap_response(&response(200, body), SoapMethod::Write).unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }

    #[test]
    fn non_xml_error_page_is_http_error() {
        let err = unwrap_response(&response(503, "Service Unavailable"), SoapMethod::Write)
            .unwrap_err();
        assert!(matches!(err, ApiError::HttpError { status: 503, .. }));
    }

    #[test]
    fn non_xml_success_is_malformed() {
        let err = unwrap_response(&response(200, "not xml at all"), SoapMethod::Write).unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }

    #[test]
    fn wrong_method_response_is_malformed() {
        let err = unwrap_response(&response(200, QUERY_RESPONSE), SoapMethod::Write).unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(msg) if msg.contains("WriteResponse")));
    }

    #[test]
    fn to_record_drops_namespace_declarations() {
        let root = parse_document(r#"<r xmlns="urn:x" xmlns:a="urn:a" a:b="1" c="2"/>"#).unwrap();
        let record = root.to_record();
        assert_eq!(record.attributes.len(), 2);
        assert_eq!(record.get("a:b"), Some("1"));
        assert_eq!(record.get("c"), Some("2"));
    }
}
