//! Just enough XML for the mock router: a tree reader for incoming
//! envelopes and writers for the two response shapes and faults.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::Entity;

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SOAP_ENCODING: &str = "http://schemas.xmlsoap.org/soap/encoding/";
const LITERAL_XML_ENCODING: &str = "http://xml.apache.org/xml-soap/literalxml";

/// An element with its local name, attributes, children and text.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    pub text: String,
}

impl Node {
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

pub fn parse(xml: &str) -> Result<Node, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<Node> = Vec::new();

    loop {
        let node = match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => {
                stack.push(node_from(&e)?);
                continue;
            }
            Event::Empty(e) => node_from(&e)?,
            Event::End(_) => stack.pop().ok_or("unbalanced end tag")?,
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape().map_err(|e| e.to_string())?);
                }
                continue;
            }
            Event::Eof => return Err("document has no root element".to_string()),
            _ => continue,
        };
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => return Ok(node),
        }
    }
}

fn node_from(e: &BytesStart<'_>) -> Result<Node, String> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let attributes = e
        .attributes()
        .map(|a| {
            let a = a.map_err(|e| e.to_string())?;
            let value = a.unescape_value().map_err(|e| e.to_string())?.into_owned();
            Ok((String::from_utf8_lossy(a.key.as_ref()).into_owned(), value))
        })
        .collect::<Result<Vec<_>, String>>()?;
    Ok(Node {
        name,
        attributes,
        ..Node::default()
    })
}

/// Writes into a `Vec<u8>`, which cannot fail.
struct Out(Writer<Vec<u8>>);

impl Out {
    fn new() -> Self {
        let mut out = Out(Writer::new(Vec::new()));
        out.event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)));
        out
    }

    fn event(&mut self, event: Event<'_>) {
        self.0
            .write_event(event)
            .expect("writing XML into a Vec cannot fail");
    }

    fn start(&mut self, element: BytesStart<'_>) {
        self.event(Event::Start(element));
    }

    fn end(&mut self, name: &str) {
        self.event(Event::End(BytesEnd::new(name)));
    }

    fn text_element(&mut self, name: &str, text: &str) {
        self.start(BytesStart::new(name));
        self.event(Event::Text(BytesText::new(text)));
        self.end(name);
    }

    fn entity(&mut self, entity: &Entity) {
        let mut start = BytesStart::new(entity.name.as_str());
        for (k, v) in &entity.attributes {
            start.push_attribute((k.as_str(), v.as_str()));
        }
        if entity.children.is_empty() {
            self.event(Event::Empty(start));
        } else {
            self.start(start);
            for child in &entity.children {
                self.entity(child);
            }
            self.end(&entity.name);
        }
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.0.into_inner()).into_owned()
    }
}

fn in_envelope(body: impl FnOnce(&mut Out)) -> String {
    let mut out = Out::new();
    out.start(BytesStart::new("SOAP-ENV:Envelope").with_attributes([
        ("xmlns:xsd", "http://www.w3.org/2001/XMLSchema"),
        ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
        ("xmlns:ns", "http://xml.apache.org/xml-soap"),
        ("xmlns:SOAP-ENV", SOAP_ENV_NS),
    ]));
    out.start(BytesStart::new("SOAP-ENV:Body"));
    body(&mut out);
    out.end("SOAP-ENV:Body");
    out.end("SOAP-ENV:Envelope");
    out.finish()
}

pub fn query_response(collection: &str, records: &[Entity]) -> String {
    in_envelope(|out| {
        out.start(BytesStart::new("ExecuteQueryResponse").with_attributes([
            ("xmlns", "urn:xtk:queryDef"),
            ("SOAP-ENV:encodingStyle", SOAP_ENCODING),
        ]));
        out.start(BytesStart::new("pdomOutput").with_attributes([
            ("xsi:type", "ns:Element"),
            ("SOAP-ENV:encodingStyle", LITERAL_XML_ENCODING),
        ]));
        out.start(BytesStart::new(collection));
        for record in records {
            out.entity(record);
        }
        out.end(collection);
        out.end("pdomOutput");
        out.end("ExecuteQueryResponse");
    })
}

pub fn write_response() -> String {
    in_envelope(|out| {
        out.event(Event::Empty(BytesStart::new("WriteResponse").with_attributes([
            ("xmlns", "urn:xtk:persist"),
            ("SOAP-ENV:encodingStyle", SOAP_ENCODING),
        ])));
    })
}

pub fn fault(code: &str, message: &str, detail: &str) -> String {
    in_envelope(|out| {
        out.start(BytesStart::new("SOAP-ENV:Fault"));
        out.text_element("faultcode", code);
        out.text_element("faultstring", message);
        out.text_element("detail", detail);
        out.end("SOAP-ENV:Fault");
    })
}
