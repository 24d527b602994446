//! SOAP 1.1 envelope construction for `ExecuteQuery` and `Write`.
//!
//! Documents are written with `quick-xml`'s event writer: no indentation, no
//! SOAP header, one method element inside `SOAP-ENV:Body`. Attribute values
//! and text are escaped by the writer; names coming from callers are checked
//! with `is_xml_name` before they are used as element or attribute names.

use std::collections::HashSet;
use std::fmt;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{ApiError, Result};
use crate::types::{SelectQuery, WriteEntity};

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const XML_SOAP_NS: &str = "http://xml.apache.org/xml-soap";
pub const SOAP_ENCODING: &str = "http://schemas.xmlsoap.org/soap/encoding/";
pub const LITERAL_XML_ENCODING: &str = "http://xml.apache.org/xml-soap/literalxml";

const ENVELOPE: &str = "SOAP-ENV:Envelope";
const BODY: &str = "SOAP-ENV:Body";
const ENCODING_STYLE: &str = "SOAP-ENV:encodingStyle";

/// The platform methods this client knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapMethod {
    ExecuteQuery,
    Write,
}

impl SoapMethod {
    /// Schema implementing the method, e.g. `xtk:queryDef`.
    pub fn schema(self) -> &'static str {
        match self {
            SoapMethod::ExecuteQuery => "xtk:queryDef",
            SoapMethod::Write => "xtk:persist",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SoapMethod::ExecuteQuery => "ExecuteQuery",
            SoapMethod::Write => "Write",
        }
    }

    /// Value of the `SOAPAction` header, e.g. `xtk:queryDef#ExecuteQuery`.
    pub fn soap_action(self) -> String {
        format!("{}#{}", self.schema(), self.name())
    }

    /// Namespace URI of the method element, e.g. `urn:xtk:queryDef`.
    pub fn namespace(self) -> String {
        format!("urn:{}", self.schema())
    }

    /// Local name of the element wrapping the router's answer.
    pub fn response_name(self) -> String {
        format!("{}Response", self.name())
    }
}

type XmlWriter = Writer<Vec<u8>>;

/// Write a full `ExecuteQuery` envelope for `query`.
pub fn execute_query(session_token: &str, query: &SelectQuery) -> Result<String> {
    check_name(&query.namespace)?;
    check_name(&query.schema)?;

    write_envelope(SoapMethod::ExecuteQuery, session_token, |w| {
        let schema = query.schema_ref();
        start(w, literal_param("entity"))?;
        start(
            w,
            BytesStart::new("queryDef")
                .with_attributes([("schema", schema.as_str()), ("operation", "select")]),
        )?;
        expression_list(w, "select", "node", &query.fields)?;
        if !query.conditions.is_empty() {
            expression_list(w, "where", "condition", &query.conditions)?;
        }
        if !query.order_by.is_empty() {
            expression_list(w, "orderBy", "node", &query.order_by)?;
        }
        end(w, "queryDef")?;
        end(w, "entity")
    })
}

/// Write a full `Write` envelope persisting `entity`.
pub fn write(session_token: &str, entity: &WriteEntity) -> Result<String> {
    check_name(&entity.namespace)?;
    check_name(&entity.schema)?;
    check_attribute_names(&entity.attributes, &["xtkschema"])?;
    for link in &entity.links {
        check_name(&link.name)?;
        check_attribute_names(&link.attributes, &[])?;
    }

    write_envelope(SoapMethod::Write, session_token, |w| {
        let schema = entity.schema_ref();
        start(w, literal_param("domDoc"))?;

        let mut element = BytesStart::new(entity.schema.as_str());
        element.push_attribute(("xtkschema", schema.as_str()));
        for (name, value) in &entity.attributes {
            element.push_attribute((name.as_str(), value.as_str()));
        }

        if entity.links.is_empty() {
            empty(w, element)?;
        } else {
            start(w, element)?;
            for link in &entity.links {
                let mut child = BytesStart::new(link.name.as_str());
                for (name, value) in &link.attributes {
                    child.push_attribute((name.as_str(), value.as_str()));
                }
                empty(w, child)?;
            }
            end(w, &entity.schema)?;
        }

        end(w, "domDoc")
    })
}

/// Shared envelope skeleton: declaration, envelope, body, method element and
/// session token. `params` writes whatever follows the token.
fn write_envelope<F>(method: SoapMethod, session_token: &str, params: F) -> Result<String>
where
    F: FnOnce(&mut XmlWriter) -> Result<()>,
{
    let mut writer = Writer::new(Vec::new());
    let w = &mut writer;

    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(serialization)?;
    start(
        w,
        BytesStart::new(ENVELOPE).with_attributes([
            ("xmlns:SOAP-ENV", SOAP_ENV_NS),
            ("xmlns:xsd", XSD_NS),
            ("xmlns:xsi", XSI_NS),
            ("xmlns:ns", XML_SOAP_NS),
        ]),
    )?;
    start(w, BytesStart::new(BODY))?;

    let method_element = format!("urn:{}", method.name());
    let namespace = method.namespace();
    start(
        w,
        BytesStart::new(method_element.as_str())
            .with_attributes([("xmlns:urn", namespace.as_str()), (ENCODING_STYLE, SOAP_ENCODING)]),
    )?;

    start(
        w,
        BytesStart::new("__sessiontoken").with_attributes([("xsi:type", "xsd:string")]),
    )?;
    w.write_event(Event::Text(BytesText::new(session_token)))
        .map_err(serialization)?;
    end(w, "__sessiontoken")?;

    params(&mut *w)?;

    end(w, &method_element)?;
    end(w, BODY)?;
    end(w, ENVELOPE)?;

    String::from_utf8(writer.into_inner()).map_err(serialization)
}

/// A literal-XML parameter element such as `<entity xsi:type="ns:Element">`.
fn literal_param(name: &str) -> BytesStart<'_> {
    BytesStart::new(name)
        .with_attributes([("xsi:type", "ns:Element"), (ENCODING_STYLE, LITERAL_XML_ENCODING)])
}

/// `<wrapper><item expr="@..."/>...</wrapper>`
fn expression_list(w: &mut XmlWriter, wrapper: &str, item: &str, exprs: &[String]) -> Result<()> {
    start(w, BytesStart::new(wrapper))?;
    for expr in exprs {
        let expr = attribute_expr(expr);
        empty(w, BytesStart::new(item).with_attributes([("expr", expr.as_str())]))?;
    }
    end(w, wrapper)
}

/// Turn a bare attribute name into an `@` expression. Expressions that
/// already start with `@` or are link paths (`[folder/@label]`) pass through.
pub fn attribute_expr(expr: &str) -> String {
    if expr.starts_with('@') || expr.starts_with('[') {
        expr.to_string()
    } else {
        format!("@{expr}")
    }
}

fn start(w: &mut XmlWriter, element: BytesStart<'_>) -> Result<()> {
    w.write_event(Event::Start(element)).map_err(serialization)
}

fn empty(w: &mut XmlWriter, element: BytesStart<'_>) -> Result<()> {
    w.write_event(Event::Empty(element)).map_err(serialization)
}

fn end(w: &mut XmlWriter, name: &str) -> Result<()> {
    w.write_event(Event::End(BytesEnd::new(name)))
        .map_err(serialization)
}

fn serialization(err: impl fmt::Display) -> ApiError {
    ApiError::SerializationError(err.to_string())
}

fn check_name(name: &str) -> Result<()> {
    if is_xml_name(name) {
        Ok(())
    } else {
        Err(ApiError::InvalidName(name.to_string()))
    }
}

/// Attribute names must be valid, unique within the element (including
/// `reserved` ones written by us), and must not declare namespaces.
fn check_attribute_names(attributes: &[(String, String)], reserved: &[&str]) -> Result<()> {
    let mut seen: HashSet<&str> = reserved.iter().copied().collect();
    for (name, _) in attributes {
        check_name(name)?;
        if name == "xmlns" || name.starts_with("xmlns:") {
            return Err(ApiError::InvalidName(name.clone()));
        }
        if !seen.insert(name.as_str()) {
            return Err(ApiError::DuplicateAttribute(name.clone()));
        }
    }
    Ok(())
}

/// Conservative XML `Name` check: a letter or `_` first, then letters,
/// digits, `-`, `_`, `.` or `:`.
pub fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LinkedEntity;

    const QUERY_PREFIX: &str = concat!(
        r#"<?xml version="1.0" encoding="utf-8"?>"#,
        r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" "#,
        r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
        r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
        r#"xmlns:ns="http://xml.apache.org/xml-soap">"#,
        r#"<SOAP-ENV:Body>"#,
        r#"<urn:ExecuteQuery xmlns:urn="urn:xtk:queryDef" "#,
        r#"SOAP-ENV:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">"#,
        r#"<__sessiontoken xsi:type="xsd:string">admin/secret</__sessiontoken>"#,
        r#"<entity xsi:type="ns:Element" "#,
        r#"SOAP-ENV:encodingStyle="http://xml.apache.org/xml-soap/literalxml">"#,
    );

    #[test]
    fn execute_query_envelope_is_exact() {
        let query = SelectQuery::new("nms", "recipient", ["email", "lastName"]);
        let xml = execute_query("admin/secret", &query).unwrap();
        let expected = format!(
            "{QUERY_PREFIX}{}{}",
            r#"<queryDef schema="nms:recipient" operation="select"><select><node expr="@email"/><node expr="@lastName"/></select></queryDef>"#,
            "</entity></urn:ExecuteQuery></SOAP-ENV:Body></SOAP-ENV:Envelope>",
        );
        assert_eq!(xml, expected);
    }

    #[test]
    fn execute_query_writes_where_and_order_by() {
        let query = SelectQuery::new("nms", "recipient", ["email"])
            .with_conditions(["age > 18"])
            .with_order_by(["@lastName"]);
        let xml = execute_query("t", &query).unwrap();
        assert!(xml.contains(r#"<where><condition expr="@age &gt; 18"/></where>"#), "{xml}");
        assert!(xml.contains(r#"<orderBy><node expr="@lastName"/></orderBy>"#), "{xml}");
    }

    #[test]
    fn execute_query_omits_empty_clauses() {
        let query = SelectQuery::new("nms", "recipient", ["email"]);
        let xml = execute_query("t", &query).unwrap();
        assert!(!xml.contains("<where>"));
        assert!(!xml.contains("<orderBy>"));
    }

    #[test]
    fn session_token_is_escaped() {
        let query = SelectQuery::new("nms", "recipient", ["email"]);
        let xml = execute_query("a<b&c", &query).unwrap();
        assert!(xml.contains(">a&lt;b&amp;c</__sessiontoken>"), "{xml}");
    }

    #[test]
    fn write_envelope_without_links() {
        let entity = WriteEntity::new("nms", "recipient", [("email", "john@example.com")]);
        let xml = write("t", &entity).unwrap();
        assert!(xml.contains(r#"<urn:Write xmlns:urn="urn:xtk:persist" "#), "{xml}");
        assert!(xml.contains(
            r#"<domDoc xsi:type="ns:Element" SOAP-ENV:encodingStyle="http://xml.apache.org/xml-soap/literalxml"><recipient xtkschema="nms:recipient" email="john@example.com"/></domDoc>"#
        ), "{xml}");
    }

    #[test]
    fn write_envelope_nests_links() {
        let entity = WriteEntity::new("nms", "recipient", [("email", "a@b.c")])
            .with_link(LinkedEntity::new("folder", [("name", "nmsRootRecipient")]));
        let xml = write("t", &entity).unwrap();
        assert!(xml.contains(
            r#"<recipient xtkschema="nms:recipient" email="a@b.c"><folder name="nmsRootRecipient"/></recipient>"#
        ), "{xml}");
    }

    #[test]
    fn write_rejects_invalid_attribute_name() {
        let entity = WriteEntity::new("nms", "recipient", [("bad name", "x")]);
        let err = write("t", &entity).unwrap_err();
        assert!(matches!(err, ApiError::InvalidName(name) if name == "bad name"));
    }

    #[test]
    fn write_envelope_reparses_as_well_formed() {
        let entity = WriteEntity::new("nms", "recipient", [("email", "a@b.c"), ("lastName", "Doe")])
            .with_link(LinkedEntity::new("folder", [("name", "root"), ("label", "Root")]));
        let xml = write("t", &entity).unwrap();
        let root = crate::response::parse_document(&xml).unwrap();
        let recipient = &root.child("Body").unwrap().children[0].child("domDoc").unwrap().children[0];
        assert_eq!(recipient.attribute("xtkschema"), Some("nms:recipient"));
        assert_eq!(recipient.attribute("lastName"), Some("Doe"));
        assert_eq!(recipient.child("folder").unwrap().attribute("label"), Some("Root"));
    }

    #[test]
    fn write_rejects_duplicate_attributes() {
        let entity = WriteEntity::new("nms", "recipient", [("email", "a"), ("xtkschema", "nms:other")]);
        assert!(matches!(write("t", &entity), Err(ApiError::DuplicateAttribute(name)) if name == "xtkschema"));

        let entity = WriteEntity::new("nms", "recipient", [("email", "a"), ("email", "b")]);
        assert!(matches!(write("t", &entity), Err(ApiError::DuplicateAttribute(name)) if name == "email"));

        let entity = WriteEntity::new("nms", "recipient", [("email", "a")])
            .with_link(LinkedEntity::new("folder", [("name", "x"), ("name", "y")]));
        assert!(matches!(write("t", &entity), Err(ApiError::DuplicateAttribute(name)) if name == "name"));
    }

    #[test]
    fn same_attribute_on_entity_and_link_is_allowed() {
        let entity = WriteEntity::new("nms", "recipient", [("name", "a")])
            .with_link(LinkedEntity::new("folder", [("name", "b"), ("xtkschema", "xtk:folder")]));
        assert!(write("t", &entity).is_ok());
    }

    #[test]
    fn write_rejects_namespace_declarations() {
        let entity = WriteEntity::new("nms", "recipient", [("xmlns", "urn:evil")]);
        assert!(matches!(write("t", &entity), Err(ApiError::InvalidName(name)) if name == "xmlns"));

        let entity = WriteEntity::new("nms", "recipient", [("email", "a")])
            .with_link(LinkedEntity::new("folder", [("xmlns:foo", "urn:foo")]));
        assert!(matches!(write("t", &entity), Err(ApiError::InvalidName(name)) if name == "xmlns:foo"));
    }

    #[test]
    fn select_rejects_invalid_schema() {
        let query = SelectQuery::new("nms", "1recipient", ["email"]);
        assert!(matches!(execute_query("t", &query), Err(ApiError::InvalidName(_))));
    }

    #[test]
    fn xml_name_rules() {
        assert!(is_xml_name("recipient"));
        assert!(is_xml_name("_key"));
        assert!(is_xml_name("xtk:schema"));
        assert!(is_xml_name("first-name.v2"));
        assert!(!is_xml_name(""));
        assert!(!is_xml_name("9lives"));
        assert!(!is_xml_name("has space"));
        assert!(!is_xml_name("@email"));
    }

    #[test]
    fn attribute_expr_prefixes_bare_names_only() {
        assert_eq!(attribute_expr("email"), "@email");
        assert_eq!(attribute_expr("@email"), "@email");
        assert_eq!(attribute_expr("[folder/@label]"), "[folder/@label]");
        assert_eq!(attribute_expr("lastName = 'Doe'"), "@lastName = 'Doe'");
    }

    #[test]
    fn method_metadata() {
        assert_eq!(SoapMethod::ExecuteQuery.soap_action(), "xtk:queryDef#ExecuteQuery");
        assert_eq!(SoapMethod::Write.namespace(), "urn:xtk:persist");
        assert_eq!(SoapMethod::Write.response_name(), "WriteResponse");
    }
}
