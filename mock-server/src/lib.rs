//! In-memory stand-in for the Neolane SOAP router.
//!
//! Serves `POST /nl/jsp/soaprouter.jsp` and answers `xtk:persist#Write` and
//! `xtk:queryDef#ExecuteQuery` against a store keyed by qualified schema
//! name. Query support is deliberately small: `@attr` selects, `@attr =
//! 'value'` conditions (ANDed) and ascending `@attr` ordering. Anything else
//! is answered with a SOAP fault, the way the real router reports errors.

pub mod xml;

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tokio::{net::TcpListener, sync::RwLock};

use xml::Node;

pub const ROUTER_PATH: &str = "/nl/jsp/soaprouter.jsp";
pub const DEFAULT_SESSION_TOKEN: &str = "mock/session";

const QUERY_ACTION: &str = "xtk:queryDef#ExecuteQuery";
const WRITE_ACTION: &str = "xtk:persist#Write";

/// A stored entity, or one of its linked child elements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<Entity>,
}

/// Entities by qualified schema name (`nms:recipient`), in write order.
pub type Store = Arc<RwLock<HashMap<String, Vec<Entity>>>>;

#[derive(Clone)]
struct AppState {
    store: Store,
    session_token: Arc<str>,
}

pub fn app() -> Router {
    app_with_session_token(DEFAULT_SESSION_TOKEN)
}

pub fn app_with_session_token(session_token: &str) -> Router {
    app_with_store(session_token, Store::default())
}

/// Router over a caller-provided store, so tests can seed or inspect it.
pub fn app_with_store(session_token: &str, store: Store) -> Router {
    let state = AppState {
        store,
        session_token: Arc::from(session_token),
    };
    Router::new()
        .route(ROUTER_PATH, post(soap_router))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with_session_token(
    listener: TcpListener,
    session_token: &str,
) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_session_token(session_token)).await
}

/// A fault to send back instead of a method response.
#[derive(Debug)]
struct SoapFault {
    code: &'static str,
    message: String,
    detail: String,
}

impl SoapFault {
    fn client(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code: "SOAP-ENV:Client",
            message: message.into(),
            detail: detail.into(),
        }
    }
}

impl IntoResponse for SoapFault {
    fn into_response(self) -> Response {
        tracing::debug!(message = %self.message, detail = %self.detail, "answering with fault");
        soap_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            xml::fault(self.code, &self.message, &self.detail),
        )
    }
}

fn soap_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/xml;charset=utf-8")], body).into_response()
}

async fn soap_router(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    match dispatch(&state, &headers, &body).await {
        Ok(xml) => soap_response(StatusCode::OK, xml),
        Err(fault) => fault.into_response(),
    }
}

async fn dispatch(state: &AppState, headers: &HeaderMap, body: &str) -> Result<String, SoapFault> {
    let action = headers
        .get("soapaction")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_matches('"').to_string())
        .unwrap_or_default();
    tracing::debug!(%action, "SOAP call");

    let envelope =
        xml::parse(body).map_err(|e| SoapFault::client("Malformed SOAP envelope", e))?;
    let call = envelope
        .child("Body")
        .and_then(|b| b.children.first())
        .ok_or_else(|| SoapFault::client("Malformed SOAP envelope", "no method element in Body"))?;

    let token = call.child("__sessiontoken").map(|t| t.text.as_str());
    if token != Some(&*state.session_token) {
        return Err(SoapFault::client(
            "Session has expired or is invalid. Please reconnect.",
            "XSV-350008 Session has expired or is invalid.",
        ));
    }

    match (action.as_str(), call.name.as_str()) {
        (QUERY_ACTION, "ExecuteQuery") => execute_query(state, call).await,
        (WRITE_ACTION, "Write") => write(state, call).await,
        _ => Err(SoapFault::client(
            "Unknown method",
            format!("SOAPAction {action:?} with element <{}>", call.name),
        )),
    }
}

async fn write(state: &AppState, call: &Node) -> Result<String, SoapFault> {
    let element = call
        .child("domDoc")
        .and_then(|d| d.children.first())
        .ok_or_else(|| SoapFault::client("Missing parameter", "domDoc has no entity"))?;
    let schema = element
        .attr("xtkschema")
        .ok_or_else(|| SoapFault::client("Missing schema", "entity has no xtkschema attribute"))?
        .to_string();

    let mut entity = entity_from(element);
    entity.attributes.remove("xtkschema");
    tracing::debug!(%schema, "storing entity");
    state.store.write().await.entry(schema).or_default().push(entity);
    Ok(xml::write_response())
}

fn entity_from(node: &Node) -> Entity {
    Entity {
        name: node.name.clone(),
        attributes: node.attributes.iter().cloned().collect(),
        children: node.children.iter().map(entity_from).collect(),
    }
}

async fn execute_query(state: &AppState, call: &Node) -> Result<String, SoapFault> {
    let query = call
        .child("entity")
        .and_then(|e| e.child("queryDef"))
        .ok_or_else(|| SoapFault::client("Missing parameter", "entity has no queryDef"))?;
    let schema = query
        .attr("schema")
        .ok_or_else(|| SoapFault::client("Missing schema", "queryDef has no schema attribute"))?;
    if query.attr("operation") != Some("select") {
        return Err(SoapFault::client(
            "Unsupported operation",
            format!("{:?}", query.attr("operation")),
        ));
    }

    let fields = expressions(query, "select", "node")?;
    let conditions = query
        .child("where")
        .map(|w| {
            w.children
                .iter()
                .map(|c| condition(c.attr("expr").unwrap_or_default()))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();
    let order_by = expressions(query, "orderBy", "node")?;

    let name = schema.rsplit(':').next().unwrap_or(schema);
    let store = state.store.read().await;
    let mut matched: Vec<&Entity> = store
        .get(schema)
        .map(|entities| {
            entities
                .iter()
                .filter(|e| {
                    conditions
                        .iter()
                        .all(|(attr, value)| e.attributes.get(attr) == Some(value))
                })
                .collect()
        })
        .unwrap_or_default();
    matched.sort_by(|a, b| {
        order_by
            .iter()
            .map(|attr| a.attributes.get(attr).cmp(&b.attributes.get(attr)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    let records: Vec<Entity> = matched
        .into_iter()
        .map(|e| Entity {
            name: name.to_string(),
            attributes: fields
                .iter()
                .filter_map(|f| e.attributes.get(f).map(|v| (f.clone(), v.clone())))
                .collect(),
            children: Vec::new(),
        })
        .collect();
    tracing::debug!(%schema, count = records.len(), "query answered");
    Ok(xml::query_response(&format!("{name}-collection"), &records))
}

/// Attribute names from `<wrapper><item expr="@name"/>...</wrapper>`.
fn expressions(query: &Node, wrapper: &str, item: &str) -> Result<Vec<String>, SoapFault> {
    let Some(list) = query.child(wrapper) else {
        return Ok(Vec::new());
    };
    list.children
        .iter()
        .filter(|n| n.name == item)
        .map(|n| {
            let expr = n.attr("expr").unwrap_or_default();
            attribute_name(expr)
                .map(str::to_string)
                .ok_or_else(|| SoapFault::client("Unsupported expression", expr))
        })
        .collect()
}

fn attribute_name(expr: &str) -> Option<&str> {
    let name = expr.trim().strip_prefix('@')?;
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    valid.then_some(name)
}

/// `@attr = 'value'`, with single, double or no quotes around the value.
fn condition(expr: &str) -> Result<(String, String), SoapFault> {
    let unsupported = || SoapFault::client("Unsupported condition", expr);
    let (left, right) = expr.split_once('=').ok_or_else(unsupported)?;
    let attr = attribute_name(left).ok_or_else(unsupported)?;
    let right = right.trim();
    if right.is_empty() {
        return Err(unsupported());
    }
    let value = ['\'', '"']
        .iter()
        .find_map(|q| right.strip_prefix(*q).and_then(|r| r.strip_suffix(*q)))
        .unwrap_or(right);
    Ok((attr.to_string(), value.to_string()))
}
