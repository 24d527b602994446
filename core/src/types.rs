//! Request and result model for the two SOAP methods.
//!
//! # Design
//! Inputs are plain owned data so they can be loaded from JSON test vectors
//! or configuration as easily as built in code. Results are a generic
//! `Record` tree: the platform decides the shape of each collection, and
//! nothing here tries to map it onto typed schema structs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};

/// A `queryDef` select against one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectQuery {
    /// Schema namespace, e.g. `nms`.
    pub namespace: String,
    /// Schema name, e.g. `recipient`.
    pub schema: String,
    /// Selected attribute expressions, without the leading `@`.
    pub fields: Vec<String>,
    /// `where` conditions, ANDed by the platform.
    #[serde(default)]
    pub conditions: Vec<String>,
    /// `orderBy` expressions.
    #[serde(default)]
    pub order_by: Vec<String>,
}

/// A single clause appended to a select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Where(Vec<String>),
    OrderBy(Vec<String>),
}

impl SelectQuery {
    pub fn new<I, S>(namespace: &str, schema: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespace: namespace.to_string(),
            schema: schema.to_string(),
            fields: fields.into_iter().map(Into::into).collect(),
            conditions: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn with_clause(mut self, clause: Clause) -> Self {
        match clause {
            Clause::Where(conditions) => self.conditions.extend(conditions),
            Clause::OrderBy(order_by) => self.order_by.extend(order_by),
        }
        self
    }

    pub fn with_conditions<I, S>(self, conditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_clause(Clause::Where(conditions.into_iter().map(Into::into).collect()))
    }

    pub fn with_order_by<I, S>(self, order_by: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_clause(Clause::OrderBy(order_by.into_iter().map(Into::into).collect()))
    }

    /// The qualified schema name, `namespace:schema`.
    pub fn schema_ref(&self) -> String {
        format!("{}:{}", self.namespace, self.schema)
    }
}

/// An entity to persist through `xtk:persist#Write`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteEntity {
    pub namespace: String,
    pub schema: String,
    /// Attribute name/value pairs, written in order.
    pub attributes: Vec<(String, String)>,
    /// Child elements written inside the entity, e.g. a linked folder.
    #[serde(default)]
    pub links: Vec<LinkedEntity>,
}

impl WriteEntity {
    pub fn new<I, K, V>(namespace: &str, schema: &str, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            namespace: namespace.to_string(),
            schema: schema.to_string(),
            attributes: collect_pairs(attributes),
            links: Vec::new(),
        }
    }

    /// Pair up parallel name and value lists.
    pub fn from_columns<S: AsRef<str>>(
        namespace: &str,
        schema: &str,
        names: &[S],
        values: &[S],
    ) -> Result<Self> {
        Ok(Self {
            namespace: namespace.to_string(),
            schema: schema.to_string(),
            attributes: zip_columns(names, values)?,
            links: Vec::new(),
        })
    }

    pub fn with_link(mut self, link: LinkedEntity) -> Self {
        self.links.push(link);
        self
    }

    pub fn schema_ref(&self) -> String {
        format!("{}:{}", self.namespace, self.schema)
    }
}

/// A child element nested inside a `WriteEntity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedEntity {
    /// Element name, usually the link name in the parent schema.
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

impl LinkedEntity {
    pub fn new<I, K, V>(name: &str, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.to_string(),
            attributes: collect_pairs(attributes),
        }
    }

    pub fn from_columns<S: AsRef<str>>(name: &str, names: &[S], values: &[S]) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            attributes: zip_columns(names, values)?,
        })
    }
}

/// One element of a select result collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Element name, usually the schema name.
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Nested elements, produced by link expressions such as `[folder/@label]`.
    #[serde(default)]
    pub children: Vec<Record>,
}

impl Record {
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }

    pub fn child(&self, name: &str) -> Option<&Record> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Flatten to the attribute map, dropping nested elements.
    pub fn into_row(self) -> BTreeMap<String, String> {
        self.attributes
    }
}

fn collect_pairs<I, K, V>(pairs: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn zip_columns<S: AsRef<str>>(names: &[S], values: &[S]) -> Result<Vec<(String, String)>> {
    if names.len() != values.len() {
        return Err(ApiError::MismatchedColumns {
            names: names.len(),
            values: values.len(),
        });
    }
    Ok(names
        .iter()
        .zip(values)
        .map(|(n, v)| (n.as_ref().to_string(), v.as_ref().to_string()))
        .collect())
}
