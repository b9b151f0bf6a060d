//! Document model.
//!
//! A [`Document`] is an ordered sequence of `(field name, value)` pairs. A
//! field name may repeat, which makes the field multi-valued. Documents are
//! built by the caller and consumed once by an index or update operation;
//! nothing here validates field names or values. That happens in the schema
//! registry and the driver at indexing time.
//!
//! # Example
//!
//! ```rust
//! use multisearch_core::{Document, Value};
//!
//! let doc = Document::new([
//!     ("title", Value::from("My first document")),
//!     ("tag", Value::from("intro")),
//!     ("tag", Value::from("example")),
//! ]);
//!
//! let tags: Vec<_> = doc.field_values("tag").filter_map(Value::as_text).collect();
//! assert_eq!(tags, vec!["intro", "example"]);
//! ```
//!
//! # Mapping input
//!
//! [`Document::from_map`] accepts any map of field name to values. Maps carry
//! no inter-field order, so the resulting document orders fields by the
//! map's iteration order. Order of values *within* a field is preserved.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a field value, used to check values against backend capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Unicode text.
    Text,
    /// A number.
    Number,
    /// A UTC timestamp.
    DateTime,
    /// A nested document.
    Document,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Number => write!(f, "number"),
            Self::DateTime => write!(f, "datetime"),
            Self::Document => write!(f, "document"),
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Unicode text.
    Text(String),
    /// A number.
    Number(f64),
    /// A UTC timestamp.
    DateTime(DateTime<Utc>),
    /// A nested document.
    Document(Document),
}

impl Value {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::Text,
            Value::Number(_) => ValueKind::Number,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::Document(_) => ValueKind::Document,
        }
    }

    /// Returns the text if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number if this is a numeric value.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the timestamp if this is a datetime value.
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    /// Render the value as text for free-text or exact-match indexing.
    ///
    /// Numbers use their shortest round-trip form, datetimes RFC 3339, and
    /// nested documents the space-joined rendering of all their values.
    pub fn to_text(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::Document(doc) => doc
                .iter()
                .map(|(_, v)| v.to_text())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Document(doc)
    }
}

/// An ordered collection of field/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    pairs: Vec<(String, Value)>,
}

impl Document {
    /// Build a document from an ordered sequence of pairs.
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Build a document from a map of field name to values.
    ///
    /// Each entry may hold several values, which become a multi-valued field
    /// in the order given.
    pub fn from_map<I, K, V>(map: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut pairs = Vec::new();
        for (name, values) in map {
            let name = name.into();
            for value in values {
                pairs.push((name.clone(), value.into()));
            }
        }
        Self { pairs }
    }

    /// Append a value for a field.
    pub fn push<K: Into<String>, V: Into<Value>>(&mut self, name: K, value: V) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Builder-style variant of [`push`](Self::push).
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, name: K, value: V) -> Self {
        self.push(name, value);
        self
    }

    /// Lazily iterate the values of a field, in order.
    ///
    /// Empty if the field is absent. The iterator is `Clone`, so it can be
    /// restarted from any point.
    pub fn field_values<'a>(&'a self, name: &'a str) -> FieldValues<'a> {
        FieldValues {
            pairs: &self.pairs,
            name,
            pos: 0,
        }
    }

    /// Distinct field names, in order of first appearance.
    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.pairs {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }

    /// Iterate all pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of pairs (not distinct fields).
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the document has no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Group values by field name.
    pub fn to_map(&self) -> BTreeMap<String, Vec<Value>> {
        let mut map: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for (name, value) in &self.pairs {
            map.entry(name.clone()).or_default().push(value.clone());
        }
        map
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Document::new(iter)
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}

/// Lazy iterator over the values of one field of a [`Document`].
#[derive(Debug, Clone)]
pub struct FieldValues<'a> {
    pairs: &'a [(String, Value)],
    name: &'a str,
    pos: usize,
}

impl<'a> Iterator for FieldValues<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.pairs.len() {
            let (name, value) = &self.pairs[self.pos];
            self.pos += 1;
            if name == self.name {
                return Some(value);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.pairs.len() - self.pos))
    }
}

// ============================================================================
// Tests
// ============================================================================
