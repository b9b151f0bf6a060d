//! Text analysis shared by the drivers without an analyzer of their own.
//!
//! Free text is split on every non-alphanumeric character and lowercased.
//! There is no stemming and no stopword removal.
//!
//! Exact-match, numeric and date values are reduced to a canonical token so
//! that indexing and querying agree:
//!
//! - exact-match: the whole value; a query's terms are joined by one space
//! - numeric: the shortest round-trip decimal rendering
//! - date: RFC 3339 at second precision, UTC

use chrono::{DateTime, SecondsFormat, Utc};
use multisearch_core::{Error, FieldKind, IndexValue, Result};

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Tokenize every term of a query leaf, in order.
pub fn tokenize_terms(terms: &[String]) -> Vec<String> {
    terms.iter().flat_map(|t| tokenize(t)).collect()
}

/// Canonical token of a number.
pub fn number_token(n: f64) -> String {
    n.to_string()
}

/// Canonical token of a timestamp.
pub fn date_token(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Tokens a coerced value contributes to a field of `kind`.
pub fn value_tokens(kind: FieldKind, value: &IndexValue) -> Vec<String> {
    match (kind, value) {
        (FieldKind::FreeText, IndexValue::Text(s)) => tokenize(s),
        (FieldKind::ExactMatch, IndexValue::Text(s)) => vec![s.clone()],
        (_, IndexValue::Number(n)) => vec![number_token(*n)],
        (_, IndexValue::Date(dt)) => vec![date_token(dt)],
        _ => Vec::new(),
    }
}

/// Tokens a field query's terms must match, for a field of `kind`.
///
/// # Errors
///
/// `Query` when a term cannot be read as the field's kind.
pub fn query_tokens(field: &str, kind: FieldKind, terms: &[String]) -> Result<Vec<String>> {
    match kind {
        FieldKind::FreeText => Ok(tokenize_terms(terms)),
        FieldKind::ExactMatch => Ok(vec![terms.join(" ")]),
        FieldKind::Numeric => terms
            .iter()
            .map(|t| parse_number(field, t).map(number_token))
            .collect(),
        FieldKind::Date => terms
            .iter()
            .map(|t| parse_date(field, t).map(|dt| date_token(&dt)))
            .collect(),
        FieldKind::Ignored => Ok(Vec::new()),
    }
}

/// Parse a query term for a numeric field.
pub fn parse_number(field: &str, term: &str) -> Result<f64> {
    term.parse::<f64>()
        .map_err(|_| Error::query(format!("field '{field}' is numeric, got '{term}'")))
}

/// Parse a query term for a date field.
pub fn parse_date(field: &str, term: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(term)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::query(format!("field '{field}' holds dates, got '{term}'")))
}
