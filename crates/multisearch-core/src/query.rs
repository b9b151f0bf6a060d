//! Query algebra.
//!
//! A [`Query`] is an immutable boolean expression tree:
//!
//! - leaves: free-text terms ([`Query::term`]) and field-scoped terms
//!   ([`Query::field_term`]); all terms of a leaf must match
//! - internal nodes: [`Query::and`], [`Query::or`], [`Query::not`] and
//!   [`Query::xor`] (an odd number of children match)
//! - [`Query::weight`], which keeps the matches of its child and multiplies
//!   their scores
//!
//! Nested conjunctions, disjunctions and exclusive disjunctions are flattened
//! at construction, so `and(and(a, b), c)` is the same tree as a single
//! three-way AND. Equality and hashing are structural, which lets translated
//! native queries be cached by query.
//!
//! The `&`, `|`, `^`, `-` and `*` operators are shorthand for `and`, `or`,
//! `xor`, `not` and `weight`.
//!
//! ```rust
//! use multisearch_core::Query;
//!
//! let q = Query::field_term("title", "first") | Query::term("very simple");
//! assert_eq!(q.to_string(), "(title:first | \"very simple\")");
//! ```
//!
//! # Translation
//!
//! [`translate`] folds a tree into a backend's native query through a
//! [`Translator`]. It is deterministic, and it checks the whole tree against
//! the backend's advertised operators before building anything: a backend
//! without an operator the tree uses fails with `UnsupportedQuery`. It never
//! falls back to a weaker query.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitAnd, BitOr, BitXor, Mul, Sub};
use std::sync::Arc;

use crate::capability::{Capabilities, QueryOperator};
use crate::error::{Error, Result};

/// A node of the query tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryNode {
    /// Terms matched against every free-text field.
    FreeText {
        /// Terms, all of which must match.
        terms: Vec<String>,
    },
    /// Terms matched against one field.
    Field {
        /// Field name.
        field: String,
        /// Terms, all of which must match.
        terms: Vec<String>,
    },
    /// Every child must match.
    And(Vec<Query>),
    /// At least one child must match.
    Or(Vec<Query>),
    /// `positive` must match and `negative` must not.
    Not {
        /// Candidate set.
        positive: Query,
        /// Excluded set.
        negative: Query,
    },
    /// An odd number of children must match.
    Xor(Vec<Query>),
    /// `query`'s matches, with scores multiplied by `factor`.
    Weight {
        /// Weighted subquery.
        query: Query,
        /// Score multiplier.
        factor: Factor,
    },
}

/// A score multiplier. Compared and hashed by bit pattern.
#[derive(Debug, Clone, Copy)]
pub struct Factor(f32);

impl Factor {
    /// Wrap a multiplier.
    pub fn new(value: f32) -> Self {
        Self(value)
    }

    /// The multiplier.
    pub fn get(self) -> f32 {
        self.0
    }
}

impl PartialEq for Factor {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Factor {}

impl Hash for Factor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable, cheaply cloneable query tree.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Query(Arc<QueryNode>);

impl Query {
    fn from_node(node: QueryNode) -> Self {
        Self(Arc::new(node))
    }

    /// Free-text query; `text` is split on whitespace into terms.
    pub fn term(text: &str) -> Self {
        Self::terms(text.split_whitespace())
    }

    /// Free-text query over explicit terms.
    pub fn terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_node(QueryNode::FreeText {
            terms: terms.into_iter().map(Into::into).collect(),
        })
    }

    /// Field-scoped query; `text` is split on whitespace into terms.
    pub fn field_term(field: &str, text: &str) -> Self {
        Self::field_terms(field, text.split_whitespace())
    }

    /// Field-scoped query over explicit terms.
    pub fn field_terms<I, S>(field: &str, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_node(QueryNode::Field {
            field: field.to_string(),
            terms: terms.into_iter().map(Into::into).collect(),
        })
    }

    /// Conjunction, flattening nested conjunctions.
    pub fn and(a: Query, b: Query) -> Self {
        let mut children = Vec::new();
        for q in [a, b] {
            match q.node() {
                QueryNode::And(inner) => children.extend(inner.iter().cloned()),
                _ => children.push(q),
            }
        }
        Self::from_node(QueryNode::And(children))
    }

    /// Disjunction, flattening nested disjunctions.
    pub fn or(a: Query, b: Query) -> Self {
        let mut children = Vec::new();
        for q in [a, b] {
            match q.node() {
                QueryNode::Or(inner) => children.extend(inner.iter().cloned()),
                _ => children.push(q),
            }
        }
        Self::from_node(QueryNode::Or(children))
    }

    /// Documents matching `positive` but not `negative`.
    pub fn not(positive: Query, negative: Query) -> Self {
        Self::from_node(QueryNode::Not { positive, negative })
    }

    /// Exclusive disjunction, flattening nested ones.
    ///
    /// A document matches when an odd number of children match; for two
    /// children that is exactly one of them. Scores add up like `or`.
    pub fn xor(a: Query, b: Query) -> Self {
        let mut children = Vec::new();
        for q in [a, b] {
            match q.node() {
                QueryNode::Xor(inner) => children.extend(inner.iter().cloned()),
                _ => children.push(q),
            }
        }
        Self::from_node(QueryNode::Xor(children))
    }

    /// The same matches as `query`, with scores multiplied by `factor`.
    ///
    /// `factor` must be finite and non-negative; anything else fails at
    /// translation.
    pub fn weight(query: Query, factor: f32) -> Self {
        Self::from_node(QueryNode::Weight {
            query,
            factor: Factor::new(factor),
        })
    }

    /// The root node.
    pub fn node(&self) -> &QueryNode {
        &self.0
    }

    /// Every operator used anywhere in the tree, first use first.
    pub fn operators(&self) -> Vec<QueryOperator> {
        let mut ops = Vec::new();
        self.collect_operators(&mut ops);
        ops
    }

    fn collect_operators(&self, ops: &mut Vec<QueryOperator>) {
        let op = self.operator();
        if !ops.contains(&op) {
            ops.push(op);
        }
        match self.node() {
            QueryNode::And(children) | QueryNode::Or(children) | QueryNode::Xor(children) => {
                for child in children {
                    child.collect_operators(ops);
                }
            }
            QueryNode::Not { positive, negative } => {
                positive.collect_operators(ops);
                negative.collect_operators(ops);
            }
            QueryNode::Weight { query, .. } => query.collect_operators(ops),
            QueryNode::FreeText { .. } | QueryNode::Field { .. } => {}
        }
    }

    /// The operator of the root node.
    pub fn operator(&self) -> QueryOperator {
        match self.node() {
            QueryNode::FreeText { .. } => QueryOperator::FreeText,
            QueryNode::Field { .. } => QueryOperator::Field,
            QueryNode::And(_) => QueryOperator::And,
            QueryNode::Or(_) => QueryOperator::Or,
            QueryNode::Not { .. } => QueryOperator::Not,
            QueryNode::Xor(_) => QueryOperator::Xor,
            QueryNode::Weight { .. } => QueryOperator::Weight,
        }
    }

    /// First node (pre-order) whose operator `caps` lacks.
    fn first_unsupported(&self, caps: &Capabilities) -> Option<&Query> {
        if !caps.supports_operator(self.operator()) {
            return Some(self);
        }
        match self.node() {
            QueryNode::And(children) | QueryNode::Or(children) | QueryNode::Xor(children) => {
                children.iter().find_map(|c| c.first_unsupported(caps))
            }
            QueryNode::Not { positive, negative } => positive
                .first_unsupported(caps)
                .or_else(|| negative.first_unsupported(caps)),
            QueryNode::Weight { query, .. } => query.first_unsupported(caps),
            QueryNode::FreeText { .. } | QueryNode::Field { .. } => None,
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query({self})")
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            QueryNode::FreeText { terms } => write_terms(f, terms),
            QueryNode::Field { field, terms } => {
                write!(f, "{field}:")?;
                write_terms(f, terms)
            }
            QueryNode::And(children) => write_joined(f, children, " & "),
            QueryNode::Or(children) => write_joined(f, children, " | "),
            QueryNode::Not { positive, negative } => write!(f, "({positive} - {negative})"),
            QueryNode::Xor(children) => write_joined(f, children, " ^ "),
            QueryNode::Weight { query, factor } => write!(f, "({query} * {factor})"),
        }
    }
}

fn write_terms(f: &mut fmt::Formatter<'_>, terms: &[String]) -> fmt::Result {
    if terms.len() == 1 {
        write!(f, "{}", terms[0])
    } else {
        write!(f, "\"{}\"", terms.join(" "))
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Query], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{child}")?;
    }
    write!(f, ")")
}

impl BitAnd for Query {
    type Output = Query;

    fn bitand(self, rhs: Query) -> Query {
        Query::and(self, rhs)
    }
}

impl BitOr for Query {
    type Output = Query;

    fn bitor(self, rhs: Query) -> Query {
        Query::or(self, rhs)
    }
}

impl BitXor for Query {
    type Output = Query;

    fn bitxor(self, rhs: Query) -> Query {
        Query::xor(self, rhs)
    }
}

impl Sub for Query {
    type Output = Query;

    fn sub(self, rhs: Query) -> Query {
        Query::not(self, rhs)
    }
}

impl Mul<f32> for Query {
    type Output = Query;

    fn mul(self, factor: f32) -> Query {
        Query::weight(self, factor)
    }
}

// ============================================================================
// Translation
// ============================================================================

/// Builds a backend's native query, one node at a time.
///
/// Implementations must be pure: the same inputs always produce the same
/// output.
pub trait Translator {
    /// Native query type.
    type Output;

    /// Free-text leaf. `terms` is never empty.
    fn free_text(&self, terms: &[String]) -> Result<Self::Output>;

    /// Field-scoped leaf. `terms` is never empty.
    fn field(&self, field: &str, terms: &[String]) -> Result<Self::Output>;

    /// Conjunction of at least two children.
    fn and(&self, children: Vec<Self::Output>) -> Result<Self::Output>;

    /// Disjunction of at least two children.
    fn or(&self, children: Vec<Self::Output>) -> Result<Self::Output>;

    /// Exclusion.
    fn not(&self, positive: Self::Output, negative: Self::Output) -> Result<Self::Output>;

    /// Exclusive disjunction of at least two children: odd-count matching.
    fn xor(&self, children: Vec<Self::Output>) -> Result<Self::Output>;

    /// Score scaling. `factor` is finite and non-negative.
    fn weight(&self, query: Self::Output, factor: f32) -> Result<Self::Output>;
}

/// Translate `query` for a backend described by `caps`.
///
/// # Errors
///
/// - `UnsupportedQuery` naming the first node whose operator `caps` lacks
/// - `Query` for a leaf without terms or a weight that is negative or not
///   finite
/// - anything the translator itself returns
pub fn translate<T: Translator>(
    query: &Query,
    caps: &Capabilities,
    backend: &str,
    translator: &T,
) -> Result<T::Output> {
    if let Some(node) = query.first_unsupported(caps) {
        return Err(Error::unsupported_query(node.to_string(), backend));
    }
    fold(query, translator)
}

fn fold<T: Translator>(query: &Query, translator: &T) -> Result<T::Output> {
    match query.node() {
        QueryNode::FreeText { terms } => {
            if terms.is_empty() {
                return Err(Error::query("free-text query has no terms"));
            }
            translator.free_text(terms)
        }
        QueryNode::Field { field, terms } => {
            if terms.is_empty() {
                return Err(Error::query(format!("query on field '{field}' has no terms")));
            }
            translator.field(field, terms)
        }
        QueryNode::And(children) => {
            let parts = children
                .iter()
                .map(|c| fold(c, translator))
                .collect::<Result<Vec<_>>>()?;
            translator.and(parts)
        }
        QueryNode::Or(children) => {
            let parts = children
                .iter()
                .map(|c| fold(c, translator))
                .collect::<Result<Vec<_>>>()?;
            translator.or(parts)
        }
        QueryNode::Not { positive, negative } => {
            let positive = fold(positive, translator)?;
            let negative = fold(negative, translator)?;
            translator.not(positive, negative)
        }
        QueryNode::Xor(children) => {
            let parts = children
                .iter()
                .map(|c| fold(c, translator))
                .collect::<Result<Vec<_>>>()?;
            translator.xor(parts)
        }
        QueryNode::Weight { query, factor } => {
            let factor = factor.get();
            if !factor.is_finite() || factor < 0.0 {
                return Err(Error::query(format!(
                    "weight {factor} must be finite and non-negative"
                )));
            }
            let inner = fold(query, translator)?;
            translator.weight(inner, factor)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
