//! Driver capability descriptors.
//!
//! Every driver publishes a static [`Capabilities`] value describing what it
//! supports and when indexed documents become durable, visible and
//! identified. Everything above the driver consults this descriptor instead
//! of checking which backend it is talking to.

use std::fmt;

use serde::Serialize;

use crate::document::ValueKind;

/// How a backend's field configuration may change over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaTier {
    /// Frozen once the first document has been indexed.
    Fixed,
    /// New fields may be added; an existing field's config never changes.
    AppendOnly,
    /// Any field may be reconfigured at any time.
    Mutable(ReindexLatency),
}

/// When a schema change under [`SchemaTier::Mutable`] reaches stored documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexLatency {
    /// Existing documents are re-processed before the change returns.
    Immediate,
    /// Only documents indexed after the change are affected.
    Eventual,
}

/// A point in a document's write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPoint {
    /// When the index call returns.
    AtCall,
    /// When `commit()` returns.
    AtCommit,
    /// When the backend flushes on its own schedule.
    AtFlush,
}

impl fmt::Display for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtCall => write!(f, "at-call"),
            Self::AtCommit => write!(f, "at-commit"),
            Self::AtFlush => write!(f, "at-flush"),
        }
    }
}

/// Write-path timing guarantees of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexingSync {
    /// When a document survives a failure. `None` for volatile stores.
    pub durability: Option<SyncPoint>,
    /// When a document appears in search results.
    pub visibility: SyncPoint,
    /// When a backend-assigned id becomes known.
    pub id_assignment: SyncPoint,
}

/// Query operators a backend can translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOperator {
    /// Free-text terms across all text fields.
    FreeText,
    /// Terms scoped to a named field.
    Field,
    /// Conjunction.
    And,
    /// Disjunction.
    Or,
    /// Positive-minus-negative exclusion.
    Not,
    /// Odd-count exclusive disjunction.
    Xor,
    /// Score multiplication.
    Weight,
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeText => write!(f, "FREE_TEXT"),
            Self::Field => write!(f, "FIELD"),
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Not => write!(f, "NOT"),
            Self::Xor => write!(f, "XOR"),
            Self::Weight => write!(f, "WEIGHT"),
        }
    }
}

/// Every operator of the query algebra.
pub const ALL_OPERATORS: &[QueryOperator] = &[
    QueryOperator::FreeText,
    QueryOperator::Field,
    QueryOperator::And,
    QueryOperator::Or,
    QueryOperator::Not,
    QueryOperator::Xor,
    QueryOperator::Weight,
];

/// Static description of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Schema mutability tier.
    pub schema_tier: SchemaTier,
    /// Write-path timing guarantees.
    pub indexing: IndexingSync,
    /// Value kinds the backend accepts.
    pub value_kinds: &'static [ValueKind],
    /// Operators the backend can translate.
    pub operators: &'static [QueryOperator],
    /// Whether at most one writable client may hold a store.
    pub single_writer: bool,
    /// Retries the driver performs internally on transient failures.
    pub max_retries: u32,
}

impl Capabilities {
    /// Whether the backend can translate `op`.
    pub fn supports_operator(&self, op: QueryOperator) -> bool {
        self.operators.contains(&op)
    }

    /// Whether the backend accepts values of `kind`.
    pub fn supports_value(&self, kind: ValueKind) -> bool {
        self.value_kinds.contains(&kind)
    }

    /// Whether writes need `commit()` before they show up in searches.
    pub fn requires_commit(&self) -> bool {
        self.indexing.visibility != SyncPoint::AtCall
    }
}
