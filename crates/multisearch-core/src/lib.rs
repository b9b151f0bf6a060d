#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Multisearch Core Library
//!
//! Backend-independent building blocks of the Multisearch search client:
//!
//! - [`document`]: documents as ordered field/value pairs
//! - [`schema`]: field configuration, mutability tiers and the schema registry
//! - [`query`]: the boolean query algebra and its translation contract
//! - [`capability`]: static capability descriptors published by drivers
//! - [`driver`]: the interface every backend adapter implements
//!
//! The client facade lives in the `multisearch` crate and the backend
//! adapters in `multisearch-drivers`.

pub mod capability;
pub mod document;
pub mod driver;
pub mod error;
pub mod ids;
pub mod query;
pub mod schema;

mod proptests;

// Re-exports for convenience
pub use capability::{
    ALL_OPERATORS, Capabilities, IndexingSync, QueryOperator, ReindexLatency, SchemaTier,
    SyncPoint,
};
pub use document::{Document, FieldValues, Value, ValueKind};
pub use driver::{
    Driver, NativeQuery, PreparedDocument, PreparedField, ResultSet, SearchHit, StoredDocument,
    UpdateMode,
};
pub use error::{Error, Result};
pub use ids::DocId;
pub use query::{Factor, Query, QueryNode, Translator, translate};
pub use schema::{
    DocumentPlan, FieldConfig, FieldKind, GuessFn, IndexValue, Resolution, Schema,
    SchemaRegistry, UnknownFieldPolicy, guess_by_value, guess_free_text,
};
