//! Backend driver interface.
//!
//! A [`Driver`] adapts one search engine to the abstraction. It is the only
//! thing a new backend has to implement to plug into the client facade.
//!
//! The facade hands drivers [`PreparedDocument`]s: documents whose fields
//! have already been resolved against the schema registry and whose values
//! have been coerced to their field's kind. Drivers never see unknown or
//! ignored fields.
//!
//! # Escape hatch
//!
//! [`Driver::native_handle`] exposes the concrete driver as `dyn Any`, so
//! callers can downcast to it and reach backend-specific operations. The
//! abstraction makes no compatibility promise across that boundary.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::capability::Capabilities;
use crate::document::{Document, Value};
use crate::error::{Error, Result};
use crate::ids::DocId;
use crate::query::Query;
use crate::schema::{DocumentPlan, FieldConfig, IndexValue, Resolution, Schema};

// ============================================================================
// Native queries
// ============================================================================

/// A backend's translated query, type-erased.
///
/// Equality compares the backend name and the query's debug rendering, which
/// is deterministic for a deterministic translator.
#[derive(Clone)]
pub struct NativeQuery {
    backend: String,
    repr: String,
    inner: Arc<dyn Any + Send + Sync>,
}

impl NativeQuery {
    /// Wrap a backend-native query.
    pub fn new<T>(backend: impl Into<String>, query: T) -> Self
    where
        T: Any + Send + Sync + fmt::Debug,
    {
        Self {
            backend: backend.into(),
            repr: format!("{query:?}"),
            inner: Arc::new(query),
        }
    }

    /// Backend that produced the query.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Debug rendering of the native query.
    pub fn repr(&self) -> &str {
        &self.repr
    }

    /// Borrow the native query as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Borrow the native query as `T`, failing with a query error on a
    /// query translated by another backend.
    pub fn expect_native<T: Any>(&self, backend: &str) -> Result<&T> {
        self.downcast_ref::<T>().ok_or_else(|| {
            Error::query(format!(
                "native query from backend '{}' cannot run on backend '{backend}'",
                self.backend
            ))
        })
    }
}

impl PartialEq for NativeQuery {
    fn eq(&self, other: &Self) -> bool {
        self.backend == other.backend && self.repr == other.repr
    }
}

impl Eq for NativeQuery {}

impl fmt::Debug for NativeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeQuery")
            .field("backend", &self.backend)
            .field("query", &self.repr)
            .finish()
    }
}

// ============================================================================
// Prepared documents
// ============================================================================

/// One field of a [`PreparedDocument`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedField {
    /// Field name.
    pub name: String,
    /// Registered configuration.
    pub config: FieldConfig,
    /// Values coerced for indexing, in document order.
    pub values: Vec<IndexValue>,
    /// The caller's values, in document order, for stored fields.
    pub raw: Vec<Value>,
}

impl PreparedField {
    /// Text renderings of the coerced values.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(|v| match v {
            IndexValue::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }
}

/// A document resolved against the schema and ready for a driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedDocument {
    fields: Vec<PreparedField>,
}

impl PreparedDocument {
    /// Prepare `doc` according to `plan`.
    ///
    /// Dropped and discarded fields are left out. Every remaining value is
    /// checked against the backend's supported value kinds and coerced to its
    /// field's kind.
    ///
    /// # Errors
    ///
    /// `Index` when a value has a kind the backend does not accept or cannot
    /// be coerced to its field's kind.
    pub fn prepare(
        doc: &Document,
        plan: &DocumentPlan,
        capabilities: &Capabilities,
        backend: &str,
    ) -> Result<Self> {
        let mut fields = Vec::new();
        for name in doc.field_names() {
            let config = match plan.fields.get(name) {
                Some(Resolution::Field(config)) if !config.is_discarded() => *config,
                _ => continue,
            };
            let mut values = Vec::new();
            let mut raw = Vec::new();
            for value in doc.field_values(name) {
                if !capabilities.supports_value(value.kind()) {
                    return Err(Error::index(format!(
                        "backend '{backend}' does not accept {} values (field '{name}')",
                        value.kind()
                    )));
                }
                if let Some(coerced) = config.coerce(name, value)? {
                    values.push(coerced);
                }
                if config.stored {
                    raw.push(value.clone());
                }
            }
            fields.push(PreparedField {
                name: name.to_string(),
                config,
                values,
                raw,
            });
        }
        Ok(Self { fields })
    }

    /// Fields in document order.
    pub fn fields(&self) -> &[PreparedField] {
        &self.fields
    }

    /// Look up a field.
    pub fn field(&self, name: &str) -> Option<&PreparedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The stored subset of the document, as the caller supplied it.
    pub fn stored(&self) -> Document {
        let mut doc = Document::default();
        for field in self.fields.iter().filter(|f| f.config.stored) {
            for value in &field.raw {
                doc.push(field.name.clone(), value.clone());
            }
        }
        doc
    }
}

// ============================================================================
// Results
// ============================================================================

/// A single ranked match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Matching document.
    pub id: DocId,
    /// Relevance score, higher is better.
    pub score: f32,
    /// Stored field data, empty when nothing is stored.
    pub fields: Document,
}

/// One window of results from [`Driver::search`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    /// Hits ordered by descending relevance.
    pub hits: Vec<SearchHit>,
    /// Total number of matches, when the backend reports it.
    pub total: Option<usize>,
}

impl ResultSet {
    /// An empty result set.
    pub fn empty() -> Self {
        Self {
            hits: Vec::new(),
            total: Some(0),
        }
    }

    /// Number of hits in this window.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Whether this window holds no hits.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Stored data of one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDocument {
    /// Document id.
    pub id: DocId,
    /// Stored fields.
    pub fields: Document,
}

/// How an update treats an id that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Replace the existing document, or create it.
    #[default]
    Upsert,
    /// Fail with `DocumentExists` if the id is present.
    FailIfExists,
}

// ============================================================================
// Driver
// ============================================================================

/// The contract every backend adapter satisfies.
///
/// Drivers are shared behind `Arc<dyn Driver>` and must tolerate concurrent
/// calls; the facade performs no locking of its own around them.
#[async_trait]
pub trait Driver: Send + Sync + fmt::Debug {
    /// Backend type name, as used in configuration.
    fn name(&self) -> &str;

    /// Static capability descriptor.
    fn capabilities(&self) -> &Capabilities;

    /// Identity of the underlying store, used for single-writer locking.
    ///
    /// `None` when the store cannot be shared between clients.
    fn store_key(&self) -> Option<String> {
        None
    }

    /// Schema persisted by the backend, used to seed the registry on open.
    async fn schema_snapshot(&self) -> Result<Schema>;

    /// Whether a `Fixed`-tier schema can no longer change.
    fn schema_frozen(&self) -> bool {
        false
    }

    /// Make the backend aware of a field configuration.
    ///
    /// Called after the registry accepted the change and before any document
    /// carrying the field is indexed.
    async fn register_field(&self, name: &str, config: &FieldConfig) -> Result<()>;

    /// Index a document.
    ///
    /// With `id` the document replaces any document with that id; without,
    /// the backend assigns a fresh id.
    async fn index(&self, doc: &PreparedDocument, id: Option<&DocId>) -> Result<DocId>;

    /// Delete a document, failing with `NotFound` when it is absent.
    async fn delete(&self, id: &DocId) -> Result<()>;

    /// Whether a document exists, counting writes not yet visible.
    async fn contains(&self, id: &DocId) -> Result<bool>;

    /// Stored data of a visible document.
    async fn get_document(&self, id: &DocId) -> Result<Option<StoredDocument>>;

    /// Number of visible documents.
    async fn document_count(&self) -> Result<usize>;

    /// Ids of visible documents in a stable order, windowed like a search.
    ///
    /// The order holds while the store is unchanged; paging across writes may
    /// skip or repeat documents.
    async fn document_ids(&self, offset: usize, limit: usize) -> Result<Vec<DocId>>;

    /// Translate a query tree into this backend's native query.
    fn translate(&self, query: &Query) -> Result<NativeQuery>;

    /// Run a native query, returning the window `[offset, offset + limit)`.
    async fn search(&self, query: &NativeQuery, offset: usize, limit: usize) -> Result<ResultSet>;

    /// Make buffered writes visible (and durable, where supported).
    ///
    /// Idempotent; a no-op for backends that are visible at call.
    async fn commit(&self) -> Result<()>;

    /// Discard buffered writes that have not been committed.
    async fn cancel(&self) -> Result<()> {
        Ok(())
    }

    /// The concrete driver, for backend-specific use.
    fn native_handle(&self) -> &(dyn Any + Send + Sync);

    /// Release backend resources.
    async fn close(&self) -> Result<()>;

    /// Delete every document and the persisted schema, then release the
    /// store as `close` does. Disk-based backends remove their files.
    async fn destroy(&self) -> Result<()>;
}

// ============================================================================
// Tests
// ============================================================================
