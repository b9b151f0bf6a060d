//! The search client facade.
//!
//! A [`SearchClient`] owns one driver and the schema registry in front of it.
//! Every document passes through the registry before reaching the driver, and
//! every query is translated by the driver (through a cache keyed by the
//! query's structure and the schema generation) before it runs.
//!
//! # Lifecycle
//!
//! ```text
//! open(readonly=false) ──► Writable ──┬── destroy() ──► Closed
//!                                     ├── close() ────► Closed
//! open(readonly=true)  ──► Readonly ──┘
//! ```
//!
//! There is no transition from `Readonly` to `Writable`. Every operation on a
//! closed client fails with `ClientClosed`; `close()` itself is idempotent.
//! `destroy()` deletes the whole store before closing.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use multisearch_core::{
    Capabilities, DocId, Document, Driver, Error, FieldConfig, GuessFn, NativeQuery,
    PreparedDocument, Query, Result, Schema, SchemaRegistry, SchemaTier, StoredDocument,
    UnknownFieldPolicy, UpdateMode,
};
use multisearch_drivers::BackendOptions;

use crate::config::{ClientConfig, DEFAULT_PAGE_SIZE};
use crate::locks::WriterLease;
use crate::registry::DriverRegistry;
use crate::results::{DocumentIterator, ResultIterator};

/// Translations kept before the cache is flushed.
const MAX_CACHED_TRANSLATIONS: usize = 256;

// ============================================================================
// ClientState
// ============================================================================

/// State of a client in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Open with write access.
    Writable,
    /// Open without write access.
    Readonly,
    /// Closed; every operation fails.
    Closed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Writable => write!(f, "writable"),
            Self::Readonly => write!(f, "readonly"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Default)]
struct TranslationCache {
    generation: u64,
    entries: HashMap<Query, NativeQuery>,
}

// ============================================================================
// SearchClient
// ============================================================================

/// Single entry point for indexing and searching one store.
pub struct SearchClient {
    driver: Arc<dyn Driver>,
    registry: SchemaRegistry,
    policy: UnknownFieldPolicy,
    page_size: usize,
    readonly: bool,
    closed: Arc<AtomicBool>,
    ignored: AtomicU64,
    cache: Mutex<TranslationCache>,
    lease: Mutex<Option<WriterLease>>,
}

impl SearchClient {
    /// Open a client on the built-in `backend` with default settings.
    ///
    /// # Errors
    ///
    /// - `UnknownBackend` when no driver is registered under `backend`
    /// - `UnsupportedOption` when `options` sets something the driver does
    ///   not recognize
    /// - `ExclusiveLockHeld` when a single-writer store already has a
    ///   writable client
    pub async fn open(backend: &str, options: BackendOptions) -> Result<Self> {
        let settings = ClientSettings::default();
        Self::connect(DriverRegistry::builtin(), backend, options, settings).await
    }

    /// Open a client as described by `config`.
    pub async fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::open_with_registry(DriverRegistry::builtin(), config).await
    }

    /// Open a client as described by `config`, looking the backend up in
    /// `registry`.
    pub async fn open_with_registry(
        registry: &DriverRegistry,
        config: &ClientConfig,
    ) -> Result<Self> {
        config.validate()?;
        let settings = ClientSettings {
            policy: config.unknown_fields,
            page_size: config.page_size,
        };
        Self::connect(registry, &config.backend, config.backend_options(), settings).await
    }

    async fn connect(
        registry: &DriverRegistry,
        backend: &str,
        options: BackendOptions,
        settings: ClientSettings,
    ) -> Result<Self> {
        let readonly = options.readonly;
        let driver = registry.construct(backend, options).await?;
        let caps = *driver.capabilities();

        let lease = match driver.store_key() {
            Some(key) if caps.single_writer && !readonly => Some(WriterLease::acquire(key)?),
            _ => None,
        };

        let schema = driver.schema_snapshot().await?;
        let frozen = caps.schema_tier == SchemaTier::Fixed && driver.schema_frozen();
        log::info!(
            "Opened {} client on '{backend}' ({} field(s){})",
            if readonly { "readonly" } else { "writable" },
            schema.len(),
            if frozen { ", schema frozen" } else { "" }
        );

        Ok(Self {
            registry: SchemaRegistry::new(caps.schema_tier, schema, frozen),
            driver,
            policy: settings.policy,
            page_size: settings.page_size,
            readonly,
            closed: Arc::new(AtomicBool::new(false)),
            ignored: AtomicU64::new(0),
            cache: Mutex::new(TranslationCache::default()),
            lease: Mutex::new(lease),
        })
    }

    /// Replace the function used by the `Guess` policy.
    pub fn with_guesser(mut self, guesser: GuessFn) -> Self {
        self.registry = self.registry.with_guesser(guesser);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        if self.closed.load(Ordering::Acquire) {
            ClientState::Closed
        } else if self.readonly {
            ClientState::Readonly
        } else {
            ClientState::Writable
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ClientClosed);
        }
        Ok(())
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        self.ensure_open()?;
        if self.readonly {
            return Err(Error::read_only(operation));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// Index a new document; the backend assigns its id.
    ///
    /// # Errors
    ///
    /// - `ReadOnlyViolation` on a readonly client
    /// - `UnknownField` under the `Reject` policy; nothing is registered or
    ///   indexed
    /// - `SchemaConflict` when a guessed field cannot be registered
    /// - `IndexError` from the driver
    pub async fn add(&self, doc: &Document) -> Result<DocId> {
        self.ensure_writable("add")?;
        self.index_document(doc, None).await
    }

    /// Replace the document stored under `id`, creating it if absent.
    pub async fn update(&self, id: &DocId, doc: &Document) -> Result<DocId> {
        self.update_with(id, doc, UpdateMode::Upsert).await
    }

    /// Replace the document stored under `id`.
    ///
    /// With [`UpdateMode::FailIfExists`] an existing document makes this fail
    /// with `DocumentExists`.
    pub async fn update_with(&self, id: &DocId, doc: &Document, mode: UpdateMode) -> Result<DocId> {
        self.ensure_writable("update")?;
        if mode == UpdateMode::FailIfExists && self.driver.contains(id).await? {
            return Err(Error::DocumentExists {
                id: id.to_string(),
            });
        }
        self.index_document(doc, Some(id)).await
    }

    async fn index_document(&self, doc: &Document, id: Option<&DocId>) -> Result<DocId> {
        let plan = self.registry.plan(doc, self.policy)?;
        let prepared = PreparedDocument::prepare(
            doc,
            &plan,
            self.driver.capabilities(),
            self.driver.name(),
        )?;

        if !plan.new_fields.is_empty() {
            self.registry.check_all(&plan.new_fields)?;
            for (name, config) in &plan.new_fields {
                log::debug!("Guessed field '{name}' as {}", config.kind);
                self.driver.register_field(name, config).await?;
            }
            self.registry.register_all(&plan.new_fields)?;
        }

        let id = self.driver.index(&prepared, id).await?;
        self.registry.freeze();
        if plan.ignored > 0 {
            self.ignored.fetch_add(plan.ignored as u64, Ordering::Relaxed);
        }
        log::debug!("Indexed document {id}");
        Ok(id)
    }

    /// Delete the document stored under `id`.
    ///
    /// # Errors
    ///
    /// `NotFound` when there is no such document.
    pub async fn delete(&self, id: &DocId) -> Result<()> {
        self.ensure_writable("delete")?;
        self.driver.delete(id).await?;
        log::debug!("Deleted document {id}");
        Ok(())
    }

    /// Make buffered changes visible (and durable, where the backend
    /// commits). Idempotent; a no-op on backends that show writes at call.
    pub async fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        self.driver.commit().await
    }

    /// Discard buffered, uncommitted changes where the backend buffers them.
    pub async fn cancel(&self) -> Result<()> {
        self.ensure_writable("cancel")?;
        self.driver.cancel().await
    }

    /// Stored fields of the document under `id`.
    ///
    /// # Errors
    ///
    /// `NotFound` when there is no such document.
    pub async fn get_document(&self, id: &DocId) -> Result<StoredDocument> {
        self.ensure_open()?;
        self.driver
            .get_document(id)
            .await?
            .ok_or_else(|| Error::not_found(id.as_str()))
    }

    /// Whether a document is stored under `id`.
    pub async fn document_exists(&self, id: &DocId) -> Result<bool> {
        self.ensure_open()?;
        self.driver.contains(id).await
    }

    /// Number of searchable documents.
    pub async fn document_count(&self) -> Result<usize> {
        self.ensure_open()?;
        self.driver.document_count().await
    }

    /// Every searchable document, listed lazily a page at a time.
    pub fn iter_documents(&self) -> Result<DocumentIterator> {
        self.ensure_open()?;
        Ok(DocumentIterator::new(
            Arc::clone(&self.driver),
            Arc::clone(&self.closed),
            self.page_size,
        ))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// A free-text query for `text`.
    pub fn query(&self, text: &str) -> Query {
        Query::term(text)
    }

    /// A query for `text` in `field`.
    pub fn query_field(&self, field: &str, text: &str) -> Query {
        Query::field_term(field, text)
    }

    /// Run `query`, yielding the ranked window `offset..offset + limit`.
    ///
    /// Translation happens here, so an unsupported operator or unknown field
    /// fails immediately; hits are fetched lazily by the iterator. A `limit`
    /// of zero gives an empty iterator.
    ///
    /// # Errors
    ///
    /// - `UnsupportedQuery` when the backend lacks an operator the query uses
    /// - `UnknownField` for a field query on an unregistered field
    pub fn search(&self, query: &Query, offset: usize, limit: usize) -> Result<ResultIterator> {
        self.ensure_open()?;
        let native = self.translate(query)?;
        log::debug!("Searching {query} [{offset}, +{limit}]");
        Ok(ResultIterator::new(
            Arc::clone(&self.driver),
            native,
            Arc::clone(&self.closed),
            offset,
            limit,
            self.page_size,
        ))
    }

    /// Translate `query` for this client's backend, reusing a cached
    /// translation while the schema is unchanged.
    pub fn translate(&self, query: &Query) -> Result<NativeQuery> {
        self.ensure_open()?;
        let generation = self.registry.generation();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.generation != generation {
            cache.entries.clear();
            cache.generation = generation;
        }
        if let Some(native) = cache.entries.get(query) {
            return Ok(native.clone());
        }
        let native = self.driver.translate(query)?;
        if cache.entries.len() >= MAX_CACHED_TRANSLATIONS {
            cache.entries.clear();
        }
        cache.entries.insert(query.clone(), native.clone());
        Ok(native)
    }

    // ------------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------------

    /// Snapshot of the registered fields.
    pub fn schema(&self) -> Arc<Schema> {
        self.registry.snapshot()
    }

    /// Register `name` with `config`.
    ///
    /// # Errors
    ///
    /// `SchemaConflict` when the backend's schema tier forbids the change.
    pub async fn register_field(&self, name: &str, config: FieldConfig) -> Result<()> {
        self.ensure_writable("register_field")?;
        let entry = [(name.to_string(), config)];
        self.registry.check_all(&entry)?;
        self.driver.register_field(name, &config).await?;
        self.registry.register_all(&entry)
    }

    /// Number of fields dropped by the `Ignore` and `IgnoreWarn` policies.
    pub fn ignored_field_count(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    // Backend
    // ------------------------------------------------------------------------

    /// What the backend supports.
    pub fn capabilities(&self) -> &Capabilities {
        self.driver.capabilities()
    }

    /// The driver behind this client.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// The concrete driver, for backend-specific operations.
    ///
    /// Returns `None` when the driver is not a `T`. Nothing reached through
    /// this handle is covered by the abstraction's guarantees.
    pub fn native_handle<T: Any>(&self) -> Option<&T> {
        self.driver.native_handle().downcast_ref::<T>()
    }

    /// Close the client, flushing the driver and releasing the store.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.driver.close().await;
        self.lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        log::info!("Closed '{}' client", self.driver.name());
        result
    }

    /// Delete every document and the schema, remove the store (files
    /// included, for disk backends) and close the client.
    ///
    /// # Errors
    ///
    /// `ReadOnlyViolation` on a readonly client. The client is closed even
    /// when the driver fails part way.
    pub async fn destroy(&self) -> Result<()> {
        self.ensure_writable("destroy")?;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::ClientClosed);
        }
        let result = self.driver.destroy().await;
        self.lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        log::info!("Destroyed '{}' store", self.driver.name());
        result
    }
}

impl fmt::Debug for SearchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchClient")
            .field("backend", &self.driver.name())
            .field("state", &self.state())
            .field("policy", &self.policy)
            .field("registry", &self.registry)
            .finish()
    }
}

struct ClientSettings {
    policy: UnknownFieldPolicy,
    page_size: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            policy: UnknownFieldPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
