//! Tantivy driver.
//!
//! A disk-based backend built on a Tantivy index in the directory given by
//! the `path` option. This module is only available with the
//! `driver-tantivy` feature.
//!
//! | Property | Value |
//! |----------|-------|
//! | Schema tier | fixed |
//! | Durability | at commit |
//! | Visibility | at commit |
//! | Id assignment | at call (UUID v4) |
//! | Operators | all |
//! | Single writer | yes |
//!
//! # Lifecycle
//!
//! Tantivy needs its whole schema before the index exists, so the index is
//! created lazily by the first `index()` call, from the fields registered up
//! to that point. From then on the schema is frozen. Reopening an existing
//! index restores the field configs from the JSON sidecar.
//!
//! A writable driver takes an exclusive lock file in the index directory
//! until `close()`; a second writer fails with `ExclusiveLockHeld`. Readonly
//! drivers take no lock and reload their reader before each search.
//!
//! Commits, searches and document loads run on tokio's blocking pool.
//! `destroy()` releases the lock and removes the whole index directory.

mod schema;
mod translate;

use std::any::Any;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use multisearch_core::{
    ALL_OPERATORS, Capabilities, DocId, Document, Driver, Error, FieldConfig, IndexValue,
    IndexingSync, NativeQuery, PreparedDocument, Query, Result, ResultSet, Schema, SchemaTier,
    SearchHit, StoredDocument, SyncPoint, ValueKind, translate,
};
use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::directory::error::LockError;
use tantivy::directory::{Directory, DirectoryLock, Lock, MmapDirectory};
use tantivy::query::{AllQuery, Query as TantivyQuery, TermQuery};
use tantivy::schema::{IndexRecordOption, Value as _};
use tantivy::{DateTime, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

pub use self::schema::{ID_FIELD, SIDECAR_FILE, STORED_FIELD};
use self::schema::{FieldMap, is_reserved, read_sidecar, register_tokenizers, write_sidecar};
use self::translate::TantivyTranslator;
use crate::options::BackendOptions;

/// Backend type name.
pub const BACKEND: &str = "tantivy";

/// Options the Tantivy driver recognizes.
pub const RECOGNIZED_OPTIONS: &[&str] = &["path", "writer_memory_bytes"];

/// Default indexing memory budget (50MB).
pub const DEFAULT_WRITER_MEMORY: usize = 50_000_000;

/// Lock file held by a writable driver.
pub const WRITER_LOCK_FILE: &str = "multisearch-writer.lock";

pub(crate) const CAPABILITIES: Capabilities = Capabilities {
    schema_tier: SchemaTier::Fixed,
    indexing: IndexingSync {
        durability: Some(SyncPoint::AtCommit),
        visibility: SyncPoint::AtCommit,
        id_assignment: SyncPoint::AtCall,
    },
    value_kinds: &[ValueKind::Text, ValueKind::Number, ValueKind::DateTime],
    operators: ALL_OPERATORS,
    single_writer: true,
    max_retries: 0,
};

struct LiveIndex {
    index: Index,
    reader: IndexReader,
    writer: Option<IndexWriter>,
}

struct TantivyState {
    fields: FieldMap,
    live: Option<LiveIndex>,
    pending_adds: HashSet<DocId>,
    pending_deletes: HashSet<DocId>,
    closed: bool,
}

impl TantivyState {
    fn has_pending(&self) -> bool {
        !self.pending_adds.is_empty() || !self.pending_deletes.is_empty()
    }

    fn clear_pending(&mut self) {
        self.pending_adds.clear();
        self.pending_deletes.clear();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::ClientClosed);
        }
        Ok(())
    }
}

fn lock(state: &Mutex<TantivyState>) -> MutexGuard<'_, TantivyState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Disk-based driver backed by a Tantivy index.
pub struct TantivyDriver {
    path: PathBuf,
    readonly: bool,
    writer_memory: usize,
    state: Arc<Mutex<TantivyState>>,
    writer_lock: Mutex<Option<DirectoryLock>>,
}

impl TantivyDriver {
    /// Open (or prepare to create) the index at `options.path`.
    ///
    /// # Errors
    ///
    /// - `UnsupportedOption` for options other than `path`,
    ///   `writer_memory_bytes` and `readonly`
    /// - `Config` without `path`
    /// - `ExclusiveLockHeld` when another writer holds the index
    pub fn open(options: &BackendOptions) -> Result<Self> {
        options.ensure_recognized(BACKEND, RECOGNIZED_OPTIONS)?;
        let path = options
            .path
            .clone()
            .ok_or_else(|| Error::config("tantivy backend requires 'path'"))?;
        let readonly = options.readonly;

        let lock = if readonly {
            None
        } else {
            std::fs::create_dir_all(&path).map_err(|e| Error::io_with_path(e, &path))?;
            Some(acquire_writer_lock(&path)?)
        };

        let configs = read_sidecar(&path)?.unwrap_or_default();
        let live = if index_exists(&path) {
            Some(open_live(&path, readonly, options.writer_memory_bytes)?)
        } else {
            None
        };
        let fields = match &live {
            Some(live) => FieldMap::from_index(live.index.schema(), &configs)?,
            None => FieldMap::build(&configs),
        };

        log::info!(
            "Opened tantivy store at {} ({}{})",
            path.display(),
            if readonly { "readonly" } else { "writable" },
            if live.is_some() { "" } else { ", not yet created" }
        );

        Ok(Self {
            path,
            readonly,
            writer_memory: options.writer_memory_bytes.unwrap_or(DEFAULT_WRITER_MEMORY),
            state: Arc::new(Mutex::new(TantivyState {
                fields,
                live,
                pending_adds: HashSet::new(),
                pending_deletes: HashSet::new(),
                closed: false,
            })),
            writer_lock: Mutex::new(lock),
        })
    }

    /// Index directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying Tantivy index, once it has been created.
    pub fn tantivy_index(&self) -> Option<Index> {
        self.lock_state().live.as_ref().map(|l| l.index.clone())
    }

    /// Whether this driver still holds the directory's writer lock.
    pub fn holds_writer_lock(&self) -> bool {
        self.writer_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, TantivyState> {
        lock(&self.state)
    }

    /// Run `f` against the state on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TantivyState) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || f(&mut lock(&state)))
            .await
            .map_err(|e| Error::index(format!("tantivy task failed: {e}")))?
    }

    /// Create the index from the registered fields if it does not exist yet.
    fn ensure_live<'a>(&self, state: &'a mut TantivyState) -> Result<&'a mut LiveIndex> {
        if state.live.is_none() {
            write_sidecar(&self.path, state.fields.configs())?;
            let index = Index::create_in_dir(&self.path, state.fields.schema().clone())
                .map_err(|e| Error::index_with_source("failed to create index", e))?;
            log::info!(
                "Created tantivy index at {} with {} field(s)",
                self.path.display(),
                state.fields.configs().len()
            );
            state.live = Some(live_from(index, self.readonly, self.writer_memory)?);
        }
        state
            .live
            .as_mut()
            .ok_or_else(|| Error::index("index unavailable"))
    }

    /// Pick up an index created by another client after this one opened.
    fn refresh_readonly(path: &Path, state: &mut TantivyState) -> Result<()> {
        if state.live.is_none() && index_exists(path) {
            let configs = read_sidecar(path)?.unwrap_or_default();
            let live = open_live(path, true, None)?;
            state.fields = FieldMap::from_index(live.index.schema(), &configs)?;
            state.live = Some(live);
        }
        if let Some(live) = &state.live {
            live.reader
                .reload()
                .map_err(|e| Error::query_with_source("failed to reload reader", e))?;
        }
        Ok(())
    }

    fn writer<'a>(&self, live: &'a mut LiveIndex) -> Result<&'a mut IndexWriter> {
        live.writer
            .as_mut()
            .ok_or_else(|| Error::read_only("index"))
    }

    fn build_document(fields: &FieldMap, id: &DocId, doc: &PreparedDocument) -> Result<TantivyDocument> {
        let mut out = TantivyDocument::new();
        out.add_text(fields.id(), id.as_str());
        out.add_text(fields.stored(), serde_json::to_string(&doc.stored())?);
        for prepared in doc.fields() {
            let Some((field, _)) = fields.field(&prepared.name) else {
                continue;
            };
            for value in &prepared.values {
                match value {
                    IndexValue::Text(s) => out.add_text(field, s),
                    IndexValue::Number(n) => out.add_f64(field, *n),
                    IndexValue::Date(dt) => {
                        out.add_date(field, DateTime::from_timestamp_micros(dt.timestamp_micros()))
                    }
                }
            }
        }
        Ok(out)
    }

    fn id_term(fields: &FieldMap, id: &DocId) -> Term {
        Term::from_field_text(fields.id(), id.as_str())
    }

    fn committed_contains(state: &TantivyState, id: &DocId) -> Result<bool> {
        let Some(live) = &state.live else {
            return Ok(false);
        };
        let query = TermQuery::new(Self::id_term(&state.fields, id), IndexRecordOption::Basic);
        let count = live
            .reader
            .searcher()
            .search(&query, &Count)
            .map_err(|e| Error::query_with_source("id lookup failed", e))?;
        Ok(count > 0)
    }
}

fn index_exists(path: &Path) -> bool {
    path.join("meta.json").exists()
}

fn acquire_writer_lock(path: &Path) -> Result<DirectoryLock> {
    let directory = MmapDirectory::open(path)
        .map_err(|e| Error::index_with_source(format!("cannot open {}", path.display()), e))?;
    let lock = Lock {
        filepath: PathBuf::from(WRITER_LOCK_FILE),
        is_blocking: false,
    };
    directory.acquire_lock(&lock).map_err(|e| match e {
        LockError::LockBusy => Error::ExclusiveLockHeld {
            store: path.display().to_string(),
        },
        LockError::IoError(io) => Error::io_with_path(
            std::io::Error::new(io.kind(), io.to_string()),
            &path.join(WRITER_LOCK_FILE),
        ),
    })
}

fn open_live(path: &Path, readonly: bool, writer_memory: Option<usize>) -> Result<LiveIndex> {
    let index = Index::open_in_dir(path)
        .map_err(|e| Error::index_with_source("failed to open index", e))?;
    live_from(
        index,
        readonly,
        writer_memory.unwrap_or(DEFAULT_WRITER_MEMORY),
    )
}

fn live_from(index: Index, readonly: bool, writer_memory: usize) -> Result<LiveIndex> {
    register_tokenizers(&index);
    let reader = index
        .reader_builder()
        .reload_policy(ReloadPolicy::Manual)
        .try_into()
        .map_err(|e| Error::index_with_source("failed to create index reader", e))?;
    let writer = if readonly {
        None
    } else {
        Some(
            index
                .writer(writer_memory)
                .map_err(|e| Error::index_with_source("failed to create index writer", e))?,
        )
    };
    Ok(LiveIndex {
        index,
        reader,
        writer,
    })
}

fn stored_fields(doc: &TantivyDocument, fields: &FieldMap) -> Result<Document> {
    match doc.get_first(fields.stored()).and_then(|v| v.as_str()) {
        Some(json) => Ok(serde_json::from_str(json)?),
        None => Ok(Document::default()),
    }
}

fn doc_id(doc: &TantivyDocument, fields: &FieldMap) -> Result<DocId> {
    doc.get_first(fields.id())
        .and_then(|v| v.as_str())
        .map(DocId::from)
        .ok_or_else(|| Error::query("indexed document has no id"))
}

fn search_live(
    state: &TantivyState,
    query: &dyn TantivyQuery,
    offset: usize,
    limit: usize,
) -> Result<ResultSet> {
    let Some(live) = &state.live else {
        return Ok(ResultSet::empty());
    };
    let searcher = live.reader.searcher();
    if limit == 0 {
        let total = searcher
            .search(query, &Count)
            .map_err(|e| Error::query_with_source("search failed", e))?;
        return Ok(ResultSet {
            hits: Vec::new(),
            total: Some(total),
        });
    }

    let collector = (TopDocs::with_limit(limit).and_offset(offset), Count);
    let (top, total) = searcher
        .search(query, &collector)
        .map_err(|e| Error::query_with_source("search failed", e))?;
    let mut hits = Vec::with_capacity(top.len());
    for (score, address) in top {
        let doc: TantivyDocument = searcher
            .doc(address)
            .map_err(|e| Error::query_with_source("failed to load document", e))?;
        hits.push(SearchHit {
            id: doc_id(&doc, &state.fields)?,
            score,
            fields: stored_fields(&doc, &state.fields)?,
        });
    }
    Ok(ResultSet {
        hits,
        total: Some(total),
    })
}

/// Ids of every visible document, sorted.
fn all_ids(state: &TantivyState) -> Result<Vec<DocId>> {
    let Some(live) = &state.live else {
        return Ok(Vec::new());
    };
    let searcher = live.reader.searcher();
    let addresses = searcher
        .search(&AllQuery, &DocSetCollector)
        .map_err(|e| Error::query_with_source("document listing failed", e))?;
    let mut ids = addresses
        .into_iter()
        .map(|address| {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| Error::query_with_source("failed to load document", e))?;
            doc_id(&doc, &state.fields)
        })
        .collect::<Result<Vec<_>>>()?;
    ids.sort_unstable();
    Ok(ids)
}

#[async_trait]
impl Driver for TantivyDriver {
    fn name(&self) -> &str {
        BACKEND
    }

    fn capabilities(&self) -> &Capabilities {
        &CAPABILITIES
    }

    fn store_key(&self) -> Option<String> {
        let path = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        Some(format!("{BACKEND}:{}", path.display()))
    }

    async fn schema_snapshot(&self) -> Result<Schema> {
        Ok(self.lock_state().fields.configs().clone())
    }

    fn schema_frozen(&self) -> bool {
        self.lock_state().live.is_some()
    }

    async fn register_field(&self, name: &str, config: &FieldConfig) -> Result<()> {
        if is_reserved(name) {
            return Err(Error::schema_conflict(name, "field name is reserved"));
        }
        let mut state = self.lock_state();
        if state.fields.configs().get(name) == Some(config) {
            return Ok(());
        }
        if state.live.is_some() {
            return Err(Error::schema_conflict(
                name,
                "schema is fixed once the index exists",
            ));
        }
        let mut configs = state.fields.configs().clone();
        configs.insert(name, *config);
        state.fields = FieldMap::build(&configs);
        log::debug!("Registered tantivy field '{name}' as {}", config.kind);
        Ok(())
    }

    async fn index(&self, doc: &PreparedDocument, id: Option<&DocId>) -> Result<DocId> {
        if self.readonly {
            return Err(Error::read_only("index"));
        }
        let id = id.cloned().unwrap_or_else(DocId::generate);
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.ensure_open()?;
        let document = Self::build_document(&state.fields, &id, doc)?;
        let id_term = Self::id_term(&state.fields, &id);
        let live = self.ensure_live(state)?;
        let writer = self.writer(live)?;
        writer.delete_term(id_term);
        writer
            .add_document(document)
            .map_err(|e| Error::index_with_source("failed to add document", e))?;
        state.pending_deletes.remove(&id);
        state.pending_adds.insert(id.clone());
        log::debug!("Buffered document {id}");
        Ok(id)
    }

    async fn delete(&self, id: &DocId) -> Result<()> {
        if self.readonly {
            return Err(Error::read_only("delete"));
        }
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.ensure_open()?;
        let present = !state.pending_deletes.contains(id)
            && (state.pending_adds.contains(id) || Self::committed_contains(state, id)?);
        if !present {
            return Err(Error::not_found(id.as_str()));
        }
        let id_term = Self::id_term(&state.fields, id);
        let live = self.ensure_live(state)?;
        self.writer(live)?.delete_term(id_term);
        state.pending_adds.remove(id);
        state.pending_deletes.insert(id.clone());
        Ok(())
    }

    async fn contains(&self, id: &DocId) -> Result<bool> {
        let state = self.lock_state();
        if state.pending_deletes.contains(id) {
            return Ok(false);
        }
        if state.pending_adds.contains(id) {
            return Ok(true);
        }
        Self::committed_contains(&state, id)
    }

    async fn get_document(&self, id: &DocId) -> Result<Option<StoredDocument>> {
        let id = id.clone();
        self.blocking(move |state| {
            let Some(live) = &state.live else {
                return Ok(None);
            };
            let searcher = live.reader.searcher();
            let query = TermQuery::new(Self::id_term(&state.fields, &id), IndexRecordOption::Basic);
            let top = searcher
                .search(&query, &TopDocs::with_limit(1))
                .map_err(|e| Error::query_with_source("id lookup failed", e))?;
            let Some((_, address)) = top.first() else {
                return Ok(None);
            };
            let doc: TantivyDocument = searcher
                .doc(*address)
                .map_err(|e| Error::query_with_source("failed to load document", e))?;
            Ok(Some(StoredDocument {
                fields: stored_fields(&doc, &state.fields)?,
                id,
            }))
        })
        .await
    }

    async fn document_count(&self) -> Result<usize> {
        let state = self.lock_state();
        Ok(state
            .live
            .as_ref()
            .map_or(0, |l| l.reader.searcher().num_docs() as usize))
    }

    async fn document_ids(&self, offset: usize, limit: usize) -> Result<Vec<DocId>> {
        let refresh = self.readonly.then(|| self.path.clone());
        self.blocking(move |state| {
            if let Some(path) = refresh {
                Self::refresh_readonly(&path, state)?;
            }
            Ok(all_ids(state)?.into_iter().skip(offset).take(limit).collect())
        })
        .await
    }

    fn translate(&self, query: &Query) -> Result<NativeQuery> {
        let state = self.lock_state();
        let translator = TantivyTranslator::new(&state.fields);
        let native = translate(query, &CAPABILITIES, BACKEND, &translator)?;
        Ok(NativeQuery::new(BACKEND, native))
    }

    async fn search(&self, query: &NativeQuery, offset: usize, limit: usize) -> Result<ResultSet> {
        let query = (**query.expect_native::<Box<dyn TantivyQuery>>(BACKEND)?).box_clone();
        let refresh = self.readonly.then(|| self.path.clone());
        self.blocking(move |state| {
            if let Some(path) = refresh {
                Self::refresh_readonly(&path, state)?;
            }
            search_live(state, &*query, offset, limit)
        })
        .await
    }

    async fn commit(&self) -> Result<()> {
        let committed = self
            .blocking(|state| {
                let Some(live) = state.live.as_mut() else {
                    return Ok(false);
                };
                let Some(writer) = live.writer.as_mut() else {
                    return Ok(false);
                };
                writer
                    .commit()
                    .map_err(|e| Error::index_with_source("commit failed", e))?;
                live.reader
                    .reload()
                    .map_err(|e| Error::index_with_source("failed to reload reader", e))?;
                state.clear_pending();
                Ok(true)
            })
            .await?;
        if committed {
            log::info!("Committed tantivy store at {}", self.path.display());
        }
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        if let Some(writer) = state.live.as_mut().and_then(|l| l.writer.as_mut()) {
            writer
                .rollback()
                .map_err(|e| Error::index_with_source("rollback failed", e))?;
            log::debug!("Discarded uncommitted tantivy changes");
        }
        state.clear_pending();
        Ok(())
    }

    fn native_handle(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    async fn close(&self) -> Result<()> {
        let pending = self.lock_state().has_pending();
        if pending {
            self.commit().await?;
        }
        // Dropping the writer waits for its indexing threads and frees
        // tantivy's own writer lock.
        self.blocking(|state| {
            state.closed = true;
            drop(state.live.as_mut().and_then(|l| l.writer.take()));
            Ok(())
        })
        .await?;
        self.writer_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        log::info!("Closed tantivy store at {}", self.path.display());
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        if self.readonly {
            return Err(Error::read_only("destroy"));
        }
        self.blocking(|state| {
            state.closed = true;
            if let Some(mut writer) = state.live.take().and_then(|l| l.writer) {
                writer
                    .rollback()
                    .map_err(|e| Error::index_with_source("rollback failed", e))?;
            }
            state.clear_pending();
            state.fields = FieldMap::build(&Schema::new());
            Ok(())
        })
        .await?;
        self.writer_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if self.path.exists() {
            tokio::fs::remove_dir_all(&self.path)
                .await
                .map_err(|e| Error::io_with_path(e, &self.path))?;
        }
        log::info!("Destroyed tantivy store at {}", self.path.display());
        Ok(())
    }
}

impl std::fmt::Debug for TantivyDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyDriver")
            .field("path", &self.path)
            .field("readonly", &self.readonly)
            .field("index", &"<tantivy::Index>")
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
