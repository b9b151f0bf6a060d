//! Shared helpers for client integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use multisearch::{
    BackendOptions, Capabilities, ClientConfig, DocId, Document, Driver, DriverRegistry,
    FieldConfig, NativeQuery, Query, QueryOperator, Result, Schema, SearchClient,
    StoredDocument, UnknownFieldPolicy,
};
use multisearch_core::{PreparedDocument, ResultSet, Translator, translate};
use multisearch_drivers::MemoryDriver;

/// A memory-backed client with `policy`.
pub async fn memory_client(policy: UnknownFieldPolicy) -> SearchClient {
    let config = ClientConfig::new("memory").with_unknown_fields(policy);
    SearchClient::from_config(&config).await.unwrap()
}

/// A writable tantivy-backed client in `dir`.
#[cfg(feature = "driver-tantivy")]
pub async fn tantivy_client(dir: &std::path::Path) -> SearchClient {
    SearchClient::open("tantivy", BackendOptions::with_path(dir))
        .await
        .unwrap()
}

/// Ids of every hit of `query`, in ranked order.
pub async fn search_ids(client: &SearchClient, query: &Query) -> Vec<DocId> {
    client
        .search(query, 0, 1_000)
        .unwrap()
        .collect_all()
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.id)
        .collect()
}

/// The document of the basic scenario.
pub fn first_document() -> Document {
    Document::new([
        ("title", "My first document"),
        ("text", "This is a very simple document that we'd like to index"),
    ])
}

// ============================================================================
// A driver that cannot translate NOT
// ============================================================================

pub const LIMITED_BACKEND: &str = "limited";

const LIMITED_CAPABILITIES: Capabilities = Capabilities {
    operators: &[
        QueryOperator::FreeText,
        QueryOperator::Field,
        QueryOperator::And,
        QueryOperator::Or,
    ],
    single_writer: true,
    ..MEMORY_LIKE
};

const MEMORY_LIKE: Capabilities = Capabilities {
    schema_tier: multisearch::SchemaTier::AppendOnly,
    indexing: multisearch_core::IndexingSync {
        durability: None,
        visibility: multisearch::SyncPoint::AtCall,
        id_assignment: multisearch::SyncPoint::AtCall,
    },
    value_kinds: &[multisearch::ValueKind::Text],
    operators: &[],
    single_writer: false,
    max_retries: 0,
};

/// Accepts every supported shape; used only for its operator check.
struct ShapeCheck;

impl Translator for ShapeCheck {
    type Output = ();

    fn free_text(&self, _terms: &[String]) -> Result<()> {
        Ok(())
    }

    fn field(&self, _field: &str, _terms: &[String]) -> Result<()> {
        Ok(())
    }

    fn and(&self, _children: Vec<()>) -> Result<()> {
        Ok(())
    }

    fn or(&self, _children: Vec<()>) -> Result<()> {
        Ok(())
    }

    fn not(&self, _positive: (), _negative: ()) -> Result<()> {
        Ok(())
    }

    fn xor(&self, _children: Vec<()>) -> Result<()> {
        Ok(())
    }

    fn weight(&self, _query: (), _factor: f32) -> Result<()> {
        Ok(())
    }
}

/// A memory driver that declares no NOT or XOR support and a single writer.
///
/// Clients opened with the same `prefix` option share one store key.
#[derive(Debug)]
pub struct LimitedDriver {
    inner: MemoryDriver,
    key: String,
}

#[async_trait]
impl Driver for LimitedDriver {
    fn name(&self) -> &str {
        LIMITED_BACKEND
    }

    fn capabilities(&self) -> &Capabilities {
        &LIMITED_CAPABILITIES
    }

    fn store_key(&self) -> Option<String> {
        Some(self.key.clone())
    }

    async fn schema_snapshot(&self) -> Result<Schema> {
        self.inner.schema_snapshot().await
    }

    async fn register_field(&self, name: &str, config: &FieldConfig) -> Result<()> {
        self.inner.register_field(name, config).await
    }

    async fn index(&self, doc: &PreparedDocument, id: Option<&DocId>) -> Result<DocId> {
        self.inner.index(doc, id).await
    }

    async fn delete(&self, id: &DocId) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn contains(&self, id: &DocId) -> Result<bool> {
        self.inner.contains(id).await
    }

    async fn get_document(&self, id: &DocId) -> Result<Option<StoredDocument>> {
        self.inner.get_document(id).await
    }

    async fn document_count(&self) -> Result<usize> {
        self.inner.document_count().await
    }

    async fn document_ids(&self, offset: usize, limit: usize) -> Result<Vec<DocId>> {
        self.inner.document_ids(offset, limit).await
    }

    fn translate(&self, query: &Query) -> Result<NativeQuery> {
        translate(query, &LIMITED_CAPABILITIES, LIMITED_BACKEND, &ShapeCheck)?;
        self.inner.translate(query)
    }

    async fn search(&self, query: &NativeQuery, offset: usize, limit: usize) -> Result<ResultSet> {
        self.inner.search(query, offset, limit).await
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn native_handle(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.inner.destroy().await
    }
}

fn open_limited(options: BackendOptions) -> BoxFuture<'static, Result<Arc<dyn Driver>>> {
    async move {
        options.ensure_recognized(LIMITED_BACKEND, &["prefix"])?;
        let prefix = options.prefix.as_deref().unwrap_or("shared");
        let driver: Arc<dyn Driver> = Arc::new(LimitedDriver {
            inner: MemoryDriver::default(),
            key: format!("{LIMITED_BACKEND}:{prefix}"),
        });
        Ok(driver)
    }
    .boxed()
}

/// Built-in drivers plus [`LimitedDriver`].
pub fn registry_with_limited() -> DriverRegistry {
    let mut registry = DriverRegistry::with_builtins();
    registry.register(LIMITED_BACKEND, open_limited);
    registry
}
