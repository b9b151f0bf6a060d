//! Redis driver.
//!
//! A networked backend that keeps an inverted index in Redis sets and
//! evaluates queries as set algebra on the server. This module is only
//! available with the `driver-redis` feature.
//!
//! | Property | Value |
//! |----------|-------|
//! | Schema tier | mutable (eventual: changes apply to new documents) |
//! | Durability | at flush (server persistence) |
//! | Visibility | at call |
//! | Id assignment | at call (server counter) |
//! | Operators | all but WEIGHT |
//!
//! Every hit scores 1.0, so weighted queries are refused with
//! `UnsupportedQuery`; hits are ordered by id (lexicographic). Each
//! network call is bounded by `timeout_ms` and fails with `DriverTimeout`
//! when it runs over.

mod plan;

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use multisearch_core::{
    Capabilities, DocId, Document, Driver, Error, FieldConfig, IndexingSync,
    NativeQuery, PreparedDocument, Query, ReindexLatency, Result, ResultSet, Schema, SchemaTier,
    QueryOperator, SearchHit, StoredDocument, SyncPoint, ValueKind, translate,
};
use redis::RedisResult;
use redis::aio::ConnectionManager;

pub use self::plan::{CompiledPlan, KeySpace, RedisPlan, StoreStep, compile};
use self::plan::RedisTranslator;
use crate::options::BackendOptions;

/// Backend type name.
pub const BACKEND: &str = "redis";

/// Options the Redis driver recognizes.
pub const RECOGNIZED_OPTIONS: &[&str] = &["host", "port", "prefix", "timeout_ms"];

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default key namespace.
pub const DEFAULT_PREFIX: &str = "multisearch";

/// Keys deleted per `SCAN` batch by `destroy()`.
const SCAN_BATCH: usize = 500;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

pub(crate) const CAPABILITIES: Capabilities = Capabilities {
    schema_tier: SchemaTier::Mutable(ReindexLatency::Eventual),
    indexing: IndexingSync {
        durability: Some(SyncPoint::AtFlush),
        visibility: SyncPoint::AtCall,
        id_assignment: SyncPoint::AtCall,
    },
    value_kinds: &[ValueKind::Text, ValueKind::Number, ValueKind::DateTime],
    operators: &[
        QueryOperator::FreeText,
        QueryOperator::Field,
        QueryOperator::And,
        QueryOperator::Or,
        QueryOperator::Not,
        QueryOperator::Xor,
    ],
    single_writer: false,
    max_retries: 0,
};

/// Networked driver backed by Redis sets.
pub struct RedisDriver {
    keys: KeySpace,
    url: String,
    timeout_ms: u64,
    readonly: bool,
    con: ConnectionManager,
    fields: RwLock<Schema>,
}

impl RedisDriver {
    /// Connect to the server named by `options` and load the stored schema.
    ///
    /// # Errors
    ///
    /// - `UnsupportedOption` for options other than `host`, `port`, `prefix`,
    ///   `timeout_ms` and `readonly`
    /// - `Config` for an invalid address or prefix
    /// - `DriverTimeout` when the server does not answer in time
    pub async fn open(options: &BackendOptions) -> Result<Self> {
        options.ensure_recognized(BACKEND, RECOGNIZED_OPTIONS)?;
        let prefix = options.prefix.as_deref().unwrap_or(DEFAULT_PREFIX);
        validate_prefix(prefix)?;
        let url = format!(
            "redis://{}:{}/",
            options.host.as_deref().unwrap_or(DEFAULT_HOST),
            options.port.unwrap_or(DEFAULT_PORT)
        );
        let timeout_ms = options.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);

        let client = redis::Client::open(url.as_str())
            .map_err(|e| Error::config(format!("invalid redis address '{url}': {e}")))?;
        let con = bounded(timeout_ms, ConnectionManager::new(client))
            .await?
            .map_err(|e| Error::index_with_source(format!("cannot connect to {url}"), e))?;

        let driver = Self {
            keys: KeySpace::new(prefix),
            url,
            timeout_ms,
            readonly: options.readonly,
            con,
            fields: RwLock::new(Schema::new()),
        };
        let stored = driver.load_schema().await?;
        log::info!(
            "Opened redis store '{}' at {} ({} field(s))",
            driver.keys.prefix(),
            driver.url,
            stored.len()
        );
        *driver.fields_mut() = stored;
        Ok(driver)
    }

    /// A handle on the underlying connection.
    pub fn connection(&self) -> ConnectionManager {
        self.con.clone()
    }

    /// Key layout of this store.
    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    fn fields(&self) -> std::sync::RwLockReadGuard<'_, Schema> {
        self.fields.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn fields_mut(&self) -> std::sync::RwLockWriteGuard<'_, Schema> {
        self.fields.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        if self.readonly {
            return Err(Error::read_only(operation));
        }
        Ok(())
    }

    async fn read<T>(&self, fut: impl Future<Output = RedisResult<T>>) -> Result<T> {
        bounded(self.timeout_ms, fut)
            .await?
            .map_err(|e| Error::query_with_source("redis read failed", e))
    }

    async fn write<T>(&self, fut: impl Future<Output = RedisResult<T>>) -> Result<T> {
        bounded(self.timeout_ms, fut)
            .await?
            .map_err(|e| Error::index_with_source("redis write failed", e))
    }

    async fn load_schema(&self) -> Result<Schema> {
        let mut con = self.con.clone();
        let entries: BTreeMap<String, String> = self
            .read(
                redis::cmd("HGETALL")
                    .arg(self.keys.schema().as_str())
                    .query_async(&mut con),
            )
            .await?;
        schema_from_entries(entries)
    }

    async fn postings_of(&self, con: &mut ConnectionManager, id: &DocId) -> Result<Vec<String>> {
        self.read(
            redis::cmd("SMEMBERS")
                .arg(self.keys.terms(id.as_str()).as_str())
                .query_async(con),
        )
        .await
    }

    /// Queue the commands that unlink `id` from `postings` and drop its data.
    fn unlink(&self, pipe: &mut redis::Pipeline, id: &DocId, postings: &[String]) {
        for key in postings {
            pipe.cmd("SREM").arg(key.as_str()).arg(id.as_str()).ignore();
        }
        pipe.cmd("DEL")
            .arg(self.keys.terms(id.as_str()).as_str())
            .arg(self.keys.data(id.as_str()).as_str())
            .ignore();
    }
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() || prefix.contains(|c: char| c.is_whitespace() || c == ':') {
        return Err(Error::config(format!(
            "invalid redis prefix '{prefix}': must be non-empty without spaces or ':'"
        )));
    }
    Ok(())
}

async fn bounded<T>(timeout_ms: u64, fut: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
        .await
        .map_err(|_| Error::DriverTimeout {
            backend: BACKEND.to_string(),
            millis: timeout_ms,
        })
}

/// Rebuild a schema from the field-to-config-JSON hash.
fn schema_from_entries(entries: BTreeMap<String, String>) -> Result<Schema> {
    entries
        .into_iter()
        .map(|(name, json)| {
            let config: FieldConfig = serde_json::from_str(&json).map_err(|e| {
                Error::index_with_source(format!("corrupt schema entry for field '{name}'"), e)
            })?;
            Ok((name, config))
        })
        .collect()
}

fn parse_stored(json: &str) -> Result<Document> {
    Ok(serde_json::from_str(json)?)
}

#[async_trait]
impl Driver for RedisDriver {
    fn name(&self) -> &str {
        BACKEND
    }

    fn capabilities(&self) -> &Capabilities {
        &CAPABILITIES
    }

    async fn schema_snapshot(&self) -> Result<Schema> {
        let stored = self.load_schema().await?;
        *self.fields_mut() = stored.clone();
        Ok(stored)
    }

    async fn register_field(&self, name: &str, config: &FieldConfig) -> Result<()> {
        self.ensure_writable("register_field")?;
        let json = serde_json::to_string(config)?;
        let mut con = self.con.clone();
        // One hash entry per field, so concurrent writers never overwrite
        // each other's registrations.
        self.write(
            redis::cmd("HSET")
                .arg(self.keys.schema().as_str())
                .arg(name)
                .arg(json)
                .query_async::<()>(&mut con),
        )
        .await?;
        self.fields_mut().insert(name, *config);
        log::debug!("Registered redis field '{name}' as {}", config.kind);
        Ok(())
    }

    async fn index(&self, doc: &PreparedDocument, id: Option<&DocId>) -> Result<DocId> {
        self.ensure_writable("index")?;
        let mut con = self.con.clone();
        let (id, previous) = match id {
            Some(id) => (id.clone(), self.postings_of(&mut con, id).await?),
            None => {
                let next: u64 = self
                    .write(
                        redis::cmd("INCR")
                            .arg(self.keys.next_id().as_str())
                            .query_async(&mut con),
                    )
                    .await?;
                (DocId::new(next.to_string()), Vec::new())
            }
        };

        let postings = self.keys.postings(doc);
        let data = serde_json::to_string(&doc.stored())?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.unlink(&mut pipe, &id, &previous);
        pipe.cmd("SET")
            .arg(self.keys.data(id.as_str()).as_str())
            .arg(data)
            .ignore();
        pipe.cmd("SADD")
            .arg(self.keys.docs().as_str())
            .arg(id.as_str())
            .ignore();
        for key in &postings {
            pipe.cmd("SADD").arg(key.as_str()).arg(id.as_str()).ignore();
        }
        if !postings.is_empty() {
            pipe.cmd("SADD")
                .arg(self.keys.terms(id.as_str()).as_str())
                .arg(postings.as_slice())
                .ignore();
        }
        self.write(pipe.query_async::<()>(&mut con)).await?;
        log::debug!("Indexed document {id} into {} posting set(s)", postings.len());
        Ok(id)
    }

    async fn delete(&self, id: &DocId) -> Result<()> {
        self.ensure_writable("delete")?;
        if !self.contains(id).await? {
            return Err(Error::not_found(id.as_str()));
        }
        let mut con = self.con.clone();
        let postings = self.postings_of(&mut con, id).await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.unlink(&mut pipe, id, &postings);
        pipe.cmd("SREM")
            .arg(self.keys.docs().as_str())
            .arg(id.as_str())
            .ignore();
        self.write(pipe.query_async::<()>(&mut con)).await?;
        log::debug!("Deleted document {id}");
        Ok(())
    }

    async fn contains(&self, id: &DocId) -> Result<bool> {
        let mut con = self.con.clone();
        self.read(
            redis::cmd("SISMEMBER")
                .arg(self.keys.docs().as_str())
                .arg(id.as_str())
                .query_async(&mut con),
        )
        .await
    }

    async fn get_document(&self, id: &DocId) -> Result<Option<StoredDocument>> {
        let mut con = self.con.clone();
        let json: Option<String> = self
            .read(
                redis::cmd("GET")
                    .arg(self.keys.data(id.as_str()).as_str())
                    .query_async(&mut con),
            )
            .await?;
        json.map(|json| {
            Ok(StoredDocument {
                id: id.clone(),
                fields: parse_stored(&json)?,
            })
        })
        .transpose()
    }

    async fn document_count(&self) -> Result<usize> {
        let mut con = self.con.clone();
        self.read(
            redis::cmd("SCARD")
                .arg(self.keys.docs().as_str())
                .query_async(&mut con),
        )
        .await
    }

    async fn document_ids(&self, offset: usize, limit: usize) -> Result<Vec<DocId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut con = self.con.clone();
        let ids: Vec<String> = self
            .read(
                redis::cmd("SORT")
                    .arg(self.keys.docs().as_str())
                    .arg("LIMIT")
                    .arg(offset)
                    .arg(limit)
                    .arg("ALPHA")
                    .query_async(&mut con),
            )
            .await?;
        Ok(ids.into_iter().map(DocId::new).collect())
    }

    fn translate(&self, query: &Query) -> Result<NativeQuery> {
        let fields = self.fields();
        let translator = RedisTranslator {
            keys: &self.keys,
            fields: &fields,
        };
        let plan = translate(query, &CAPABILITIES, BACKEND, &translator)?;
        Ok(NativeQuery::new(BACKEND, plan))
    }

    async fn search(&self, query: &NativeQuery, offset: usize, limit: usize) -> Result<ResultSet> {
        let plan = query.expect_native::<RedisPlan>(BACKEND)?;
        let run = uuid::Uuid::new_v4().simple().to_string();
        let compiled = compile(plan, &self.keys, &run);

        let mut pipe = redis::pipe();
        pipe.atomic();
        for step in &compiled.steps {
            pipe.cmd(step.command)
                .arg(step.dest.as_str())
                .arg(step.sources.as_slice())
                .ignore();
        }
        pipe.cmd("SCARD").arg(compiled.result.as_str());
        if limit > 0 {
            pipe.cmd("SORT")
                .arg(compiled.result.as_str())
                .arg("LIMIT")
                .arg(offset)
                .arg(limit)
                .arg("ALPHA");
        }
        if !compiled.temps.is_empty() {
            pipe.cmd("DEL").arg(compiled.temps.as_slice()).ignore();
        }

        let mut con = self.con.clone();
        let (total, ids): (usize, Vec<String>) = if limit > 0 {
            self.read(pipe.query_async(&mut con)).await?
        } else {
            let (total,): (usize,) = self.read(pipe.query_async(&mut con)).await?;
            (total, Vec::new())
        };
        if ids.is_empty() {
            return Ok(ResultSet {
                hits: Vec::new(),
                total: Some(total),
            });
        }

        let data_keys: Vec<String> = ids.iter().map(|id| self.keys.data(id)).collect();
        let data: Vec<Option<String>> = self
            .read(
                redis::cmd("MGET")
                    .arg(data_keys.as_slice())
                    .query_async(&mut con),
            )
            .await?;
        let mut hits = Vec::with_capacity(ids.len());
        for (id, json) in ids.into_iter().zip(data) {
            // Deleted between the set algebra and the fetch.
            let Some(json) = json else {
                continue;
            };
            hits.push(SearchHit {
                id: DocId::new(id),
                score: 1.0,
                fields: parse_stored(&json)?,
            });
        }
        Ok(ResultSet {
            hits,
            total: Some(total),
        })
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn native_handle(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    async fn close(&self) -> Result<()> {
        log::info!("Closed redis store '{}' at {}", self.keys.prefix(), self.url);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.ensure_writable("destroy")?;
        let pattern = self.keys.pattern();
        let mut con = self.con.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .read(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern.as_str())
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut con),
                )
                .await?;
            if !keys.is_empty() {
                self.write(
                    redis::cmd("DEL")
                        .arg(keys.as_slice())
                        .query_async::<()>(&mut con),
                )
                .await?;
                deleted += keys.len();
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        *self.fields_mut() = Schema::new();
        log::info!(
            "Destroyed redis store '{}' at {} ({deleted} key(s))",
            self.keys.prefix(),
            self.url
        );
        Ok(())
    }
}

impl std::fmt::Debug for RedisDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDriver")
            .field("url", &self.url)
            .field("prefix", &self.keys.prefix())
            .field("timeout_ms", &self.timeout_ms)
            .field("readonly", &self.readonly)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
