//! In-memory driver.
//!
//! A volatile, embedded backend that evaluates queries by scanning every
//! document. Useful for tests and small collections where an on-disk index
//! isn't justified.
//!
//! | Property | Value |
//! |----------|-------|
//! | Schema tier | append-only |
//! | Durability | none |
//! | Visibility | at call |
//! | Id assignment | at call (UUID v4) |
//! | Operators | all |
//!
//! Relevance is the summed frequency of the matched query tokens. Equal
//! scores are ordered by insertion, oldest first.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use multisearch_core::{
    ALL_OPERATORS, Capabilities, DocId, Document, Driver, Error, FieldConfig, FieldKind,
    IndexingSync, NativeQuery, PreparedDocument, Query, Result, ResultSet, Schema, SchemaTier,
    SearchHit, StoredDocument, SyncPoint, Translator, ValueKind, translate,
};

use crate::analysis::{query_tokens, tokenize_terms, value_tokens};
use crate::options::BackendOptions;

/// Backend type name.
pub const BACKEND: &str = "memory";

/// Options the memory driver recognizes.
pub const RECOGNIZED_OPTIONS: &[&str] = &[];

const CAPABILITIES: Capabilities = Capabilities {
    schema_tier: SchemaTier::AppendOnly,
    indexing: IndexingSync {
        durability: None,
        visibility: SyncPoint::AtCall,
        id_assignment: SyncPoint::AtCall,
    },
    value_kinds: &[
        ValueKind::Text,
        ValueKind::Number,
        ValueKind::DateTime,
        ValueKind::Document,
    ],
    operators: ALL_OPERATORS,
    single_writer: false,
    max_retries: 0,
};

// ============================================================================
// Native query
// ============================================================================

/// Native query of the memory driver.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryQuery {
    /// Every token must occur in some free-text field.
    FreeText(Vec<String>),
    /// Every token must occur in the field.
    Field {
        /// Field name.
        field: String,
        /// Required tokens.
        tokens: Vec<String>,
    },
    /// Matches no document.
    Nothing,
    /// Every child must match.
    And(Vec<MemoryQuery>),
    /// Some child must match.
    Or(Vec<MemoryQuery>),
    /// The first must match and the second must not.
    Not(Box<MemoryQuery>, Box<MemoryQuery>),
    /// An odd number of children must match.
    Xor(Vec<MemoryQuery>),
    /// The child, with its score multiplied.
    Weight(Box<MemoryQuery>, f32),
}

struct MemoryTranslator<'a> {
    fields: &'a Schema,
}

impl Translator for MemoryTranslator<'_> {
    type Output = MemoryQuery;

    fn free_text(&self, terms: &[String]) -> Result<MemoryQuery> {
        let tokens = tokenize_terms(terms);
        if tokens.is_empty() {
            return Ok(MemoryQuery::Nothing);
        }
        Ok(MemoryQuery::FreeText(tokens))
    }

    fn field(&self, field: &str, terms: &[String]) -> Result<MemoryQuery> {
        let config = self
            .fields
            .get(field)
            .ok_or_else(|| Error::unknown_field(field))?;
        if !config.indexed {
            return Ok(MemoryQuery::Nothing);
        }
        let tokens = query_tokens(field, config.kind, terms)?;
        if tokens.is_empty() {
            return Ok(MemoryQuery::Nothing);
        }
        Ok(MemoryQuery::Field {
            field: field.to_string(),
            tokens,
        })
    }

    fn and(&self, children: Vec<MemoryQuery>) -> Result<MemoryQuery> {
        Ok(MemoryQuery::And(children))
    }

    fn or(&self, children: Vec<MemoryQuery>) -> Result<MemoryQuery> {
        Ok(MemoryQuery::Or(children))
    }

    fn not(&self, positive: MemoryQuery, negative: MemoryQuery) -> Result<MemoryQuery> {
        Ok(MemoryQuery::Not(Box::new(positive), Box::new(negative)))
    }

    fn xor(&self, children: Vec<MemoryQuery>) -> Result<MemoryQuery> {
        Ok(MemoryQuery::Xor(children))
    }

    fn weight(&self, query: MemoryQuery, factor: f32) -> Result<MemoryQuery> {
        Ok(MemoryQuery::Weight(Box::new(query), factor))
    }
}

// ============================================================================
// Storage
// ============================================================================

type TermCounts = HashMap<String, u32>;

#[derive(Debug)]
struct MemoryDoc {
    seq: u64,
    fields: HashMap<String, TermCounts>,
    free_text: TermCounts,
    stored: Document,
}

impl MemoryDoc {
    fn build(seq: u64, doc: &PreparedDocument) -> Self {
        let mut fields: HashMap<String, TermCounts> = HashMap::new();
        let mut free_text = TermCounts::new();
        for field in doc.fields().iter().filter(|f| f.config.indexed) {
            let counts = fields.entry(field.name.clone()).or_default();
            for value in &field.values {
                for token in value_tokens(field.config.kind, value) {
                    if field.config.kind == FieldKind::FreeText {
                        *free_text.entry(token.clone()).or_default() += 1;
                    }
                    *counts.entry(token).or_default() += 1;
                }
            }
        }
        Self {
            seq,
            fields,
            free_text,
            stored: doc.stored(),
        }
    }

    /// Score of the document against `query`, `None` when it does not match.
    fn score(&self, query: &MemoryQuery) -> Option<f32> {
        match query {
            MemoryQuery::FreeText(tokens) => score_tokens(&self.free_text, tokens),
            MemoryQuery::Field { field, tokens } => {
                self.fields.get(field).and_then(|c| score_tokens(c, tokens))
            }
            MemoryQuery::Nothing => None,
            MemoryQuery::And(children) => children.iter().map(|c| self.score(c)).sum(),
            MemoryQuery::Or(children) => children
                .iter()
                .filter_map(|c| self.score(c))
                .reduce(|a, b| a + b),
            MemoryQuery::Not(positive, negative) => match self.score(negative) {
                Some(_) => None,
                None => self.score(positive),
            },
            MemoryQuery::Xor(children) => {
                let scores: Vec<f32> = children.iter().filter_map(|c| self.score(c)).collect();
                (scores.len() % 2 == 1).then(|| scores.iter().sum())
            }
            MemoryQuery::Weight(child, factor) => self.score(child).map(|s| s * factor),
        }
    }
}

fn score_tokens(counts: &TermCounts, tokens: &[String]) -> Option<f32> {
    tokens
        .iter()
        .map(|t| counts.get(t).map(|n| *n as f32))
        .sum()
}

#[derive(Debug, Default)]
struct MemoryState {
    fields: Schema,
    docs: HashMap<DocId, MemoryDoc>,
    next_seq: u64,
}

// ============================================================================
// Driver
// ============================================================================

/// Volatile in-memory driver.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: RwLock<MemoryState>,
}

impl MemoryDriver {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from driver options.
    ///
    /// # Errors
    ///
    /// `UnsupportedOption` for any option other than `readonly`.
    pub fn open(options: &BackendOptions) -> Result<Self> {
        options.ensure_recognized(BACKEND, RECOGNIZED_OPTIONS)?;
        log::debug!("Opening in-memory store");
        Ok(Self::new())
    }

    /// Every stored document, oldest first.
    pub fn documents(&self) -> Vec<StoredDocument> {
        let state = self.read();
        let mut docs: Vec<_> = state.docs.iter().collect();
        docs.sort_by_key(|(_, d)| d.seq);
        docs.into_iter()
            .map(|(id, d)| StoredDocument {
                id: id.clone(),
                fields: d.stored.clone(),
            })
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        BACKEND
    }

    fn capabilities(&self) -> &Capabilities {
        &CAPABILITIES
    }

    async fn schema_snapshot(&self) -> Result<Schema> {
        Ok(self.read().fields.clone())
    }

    async fn register_field(&self, name: &str, config: &FieldConfig) -> Result<()> {
        self.write().fields.insert(name, *config);
        Ok(())
    }

    async fn index(&self, doc: &PreparedDocument, id: Option<&DocId>) -> Result<DocId> {
        let id = id.cloned().unwrap_or_else(DocId::generate);
        let mut state = self.write();
        let seq = state.next_seq;
        state.next_seq += 1;
        let replaced = state.docs.insert(id.clone(), MemoryDoc::build(seq, doc)).is_some();
        log::debug!(
            "Indexed document {id} ({})",
            if replaced { "replaced" } else { "new" }
        );
        Ok(id)
    }

    async fn delete(&self, id: &DocId) -> Result<()> {
        match self.write().docs.remove(id) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(id.as_str())),
        }
    }

    async fn contains(&self, id: &DocId) -> Result<bool> {
        Ok(self.read().docs.contains_key(id))
    }

    async fn get_document(&self, id: &DocId) -> Result<Option<StoredDocument>> {
        Ok(self.read().docs.get(id).map(|d| StoredDocument {
            id: id.clone(),
            fields: d.stored.clone(),
        }))
    }

    async fn document_count(&self) -> Result<usize> {
        Ok(self.read().docs.len())
    }

    async fn document_ids(&self, offset: usize, limit: usize) -> Result<Vec<DocId>> {
        let state = self.read();
        let mut docs: Vec<_> = state.docs.iter().map(|(id, d)| (d.seq, id)).collect();
        docs.sort_unstable_by_key(|(seq, _)| *seq);
        Ok(docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, id)| id.clone())
            .collect())
    }

    fn translate(&self, query: &Query) -> Result<NativeQuery> {
        let state = self.read();
        let translator = MemoryTranslator {
            fields: &state.fields,
        };
        let native = translate(query, &CAPABILITIES, BACKEND, &translator)?;
        Ok(NativeQuery::new(BACKEND, native))
    }

    async fn search(&self, query: &NativeQuery, offset: usize, limit: usize) -> Result<ResultSet> {
        let query = query.expect_native::<MemoryQuery>(BACKEND)?;
        let state = self.read();
        let mut matches: Vec<(f32, u64, &DocId, &MemoryDoc)> = state
            .docs
            .iter()
            .filter_map(|(id, doc)| doc.score(query).map(|score| (score, doc.seq, id, doc)))
            .collect();
        matches.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        let total = matches.len();
        let hits = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(score, _, id, doc)| SearchHit {
                id: id.clone(),
                score,
                fields: doc.stored.clone(),
            })
            .collect();
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
        log::debug!("Closing in-memory store");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let mut state = self.write();
        let count = state.docs.len();
        *state = MemoryState::default();
        log::info!("Destroyed in-memory store ({count} document(s))");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use multisearch_core::{DocumentPlan, Resolution, Value};

    fn prepare(doc: &Document, fields: &[(&str, FieldConfig)]) -> PreparedDocument {
        let plan = DocumentPlan {
            fields: fields
                .iter()
                .map(|(n, c)| (n.to_string(), Resolution::Field(*c)))
                .collect(),
            ..DocumentPlan::default()
        };
        PreparedDocument::prepare(doc, &plan, &CAPABILITIES, BACKEND).unwrap()
    }

    async fn driver_with(docs: &[Document]) -> (MemoryDriver, Vec<DocId>) {
        let driver = MemoryDriver::new();
        let fields = [
            ("title", FieldConfig::free_text()),
            ("text", FieldConfig::free_text()),
            ("tag", FieldConfig::exact_match()),
        ];
        for (name, config) in &fields {
            driver.register_field(name, config).await.unwrap();
        }
        let mut ids = Vec::new();
        for doc in docs {
            ids.push(driver.index(&prepare(doc, &fields), None).await.unwrap());
        }
        (driver, ids)
    }

    async fn run(driver: &MemoryDriver, query: Query) -> Vec<DocId> {
        let native = driver.translate(&query).unwrap();
        let rs = driver.search(&native, 0, 100).await.unwrap();
        rs.hits.into_iter().map(|h| h.id).collect()
    }

    #[test]
    fn test_open_rejects_path() {
        let err = MemoryDriver::open(&BackendOptions::with_path("/tmp/x")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOption { .. }));
    }

    #[tokio::test]
    async fn test_field_query_finds_document() {
        let (driver, ids) = driver_with(&[
            Document::new([("title", "My first document"), ("text", "Hello")]),
            Document::new([("title", "Second"), ("text", "first of many")]),
        ])
        .await;
        assert_eq!(run(&driver, Query::field_term("title", "first")).await, vec![ids[0].clone()]);
        assert_eq!(run(&driver, Query::term("first")).await.len(), 2);
    }

    #[tokio::test]
    async fn test_ranking_by_frequency_then_insertion() {
        let (driver, ids) = driver_with(&[
            Document::new([("text", "apple")]),
            Document::new([("text", "apple apple")]),
            Document::new([("text", "apple")]),
        ])
        .await;
        assert_eq!(
            run(&driver, Query::term("apple")).await,
            vec![ids[1].clone(), ids[0].clone(), ids[2].clone()]
        );
    }

    #[tokio::test]
    async fn test_boolean_operators() {
        let (driver, ids) = driver_with(&[
            Document::new([("text", "red green")]),
            Document::new([("text", "red")]),
            Document::new([("text", "green")]),
        ])
        .await;
        let red = || Query::term("red");
        let green = || Query::term("green");
        assert_eq!(run(&driver, red() & green()).await, vec![ids[0].clone()]);
        assert_eq!(run(&driver, red() | green()).await.len(), 3);
        assert_eq!(run(&driver, red() - green()).await, vec![ids[1].clone()]);
    }

    #[tokio::test]
    async fn test_xor_keeps_odd_matches() {
        let (driver, ids) = driver_with(&[
            Document::new([("text", "red green blue")]),
            Document::new([("text", "red green")]),
            Document::new([("text", "red")]),
            Document::new([("text", "blue")]),
        ])
        .await;
        let (red, green, blue) = (Query::term("red"), Query::term("green"), Query::term("blue"));
        let mut two = run(&driver, red.clone() ^ green.clone()).await;
        two.sort();
        assert_eq!(two, vec![ids[2].clone()]);

        let mut three = run(&driver, red ^ green ^ blue).await;
        three.sort();
        let mut expected = vec![ids[0].clone(), ids[2].clone(), ids[3].clone()];
        expected.sort();
        assert_eq!(three, expected);
    }

    #[tokio::test]
    async fn test_weight_scales_scores() {
        let (driver, ids) = driver_with(&[
            Document::new([("text", "apple apple")]),
            Document::new([("text", "pear")]),
        ])
        .await;
        let query = Query::term("apple") | (Query::term("pear") * 3.0);
        let native = driver.translate(&query).unwrap();
        let rs = driver.search(&native, 0, 10).await.unwrap();
        assert_eq!(rs.hits[0].id, ids[1]);
        assert_eq!(rs.hits[0].score, 3.0);
        assert_eq!(rs.hits[1].score, 2.0);
    }

    #[tokio::test]
    async fn test_document_ids_in_insertion_order() {
        let docs: Vec<_> = (0..4).map(|i| Document::new([("text", format!("d{i}"))])).collect();
        let (driver, ids) = driver_with(&docs).await;
        assert_eq!(driver.document_ids(0, 10).await.unwrap(), ids);
        assert_eq!(driver.document_ids(1, 2).await.unwrap(), ids[1..3].to_vec());
        assert!(driver.document_ids(4, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_clears_documents_and_schema() {
        let (driver, _) = driver_with(&[Document::new([("text", "gone")])]).await;
        driver.destroy().await.unwrap();
        assert_eq!(driver.document_count().await.unwrap(), 0);
        assert!(driver.schema_snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exact_match_field() {
        let (driver, ids) = driver_with(&[
            Document::new([("tag", "New York")]),
            Document::new([("tag", "York")]),
        ])
        .await;
        assert_eq!(
            run(&driver, Query::field_term("tag", "New York")).await,
            vec![ids[0].clone()]
        );
        assert!(run(&driver, Query::field_term("tag", "new")).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_field_query_fails() {
        let (driver, _) = driver_with(&[]).await;
        let err = driver.translate(&Query::field_term("colour", "red")).unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));
    }

    #[tokio::test]
    async fn test_window_and_total() {
        let docs: Vec<_> = (0..5).map(|_| Document::new([("text", "same")])).collect();
        let (driver, ids) = driver_with(&docs).await;
        let native = driver.translate(&Query::term("same")).unwrap();
        let rs = driver.search(&native, 1, 2).await.unwrap();
        assert_eq!(rs.total, Some(5));
        let got: Vec<_> = rs.hits.into_iter().map(|h| h.id).collect();
        assert_eq!(got, vec![ids[1].clone(), ids[2].clone()]);
    }

    #[tokio::test]
    async fn test_update_delete_and_stored_fields() {
        let (driver, ids) = driver_with(&[Document::new([("title", "Old")])]).await;
        let fields = [("title", FieldConfig::free_text())];
        let doc = Document::new([("title", Value::from("New"))]);
        driver.index(&prepare(&doc, &fields), Some(&ids[0])).await.unwrap();

        assert_eq!(driver.document_count().await.unwrap(), 1);
        let stored = driver.get_document(&ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.fields, doc);
        assert!(run(&driver, Query::term("old")).await.is_empty());

        driver.delete(&ids[0]).await.unwrap();
        assert!(matches!(
            driver.delete(&ids[0]).await,
            Err(Error::NotFound { .. })
        ));
        assert!(!driver.contains(&ids[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_native_query_from_other_backend_rejected() {
        let (driver, _) = driver_with(&[]).await;
        let foreign = NativeQuery::new("other", "x".to_string());
        assert!(matches!(
            driver.search(&foreign, 0, 10).await,
            Err(Error::Query { .. })
        ));
    }
}
