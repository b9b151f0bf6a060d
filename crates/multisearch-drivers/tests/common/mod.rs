//! Shared helpers for driver integration tests.

#![allow(dead_code)]

use multisearch_core::{
    DocId, Document, DocumentPlan, Driver, FieldConfig, PreparedDocument, Query, Resolution,
};

/// Fields every conformance test registers.
pub fn fields() -> Vec<(&'static str, FieldConfig)> {
    vec![
        ("title", FieldConfig::free_text()),
        ("text", FieldConfig::free_text()),
        ("tag", FieldConfig::exact_match()),
        ("price", FieldConfig::numeric()),
        ("note", FieldConfig::free_text().with_indexed(false)),
    ]
}

/// Register [`fields`] on `driver`.
pub async fn register_fields(driver: &dyn Driver) {
    for (name, config) in fields() {
        driver.register_field(name, &config).await.unwrap();
    }
}

/// Resolve `doc` against [`fields`] and prepare it for `driver`.
pub fn prepare(driver: &dyn Driver, doc: &Document) -> PreparedDocument {
    let plan = DocumentPlan {
        fields: fields()
            .into_iter()
            .filter(|(name, _)| doc.field_values(name).next().is_some())
            .map(|(name, config)| (name.to_string(), Resolution::Field(config)))
            .collect(),
        ..DocumentPlan::default()
    };
    PreparedDocument::prepare(doc, &plan, driver.capabilities(), driver.name()).unwrap()
}

/// Index `docs`, commit, and return their ids in order.
pub async fn load(driver: &dyn Driver, docs: &[Document]) -> Vec<DocId> {
    let mut ids = Vec::new();
    for doc in docs {
        ids.push(driver.index(&prepare(driver, doc), None).await.unwrap());
    }
    driver.commit().await.unwrap();
    ids
}

/// Ids matching `query`, in ranked order.
pub async fn hits(driver: &dyn Driver, query: &Query) -> Vec<DocId> {
    let native = driver.translate(query).unwrap();
    driver
        .search(&native, 0, 100)
        .await
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.id)
        .collect()
}

/// Sorted copy of `ids`, for order-insensitive comparisons.
pub fn sorted(mut ids: Vec<DocId>) -> Vec<DocId> {
    ids.sort();
    ids
}

/// The two documents of the basic scenario.
pub fn basic_docs() -> Vec<Document> {
    vec![
        Document::new([
            ("title", "My first document"),
            ("text", "This is a very simple document that we'd like to index"),
        ]),
        Document::new([
            ("title", "My second document"),
            ("text", "This is another very simple document"),
        ]),
    ]
}
