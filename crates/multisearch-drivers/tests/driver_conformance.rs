//! Behaviour every driver shares, run against each embedded driver.

#![allow(clippy::unwrap_used)]

mod common;

use multisearch_core::{Document, Driver, Error, Query};
use multisearch_drivers::{BackendOptions, MemoryDriver};

use common::{basic_docs, hits, load, prepare, register_fields, sorted};

async fn check_basic_scenario(driver: &dyn Driver) {
    register_fields(driver).await;
    let ids = load(driver, &basic_docs()).await;

    assert_eq!(hits(driver, &Query::field_term("title", "first")).await, vec![ids[0].clone()]);
    assert_eq!(sorted(hits(driver, &Query::term("simple")).await), sorted(ids.clone()));
    assert_eq!(hits(driver, &Query::term("another")).await, vec![ids[1].clone()]);
    assert!(hits(driver, &Query::term("absent")).await.is_empty());
    assert_eq!(driver.document_count().await.unwrap(), 2);
}

async fn check_boolean_operators(driver: &dyn Driver) {
    register_fields(driver).await;
    let ids = load(
        driver,
        &[
            Document::new([("text", "red green")]),
            Document::new([("text", "red")]),
            Document::new([("text", "green")]),
        ],
    )
    .await;
    let red = || Query::term("red");
    let green = || Query::term("green");

    assert_eq!(hits(driver, &(red() & green())).await, vec![ids[0].clone()]);
    assert_eq!(sorted(hits(driver, &(red() | green())).await), sorted(ids.clone()));
    assert_eq!(hits(driver, &(red() - green())).await, vec![ids[1].clone()]);
    assert_eq!(
        sorted(hits(driver, &(red() ^ green())).await),
        sorted(vec![ids[1].clone(), ids[2].clone()])
    );
}

async fn check_weight(driver: &dyn Driver) {
    register_fields(driver).await;
    let ids = load(
        driver,
        &[
            Document::new([("text", "plain")]),
            Document::new([("text", "boosted")]),
        ],
    )
    .await;
    let query = Query::term("plain") | (Query::term("boosted") * 10.0);
    assert_eq!(hits(driver, &query).await, vec![ids[1].clone(), ids[0].clone()]);
    let query = (Query::term("plain") * 10.0) | Query::term("boosted");
    assert_eq!(hits(driver, &query).await, vec![ids[0].clone(), ids[1].clone()]);
}

async fn check_listing_and_destroy(driver: &dyn Driver) {
    register_fields(driver).await;
    let ids = load(driver, &basic_docs()).await;

    let mut listed = driver.document_ids(0, 1).await.unwrap();
    listed.extend(driver.document_ids(1, 10).await.unwrap());
    assert_eq!(sorted(listed), sorted(ids));
    assert!(driver.document_ids(2, 10).await.unwrap().is_empty());

    driver.destroy().await.unwrap();
    assert_eq!(driver.document_count().await.unwrap(), 0);
    assert!(driver.schema_snapshot().await.unwrap().is_empty());
}

async fn check_field_kinds(driver: &dyn Driver) {
    register_fields(driver).await;
    let ids = load(
        driver,
        &[
            Document::new([("tag", "New York"), ("note", "private")]).with("price", 3.0),
            Document::new([("tag", "York")]).with("price", 4.5),
        ],
    )
    .await;

    assert_eq!(hits(driver, &Query::field_term("tag", "New York")).await, vec![ids[0].clone()]);
    assert!(hits(driver, &Query::field_term("tag", "new")).await.is_empty());
    assert_eq!(hits(driver, &Query::field_term("price", "4.5")).await, vec![ids[1].clone()]);
    assert!(hits(driver, &Query::field_term("note", "private")).await.is_empty());

    let stored = driver.get_document(&ids[0]).await.unwrap().unwrap();
    assert_eq!(stored.fields.field_values("note").next().unwrap().as_text(), Some("private"));
}

async fn check_unknown_field(driver: &dyn Driver) {
    register_fields(driver).await;
    assert!(matches!(
        driver.translate(&Query::field_term("colour", "red")),
        Err(Error::UnknownField { .. })
    ));
}

async fn check_update_and_delete(driver: &dyn Driver) {
    register_fields(driver).await;
    let ids = load(driver, &basic_docs()).await;

    let replacement = Document::new([("title", "Rewritten entirely")]);
    driver
        .index(&prepare(driver, &replacement), Some(&ids[0]))
        .await
        .unwrap();
    driver.commit().await.unwrap();
    assert_eq!(driver.document_count().await.unwrap(), 2);
    assert!(hits(driver, &Query::field_term("title", "first")).await.is_empty());
    assert_eq!(hits(driver, &Query::term("rewritten")).await, vec![ids[0].clone()]);

    driver.delete(&ids[1]).await.unwrap();
    driver.commit().await.unwrap();
    assert!(!driver.contains(&ids[1]).await.unwrap());
    assert!(driver.get_document(&ids[1]).await.unwrap().is_none());
    assert!(matches!(driver.delete(&ids[1]).await, Err(Error::NotFound { .. })));
}

async fn check_window(driver: &dyn Driver) {
    register_fields(driver).await;
    let docs: Vec<_> = (0..7).map(|_| Document::new([("text", "same")])).collect();
    let ids = load(driver, &docs).await;
    let native = driver.translate(&Query::term("same")).unwrap();

    let mut seen = Vec::new();
    for offset in (0..7).step_by(3) {
        let page = driver.search(&native, offset, 3).await.unwrap();
        assert_eq!(page.total, Some(7));
        seen.extend(page.hits.into_iter().map(|h| h.id));
    }
    assert_eq!(sorted(seen), sorted(ids));

    let counted = driver.search(&native, 0, 0).await.unwrap();
    assert!(counted.is_empty());
    assert_eq!(counted.total, Some(7));
    assert!(driver.search(&native, 50, 10).await.unwrap().is_empty());
}

macro_rules! conformance {
    ($module:ident, $make:expr) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn test_basic_scenario() {
                let (driver, _guard) = $make;
                check_basic_scenario(&driver).await;
            }

            #[tokio::test]
            async fn test_boolean_operators() {
                let (driver, _guard) = $make;
                check_boolean_operators(&driver).await;
            }

            #[tokio::test]
            async fn test_weight() {
                let (driver, _guard) = $make;
                check_weight(&driver).await;
            }

            #[tokio::test]
            async fn test_listing_and_destroy() {
                let (driver, _guard) = $make;
                check_listing_and_destroy(&driver).await;
            }

            #[tokio::test]
            async fn test_field_kinds() {
                let (driver, _guard) = $make;
                check_field_kinds(&driver).await;
            }

            #[tokio::test]
            async fn test_unknown_field() {
                let (driver, _guard) = $make;
                check_unknown_field(&driver).await;
            }

            #[tokio::test]
            async fn test_update_and_delete() {
                let (driver, _guard) = $make;
                check_update_and_delete(&driver).await;
            }

            #[tokio::test]
            async fn test_window() {
                let (driver, _guard) = $make;
                check_window(&driver).await;
            }
        }
    };
}

conformance!(memory, (MemoryDriver::open(&BackendOptions::default()).unwrap(), ()));

#[cfg(feature = "driver-tantivy")]
conformance!(tantivy, {
    let dir = tempfile::TempDir::new().unwrap();
    let driver =
        multisearch_drivers::TantivyDriver::open(&BackendOptions::with_path(dir.path())).unwrap();
    (driver, dir)
});
