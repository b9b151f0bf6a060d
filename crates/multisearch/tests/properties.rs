//! Set laws of query results over randomly generated corpora.

#![allow(clippy::unwrap_used)]

mod common;

use std::collections::HashSet;

use multisearch::{DocId, Document, Query, SearchClient, UnknownFieldPolicy};
use proptest::prelude::*;

use common::{memory_client, search_ids};

const VOCABULARY: &[&str] = &["alpha", "beta", "gamma", "delta", "omega"];

fn word() -> impl Strategy<Value = &'static str> {
    prop::sample::select(VOCABULARY)
}

fn corpus() -> impl Strategy<Value = Vec<Vec<&'static str>>> {
    prop::collection::vec(prop::collection::vec(word(), 1..4), 1..12)
}

/// Add `docs` to `client`, committing once at the end.
async fn load(client: &SearchClient, docs: &[Vec<&str>]) -> Vec<DocId> {
    let mut ids = Vec::new();
    for words in docs {
        let doc = Document::new([("text", words.join(" "))]);
        ids.push(client.add(&doc).await.unwrap());
    }
    client.commit().await.unwrap();
    ids
}

async fn id_set(client: &SearchClient, query: &Query) -> HashSet<DocId> {
    search_ids(client, query).await.into_iter().collect()
}

async fn check_and_within_or(client: &SearchClient, a: &str, b: &str) {
    let both = id_set(client, &(client.query(a) & client.query(b))).await;
    let either = id_set(client, &(client.query(a) | client.query(b))).await;
    let only_a = id_set(client, &client.query(a)).await;

    assert!(both.is_subset(&either));
    assert!(both.is_subset(&only_a));
    assert!(only_a.is_subset(&either));
}

async fn check_not_excludes_negative(client: &SearchClient, a: &str, b: &str) {
    let excluded = id_set(client, &(client.query(a) - client.query(b))).await;
    let negative = id_set(client, &client.query(b)).await;
    let positive = id_set(client, &client.query(a)).await;

    assert!(excluded.is_disjoint(&negative));
    assert!(excluded.is_subset(&positive));
    assert_eq!(excluded.len() + positive.intersection(&negative).count(), positive.len());
}

async fn check_xor_is_symmetric_difference(client: &SearchClient, a: &str, b: &str) {
    let one = id_set(client, &(client.query(a) ^ client.query(b))).await;
    let first = id_set(client, &client.query(a)).await;
    let second = id_set(client, &client.query(b)).await;

    let expected: HashSet<DocId> = first.symmetric_difference(&second).cloned().collect();
    assert_eq!(one, expected);
}

async fn check_weight_keeps_matches(client: &SearchClient, a: &str) {
    let plain = id_set(client, &client.query(a)).await;
    let weighted = id_set(client, &(client.query(a) * 4.0)).await;
    assert_eq!(plain, weighted);
}

async fn check_found_by_words(client: &SearchClient, docs: &[Vec<&str>], ids: &[DocId]) {
    for (words, id) in docs.iter().zip(ids) {
        for word in words {
            let found = id_set(client, &client.query(word)).await;
            assert!(found.contains(id), "{id} not found by '{word}'");
        }
    }
    assert_eq!(client.document_count().await.unwrap(), docs.len());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_and_is_within_or(docs in corpus(), a in word(), b in word()) {
        tokio_test::block_on(async {
            let client = memory_client(UnknownFieldPolicy::Guess).await;
            load(&client, &docs).await;
            check_and_within_or(&client, a, b).await;
        });
    }

    #[test]
    fn test_not_excludes_negative(docs in corpus(), a in word(), b in word()) {
        tokio_test::block_on(async {
            let client = memory_client(UnknownFieldPolicy::Guess).await;
            load(&client, &docs).await;
            check_not_excludes_negative(&client, a, b).await;
        });
    }

    #[test]
    fn test_xor_is_symmetric_difference(docs in corpus(), a in word(), b in word()) {
        tokio_test::block_on(async {
            let client = memory_client(UnknownFieldPolicy::Guess).await;
            load(&client, &docs).await;
            check_xor_is_symmetric_difference(&client, a, b).await;
            check_weight_keeps_matches(&client, a).await;
        });
    }

    #[test]
    fn test_every_document_found_by_its_words(docs in corpus()) {
        tokio_test::block_on(async {
            let client = memory_client(UnknownFieldPolicy::Guess).await;
            let ids = load(&client, &docs).await;
            check_found_by_words(&client, &docs, &ids).await;
        });
    }
}

#[cfg(feature = "driver-tantivy")]
mod tantivy_backend {
    use super::*;
    use common::tantivy_client;
    use tempfile::TempDir;

    // Each case builds an index on disk.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn test_set_laws_hold(docs in corpus(), a in word(), b in word()) {
            tokio_test::block_on(async {
                let dir = TempDir::new().unwrap();
                let client = tantivy_client(dir.path()).await;
                let ids = load(&client, &docs).await;

                check_and_within_or(&client, a, b).await;
                check_not_excludes_negative(&client, a, b).await;
                check_xor_is_symmetric_difference(&client, a, b).await;
                check_weight_keeps_matches(&client, a).await;
                check_found_by_words(&client, &docs, &ids).await;
                client.close().await.unwrap();
            });
        }
    }
}
