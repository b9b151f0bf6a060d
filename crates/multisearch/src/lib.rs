#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Multisearch: one search client over interchangeable search engines.
//!
//! A [`SearchClient`] indexes documents and runs boolean text queries against
//! whichever backend it was opened on. Backends differ in what they support
//! and when writes become visible; each publishes a
//! [`Capabilities`] descriptor and the client follows it rather than the
//! backend's identity.
//!
//! # Example
//!
//! ```rust,no_run
//! use multisearch::{BackendOptions, Document, SearchClient};
//!
//! # async fn example() -> multisearch::Result<()> {
//! let client = SearchClient::open("tantivy", BackendOptions::with_path("/tmp/index")).await?;
//! let id = client
//!     .add(&Document::new([("title", "My first document"), ("text", "Hello")]))
//!     .await?;
//! client.commit().await?;
//!
//! let query = client.query_field("title", "first") & client.query("hello");
//! let hits = client.search(&query, 0, 10)?.collect_all().await?;
//! assert_eq!(hits[0].id, id);
//! # Ok(())
//! # }
//! ```
//!
//! # Backends
//!
//! | Type | Feature | Schema tier | Visibility |
//! |------|---------|-------------|------------|
//! | `memory` | always | append-only | at call |
//! | `tantivy` | `driver-tantivy` (default) | fixed | at commit |
//! | `redis` | `driver-redis` | mutable (eventual) | at call |
//!
//! Backend-specific operations stay reachable through
//! [`SearchClient::native_handle`].

pub mod client;
pub mod config;
pub mod registry;
pub mod results;

mod locks;

// Re-exports for convenience
pub use client::{ClientState, SearchClient};
pub use config::{ClientConfig, DEFAULT_PAGE_SIZE};
pub use registry::{DriverConstructor, DriverRegistry};
pub use results::{DocumentIterator, ResultIterator};

pub use multisearch_core::{
    Capabilities, DocId, Document, Driver, Error, FieldConfig, FieldKind, NativeQuery, Query,
    QueryOperator, Result, Schema, SchemaTier, SearchHit, StoredDocument, SyncPoint,
    UnknownFieldPolicy, UpdateMode, Value, ValueKind, guess_by_value, guess_free_text,
};
pub use multisearch_drivers::BackendOptions;
