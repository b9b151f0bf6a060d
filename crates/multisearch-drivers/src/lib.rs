#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Backend drivers for Multisearch.
//!
//! Each driver implements [`multisearch_core::Driver`] for one search engine.
//!
//! # Features
//!
//! - `driver-tantivy`: disk-based Tantivy driver (default)
//! - `driver-redis`: networked Redis driver
//!
//! The in-memory driver is always available.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    multisearch-drivers                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BackendOptions (per-driver recognized option sets)         │
//! │  analysis (tokenizing shared by scan and set drivers)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MemoryDriver   append-only, scan, visible at call          │
//! │  TantivyDriver  fixed, inverted index, visible at commit    │
//! │  RedisDriver    mutable, set algebra, visible at call       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod analysis;
pub mod memory;
pub mod options;

#[cfg(feature = "driver-tantivy")]
pub mod tantivy_driver;

#[cfg(feature = "driver-redis")]
pub mod redis_driver;

// Re-exports
pub use memory::{MemoryDriver, MemoryQuery};
pub use options::BackendOptions;

#[cfg(feature = "driver-tantivy")]
pub use tantivy_driver::TantivyDriver;

#[cfg(feature = "driver-redis")]
pub use redis_driver::RedisDriver;
