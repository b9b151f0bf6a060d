//! Client configuration.
//!
//! A [`ClientConfig`] names the backend (`type`) and carries the options its
//! driver recognizes, plus facade settings. It loads from TOML or JSON:
//!
//! ```toml
//! type = "tantivy"
//! path = "/var/lib/myapp/index"
//! unknown_fields = "reject"
//! page_size = 50
//! ```
//!
//! Unknown keys are rejected when parsing. Keys the selected driver does not
//! recognize are rejected with `UnsupportedOption` when the client opens.

use std::path::{Path, PathBuf};

use multisearch_core::{Error, Result, UnknownFieldPolicy};
use multisearch_drivers::BackendOptions;
use serde::{Deserialize, Serialize};

/// Default number of hits fetched per driver call.
pub const DEFAULT_PAGE_SIZE: usize = 20;

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Settings for opening a [`SearchClient`](crate::SearchClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Backend type, e.g. `memory`, `tantivy`, `redis`.
    #[serde(rename = "type")]
    pub backend: String,

    /// Storage directory (disk-based drivers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Server host (networked drivers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Server port (networked drivers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Key namespace (networked drivers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Per-call timeout in milliseconds (networked drivers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Indexing memory budget in bytes (disk-based drivers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer_memory_bytes: Option<usize>,

    /// Open without write access.
    #[serde(default)]
    pub readonly: bool,

    /// Handling of fields the schema does not know.
    #[serde(default)]
    pub unknown_fields: UnknownFieldPolicy,

    /// Hits fetched per driver call while iterating results.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl ClientConfig {
    /// Configuration for `backend` with every option unset.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            path: None,
            host: None,
            port: None,
            prefix: None,
            timeout_ms: None,
            writer_memory_bytes: None,
            readonly: false,
            unknown_fields: UnknownFieldPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the storage directory.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Open readonly.
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Set the unknown-field policy.
    pub fn with_unknown_fields(mut self, policy: UnknownFieldPolicy) -> Self {
        self.unknown_fields = policy;
        self
    }

    /// Set the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Parse TOML.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| Error::config(format!("invalid TOML config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse JSON.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| Error::config(format!("invalid JSON config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are read as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io_with_path(e, path))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.backend.trim().is_empty() {
            return Err(Error::config("'type' must name a backend"));
        }
        if self.page_size == 0 {
            return Err(Error::config("'page_size' must be at least 1"));
        }
        Ok(())
    }

    /// The driver options carried by this configuration.
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            path: self.path.clone(),
            host: self.host.clone(),
            port: self.port,
            prefix: self.prefix.clone(),
            timeout_ms: self.timeout_ms,
            writer_memory_bytes: self.writer_memory_bytes,
            readonly: self.readonly,
        }
    }
}
