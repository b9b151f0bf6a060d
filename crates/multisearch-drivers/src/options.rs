//! Driver construction options.
//!
//! [`BackendOptions`] carries every option a driver may recognize. Each driver
//! declares the subset it understands; setting anything else fails with
//! `UnsupportedOption` before the driver touches storage.

use std::path::PathBuf;

use multisearch_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Options passed to a driver constructor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOptions {
    /// Storage directory for disk-based drivers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Server host for networked drivers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Server port for networked drivers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Key namespace for networked drivers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Per-call timeout for networked drivers, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Indexing memory budget for disk-based drivers, in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer_memory_bytes: Option<usize>,

    /// Open without write access.
    #[serde(default)]
    pub readonly: bool,
}

impl BackendOptions {
    /// Options with only `path` set.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Names of the options that are set. `readonly` is always accepted and
    /// never listed.
    pub fn set_options(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.path.is_some() {
            set.push("path");
        }
        if self.host.is_some() {
            set.push("host");
        }
        if self.port.is_some() {
            set.push("port");
        }
        if self.prefix.is_some() {
            set.push("prefix");
        }
        if self.timeout_ms.is_some() {
            set.push("timeout_ms");
        }
        if self.writer_memory_bytes.is_some() {
            set.push("writer_memory_bytes");
        }
        set
    }

    /// Fail with `UnsupportedOption` for the first set option not in
    /// `recognized`.
    pub fn ensure_recognized(&self, backend: &str, recognized: &[&str]) -> Result<()> {
        match self
            .set_options()
            .into_iter()
            .find(|option| !recognized.contains(option))
        {
            Some(option) => Err(Error::unsupported_option(option, backend)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sets_nothing() {
        assert!(BackendOptions::default().set_options().is_empty());
    }

    #[test]
    fn test_ensure_recognized() {
        let options = BackendOptions {
            host: Some("localhost".to_string()),
            path: Some(PathBuf::from("/tmp/x")),
            ..BackendOptions::default()
        };
        options.ensure_recognized("net", &["host", "path"]).unwrap();

        let err = options.ensure_recognized("net", &["host"]).unwrap_err();
        let Error::UnsupportedOption { option, backend } = err else {
            unreachable!("Expected UnsupportedOption");
        };
        assert_eq!(option, "path");
        assert_eq!(backend, "net");
    }

    #[test]
    fn test_readonly_always_accepted() {
        let options = BackendOptions {
            readonly: true,
            ..BackendOptions::default()
        };
        assert!(options.ensure_recognized("mem", &[]).is_ok());
    }
}
