//! Error types for Multisearch.
//!
//! Every failure the abstraction layer can surface is a variant of [`Error`].
//! Drivers map their native errors into this taxonomy at the driver boundary,
//! so callers never have to match on backend-specific error types.

use std::path::Path;

/// Errors that can occur in Multisearch operations.
///
/// All variants are surfaced synchronously from the call that caused them.
/// The abstraction layer never retries.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A schema change is forbidden by the backend's mutability tier.
    #[error("Schema conflict on field '{field}': {message}")]
    SchemaConflict {
        /// Field whose registration was refused
        field: String,
        /// Why the change was refused
        message: String,
    },

    /// A document carried a field the schema does not know, under the
    /// `Reject` policy.
    #[error("Unknown field: {field}")]
    UnknownField {
        /// The unregistered field name
        field: String,
    },

    /// The query uses an operator the backend does not advertise.
    #[error("Unsupported query node '{node}' for backend '{backend}'")]
    UnsupportedQuery {
        /// Rendering of the offending node
        node: String,
        /// Backend that lacks the operator
        backend: String,
    },

    /// A configuration option is not recognized by the selected driver.
    #[error("Unsupported option '{option}' for backend '{backend}'")]
    UnsupportedOption {
        /// Option name
        option: String,
        /// Backend that rejected it
        backend: String,
    },

    /// No driver is registered under the requested backend type.
    #[error("Unknown backend type: {backend}")]
    UnknownBackend {
        /// The requested backend type
        backend: String,
    },

    /// A write was attempted through a client opened readonly.
    #[error("Read-only violation: {operation} is not allowed on a readonly client")]
    ReadOnlyViolation {
        /// The refused operation
        operation: String,
    },

    /// Another writer already holds the store.
    #[error("Exclusive writer lock already held for store '{store}'")]
    ExclusiveLockHeld {
        /// Identity of the locked store
        store: String,
    },

    /// The backend failed to index a document.
    #[error("Index error: {message}")]
    Index {
        /// Human-readable error message
        message: String,
        /// Source error if available
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The backend failed to execute a query.
    #[error("Query error: {message}")]
    Query {
        /// Human-readable error message
        message: String,
        /// Source error if available
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A document id does not exist.
    #[error("Document not found: {id}")]
    NotFound {
        /// The missing document id
        id: String,
    },

    /// A document id already exists and the caller asked to fail on that.
    #[error("Document already exists: {id}")]
    DocumentExists {
        /// The conflicting document id
        id: String,
    },

    /// A network-backed driver gave up waiting.
    #[error("Driver '{backend}' timed out after {millis}ms")]
    DriverTimeout {
        /// Backend that timed out
        backend: String,
        /// Timeout that elapsed, in milliseconds
        millis: u64,
    },

    /// An operation was attempted on a closed client.
    #[error("Client is closed")]
    ClientClosed,

    /// Configuration could not be parsed or is inconsistent.
    #[error("Configuration error: {message}")]
    Config {
        /// What configuration is problematic
        message: String,
    },

    /// I/O error (file operations, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience `Result` type alias for Multisearch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns whether this error is transient.
    ///
    /// Nothing in the abstraction layer acts on this; it is exposed so callers
    /// and drivers can apply their own retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DriverTimeout { .. } | Error::Io(_) | Error::ExclusiveLockHeld { .. }
        )
    }

    /// Creates a new schema conflict error.
    pub fn schema_conflict<F, M>(field: F, message: M) -> Self
    where
        F: Into<String>,
        M: Into<String>,
    {
        Error::SchemaConflict {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a new unknown field error.
    pub fn unknown_field<S: Into<String>>(field: S) -> Self {
        Error::UnknownField {
            field: field.into(),
        }
    }

    /// Creates a new unsupported query error.
    pub fn unsupported_query<N, B>(node: N, backend: B) -> Self
    where
        N: Into<String>,
        B: Into<String>,
    {
        Error::UnsupportedQuery {
            node: node.into(),
            backend: backend.into(),
        }
    }

    /// Creates a new unsupported option error.
    pub fn unsupported_option<O, B>(option: O, backend: B) -> Self
    where
        O: Into<String>,
        B: Into<String>,
    {
        Error::UnsupportedOption {
            option: option.into(),
            backend: backend.into(),
        }
    }

    /// Creates a new read-only violation error.
    pub fn read_only<S: Into<String>>(operation: S) -> Self {
        Error::ReadOnlyViolation {
            operation: operation.into(),
        }
    }

    /// Creates a new index error.
    pub fn index<S: Into<String>>(message: S) -> Self {
        Error::Index {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new index error with a source error.
    pub fn index_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Index {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new query error.
    pub fn query<S: Into<String>>(message: S) -> Self {
        Error::Query {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new query error with a source error.
    pub fn query_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Query {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new not found error.
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Error::NotFound { id: id.into() }
    }

    /// Creates a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Creates an I/O error annotated with the path that caused it.
    pub fn io_with_path(err: std::io::Error, path: &Path) -> Self {
        Error::Io(std::io::Error::new(
            err.kind(),
            format!("{}: {err}", path.display()),
        ))
    }
}
