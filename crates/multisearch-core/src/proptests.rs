//! Property-based tests for the query algebra and schema registry.
