//! Schema model and registry.
//!
//! A [`Schema`] maps field names to [`FieldConfig`]. The [`SchemaRegistry`]
//! owns the live schema of one client and enforces the backend's mutability
//! tier:
//!
//! | Tier | New field | Changed config |
//! |------|-----------|----------------|
//! | `Fixed` | until the first document is indexed | until the first document is indexed |
//! | `AppendOnly` | always | never |
//! | `Mutable` | always | always |
//!
//! Re-registering a field with an identical config is a no-op in every tier.
//!
//! # Concurrency
//!
//! Readers take an `Arc<Schema>` snapshot and never block on writers for
//! longer than a pointer clone. Mutations (`register`, guessing) are
//! serialized under a single mutation lock and publish a new snapshot
//! atomically, bumping [`SchemaRegistry::generation`].
//!
//! # Unknown fields
//!
//! When a document carries a field the schema does not know, the client's
//! [`UnknownFieldPolicy`] decides what happens. `Guess` calls the injected
//! guess function `(field name, sample value) -> FieldConfig`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::SchemaTier;
use crate::document::{Document, Value};
use crate::error::{Error, Result};

/// Serialized schema format version.
///
/// Persisted schemas with a different version are refused.
pub const SCHEMA_FORMAT_VERSION: u32 = 1;

// ============================================================================
// FieldConfig
// ============================================================================

/// How a field's values are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Words, tokenized by the backend's analyzer.
    FreeText,
    /// The whole value, matched literally.
    ExactMatch,
    /// A number.
    Numeric,
    /// A UTC timestamp.
    Date,
    /// Accepted but never indexed or stored.
    Ignored,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeText => write!(f, "free-text"),
            Self::ExactMatch => write!(f, "exact-match"),
            Self::Numeric => write!(f, "numeric"),
            Self::Date => write!(f, "date"),
            Self::Ignored => write!(f, "ignored"),
        }
    }
}

/// Configuration of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Processing kind.
    pub kind: FieldKind,
    /// Whether values are searchable.
    pub indexed: bool,
    /// Whether values are returned with search hits.
    pub stored: bool,
}

impl FieldConfig {
    /// Indexed and stored free text.
    pub fn free_text() -> Self {
        Self::of(FieldKind::FreeText)
    }

    /// Indexed and stored exact-match value.
    pub fn exact_match() -> Self {
        Self::of(FieldKind::ExactMatch)
    }

    /// Indexed and stored number.
    pub fn numeric() -> Self {
        Self::of(FieldKind::Numeric)
    }

    /// Indexed and stored timestamp.
    pub fn date() -> Self {
        Self::of(FieldKind::Date)
    }

    /// A field that is accepted and discarded.
    pub fn ignored() -> Self {
        Self {
            kind: FieldKind::Ignored,
            indexed: false,
            stored: false,
        }
    }

    fn of(kind: FieldKind) -> Self {
        Self {
            kind,
            indexed: true,
            stored: true,
        }
    }

    /// Set whether the field is indexed.
    pub fn with_indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    /// Set whether the field is stored.
    pub fn with_stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    /// Whether the field contributes nothing to the backend.
    pub fn is_discarded(&self) -> bool {
        self.kind == FieldKind::Ignored || (!self.indexed && !self.stored)
    }

    /// Convert a raw value into the form this field indexes.
    ///
    /// Returns `Ok(None)` for ignored fields. Text is accepted for numeric and
    /// date fields when it parses (plain decimal, RFC 3339).
    pub fn coerce(&self, field: &str, value: &Value) -> Result<Option<IndexValue>> {
        let coerced = match self.kind {
            FieldKind::Ignored => return Ok(None),
            FieldKind::FreeText | FieldKind::ExactMatch => IndexValue::Text(value.to_text()),
            FieldKind::Numeric => match value {
                Value::Number(n) => IndexValue::Number(*n),
                Value::Text(s) => s.trim().parse::<f64>().map(IndexValue::Number).map_err(|_| {
                    Error::index(format!("field '{field}' expects a number, got '{s}'"))
                })?,
                other => {
                    return Err(Error::index(format!(
                        "field '{field}' expects a number, got a {} value",
                        other.kind()
                    )));
                }
            },
            FieldKind::Date => match value {
                Value::DateTime(dt) => IndexValue::Date(*dt),
                Value::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                    .map(|dt| IndexValue::Date(dt.with_timezone(&Utc)))
                    .map_err(|_| {
                        Error::index(format!("field '{field}' expects a timestamp, got '{s}'"))
                    })?,
                other => {
                    return Err(Error::index(format!(
                        "field '{field}' expects a timestamp, got a {} value",
                        other.kind()
                    )));
                }
            },
        };
        Ok(Some(coerced))
    }
}

/// A value after coercion to its field's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    /// Text for free-text and exact-match fields.
    Text(String),
    /// Number for numeric fields.
    Number(f64),
    /// Timestamp for date fields.
    Date(DateTime<Utc>),
}

// ============================================================================
// Schema
// ============================================================================

/// Mapping from field name to configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, FieldConfig>,
}

#[derive(Serialize, Deserialize)]
struct PersistedSchema {
    format_version: u32,
    fields: BTreeMap<String, FieldConfig>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a field.
    pub fn get(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.get(name)
    }

    /// Whether a field is known.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Set a field's configuration, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, config: FieldConfig) {
        self.fields.insert(name.into(), config);
    }

    /// Iterate fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldConfig)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize with the format version envelope.
    pub fn to_json(&self) -> Result<String> {
        let persisted = PersistedSchema {
            format_version: SCHEMA_FORMAT_VERSION,
            fields: self.fields.clone(),
        };
        Ok(serde_json::to_string(&persisted)?)
    }

    /// Parse a schema written by [`to_json`](Self::to_json).
    ///
    /// An empty string yields an empty schema.
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::new());
        }
        let persisted: PersistedSchema = serde_json::from_str(json)?;
        if persisted.format_version != SCHEMA_FORMAT_VERSION {
            return Err(Error::config(format!(
                "unsupported schema format version {} (expected {SCHEMA_FORMAT_VERSION})",
                persisted.format_version
            )));
        }
        Ok(Self {
            fields: persisted.fields,
        })
    }
}

impl FromIterator<(String, FieldConfig)> for Schema {
    fn from_iter<I: IntoIterator<Item = (String, FieldConfig)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Unknown-field policy and guessing
// ============================================================================

/// What to do with a field the schema does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFieldPolicy {
    /// Drop the field silently (counted).
    Ignore,
    /// Drop the field and log a warning (counted).
    IgnoreWarn,
    /// Fail the whole document with `UnknownField`.
    Reject,
    /// Synthesize a config with the guess function and register it.
    #[default]
    Guess,
}

/// Pluggable field guesser: `(field name, sample value) -> FieldConfig`.
pub type GuessFn = Arc<dyn Fn(&str, &Value) -> FieldConfig + Send + Sync>;

/// Guess free text for every field.
pub fn guess_free_text(_field: &str, _sample: &Value) -> FieldConfig {
    FieldConfig::free_text()
}

/// Guess from the sample value: numbers become numeric fields, datetimes
/// become date fields, everything else free text.
pub fn guess_by_value(_field: &str, sample: &Value) -> FieldConfig {
    match sample {
        Value::Number(_) => FieldConfig::numeric(),
        Value::DateTime(_) => FieldConfig::date(),
        _ => FieldConfig::free_text(),
    }
}

/// Outcome of resolving one field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Index the field with this config.
    Field(FieldConfig),
    /// Drop the field from the document.
    Drop,
}

/// Dry-run resolution of every field of one document.
#[derive(Debug, Clone, Default)]
pub struct DocumentPlan {
    /// Resolution per distinct field name.
    pub fields: BTreeMap<String, Resolution>,
    /// Guessed fields that must be registered before indexing.
    pub new_fields: Vec<(String, FieldConfig)>,
    /// Number of fields dropped by an ignore policy.
    pub ignored: usize,
}

// ============================================================================
// SchemaRegistry
// ============================================================================

enum Change {
    Insert,
    Replace,
    Noop,
}

/// Live schema of one client, guarded by the backend's mutability tier.
pub struct SchemaRegistry {
    tier: SchemaTier,
    current: RwLock<Arc<Schema>>,
    frozen: Mutex<bool>,
    generation: AtomicU64,
    guesser: GuessFn,
}

impl SchemaRegistry {
    /// Create a registry seeded with `schema`.
    ///
    /// `frozen` marks a `Fixed`-tier store that already holds documents.
    pub fn new(tier: SchemaTier, schema: Schema, frozen: bool) -> Self {
        Self {
            tier,
            current: RwLock::new(Arc::new(schema)),
            frozen: Mutex::new(frozen),
            generation: AtomicU64::new(0),
            guesser: Arc::new(guess_free_text),
        }
    }

    /// Replace the guess function.
    pub fn with_guesser(mut self, guesser: GuessFn) -> Self {
        self.guesser = guesser;
        self
    }

    /// The mutability tier being enforced.
    pub fn tier(&self) -> SchemaTier {
        self.tier
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<Schema> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Counter bumped by every published mutation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether a `Fixed`-tier schema has been frozen.
    pub fn is_frozen(&self) -> bool {
        *self.frozen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a field.
    pub fn resolve(&self, name: &str) -> Option<FieldConfig> {
        self.snapshot().get(name).copied()
    }

    /// Register one field.
    ///
    /// # Errors
    ///
    /// `SchemaConflict` when the tier forbids the change.
    pub fn register(&self, name: &str, config: FieldConfig) -> Result<()> {
        self.register_all(&[(name.to_string(), config)])
    }

    /// Register several fields atomically: either all are published or none.
    pub fn register_all(&self, entries: &[(String, FieldConfig)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let frozen = self.frozen.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(next) = self.stage(*frozen, entries)? {
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
            self.generation.fetch_add(1, Ordering::AcqRel);
            log::debug!("Schema updated: {} field(s) registered", entries.len());
        }
        Ok(())
    }

    /// Check `entries` against the tier without publishing anything.
    ///
    /// Used to validate a change before handing it to a driver, so that the
    /// registry only ever holds what the driver accepted.
    pub fn check_all(&self, entries: &[(String, FieldConfig)]) -> Result<()> {
        let frozen = self.frozen.lock().unwrap_or_else(PoisonError::into_inner);
        self.stage(*frozen, entries).map(|_| ())
    }

    /// The schema `entries` would produce, or `None` when nothing changes.
    fn stage(&self, frozen: bool, entries: &[(String, FieldConfig)]) -> Result<Option<Schema>> {
        let mut next = (*self.snapshot()).clone();
        let mut changed = false;
        for (name, config) in entries {
            match self.check(&next, frozen, name, config)? {
                Change::Noop => {}
                Change::Insert | Change::Replace => {
                    next.insert(name.clone(), *config);
                    changed = true;
                }
            }
        }
        Ok(changed.then_some(next))
    }

    fn check(&self, schema: &Schema, frozen: bool, name: &str, config: &FieldConfig) -> Result<Change> {
        let existing = schema.get(name);
        if existing == Some(config) {
            return Ok(Change::Noop);
        }
        match self.tier {
            SchemaTier::Fixed if frozen => Err(Error::schema_conflict(
                name,
                "schema is fixed once documents have been indexed",
            )),
            SchemaTier::AppendOnly if existing.is_some() => Err(Error::schema_conflict(
                name,
                "existing field configuration cannot change on an append-only schema",
            )),
            _ if existing.is_some() => Ok(Change::Replace),
            _ => Ok(Change::Insert),
        }
    }

    /// Resolve a field, applying `policy` when it is unknown.
    ///
    /// Under `Guess` the synthesized config is registered before this returns.
    pub fn resolve_or_apply(
        &self,
        name: &str,
        sample: &Value,
        policy: UnknownFieldPolicy,
    ) -> Result<Resolution> {
        if let Some(config) = self.resolve(name) {
            return Ok(Resolution::Field(config));
        }
        match policy {
            UnknownFieldPolicy::Ignore => Ok(Resolution::Drop),
            UnknownFieldPolicy::IgnoreWarn => {
                log::warn!("Ignoring unknown field '{name}'");
                Ok(Resolution::Drop)
            }
            UnknownFieldPolicy::Reject => Err(Error::unknown_field(name)),
            UnknownFieldPolicy::Guess => {
                let config = (self.guesser)(name, sample);
                self.register(name, config)?;
                Ok(Resolution::Field(config))
            }
        }
    }

    /// Resolve every field of `doc` without mutating the registry.
    ///
    /// Guessed configs are returned in [`DocumentPlan::new_fields`] for the
    /// caller to publish with [`register_all`](Self::register_all).
    pub fn plan(&self, doc: &Document, policy: UnknownFieldPolicy) -> Result<DocumentPlan> {
        let schema = self.snapshot();
        let mut plan = DocumentPlan::default();
        for name in doc.field_names() {
            let resolution = match schema.get(name) {
                Some(config) => Resolution::Field(*config),
                None => match policy {
                    UnknownFieldPolicy::Ignore => Resolution::Drop,
                    UnknownFieldPolicy::IgnoreWarn => {
                        log::warn!("Ignoring unknown field '{name}'");
                        Resolution::Drop
                    }
                    UnknownFieldPolicy::Reject => return Err(Error::unknown_field(name)),
                    UnknownFieldPolicy::Guess => {
                        let sample = doc
                            .field_values(name)
                            .next()
                            .cloned()
                            .unwrap_or(Value::Text(String::new()));
                        let config = (self.guesser)(name, &sample);
                        plan.new_fields.push((name.to_string(), config));
                        Resolution::Field(config)
                    }
                },
            };
            if resolution == Resolution::Drop {
                plan.ignored += 1;
            }
            plan.fields.insert(name.to_string(), resolution);
        }
        Ok(plan)
    }

    /// Freeze a `Fixed`-tier schema. No effect on other tiers.
    pub fn freeze(&self) {
        if self.tier == SchemaTier::Fixed {
            let mut frozen = self.frozen.lock().unwrap_or_else(PoisonError::into_inner);
            if !*frozen {
                log::debug!("Freezing fixed schema");
                *frozen = true;
            }
        }
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("tier", &self.tier)
            .field("fields", &self.snapshot().len())
            .field("generation", &self.generation())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::capability::ReindexLatency;

    fn registry(tier: SchemaTier) -> SchemaRegistry {
        SchemaRegistry::new(tier, Schema::new(), false)
    }

    #[test]
    fn test_resolve_unknown_is_none() {
        let reg = registry(SchemaTier::AppendOnly);
        assert!(reg.resolve("title").is_none());
    }

    #[test]
    fn test_fixed_tier_allows_changes_until_frozen() {
        let reg = registry(SchemaTier::Fixed);
        reg.register("title", FieldConfig::free_text()).unwrap();
        reg.register("title", FieldConfig::exact_match()).unwrap();
        reg.freeze();

        let err = reg.register("body", FieldConfig::free_text()).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { ref field, .. } if field == "body"));
        // Identical re-registration stays a no-op.
        reg.register("title", FieldConfig::exact_match()).unwrap();
    }

    #[test]
    fn test_append_only_refuses_changes() {
        let reg = registry(SchemaTier::AppendOnly);
        reg.register("title", FieldConfig::free_text()).unwrap();
        reg.register("title", FieldConfig::free_text()).unwrap();
        let err = reg.register("title", FieldConfig::numeric()).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));
        reg.register("body", FieldConfig::free_text()).unwrap();
        assert_eq!(reg.snapshot().len(), 2);
    }

    #[test]
    fn test_mutable_allows_replacement() {
        let reg = registry(SchemaTier::Mutable(ReindexLatency::Eventual));
        reg.register("price", FieldConfig::free_text()).unwrap();
        reg.register("price", FieldConfig::numeric()).unwrap();
        assert_eq!(reg.resolve("price"), Some(FieldConfig::numeric()));
    }

    #[test]
    fn test_register_all_is_all_or_nothing() {
        let reg = registry(SchemaTier::AppendOnly);
        reg.register("a", FieldConfig::free_text()).unwrap();
        let before = reg.generation();

        let entries = vec![
            ("b".to_string(), FieldConfig::free_text()),
            ("a".to_string(), FieldConfig::numeric()),
        ];
        assert!(reg.register_all(&entries).is_err());
        assert!(reg.resolve("b").is_none());
        assert_eq!(reg.generation(), before);
    }

    #[test]
    fn test_check_all_publishes_nothing() {
        let reg = registry(SchemaTier::AppendOnly);
        reg.register("a", FieldConfig::free_text()).unwrap();
        let before = reg.generation();

        reg.check_all(&[("b".to_string(), FieldConfig::free_text())]).unwrap();
        assert!(reg.resolve("b").is_none());
        assert_eq!(reg.generation(), before);

        let conflict = [("a".to_string(), FieldConfig::numeric())];
        assert!(matches!(reg.check_all(&conflict), Err(Error::SchemaConflict { .. })));
    }

    #[test]
    fn test_generation_bumps_only_on_change() {
        let reg = registry(SchemaTier::AppendOnly);
        reg.register("a", FieldConfig::free_text()).unwrap();
        let generation = reg.generation();
        reg.register("a", FieldConfig::free_text()).unwrap();
        assert_eq!(reg.generation(), generation);
    }

    #[test]
    fn test_resolve_or_apply_policies() {
        let reg = registry(SchemaTier::AppendOnly);
        let sample = Value::from("x");

        assert_eq!(
            reg.resolve_or_apply("a", &sample, UnknownFieldPolicy::Ignore).unwrap(),
            Resolution::Drop
        );
        assert!(matches!(
            reg.resolve_or_apply("a", &sample, UnknownFieldPolicy::Reject),
            Err(Error::UnknownField { .. })
        ));
        assert!(reg.resolve("a").is_none());

        let resolved = reg
            .resolve_or_apply("a", &sample, UnknownFieldPolicy::Guess)
            .unwrap();
        assert_eq!(resolved, Resolution::Field(FieldConfig::free_text()));
        assert_eq!(reg.resolve("a"), Some(FieldConfig::free_text()));
    }

    #[test]
    fn test_injected_guesser() {
        let reg = registry(SchemaTier::AppendOnly).with_guesser(Arc::new(guess_by_value));
        reg.resolve_or_apply("n", &Value::from(4), UnknownFieldPolicy::Guess)
            .unwrap();
        assert_eq!(reg.resolve("n").map(|c| c.kind), Some(FieldKind::Numeric));
    }

    #[test]
    fn test_plan_does_not_mutate() {
        let reg = registry(SchemaTier::AppendOnly);
        reg.register("title", FieldConfig::free_text()).unwrap();
        let doc = Document::new([("title", "t"), ("body", "b")]);

        let plan = reg.plan(&doc, UnknownFieldPolicy::Guess).unwrap();
        assert_eq!(plan.new_fields.len(), 1);
        assert_eq!(plan.new_fields[0].0, "body");
        assert!(reg.resolve("body").is_none());

        let err = reg.plan(&doc, UnknownFieldPolicy::Reject).unwrap_err();
        assert!(matches!(err, Error::UnknownField { ref field } if field == "body"));

        let plan = reg.plan(&doc, UnknownFieldPolicy::Ignore).unwrap();
        assert_eq!(plan.ignored, 1);
        assert_eq!(plan.fields.get("body"), Some(&Resolution::Drop));
    }

    #[test]
    fn test_coerce_values() {
        let numeric = FieldConfig::numeric();
        assert_eq!(
            numeric.coerce("n", &Value::from("2.5")).unwrap(),
            Some(IndexValue::Number(2.5))
        );
        assert!(numeric.coerce("n", &Value::from("abc")).is_err());

        let date = FieldConfig::date();
        assert!(matches!(
            date.coerce("d", &Value::from("2010-01-02T03:04:05Z")).unwrap(),
            Some(IndexValue::Date(_))
        ));
        assert!(date.coerce("d", &Value::from(3)).is_err());

        assert_eq!(FieldConfig::ignored().coerce("x", &Value::from("a")).unwrap(), None);
        assert_eq!(
            FieldConfig::free_text().coerce("t", &Value::from(3)).unwrap(),
            Some(IndexValue::Text("3".to_string()))
        );
    }

    #[test]
    fn test_schema_json_roundtrip_and_version_check() {
        let mut schema = Schema::new();
        schema.insert("title", FieldConfig::free_text());
        schema.insert("tag", FieldConfig::exact_match().with_stored(false));
        let json = schema.to_json().unwrap();
        assert_eq!(Schema::from_json(&json).unwrap(), schema);
        assert!(Schema::from_json("").unwrap().is_empty());

        let bad = r#"{"format_version": 99, "fields": {}}"#;
        assert!(matches!(Schema::from_json(bad), Err(Error::Config { .. })));
    }

    #[test]
    fn test_concurrent_guessing_is_atomic() {
        let reg = Arc::new(registry(SchemaTier::AppendOnly));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    reg.resolve_or_apply("shared", &Value::from("x"), UnknownFieldPolicy::Guess)
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert_eq!(reg.snapshot().len(), 1);
        assert_eq!(reg.generation(), 1);
    }
}
