//! Mapping from registered field configs to a Tantivy schema.
//!
//! Every index carries two reserved fields:
//!
//! - `_id`: document id (STRING | STORED)
//! - `_stored`: JSON of the document's stored fields (STORED only)
//!
//! Registered fields that are indexed become Tantivy fields of a matching
//! type. Stored values never go into those fields; they are read back from
//! `_stored`, which keeps every value kind exactly as the caller supplied it.
//!
//! The field configs themselves are persisted next to the index in a JSON
//! sidecar, since a Tantivy schema cannot express them (an ignored field, for
//! instance, has no Tantivy counterpart).
//!
//! # Tokenizer
//!
//! Free-text fields use the `multisearch_en` analyzer:
//! SimpleTokenizer → LowerCaser → Stemmer(English).

use std::collections::BTreeMap;
use std::path::Path;

use multisearch_core::{Error, FieldConfig, FieldKind, Result, Schema};
use tantivy::Index;
use tantivy::schema::{
    DateOptions, DateTimePrecision, Field, IndexRecordOption, NumericOptions,
    Schema as TantivySchema, SchemaBuilder, STORED, STRING, TextFieldIndexing, TextOptions,
};
use tantivy::tokenizer::{Language, LowerCaser, SimpleTokenizer, Stemmer, TextAnalyzer};

/// Reserved field holding the document id.
pub const ID_FIELD: &str = "_id";

/// Reserved field holding the stored fields as JSON.
pub const STORED_FIELD: &str = "_stored";

/// Name the free-text analyzer is registered under.
pub const ANALYZER: &str = "multisearch_en";

/// Field-config sidecar written next to the index.
pub const SIDECAR_FILE: &str = "multisearch-schema.json";

/// Whether `name` collides with a reserved field.
pub fn is_reserved(name: &str) -> bool {
    name == ID_FIELD || name == STORED_FIELD
}

/// The free-text analyzer.
pub fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(Stemmer::new(Language::English))
        .build()
}

/// Register the analyzer on an index.
pub fn register_tokenizers(index: &Index) {
    index.tokenizers().register(ANALYZER, analyzer());
}

/// Read the sidecar in `dir`, if there is one.
pub fn read_sidecar(dir: &Path) -> Result<Option<Schema>> {
    let path = dir.join(SIDECAR_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(&path).map_err(|e| Error::io_with_path(e, &path))?;
    Schema::from_json(&json).map(Some)
}

/// Write the sidecar into `dir`.
pub fn write_sidecar(dir: &Path, configs: &Schema) -> Result<()> {
    let path = dir.join(SIDECAR_FILE);
    std::fs::write(&path, configs.to_json()?).map_err(|e| Error::io_with_path(e, &path))
}

/// Registered fields resolved to Tantivy fields.
#[derive(Clone)]
pub struct FieldMap {
    schema: TantivySchema,
    id: Field,
    stored: Field,
    fields: BTreeMap<String, (Field, FieldConfig)>,
    configs: Schema,
}

impl FieldMap {
    /// Build a fresh Tantivy schema for `configs`.
    ///
    /// Fields are added in name order, so the same configs always give the
    /// same schema.
    pub fn build(configs: &Schema) -> Self {
        let mut builder = SchemaBuilder::new();
        let id = builder.add_text_field(ID_FIELD, STRING | STORED);
        let stored = builder.add_text_field(STORED_FIELD, STORED);

        let mut fields = BTreeMap::new();
        for (name, config) in configs.iter() {
            if !config.indexed {
                continue;
            }
            let field = match config.kind {
                FieldKind::FreeText => builder.add_text_field(name, free_text_options()),
                FieldKind::ExactMatch => builder.add_text_field(name, STRING),
                FieldKind::Numeric => {
                    builder.add_f64_field(name, NumericOptions::default().set_indexed())
                }
                FieldKind::Date => builder.add_date_field(
                    name,
                    DateOptions::default()
                        .set_indexed()
                        .set_precision(DateTimePrecision::Seconds),
                ),
                FieldKind::Ignored => continue,
            };
            fields.insert(name.to_string(), (field, *config));
        }

        Self {
            schema: builder.build(),
            id,
            stored,
            fields,
            configs: configs.clone(),
        }
    }

    /// Resolve `configs` against the schema of an existing index.
    ///
    /// # Errors
    ///
    /// `Config` when the index lacks a field the configs say is indexed.
    pub fn from_index(schema: TantivySchema, configs: &Schema) -> Result<Self> {
        let lookup = |name: &str| {
            schema.get_field(name).map_err(|e| {
                Error::config(format!("index has no field '{name}' ({e}); sidecar out of date"))
            })
        };
        let id = lookup(ID_FIELD)?;
        let stored = lookup(STORED_FIELD)?;
        let mut fields = BTreeMap::new();
        for (name, config) in configs.iter() {
            if config.indexed && config.kind != FieldKind::Ignored {
                fields.insert(name.to_string(), (lookup(name)?, *config));
            }
        }
        Ok(Self {
            schema,
            id,
            stored,
            fields,
            configs: configs.clone(),
        })
    }

    /// The Tantivy schema.
    pub fn schema(&self) -> &TantivySchema {
        &self.schema
    }

    /// The `_id` field.
    pub fn id(&self) -> Field {
        self.id
    }

    /// The `_stored` field.
    pub fn stored(&self) -> Field {
        self.stored
    }

    /// The registered configs.
    pub fn configs(&self) -> &Schema {
        &self.configs
    }

    /// Tantivy field and config of an indexed field.
    pub fn field(&self, name: &str) -> Option<(Field, FieldConfig)> {
        self.fields.get(name).copied()
    }

    /// Every indexed free-text field, in name order.
    pub fn free_text_fields(&self) -> Vec<Field> {
        self.fields
            .values()
            .filter(|(_, c)| c.kind == FieldKind::FreeText)
            .map(|(f, _)| *f)
            .collect()
    }
}

impl std::fmt::Debug for FieldMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldMap")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn free_text_options() -> TextOptions {
    TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(ANALYZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tantivy::tokenizer::TokenStream;
    use tempfile::TempDir;

    fn configs() -> Schema {
        let mut configs = Schema::new();
        configs.insert("title", FieldConfig::free_text());
        configs.insert("tag", FieldConfig::exact_match());
        configs.insert("price", FieldConfig::numeric());
        configs.insert("when", FieldConfig::date());
        configs.insert("note", FieldConfig::free_text().with_indexed(false));
        configs.insert("junk", FieldConfig::ignored());
        configs
    }

    #[test]
    fn test_build_maps_indexed_fields_only() {
        let map = FieldMap::build(&configs());
        assert!(map.field("title").is_some());
        assert!(map.field("price").is_some());
        assert!(map.field("note").is_none());
        assert!(map.field("junk").is_none());
        assert_eq!(map.free_text_fields().len(), 1);
        assert!(map.schema().get_field(ID_FIELD).is_ok());
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = FieldMap::build(&configs());
        let b = FieldMap::build(&configs());
        assert_eq!(a.field("when"), b.field("when"));
        assert_eq!(a.schema(), b.schema());
    }

    #[test]
    fn test_from_index_resolves_fields() {
        let map = FieldMap::build(&configs());
        let resolved = FieldMap::from_index(map.schema().clone(), &configs()).unwrap();
        assert_eq!(resolved.field("tag"), map.field("tag"));

        let mut extra = configs();
        extra.insert("missing", FieldConfig::free_text());
        assert!(matches!(
            FieldMap::from_index(map.schema().clone(), &extra),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_sidecar_roundtrip() {
        let dir = TempDir::new().unwrap();
        assert!(read_sidecar(dir.path()).unwrap().is_none());
        write_sidecar(dir.path(), &configs()).unwrap();
        assert_eq!(read_sidecar(dir.path()).unwrap(), Some(configs()));
    }

    #[test]
    fn test_analyzer_stems_and_lowercases() {
        let mut analyzer = analyzer();
        let mut stream = analyzer.token_stream("Running Documents");
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        assert_eq!(tokens, vec!["run", "document"]);
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("_id"));
        assert!(is_reserved("_stored"));
        assert!(!is_reserved("id"));
    }
}
