//! Key layout and set-algebra plans for the Redis driver.
//!
//! Everything here is pure: translating a query or laying out a document's
//! keys never touches the server, so it can be tested without one.
//!
//! # Key layout
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `<prefix>:docs` | set | every document id |
//! | `<prefix>:nextid` | string | id counter |
//! | `<prefix>:schema` | hash | field name to its config as JSON |
//! | `<prefix>:data:<id>` | string | stored fields as JSON |
//! | `<prefix>:terms:<id>` | set | posting keys the document is in |
//! | `<prefix>:docs:<len>:<field>:<token>` | set | ids with `token` in `field` |
//! | `<prefix>:any:<token>` | set | ids with `token` in any free-text field |
//! | `<prefix>:tmp:<run>:<n>` | set | intermediate search results |
//!
//! Field names and tokens may contain `:`. A posting key carries the byte
//! length of its field name so that no two `(field, token)` pairs share a
//! key; `any` keys hold a single token after a fixed namespace.

use multisearch_core::{Error, FieldKind, PreparedDocument, Result, Schema, Translator};

use crate::analysis::{query_tokens, tokenize_terms, value_tokens};

/// Key namespace of one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Keys under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The namespace prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Set of every document id.
    pub fn docs(&self) -> String {
        format!("{}:docs", self.prefix)
    }

    /// Id counter.
    pub fn next_id(&self) -> String {
        format!("{}:nextid", self.prefix)
    }

    /// Field configs.
    pub fn schema(&self) -> String {
        format!("{}:schema", self.prefix)
    }

    /// Stored fields of `id`.
    pub fn data(&self, id: &str) -> String {
        format!("{}:data:{id}", self.prefix)
    }

    /// Posting keys `id` belongs in.
    pub fn terms(&self, id: &str) -> String {
        format!("{}:terms:{id}", self.prefix)
    }

    /// Ids with `token` in `field`.
    pub fn posting(&self, field: &str, token: &str) -> String {
        format!("{}:docs:{}:{field}:{token}", self.prefix, field.len())
    }

    /// Ids with `token` in any free-text field.
    pub fn any(&self, token: &str) -> String {
        format!("{}:any:{token}", self.prefix)
    }

    /// `SCAN` pattern matching every key of the namespace.
    pub fn pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.prefix.len() + 2);
        for c in self.prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push_str(":*");
        pattern
    }

    /// Temporary result `n` of search `run`.
    pub fn temp(&self, run: &str, n: usize) -> String {
        format!("{}:tmp:{run}:{n}", self.prefix)
    }

    /// Posting keys a document belongs in, sorted and deduplicated.
    pub fn postings(&self, doc: &PreparedDocument) -> Vec<String> {
        let mut keys = Vec::new();
        for field in doc.fields().iter().filter(|f| f.config.indexed) {
            for value in &field.values {
                for token in value_tokens(field.config.kind, value) {
                    if field.config.kind == FieldKind::FreeText {
                        keys.push(self.any(&token));
                    }
                    keys.push(self.posting(&field.name, &token));
                }
            }
        }
        keys.sort();
        keys.dedup();
        keys
    }
}

// ============================================================================
// Plans
// ============================================================================

/// A query as set algebra over posting keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisPlan {
    /// Members of one posting set.
    Key(String),
    /// The empty set.
    Nothing,
    /// SINTER of the children.
    Inter(Vec<RedisPlan>),
    /// SUNION of the children.
    Union(Vec<RedisPlan>),
    /// SDIFF of the first and second.
    Diff(Box<RedisPlan>, Box<RedisPlan>),
}

impl RedisPlan {
    fn inter_of(mut keys: Vec<String>) -> Self {
        match keys.len() {
            0 => Self::Nothing,
            1 => Self::Key(keys.remove(0)),
            _ => Self::Inter(keys.into_iter().map(Self::Key).collect()),
        }
    }
}

pub(crate) struct RedisTranslator<'a> {
    pub(crate) keys: &'a KeySpace,
    pub(crate) fields: &'a Schema,
}

impl Translator for RedisTranslator<'_> {
    type Output = RedisPlan;

    fn free_text(&self, terms: &[String]) -> Result<RedisPlan> {
        let keys = tokenize_terms(terms)
            .iter()
            .map(|t| self.keys.any(t))
            .collect();
        Ok(RedisPlan::inter_of(keys))
    }

    fn field(&self, field: &str, terms: &[String]) -> Result<RedisPlan> {
        let config = self
            .fields
            .get(field)
            .ok_or_else(|| Error::unknown_field(field))?;
        if !config.indexed {
            return Ok(RedisPlan::Nothing);
        }
        let keys = query_tokens(field, config.kind, terms)?
            .iter()
            .map(|t| self.keys.posting(field, t))
            .collect();
        Ok(RedisPlan::inter_of(keys))
    }

    fn and(&self, children: Vec<RedisPlan>) -> Result<RedisPlan> {
        Ok(RedisPlan::Inter(children))
    }

    fn or(&self, children: Vec<RedisPlan>) -> Result<RedisPlan> {
        Ok(RedisPlan::Union(children))
    }

    fn not(&self, positive: RedisPlan, negative: RedisPlan) -> Result<RedisPlan> {
        Ok(RedisPlan::Diff(Box::new(positive), Box::new(negative)))
    }

    /// Folds pairwise into `(acc | next) - (acc & next)`, which keeps members
    /// found by an odd number of children.
    fn xor(&self, children: Vec<RedisPlan>) -> Result<RedisPlan> {
        let mut children = children.into_iter();
        let Some(first) = children.next() else {
            return Ok(RedisPlan::Nothing);
        };
        Ok(children.fold(first, |acc, next| {
            RedisPlan::Diff(
                Box::new(RedisPlan::Union(vec![acc.clone(), next.clone()])),
                Box::new(RedisPlan::Inter(vec![acc, next])),
            )
        }))
    }

    fn weight(&self, _query: RedisPlan, _factor: f32) -> Result<RedisPlan> {
        Err(Error::query("redis sets carry no scores to weight"))
    }
}

// ============================================================================
// Compilation
// ============================================================================

/// One store command of a compiled plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStep {
    /// `SINTERSTORE`, `SUNIONSTORE` or `SDIFFSTORE`.
    pub command: &'static str,
    /// Destination key.
    pub dest: String,
    /// Source keys.
    pub sources: Vec<String>,
}

/// A plan flattened into store commands, children before parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPlan {
    /// Store commands in execution order.
    pub steps: Vec<StoreStep>,
    /// Key holding the final result.
    pub result: String,
    /// Temporary keys to delete afterwards.
    pub temps: Vec<String>,
}

/// Flatten `plan` into store commands writing to `<prefix>:tmp:<run>:<n>`.
///
/// A bare posting key needs no command. `Nothing` becomes a temporary key
/// that is never written, which Redis reads as the empty set.
pub fn compile(plan: &RedisPlan, keys: &KeySpace, run: &str) -> CompiledPlan {
    let mut compiled = CompiledPlan {
        steps: Vec::new(),
        result: String::new(),
        temps: Vec::new(),
    };
    compiled.result = compile_node(plan, keys, run, &mut compiled);
    compiled
}

fn compile_node(plan: &RedisPlan, keys: &KeySpace, run: &str, out: &mut CompiledPlan) -> String {
    let (command, sources): (&'static str, Vec<String>) = match plan {
        RedisPlan::Key(key) => return key.clone(),
        RedisPlan::Nothing => {
            let dest = keys.temp(run, out.temps.len());
            out.temps.push(dest.clone());
            return dest;
        }
        RedisPlan::Inter(children) => (
            "SINTERSTORE",
            children
                .iter()
                .map(|c| compile_node(c, keys, run, out))
                .collect(),
        ),
        RedisPlan::Union(children) => (
            "SUNIONSTORE",
            children
                .iter()
                .map(|c| compile_node(c, keys, run, out))
                .collect(),
        ),
        RedisPlan::Diff(positive, negative) => (
            "SDIFFSTORE",
            vec![
                compile_node(positive, keys, run, out),
                compile_node(negative, keys, run, out),
            ],
        ),
    };
    let dest = keys.temp(run, out.temps.len());
    out.temps.push(dest.clone());
    out.steps.push(StoreStep {
        command,
        dest: dest.clone(),
        sources,
    });
    dest
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use multisearch_core::{Document, DocumentPlan, FieldConfig, Query, Resolution, translate};

    use crate::redis_driver::CAPABILITIES;

    fn fields() -> Schema {
        let mut fields = Schema::new();
        fields.insert("title", FieldConfig::free_text());
        fields.insert("tag", FieldConfig::exact_match());
        fields.insert("note", FieldConfig::free_text().with_indexed(false));
        fields
    }

    fn plan(query: &Query) -> Result<RedisPlan> {
        let keys = KeySpace::new("t");
        let fields = fields();
        let translator = RedisTranslator {
            keys: &keys,
            fields: &fields,
        };
        translate(query, &CAPABILITIES, "redis", &translator)
    }

    #[test]
    fn test_free_text_intersects_tokens() {
        assert_eq!(
            plan(&Query::term("Hello world")).unwrap(),
            RedisPlan::Inter(vec![
                RedisPlan::Key("t:any:hello".to_string()),
                RedisPlan::Key("t:any:world".to_string()),
            ])
        );
    }

    #[test]
    fn test_field_query_keys() {
        assert_eq!(
            plan(&Query::field_term("tag", "New York")).unwrap(),
            RedisPlan::Key("t:docs:3:tag:New York".to_string())
        );
        assert_eq!(
            plan(&Query::field_term("note", "x")).unwrap(),
            RedisPlan::Nothing
        );
        assert!(matches!(
            plan(&Query::field_term("colour", "red")),
            Err(Error::UnknownField { .. })
        ));
    }

    #[test]
    fn test_compile_orders_children_first() {
        let q = (Query::term("a") | Query::term("b")) - Query::term("c");
        let compiled = compile(&plan(&q).unwrap(), &KeySpace::new("t"), "r");
        assert_eq!(
            compiled.steps,
            vec![
                StoreStep {
                    command: "SUNIONSTORE",
                    dest: "t:tmp:r:0".to_string(),
                    sources: vec!["t:any:a".to_string(), "t:any:b".to_string()],
                },
                StoreStep {
                    command: "SDIFFSTORE",
                    dest: "t:tmp:r:1".to_string(),
                    sources: vec!["t:tmp:r:0".to_string(), "t:any:c".to_string()],
                },
            ]
        );
        assert_eq!(compiled.result, "t:tmp:r:1");
        assert_eq!(compiled.temps.len(), 2);
    }

    #[test]
    fn test_xor_is_union_minus_intersection() {
        let any = |t: &str| RedisPlan::Key(format!("t:any:{t}"));
        assert_eq!(
            plan(&(Query::term("a") ^ Query::term("b"))).unwrap(),
            RedisPlan::Diff(
                Box::new(RedisPlan::Union(vec![any("a"), any("b")])),
                Box::new(RedisPlan::Inter(vec![any("a"), any("b")])),
            )
        );
    }

    #[test]
    fn test_weight_is_unsupported() {
        let err = plan(&(Query::term("a") * 2.0)).unwrap_err();
        let Error::UnsupportedQuery { node, backend } = err else {
            unreachable!("Expected UnsupportedQuery");
        };
        assert_eq!(node, "(a * 2)");
        assert_eq!(backend, "redis");
    }

    #[test]
    fn test_scan_pattern_escapes_glob_characters() {
        assert_eq!(KeySpace::new("t").pattern(), "t:*");
        assert_eq!(KeySpace::new("a*b[1]").pattern(), "a\\*b\\[1\\]:*");
    }

    #[test]
    fn test_compile_single_key_needs_no_steps() {
        let compiled = compile(&plan(&Query::term("a")).unwrap(), &KeySpace::new("t"), "r");
        assert!(compiled.steps.is_empty());
        assert!(compiled.temps.is_empty());
        assert_eq!(compiled.result, "t:any:a");
    }

    #[test]
    fn test_document_postings() {
        let plan = DocumentPlan {
            fields: [
                ("title".to_string(), Resolution::Field(FieldConfig::free_text())),
                ("tag".to_string(), Resolution::Field(FieldConfig::exact_match())),
            ]
            .into_iter()
            .collect(),
            ..DocumentPlan::default()
        };
        let doc = Document::new([("title", "Red red fox"), ("tag", "Animal")]);
        let prepared = PreparedDocument::prepare(&doc, &plan, &CAPABILITIES, "redis").unwrap();
        assert_eq!(
            KeySpace::new("t").postings(&prepared),
            vec![
                "t:any:fox",
                "t:any:red",
                "t:docs:3:tag:Animal",
                "t:docs:5:title:fox",
                "t:docs:5:title:red",
            ]
        );
    }

    #[test]
    fn test_posting_keys_keep_colons_apart() {
        let keys = KeySpace::new("t");
        assert_ne!(keys.posting("a:b", "c"), keys.posting("a", "b:c"));
        assert_ne!(keys.posting("a", "b:c"), keys.posting("a:b:c", ""));
        assert_eq!(keys.posting("url", "http://x"), "t:docs:3:url:http://x");
    }
}
