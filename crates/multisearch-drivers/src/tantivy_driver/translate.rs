//! Query translation for the Tantivy driver.
//!
//! Leaves become `TermQuery`s over analyzed tokens; AND, OR and NOT become
//! `BooleanQuery`s. XOR is folded pairwise into "either but not both"
//! boolean queries, and WEIGHT becomes a `BoostQuery`. A leaf whose terms analyze to nothing, or that targets a
//! field registered as not indexed, becomes an `EmptyQuery`.

use multisearch_core::{Error, FieldKind, Result, Translator};
use tantivy::query::{BooleanQuery, BoostQuery, EmptyQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::tokenizer::{TextAnalyzer, TokenStream};
use tantivy::{DateTime, Term};

use super::schema::{FieldMap, analyzer};
use crate::analysis::{parse_date, parse_number};

pub(crate) struct TantivyTranslator<'a> {
    fields: &'a FieldMap,
    analyzer: TextAnalyzer,
}

impl<'a> TantivyTranslator<'a> {
    pub(crate) fn new(fields: &'a FieldMap) -> Self {
        Self {
            fields,
            analyzer: analyzer(),
        }
    }

    fn analyze(&self, terms: &[String]) -> Vec<String> {
        let mut analyzer = self.analyzer.clone();
        let mut tokens = Vec::new();
        for term in terms {
            let mut stream = analyzer.token_stream(term);
            while stream.advance() {
                tokens.push(stream.token().text.clone());
            }
        }
        tokens
    }
}

fn term_query(term: Term, option: IndexRecordOption) -> Box<dyn Query> {
    Box::new(TermQuery::new(term, option))
}

/// Intersection of `queries`, without wrapping a single query.
fn all_of(mut queries: Vec<Box<dyn Query>>) -> Box<dyn Query> {
    match queries.len() {
        0 => Box::new(EmptyQuery),
        1 => queries.remove(0),
        _ => Box::new(BooleanQuery::intersection(queries)),
    }
}

/// Union of `queries`, without wrapping a single query.
fn any_of(mut queries: Vec<Box<dyn Query>>) -> Box<dyn Query> {
    match queries.len() {
        0 => Box::new(EmptyQuery),
        1 => queries.remove(0),
        _ => Box::new(BooleanQuery::union(queries)),
    }
}

fn text_terms(field: Field, tokens: &[String]) -> Vec<Box<dyn Query>> {
    tokens
        .iter()
        .map(|t| {
            term_query(
                Term::from_field_text(field, t),
                IndexRecordOption::WithFreqs,
            )
        })
        .collect()
}

impl Translator for TantivyTranslator<'_> {
    type Output = Box<dyn Query>;

    fn free_text(&self, terms: &[String]) -> Result<Self::Output> {
        let fields = self.fields.free_text_fields();
        let tokens = self.analyze(terms);
        if fields.is_empty() || tokens.is_empty() {
            return Ok(Box::new(EmptyQuery));
        }
        let per_token = tokens
            .iter()
            .map(|token| {
                any_of(
                    fields
                        .iter()
                        .map(|f| {
                            term_query(
                                Term::from_field_text(*f, token),
                                IndexRecordOption::WithFreqs,
                            )
                        })
                        .collect(),
                )
            })
            .collect();
        Ok(all_of(per_token))
    }

    fn field(&self, name: &str, terms: &[String]) -> Result<Self::Output> {
        let Some((field, config)) = self.fields.field(name) else {
            if self.fields.configs().contains(name) {
                return Ok(Box::new(EmptyQuery));
            }
            return Err(Error::unknown_field(name));
        };
        let queries = match config.kind {
            FieldKind::FreeText => {
                let tokens = self.analyze(terms);
                if tokens.is_empty() {
                    return Ok(Box::new(EmptyQuery));
                }
                text_terms(field, &tokens)
            }
            FieldKind::ExactMatch => vec![term_query(
                Term::from_field_text(field, &terms.join(" ")),
                IndexRecordOption::Basic,
            )],
            FieldKind::Numeric => terms
                .iter()
                .map(|t| {
                    parse_number(name, t).map(|n| {
                        term_query(Term::from_field_f64(field, n), IndexRecordOption::Basic)
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            FieldKind::Date => terms
                .iter()
                .map(|t| {
                    parse_date(name, t).map(|dt| {
                        let dt = DateTime::from_timestamp_secs(dt.timestamp());
                        term_query(
                            Term::from_field_date_for_search(field, dt),
                            IndexRecordOption::Basic,
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            FieldKind::Ignored => return Ok(Box::new(EmptyQuery)),
        };
        Ok(all_of(queries))
    }

    fn and(&self, children: Vec<Self::Output>) -> Result<Self::Output> {
        Ok(Box::new(BooleanQuery::intersection(children)))
    }

    fn or(&self, children: Vec<Self::Output>) -> Result<Self::Output> {
        Ok(Box::new(BooleanQuery::union(children)))
    }

    fn not(&self, positive: Self::Output, negative: Self::Output) -> Result<Self::Output> {
        Ok(Box::new(BooleanQuery::new(vec![
            (Occur::Must, positive),
            (Occur::MustNot, negative),
        ])))
    }

    fn xor(&self, children: Vec<Self::Output>) -> Result<Self::Output> {
        let mut children = children.into_iter();
        let Some(first) = children.next() else {
            return Ok(Box::new(EmptyQuery));
        };
        Ok(children.fold(first, |acc, next| {
            let both: Box<dyn Query> = Box::new(BooleanQuery::intersection(vec![
                acc.box_clone(),
                next.box_clone(),
            ]));
            let either: Box<dyn Query> = Box::new(BooleanQuery::new(vec![
                (Occur::Should, acc),
                (Occur::Should, next),
                (Occur::MustNot, both),
            ]));
            either
        }))
    }

    fn weight(&self, query: Self::Output, factor: f32) -> Result<Self::Output> {
        Ok(Box::new(BoostQuery::new(query, factor)))
    }
}
