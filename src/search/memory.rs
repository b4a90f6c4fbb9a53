//! In-memory search index.
//!
//! Backs unit and integration tests, and doubles as a deterministic local
//! index for the engine test-bench. Implements the subset of the filter
//! grammar the engines use: `field eq 'value'`, `field ne 'value'`, and
//! `and` conjunctions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::IndexDocument;
use crate::error::{Result, SearchError};

use super::{BatchResult, SearchIndex, SearchQuery};

/// In-memory [`SearchIndex`] implementation.
///
/// Documents are stored as JSON values keyed by `id`; scans are ordered by
/// key so paging is stable.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    docs: RwLock<BTreeMap<String, Value>>,
}

impl MemorySearchIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently indexed.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    /// Whether the index is empty.
    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// All document keys, ordered.
    pub async fn keys(&self) -> Vec<String> {
        self.docs.read().await.keys().cloned().collect()
    }
}

/// One clause of a parsed filter.
#[derive(Debug, PartialEq, Eq)]
enum Clause {
    Eq(String, String),
    Ne(String, String),
}

/// Parses the filter subset: clauses joined by `and`, each
/// `field (eq|ne) 'value'` with `''` escaping inside the literal.
fn parse_filter(filter: &str) -> Result<Vec<Clause>> {
    let mut clauses = Vec::new();
    for raw in split_top_level_and(filter) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (field, rest) = raw.split_once(' ').ok_or_else(|| malformed(filter))?;
        let (op, literal) = rest.trim().split_once(' ').ok_or_else(|| malformed(filter))?;
        let literal = literal.trim();
        if !literal.starts_with('\'') || !literal.ends_with('\'') || literal.len() < 2 {
            return Err(malformed(filter));
        }
        let value = literal[1..literal.len() - 1].replace("''", "'");
        match op {
            "eq" => clauses.push(Clause::Eq(field.to_string(), value)),
            "ne" => clauses.push(Clause::Ne(field.to_string(), value)),
            _ => return Err(malformed(filter)),
        }
    }
    Ok(clauses)
}

/// Splits on ` and ` outside of quoted literals.
fn split_top_level_and(filter: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut rest = filter;
    while !rest.is_empty() {
        if !in_quote
            && rest.len() >= 5
            && rest.is_char_boundary(5)
            && rest[..5].eq_ignore_ascii_case(" and ")
        {
            parts.push(std::mem::take(&mut current));
            rest = &rest[5..];
            continue;
        }
        let Some(ch) = rest.chars().next() else { break };
        if ch == '\'' {
            in_quote = !in_quote;
        }
        current.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    parts.push(current);
    parts
}

fn malformed(filter: &str) -> crate::error::Error {
    SearchError::Malformed(format!("unsupported filter: {filter}")).into()
}

fn matches(doc: &Value, clauses: &[Clause]) -> bool {
    clauses.iter().all(|clause| match clause {
        Clause::Eq(field, value) => field_str(doc, field).as_deref() == Some(value),
        Clause::Ne(field, value) => field_str(doc, field).as_deref() != Some(value),
    })
}

fn field_str(doc: &Value, field: &str) -> Option<String> {
    doc.get(field).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn project(doc: &Value, select: &[String]) -> Value {
    if select.is_empty() {
        return doc.clone();
    }
    let mut out = serde_json::Map::new();
    for field in select {
        if let Some(value) = doc.get(field) {
            out.insert(field.clone(), value.clone());
        }
    }
    Value::Object(out)
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn upload_documents(&self, docs: &[IndexDocument]) -> Result<BatchResult> {
        let mut map = self.docs.write().await;
        let mut result = BatchResult::default();
        for doc in docs {
            if doc.id.is_empty() {
                result.failed += 1;
                result
                    .failures
                    .push((String::new(), "missing document key".to_string()));
                continue;
            }
            let value = serde_json::to_value(doc)
                .map_err(|e| SearchError::Malformed(e.to_string()))?;
            map.insert(doc.id.clone(), value);
            result.succeeded += 1;
        }
        Ok(result)
    }

    async fn delete_documents(&self, keys: &[String]) -> Result<BatchResult> {
        let mut map = self.docs.write().await;
        let mut result = BatchResult::default();
        for key in keys {
            // Deleting an absent key is accepted, matching upstream semantics.
            map.remove(key);
            result.succeeded += 1;
        }
        Ok(result)
    }

    async fn get_document(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.docs.read().await.get(key).cloned())
    }

    async fn search_page(&self, query: &SearchQuery, skip: usize) -> Result<Vec<Value>> {
        let clauses = match &query.filter {
            Some(filter) => parse_filter(filter)?,
            None => Vec::new(),
        };
        let map = self.docs.read().await;
        Ok(map
            .values()
            .filter(|doc| matches(doc, &clauses))
            .skip(skip)
            .take(query.top)
            .map(|doc| project(doc, &query.select))
            .collect())
    }
}
