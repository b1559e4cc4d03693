//! Declarative index definitions.
//!
//! An index is described by data, not by query-engine source: an optional
//! kind filter plus a key extractor. The store evaluates the definition for
//! every written document and keeps the emitted `(id, key)` rows materialized.

use crate::core::document::body_kind;
use crate::core::{DocId, MigrateError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// How an index derives its key from a document body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyExtractor {
    /// Emits the value of a top-level field. Absent and `null` fields emit nothing.
    Field(String),
    /// Emits `value` only when the field equals it exactly.
    FieldEquals { field: String, value: JsonValue },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Only documents whose kind tag equals this are indexed.
    pub kind: Option<String>,
    pub key: KeyExtractor,
}

impl IndexSpec {
    pub fn field(kind: Option<&str>, field: impl Into<String>) -> Self {
        Self {
            kind: kind.map(str::to_string),
            key: KeyExtractor::Field(field.into()),
        }
    }

    pub fn field_equals(kind: Option<&str>, field: impl Into<String>, value: JsonValue) -> Self {
        Self {
            kind: kind.map(str::to_string),
            key: KeyExtractor::FieldEquals {
                field: field.into(),
                value,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(&self.kind, Some(kind) if kind.is_empty()) {
            return Err(MigrateError::InvalidIndex(
                "kind filter must not be empty".to_string(),
            ));
        }
        let field = match &self.key {
            KeyExtractor::Field(field) => field,
            KeyExtractor::FieldEquals { field, value } => {
                if value.is_null() {
                    return Err(MigrateError::InvalidIndex(format!(
                        "field '{field}' cannot be matched against null"
                    )));
                }
                field
            }
        };
        if field.is_empty() {
            return Err(MigrateError::InvalidIndex(
                "key field must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Evaluates the definition against a body, returning the key to index under.
    pub fn emit(&self, body: &JsonValue) -> Option<JsonValue> {
        if let Some(kind) = &self.kind {
            if body_kind(body) != Some(kind.as_str()) {
                return None;
            }
        }

        match &self.key {
            KeyExtractor::Field(field) => body.get(field).filter(|v| !v.is_null()).cloned(),
            KeyExtractor::FieldEquals { field, value } => {
                (body.get(field) == Some(value)).then(|| value.clone())
            }
        }
    }
}

/// One materialized index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub id: DocId,
    pub key: JsonValue,
}
