use super::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use uuid::Uuid;

/// Body field holding the document kind tag.
pub const KIND_FIELD: &str = "type";
/// Body field holding the schema version.
pub const VERSION_FIELD: &str = "version";

/// Store-assigned, opaque document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Revision marker used for compare-and-swap writes.
///
/// Every successful write produces a strictly greater revision for that document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    pub const fn first() -> Self {
        Self(1)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document exactly as the store returns it: metadata plus the raw JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: DocId,
    pub rev: Revision,
    pub body: JsonValue,
}

/// Typed envelope over a stored document.
///
/// `kind` and `version` are lifted out of the body and validated; everything
/// else stays in `fields` and is reached through typed accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub rev: Option<Revision>,
    pub kind: String,
    pub version: u32,
    pub fields: Map<String, JsonValue>,
}

impl Document {
    /// Parses the envelope out of a stored body.
    ///
    /// Fails with `MalformedDocument` when the body is not an object or when
    /// the kind tag or version are absent or mistyped.
    pub fn from_stored(stored: StoredDocument) -> Result<Self> {
        let StoredDocument { id, rev, body } = stored;
        let JsonValue::Object(mut fields) = body else {
            return Err(MigrateError::malformed(id.as_str(), "body is not a JSON object"));
        };

        let kind = match fields.remove(KIND_FIELD) {
            Some(JsonValue::String(kind)) => kind,
            Some(other) => {
                return Err(MigrateError::malformed(
                    id.as_str(),
                    format!("'{KIND_FIELD}' must be a string, got {other}"),
                ));
            }
            None => {
                return Err(MigrateError::malformed(
                    id.as_str(),
                    format!("missing '{KIND_FIELD}'"),
                ));
            }
        };

        let raw_version = fields.remove(VERSION_FIELD);
        let version = raw_version
            .as_ref()
            .and_then(parse_version)
            .ok_or_else(|| {
                let found = raw_version
                    .as_ref()
                    .map(JsonValue::to_string)
                    .unwrap_or_else(|| "nothing".to_string());
                MigrateError::malformed(
                    id.as_str(),
                    format!("'{VERSION_FIELD}' must be a positive integer, got {found}"),
                )
            })?;

        Ok(Self {
            id,
            rev: Some(rev),
            kind,
            version,
            fields,
        })
    }

    /// Renders the document back into a flat store body.
    pub fn to_body(&self) -> JsonValue {
        let mut body = self.fields.clone();
        body.insert(KIND_FIELD.to_string(), JsonValue::String(self.kind.clone()));
        body.insert(VERSION_FIELD.to_string(), JsonValue::from(self.version));
        JsonValue::Object(body)
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    pub fn get_i64(&self, field: &str) -> Result<i64> {
        match self.fields.get(field) {
            Some(value) => value.as_i64().ok_or_else(|| {
                MigrateError::malformed(
                    self.id.as_str(),
                    format!("field '{field}' must be an integer, got {value}"),
                )
            }),
            None => Err(MigrateError::malformed(
                self.id.as_str(),
                format!("missing field '{field}'"),
            )),
        }
    }

    pub fn get_str(&self, field: &str) -> Result<&str> {
        match self.fields.get(field) {
            Some(value) => value.as_str().ok_or_else(|| {
                MigrateError::malformed(
                    self.id.as_str(),
                    format!("field '{field}' must be a string, got {value}"),
                )
            }),
            None => Err(MigrateError::malformed(
                self.id.as_str(),
                format!("missing field '{field}'"),
            )),
        }
    }

    /// Sets an extension field. Envelope fields go through `kind`/`version`.
    pub fn set(&mut self, field: &str, value: impl Into<JsonValue>) -> Result<()> {
        if field == KIND_FIELD || field == VERSION_FIELD {
            return Err(MigrateError::malformed(
                self.id.as_str(),
                format!("'{field}' is an envelope field and cannot be set directly"),
            ));
        }
        self.fields.insert(field.to_string(), value.into());
        Ok(())
    }
}

/// Reads the schema version from a raw body without building an envelope.
pub fn body_version(body: &JsonValue) -> Option<u32> {
    body.get(VERSION_FIELD).and_then(parse_version)
}

/// Reads the kind tag from a raw body.
pub fn body_kind(body: &JsonValue) -> Option<&str> {
    body.get(KIND_FIELD).and_then(JsonValue::as_str)
}

fn parse_version(value: &JsonValue) -> Option<u32> {
    value
        .as_u64()
        .filter(|version| *version >= 1)
        .and_then(|version| u32::try_from(version).ok())
}
