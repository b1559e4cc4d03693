pub mod document;
pub mod error;

pub use document::{DocId, Document, KIND_FIELD, Revision, StoredDocument, VERSION_FIELD};
pub use error::{ConflictKind, MigrateError, Result, classify_conflict};
