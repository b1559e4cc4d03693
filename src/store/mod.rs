//! Document store contract.
//!
//! The migration core talks to a document database only through
//! [`DocumentStore`]. Every call is independently atomic; there are no
//! cross-document transactions. [`InMemoryStore`] is the reference
//! implementation used by the CLI and the test suite.

pub mod memory;
pub mod view;

pub use memory::{InMemoryStore, IndexingMode};
pub use view::{IndexRow, IndexSpec, KeyExtractor};

use crate::core::{DocId, Result, Revision, StoredDocument};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches the current revision of a document, or `NotFound`.
    async fn get(&self, id: &DocId) -> Result<StoredDocument>;

    /// Replaces a document body if its current revision is still `expected`.
    ///
    /// Returns the new revision, `Conflict` when the document moved on, or
    /// `NotFound` when it no longer exists.
    async fn put(&self, id: &DocId, body: JsonValue, expected: Revision) -> Result<Revision>;

    /// Stores a new document under a store-assigned identifier.
    async fn insert(&self, body: JsonValue) -> Result<(DocId, Revision)>;

    /// Declares a materialized index. Redefining an identical index is a no-op.
    async fn define_index(&self, name: &str, spec: IndexSpec) -> Result<()>;

    /// Returns the rows of `index` whose key equals `key`, ordered by id.
    async fn query_partition(&self, index: &str, key: &JsonValue) -> Result<Vec<IndexRow>>;

    /// Lists every document carrying the given kind tag, straight from the
    /// documents rather than from any index.
    async fn list_kind(&self, kind: &str) -> Result<Vec<DocId>>;
}

#[async_trait]
impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    async fn get(&self, id: &DocId) -> Result<StoredDocument> {
        (**self).get(id).await
    }

    async fn put(&self, id: &DocId, body: JsonValue, expected: Revision) -> Result<Revision> {
        (**self).put(id, body, expected).await
    }

    async fn insert(&self, body: JsonValue) -> Result<(DocId, Revision)> {
        (**self).insert(body).await
    }

    async fn define_index(&self, name: &str, spec: IndexSpec) -> Result<()> {
        (**self).define_index(name, spec).await
    }

    async fn query_partition(&self, index: &str, key: &JsonValue) -> Result<Vec<IndexRow>> {
        (**self).query_partition(index, key).await
    }

    async fn list_kind(&self, kind: &str) -> Result<Vec<DocId>> {
        (**self).list_kind(kind).await
    }
}
