use super::view::{IndexRow, IndexSpec};
use super::DocumentStore;
use crate::core::document::body_kind;
use crate::core::{DocId, MigrateError, Result, Revision, StoredDocument};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// When materialized indexes catch up with document writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexingMode {
    /// Indexes are updated inside the write itself.
    #[default]
    Immediate,
    /// Writes only mark documents dirty; indexes lag until `refresh_indexes`.
    Deferred,
}

struct Entry {
    rev: Revision,
    body: JsonValue,
}

struct MaterializedIndex {
    spec: IndexSpec,
    rows: BTreeMap<DocId, JsonValue>,
}

impl MaterializedIndex {
    fn reindex(&mut self, id: &DocId, body: Option<&JsonValue>) {
        match body.and_then(|body| self.spec.emit(body)) {
            Some(key) => {
                self.rows.insert(id.clone(), key);
            }
            None => {
                self.rows.remove(id);
            }
        }
    }
}

#[derive(Default)]
struct StoreState {
    docs: HashMap<DocId, Entry>,
    indexes: HashMap<String, MaterializedIndex>,
    /// Documents written since the last index refresh (deferred mode only).
    dirty: BTreeSet<DocId>,
}

impl StoreState {
    fn reindex_one(&mut self, id: &DocId) {
        let body = self.docs.get(id).map(|entry| &entry.body);
        for index in self.indexes.values_mut() {
            index.reindex(id, body);
        }
    }
}

/// Reference in-memory document store.
///
/// Documents and index definitions live behind a single `RwLock`; each call
/// is atomic on its own. Revisions start at 1 and increase on every write.
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    mode: IndexingMode,
    available: AtomicBool,
    writes: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_indexing(IndexingMode::Immediate)
    }

    pub fn with_indexing(mode: IndexingMode) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            mode,
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    pub fn indexing_mode(&self) -> IndexingMode {
        self.mode
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful document writes (inserts, puts, deletes).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Brings every index up to date with pending writes. Returns how many
    /// documents were reindexed.
    pub async fn refresh_indexes(&self) -> usize {
        let mut state = self.state.write().await;
        let dirty = std::mem::take(&mut state.dirty);
        for id in &dirty {
            state.reindex_one(id);
        }
        dirty.len()
    }

    /// Removes a document if its current revision is still `expected`.
    pub async fn delete(&self, id: &DocId, expected: Revision) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        let current = state
            .docs
            .get(id)
            .map(|entry| entry.rev)
            .ok_or_else(|| MigrateError::NotFound(id.to_string()))?;
        if current != expected {
            return Err(conflict(id, expected, current));
        }

        state.docs.remove(id);
        self.after_write(&mut state, id);
        Ok(())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MigrateError::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ))
        }
    }

    fn after_write(&self, state: &mut StoreState, id: &DocId) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            IndexingMode::Immediate => state.reindex_one(id),
            IndexingMode::Deferred => {
                state.dirty.insert(id.clone());
            }
        }
    }
}

fn conflict(id: &DocId, expected: Revision, actual: Revision) -> MigrateError {
    MigrateError::Conflict {
        id: id.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, id: &DocId) -> Result<StoredDocument> {
        self.ensure_available()?;
        let state = self.state.read().await;
        state
            .docs
            .get(id)
            .map(|entry| StoredDocument {
                id: id.clone(),
                rev: entry.rev,
                body: entry.body.clone(),
            })
            .ok_or_else(|| MigrateError::NotFound(id.to_string()))
    }

    async fn put(&self, id: &DocId, body: JsonValue, expected: Revision) -> Result<Revision> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        let entry = state
            .docs
            .get_mut(id)
            .ok_or_else(|| MigrateError::NotFound(id.to_string()))?;
        if entry.rev != expected {
            return Err(conflict(id, expected, entry.rev));
        }

        let rev = entry.rev.next();
        entry.rev = rev;
        entry.body = body;
        self.after_write(&mut state, id);
        Ok(rev)
    }

    async fn insert(&self, body: JsonValue) -> Result<(DocId, Revision)> {
        self.ensure_available()?;
        if !body.is_object() {
            return Err(MigrateError::malformed("<new>", "body is not a JSON object"));
        }

        let mut state = self.state.write().await;
        let id = DocId::generate();
        let rev = Revision::first();
        state.docs.insert(id.clone(), Entry { rev, body });
        self.after_write(&mut state, &id);
        Ok((id, rev))
    }

    async fn define_index(&self, name: &str, spec: IndexSpec) -> Result<()> {
        self.ensure_available()?;
        if name.is_empty() {
            return Err(MigrateError::InvalidIndex(
                "index name must not be empty".to_string(),
            ));
        }
        spec.validate()?;

        let mut state = self.state.write().await;
        if let Some(existing) = state.indexes.get(name) {
            if existing.spec == spec {
                return Ok(());
            }
            return Err(MigrateError::InvalidIndex(format!(
                "index '{name}' is already defined with a different key"
            )));
        }

        let mut index = MaterializedIndex {
            spec,
            rows: BTreeMap::new(),
        };
        for (id, entry) in &state.docs {
            index.reindex(id, Some(&entry.body));
        }
        state.indexes.insert(name.to_string(), index);
        Ok(())
    }

    async fn query_partition(&self, index: &str, key: &JsonValue) -> Result<Vec<IndexRow>> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let index = state
            .indexes
            .get(index)
            .ok_or_else(|| MigrateError::UnknownIndex(index.to_string()))?;

        Ok(index
            .rows
            .iter()
            .filter(|(_, row_key)| *row_key == key)
            .map(|(id, row_key)| IndexRow {
                id: id.clone(),
                key: row_key.clone(),
            })
            .collect())
    }

    async fn list_kind(&self, kind: &str) -> Result<Vec<DocId>> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut ids: Vec<DocId> = state
            .docs
            .iter()
            .filter(|(_, entry)| body_kind(&entry.body) == Some(kind))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
