//! Version partitions.
//!
//! A [`VersionIndex`] declares one materialized partition per tracked schema
//! version and lists the identifiers currently in each. Partitions are derived
//! by the store; nothing here writes to them.

use crate::core::{DocId, MigrateError, Result, VERSION_FIELD};
use crate::store::{DocumentStore, IndexSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionIndex {
    kind: String,
    versions: BTreeSet<u32>,
}

impl VersionIndex {
    pub fn new(kind: impl Into<String>, versions: impl IntoIterator<Item = u32>) -> Result<Self> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(MigrateError::InvalidIndex(
                "tracked kind must not be empty".to_string(),
            ));
        }

        let mut tracked = BTreeSet::new();
        for version in versions {
            if version == 0 {
                return Err(MigrateError::InvalidIndex(
                    "tracked versions must be >= 1".to_string(),
                ));
            }
            if !tracked.insert(version) {
                return Err(MigrateError::InvalidIndex(format!(
                    "version {version} is tracked twice"
                )));
            }
        }
        if tracked.is_empty() {
            return Err(MigrateError::InvalidIndex(
                "at least one version must be tracked".to_string(),
            ));
        }

        Ok(Self {
            kind,
            versions: tracked,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn versions(&self) -> impl Iterator<Item = u32> + '_ {
        self.versions.iter().copied()
    }

    pub fn tracks(&self, version: u32) -> bool {
        self.versions.contains(&version)
    }

    pub fn partition_name(&self, version: u32) -> String {
        format!("{}_v{}", self.kind, version)
    }

    fn partition_spec(&self, version: u32) -> IndexSpec {
        IndexSpec::field_equals(Some(&self.kind), VERSION_FIELD, JsonValue::from(version))
    }

    /// Declares every partition with the store.
    pub async fn define<S: DocumentStore + ?Sized>(&self, store: &S) -> Result<()> {
        for version in self.versions() {
            let name = self.partition_name(version);
            store.define_index(&name, self.partition_spec(version)).await?;
            debug!(index = %name, version, "version partition defined");
        }
        Ok(())
    }

    /// Identifiers currently listed under `version`. An empty partition is not an error.
    pub async fn list<S: DocumentStore + ?Sized>(&self, store: &S, version: u32) -> Result<Vec<DocId>> {
        if !self.tracks(version) {
            return Err(MigrateError::UnknownIndex(self.partition_name(version)));
        }
        let rows = store
            .query_partition(&self.partition_name(version), &JsonValue::from(version))
            .await?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    /// Entry count of every tracked partition.
    pub async fn counts<S: DocumentStore + ?Sized>(&self, store: &S) -> Result<BTreeMap<u32, usize>> {
        let mut counts = BTreeMap::new();
        for version in self.versions() {
            counts.insert(version, self.list(store, version).await?.len());
        }
        Ok(counts)
    }

    /// Checks that partitions are pairwise disjoint and together cover every
    /// document of the tracked kind. Only meaningful while no writes are in flight.
    pub async fn check_invariants<S: DocumentStore + ?Sized>(&self, store: &S) -> Result<PartitionReport> {
        let mut seen: BTreeMap<DocId, u32> = BTreeMap::new();
        let mut overlapping = Vec::new();
        let mut counts = BTreeMap::new();

        for version in self.versions() {
            let ids = self.list(store, version).await?;
            counts.insert(version, ids.len());
            for id in ids {
                if let Some(first) = seen.get(&id) {
                    overlapping.push(Overlap {
                        id: id.clone(),
                        versions: (*first, version),
                    });
                } else {
                    seen.insert(id, version);
                }
            }
        }

        let missing = store
            .list_kind(&self.kind)
            .await?
            .into_iter()
            .filter(|id| !seen.contains_key(id))
            .collect();

        Ok(PartitionReport {
            counts,
            overlapping,
            missing,
        })
    }
}

/// A document listed under two partitions at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlap {
    pub id: DocId,
    pub versions: (u32, u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub counts: BTreeMap<u32, usize>,
    pub overlapping: Vec<Overlap>,
    /// Documents of the tracked kind that no partition lists.
    pub missing: Vec<DocId>,
}

impl PartitionReport {
    pub fn is_disjoint(&self) -> bool {
        self.overlapping.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn is_consistent(&self) -> bool {
        self.is_disjoint() && self.is_complete()
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}
