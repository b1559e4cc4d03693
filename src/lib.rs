// ============================================================================
// docmigrate Library
// ============================================================================
//
// Schema-versioned document migrations on top of a document store that keeps
// materialized per-version partitions.

pub mod config;
pub mod core;
pub mod index;
pub mod migration;
pub mod players;
pub mod store;

pub use crate::config::{ConflictRetryPolicy, MigrateConfig, RunnerConfig};
pub use crate::core::{
    ConflictKind, DocId, Document, MigrateError, Result, Revision, StoredDocument, classify_conflict,
};
pub use crate::index::{PartitionReport, VersionIndex};
pub use crate::migration::{
    ChainRun, FailedDocument, FailureReason, LevelFormula, MigrationPlan, MigrationRun,
    MigrationRunner, MigrationStep, RoundingPolicy, SkipReason, StepOutcome,
};
pub use crate::store::{DocumentStore, InMemoryStore, IndexSpec, IndexingMode, KeyExtractor};
