use super::step::MigrationStep;
use crate::core::{DocId, MigrateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Why a candidate was left alone. Skips are not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The document's version no longer matches the step's source version,
    /// or its envelope could not be read.
    Stale { found: String },
    /// Already at the step's target version.
    AlreadyMigrated,
    /// Deleted between the partition query and the fetch.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Every write attempt lost a revision race.
    Conflict { attempts: usize },
    /// The step could not compute its fields from this document.
    Malformed { detail: String },
    /// Any other per-document store error.
    Store { detail: String },
}

impl FailureReason {
    pub(crate) fn from_error(err: &MigrateError) -> Self {
        match err {
            MigrateError::MalformedDocument { reason, .. } => Self::Malformed {
                detail: reason.clone(),
            },
            other => Self::Store {
                detail: other.to_string(),
            },
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { attempts } => write!(f, "conflict after {attempts} attempt(s)"),
            Self::Malformed { detail } => write!(f, "malformed: {detail}"),
            Self::Store { detail } => write!(f, "store error: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub id: DocId,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub id: DocId,
    #[serde(flatten)]
    pub reason: FailureReason,
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DocumentOutcome {
    Updated,
    Skipped(SkipReason),
    Failed(FailureReason),
}

/// Report of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRun {
    pub step: String,
    pub from_version: u32,
    pub to_version: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Partition passes folded into this report.
    pub passes: usize,
    /// Distinct documents with an outcome in this report.
    pub visited: usize,
    pub updated: usize,
    /// Ids written by this run, in completion order.
    pub migrated: Vec<DocId>,
    /// Extra write attempts spent on revision conflicts.
    pub retries: usize,
    pub skipped: Vec<SkippedDocument>,
    pub failures: Vec<FailedDocument>,
}

impl MigrationRun {
    pub(crate) fn start(step: &MigrationStep) -> Self {
        Self {
            step: step.name().to_string(),
            from_version: step.from_version(),
            to_version: step.to_version(),
            started_at: Utc::now(),
            finished_at: None,
            passes: 1,
            visited: 0,
            updated: 0,
            migrated: Vec::new(),
            retries: 0,
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, id: DocId, outcome: DocumentOutcome, attempts: usize) {
        self.visited += 1;
        self.retries += attempts.saturating_sub(1);
        match outcome {
            DocumentOutcome::Updated => {
                self.updated += 1;
                self.migrated.push(id);
            }
            DocumentOutcome::Skipped(reason) => self.skipped.push(SkippedDocument { id, reason }),
            DocumentOutcome::Failed(reason) => self.failures.push(FailedDocument { id, reason }),
        }
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Folds a later pass of the same step into this report.
    ///
    /// Each document keeps one outcome: a later pass replaces earlier
    /// failures, and an update from either pass wins over a skip.
    pub(crate) fn absorb(&mut self, pass: MigrationRun) {
        let earlier: BTreeSet<DocId> = self.migrated.iter().cloned().collect();
        let later: BTreeSet<DocId> = pass
            .migrated
            .iter()
            .chain(pass.skipped.iter().map(|skipped| &skipped.id))
            .chain(pass.failures.iter().map(|failed| &failed.id))
            .cloned()
            .collect();

        self.failures.retain(|failed| !later.contains(&failed.id));
        self.skipped
            .retain(|skipped| !pass.migrated.contains(&skipped.id));

        self.passes += pass.passes;
        self.updated += pass.updated;
        self.retries += pass.retries;
        self.migrated.extend(pass.migrated);
        self.skipped.extend(
            pass.skipped
                .into_iter()
                .filter(|skipped| !earlier.contains(&skipped.id)),
        );
        self.failures.extend(pass.failures);
        self.visited = self.updated + self.skipped.len() + self.failures.len();
        self.finished_at = pass.finished_at.or(self.finished_at);
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    pub fn failed_ids(&self) -> Vec<DocId> {
        self.failures.iter().map(|failed| failed.id.clone()).collect()
    }

    /// Skipped candidates whose partition entry was stale.
    pub fn stale_count(&self) -> usize {
        self.skipped
            .iter()
            .filter(|skipped| matches!(skipped.reason, SkipReason::Stale { .. }))
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for MigrationRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{} -> v{} [{}]: visited {}, updated {}, skipped {}, failed {}",
            self.from_version,
            self.to_version,
            self.step,
            self.visited,
            self.updated,
            self.skipped_count(),
            self.failed_count()
        )?;
        for failed in &self.failures {
            write!(f, "\n  {}: {}", failed.id, failed.reason)?;
        }
        Ok(())
    }
}

/// Report of a chain of steps, one [`MigrationRun`] per step actually started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainRun {
    pub runs: Vec<MigrationRun>,
    /// Set when the chain stopped early because a step left failures behind.
    pub halted_at: Option<(u32, u32)>,
}

impl ChainRun {
    pub fn total_updated(&self) -> usize {
        self.runs.iter().map(|run| run.updated).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FailedDocument> {
        self.runs.iter().flat_map(|run| run.failures.iter())
    }

    pub fn is_clean(&self) -> bool {
        self.halted_at.is_none() && self.runs.iter().all(MigrationRun::is_clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> MigrationRun {
        MigrationRun::start(&MigrationStep::relabel(1, 2))
    }

    #[test]
    fn record_counts_every_outcome() {
        let mut run = run();
        run.record(DocId::new("a"), DocumentOutcome::Updated, 1);
        run.record(
            DocId::new("b"),
            DocumentOutcome::Skipped(SkipReason::Stale { found: "3".into() }),
            1,
        );
        run.record(
            DocId::new("c"),
            DocumentOutcome::Failed(FailureReason::Conflict { attempts: 3 }),
            3,
        );

        assert_eq!(run.visited, 3);
        assert_eq!(run.updated, 1);
        assert_eq!(run.skipped_count(), 1);
        assert_eq!(run.stale_count(), 1);
        assert_eq!(run.retries, 2);
        assert_eq!(run.failed_ids(), vec![DocId::new("c")]);
        assert!(!run.is_clean());
    }

    #[test]
    fn later_pass_supersedes_earlier_failures() {
        let mut first = run();
        first.record(
            DocId::new("c"),
            DocumentOutcome::Failed(FailureReason::Conflict { attempts: 3 }),
            3,
        );
        let mut second = run();
        second.record(
            DocId::new("c"),
            DocumentOutcome::Skipped(SkipReason::AlreadyMigrated),
            1,
        );

        first.absorb(second);
        assert_eq!(first.passes, 2);
        assert!(first.is_clean());
        assert_eq!(first.visited, 1);
    }

    #[test]
    fn later_pass_skips_do_not_recount_updated_documents() {
        let mut first = run();
        first.record(DocId::new("a"), DocumentOutcome::Updated, 1);
        first.record(DocId::new("b"), DocumentOutcome::Updated, 1);
        let mut second = run();
        for id in ["a", "b"] {
            second.record(
                DocId::new(id),
                DocumentOutcome::Skipped(SkipReason::AlreadyMigrated),
                1,
            );
        }
        second.record(
            DocId::new("c"),
            DocumentOutcome::Skipped(SkipReason::NotFound),
            1,
        );

        first.absorb(second);
        assert_eq!(first.updated, 2);
        assert_eq!(first.migrated, vec![DocId::new("a"), DocId::new("b")]);
        assert_eq!(first.skipped_count(), 1);
        assert_eq!(first.skipped[0].id, DocId::new("c"));
        assert_eq!(first.visited, 3);
    }

    #[test]
    fn report_serializes_reasons_inline() {
        let mut run = run();
        run.record(
            DocId::new("m"),
            DocumentOutcome::Failed(FailureReason::Malformed {
                detail: "missing field 'xp'".into(),
            }),
            1,
        );
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["failures"][0]["id"], "m");
        assert_eq!(json["failures"][0]["reason"], "malformed");
        assert!(run.to_string().contains("missing field 'xp'"));
    }
}
