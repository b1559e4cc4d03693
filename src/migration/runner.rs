use super::plan::MigrationPlan;
use super::report::{ChainRun, DocumentOutcome, FailureReason, MigrationRun, SkipReason};
use super::step::{MigrationStep, StepOutcome};
use crate::config::RunnerConfig;
use crate::core::{ConflictKind, DocId, Document, MigrateError, Result, classify_conflict};
use crate::index::VersionIndex;
use crate::store::DocumentStore;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::warn;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

/// Applies migration steps to every document in a version partition.
///
/// Partition listings are treated as hints: each candidate is re-fetched and
/// its version re-checked before the step runs, and writes are
/// revision-checked, so index lag and concurrent writers never cause a lost
/// update.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    index: VersionIndex,
    config: RunnerConfig,
}

impl MigrationRunner {
    pub fn new(index: VersionIndex, config: RunnerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { index, config })
    }

    pub fn index(&self) -> &VersionIndex {
        &self.index
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs `step` once over the current contents of its source partition.
    ///
    /// Per-document problems end up in the report. Only an unreachable store
    /// (or an invalid step) is returned as `Err`.
    pub async fn run<S>(&self, store: &S, step: &MigrationStep) -> Result<MigrationRun>
    where
        S: DocumentStore + ?Sized,
    {
        self.run_with_carried(store, step, &[]).await
    }

    /// Like `run`, with `carried` ids added to the partition listing. Used for
    /// documents an earlier step just moved into this partition, which a
    /// lagging index may not list yet.
    async fn run_with_carried<S>(
        &self,
        store: &S,
        step: &MigrationStep,
        carried: &[DocId],
    ) -> Result<MigrationRun>
    where
        S: DocumentStore + ?Sized,
    {
        step.validate()?;
        let mut candidates = self.index.list(store, step.from_version()).await?;
        let listed: BTreeSet<DocId> = candidates.iter().cloned().collect();
        candidates.extend(carried.iter().filter(|id| !listed.contains(*id)).cloned());
        self.run_for_ids(store, step, &candidates).await
    }

    /// Runs `step` over an explicit list of ids, e.g. the failures of an earlier run.
    pub async fn run_for_ids<S>(
        &self,
        store: &S,
        step: &MigrationStep,
        ids: &[DocId],
    ) -> Result<MigrationRun>
    where
        S: DocumentStore + ?Sized,
    {
        step.validate()?;
        let span = info_span!(
            "migration_run",
            step = %step.name(),
            from = step.from_version(),
            to = step.to_version(),
            candidates = ids.len()
        );

        async move {
            let mut run = MigrationRun::start(step);

            let outcomes: Vec<(DocId, DocumentOutcome, usize)> = stream::iter(ids.iter().cloned())
                .map(|id| self.migrate_document(store, step, id))
                .buffer_unordered(self.config.concurrency.max(1))
                .try_collect()
                .await
                .inspect_err(|err| {
                    event!(Level::ERROR, error = %err, "migration run aborted");
                })?;

            for (id, outcome, attempts) in outcomes {
                run.record(id, outcome, attempts);
            }
            run.finish();

            event!(
                Level::INFO,
                visited = run.visited,
                updated = run.updated,
                skipped = run.skipped_count(),
                failed = run.failed_count(),
                retries = run.retries,
                "migration run finished"
            );
            Ok(run)
        }
        .instrument(span)
        .await
    }

    /// Runs each step until its source partition is drained, then the next.
    ///
    /// Steps must be contiguous (`to` of one is `from` of the next); this is
    /// checked before anything is written. Documents a step updated are
    /// candidates of the next step even if the index has not caught up.
    pub async fn run_chain<S>(&self, store: &S, steps: &[MigrationStep]) -> Result<ChainRun>
    where
        S: DocumentStore + ?Sized,
    {
        for step in steps {
            step.validate()?;
        }
        for pair in steps.windows(2) {
            if pair[0].to_version() != pair[1].from_version() {
                return Err(MigrateError::InvalidPlan(format!(
                    "chain is not contiguous: v{} -> v{} is followed by v{} -> v{}",
                    pair[0].from_version(),
                    pair[0].to_version(),
                    pair[1].from_version(),
                    pair[1].to_version()
                )));
            }
        }

        let mut chain = ChainRun::default();
        let mut carried: Vec<DocId> = Vec::new();
        for step in steps {
            let run = self.drain(store, step, &carried).await?;
            let failed = !run.is_clean();
            carried = run.migrated.clone();
            chain.runs.push(run);

            if failed && self.config.stop_chain_on_failure {
                warn!(
                    "Migration chain halted at v{} -> v{}: failed documents remain in the source partition",
                    step.from_version(),
                    step.to_version()
                );
                chain.halted_at = Some((step.from_version(), step.to_version()));
                break;
            }
        }

        Ok(chain)
    }

    /// Resolves the plan's chain from `from_version` and runs it.
    pub async fn migrate_plan<S>(
        &self,
        store: &S,
        plan: &MigrationPlan,
        from_version: u32,
    ) -> Result<ChainRun>
    where
        S: DocumentStore + ?Sized,
    {
        plan.validate()?;
        let steps: Vec<MigrationStep> = plan
            .resolve_chain(from_version)?
            .into_iter()
            .cloned()
            .collect();
        self.run_chain(store, &steps).await
    }

    /// Repeats `run` until the partition lists nothing, a pass makes no
    /// progress, or `max_passes` is reached.
    async fn drain<S>(
        &self,
        store: &S,
        step: &MigrationStep,
        carried: &[DocId],
    ) -> Result<MigrationRun>
    where
        S: DocumentStore + ?Sized,
    {
        let mut report = self.run_with_carried(store, step, carried).await?;
        let mut last = (report.visited, report.updated);

        while last.0 > 0 && last.1 > 0 && report.passes < self.config.max_passes {
            let pass = self.run(store, step).await?;
            last = (pass.visited, pass.updated);
            report.absorb(pass);
        }

        Ok(report)
    }

    /// Fetch, re-validate, apply, compare-and-swap. Retries the whole cycle
    /// on a revision conflict.
    async fn migrate_document<S>(
        &self,
        store: &S,
        step: &MigrationStep,
        id: DocId,
    ) -> Result<(DocId, DocumentOutcome, usize)>
    where
        S: DocumentStore + ?Sized,
    {
        let retry = &self.config.conflict_retry;
        let mut attempt = 1usize;

        loop {
            let stored = match store.get(&id).await {
                Ok(stored) => stored,
                Err(err) if classify_conflict(&err) == Some(ConflictKind::Vanished) => {
                    return Ok((id, DocumentOutcome::Skipped(SkipReason::NotFound), attempt));
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    let reason = FailureReason::from_error(&err);
                    return Ok((id, DocumentOutcome::Failed(reason), attempt));
                }
            };
            let rev = stored.rev;

            let doc = match Document::from_stored(stored) {
                Ok(doc) if doc.kind == self.index.kind() => doc,
                Ok(doc) => {
                    let found = format!("kind '{}'", doc.kind);
                    return Ok((id, stale(found), attempt));
                }
                Err(err) => return Ok((id, stale(err.to_string()), attempt)),
            };

            if doc.version != step.from_version() && doc.version != step.to_version() {
                event!(Level::DEBUG, id = %id, version = doc.version, "candidate is stale");
                return Ok((id, stale(doc.version.to_string()), attempt));
            }

            let updated = match step.apply(&doc) {
                Ok(StepOutcome::Updated(updated)) => updated,
                Ok(StepOutcome::NoOp) => {
                    return Ok((id, DocumentOutcome::Skipped(SkipReason::AlreadyMigrated), attempt));
                }
                Err(err) => {
                    event!(Level::DEBUG, id = %id, error = %err, "step rejected document");
                    let reason = FailureReason::from_error(&err);
                    return Ok((id, DocumentOutcome::Failed(reason), attempt));
                }
            };

            let err = match store.put(&id, updated.to_body(), rev).await {
                Ok(_) => {
                    event!(Level::DEBUG, id = %id, to = step.to_version(), "document migrated");
                    return Ok((id, DocumentOutcome::Updated, attempt));
                }
                Err(err) => err,
            };

            match classify_conflict(&err) {
                Some(ConflictKind::RevisionMismatch) => {
                    if !retry.should_retry(attempt) {
                        let reason = FailureReason::Conflict { attempts: attempt };
                        return Ok((id, DocumentOutcome::Failed(reason), attempt));
                    }

                    let backoff_ms = retry.backoff_ms(attempt);
                    warn!(
                        "Migration write conflict on '{}' (attempt {} of {}): {} (backoff={}ms)",
                        id,
                        attempt,
                        retry.max_attempts.max(1),
                        err,
                        backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Some(ConflictKind::Vanished) => {
                    return Ok((id, DocumentOutcome::Skipped(SkipReason::NotFound), attempt));
                }
                None if err.is_fatal() => return Err(err),
                None => {
                    let reason = FailureReason::from_error(&err);
                    return Ok((id, DocumentOutcome::Failed(reason), attempt));
                }
            }
        }
    }
}

fn stale(found: String) -> DocumentOutcome {
    DocumentOutcome::Skipped(SkipReason::Stale { found })
}
