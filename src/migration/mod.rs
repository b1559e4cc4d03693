//! Migration steps, plans and the runner that applies them.
//!
//! - `step.rs` - one `vN -> vN+1` transformation and the level formulas
//! - `plan.rs` - ordered, validated sets of steps
//! - `runner.rs` - partition-driven execution with optimistic writes
//! - `report.rs` - per-run and per-chain reports

mod plan;
mod report;
mod runner;
mod step;

pub use plan::MigrationPlan;
pub use report::{
    ChainRun, FailedDocument, FailureReason, MigrationRun, SkipReason, SkippedDocument,
};
pub use runner::MigrationRunner;
pub use step::{LevelFormula, MigrationStep, RoundingPolicy, StepOutcome, TransformFn};
