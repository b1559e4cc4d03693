use super::step::MigrationStep;
use crate::core::{MigrateError, Result};
use std::collections::{HashMap, HashSet};

/// An ordered set of steps leading up to `current_version`.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    current_version: u32,
    steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Creates an empty plan targeting `current_version`.
    pub fn new(current_version: u32) -> Self {
        Self {
            current_version,
            steps: Vec::new(),
        }
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Adds a step, validating the plan immediately.
    pub fn add_step(&mut self, step: MigrationStep) -> Result<()> {
        self.steps.push(step);
        if let Err(err) = self.validate() {
            self.steps.pop();
            return Err(err);
        }
        Ok(())
    }

    pub fn with_step(mut self, step: MigrationStep) -> Result<Self> {
        self.add_step(step)?;
        Ok(self)
    }

    /// Checks:
    /// - version validity (>= 1),
    /// - step direction and bounds,
    /// - no two steps starting at the same version.
    pub fn validate(&self) -> Result<()> {
        if self.current_version == 0 {
            return Err(MigrateError::InvalidPlan(
                "schema version must be >= 1".to_string(),
            ));
        }

        let mut seen_from = HashSet::<u32>::new();
        for step in &self.steps {
            step.validate()?;
            if step.to_version() > self.current_version {
                return Err(MigrateError::InvalidPlan(format!(
                    "step {} -> {} exceeds current schema version {}",
                    step.from_version(),
                    step.to_version(),
                    self.current_version
                )));
            }
            if !seen_from.insert(step.from_version()) {
                return Err(MigrateError::InvalidPlan(format!(
                    "duplicate step starting at version {}",
                    step.from_version()
                )));
            }
        }

        Ok(())
    }

    /// Ordered steps taking a document from `from_version` to `current_version`.
    pub fn resolve_chain(&self, from_version: u32) -> Result<Vec<&MigrationStep>> {
        if from_version > self.current_version {
            return Err(MigrateError::InvalidPlan(format!(
                "cannot migrate down from version {} to {}",
                from_version, self.current_version
            )));
        }

        let by_from: HashMap<u32, &MigrationStep> = self
            .steps
            .iter()
            .map(|step| (step.from_version(), step))
            .collect();

        let mut cursor = from_version;
        let mut chain = Vec::new();
        while cursor < self.current_version {
            let step = by_from.get(&cursor).copied().ok_or_else(|| {
                MigrateError::InvalidPlan(format!(
                    "missing step starting at version {} for target {}",
                    cursor, self.current_version
                ))
            })?;
            chain.push(step);
            cursor = step.to_version();
        }

        Ok(chain)
    }
}
