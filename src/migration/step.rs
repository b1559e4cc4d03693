use crate::core::{Document, MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Field-update function run by a step. Must be deterministic in its input.
pub type TransformFn = Arc<dyn Fn(&mut Document) -> Result<()> + Send + Sync>;

/// Result of applying a step to one document.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Updated(Document),
    /// The document is already at the step's target version.
    NoOp,
}

/// A single `from_version -> to_version` transformation.
///
/// Steps are defined once and applied to many documents. The transform only
/// recomputes fields; advancing `version` is done by [`MigrationStep::apply`].
#[derive(Clone)]
pub struct MigrationStep {
    from_version: u32,
    to_version: u32,
    name: String,
    transform: TransformFn,
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl MigrationStep {
    pub fn new<F>(from_version: u32, to_version: u32, name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&mut Document) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            from_version,
            to_version,
            name: name.into(),
            transform: Arc::new(transform),
        }
    }

    /// A step that only moves documents to the next version.
    pub fn relabel(from_version: u32, to_version: u32) -> Self {
        Self::new(
            from_version,
            to_version,
            format!("relabel v{from_version}->v{to_version}"),
            |_| Ok(()),
        )
    }

    /// A step that recomputes a level-style field from an experience-style field.
    pub fn recompute_level(from_version: u32, to_version: u32, formula: LevelFormula) -> Self {
        let name = format!(
            "{} from {} /{} (v{from_version}->v{to_version})",
            formula.target_field, formula.source_field, formula.divisor
        );
        Self::new(from_version, to_version, name, move |doc| formula.apply(doc))
    }

    pub fn from_version(&self) -> u32 {
        self.from_version
    }

    pub fn to_version(&self) -> u32 {
        self.to_version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn validate(&self) -> Result<()> {
        if self.from_version == 0 {
            return Err(MigrationStep::invalid("'from_version' must be >= 1"));
        }
        if self.to_version <= self.from_version {
            return Err(MigrationStep::invalid(format!(
                "step {} -> {} does not move forward",
                self.from_version, self.to_version
            )));
        }
        Ok(())
    }

    fn invalid(message: impl Into<String>) -> MigrateError {
        MigrateError::InvalidPlan(message.into())
    }

    /// Applies the step to a document at `from_version`.
    ///
    /// A document already at `to_version` yields `NoOp`; any other version is
    /// `StaleVersion`. The input is never modified.
    pub fn apply(&self, doc: &Document) -> Result<StepOutcome> {
        if doc.version == self.to_version {
            return Ok(StepOutcome::NoOp);
        }
        if doc.version != self.from_version {
            return Err(MigrateError::StaleVersion {
                id: doc.id.to_string(),
                expected: self.from_version,
                found: doc.version.to_string(),
            });
        }

        let mut updated = doc.clone();
        (self.transform)(&mut updated)?;
        updated.version = self.to_version;
        Ok(StepOutcome::Updated(updated))
    }
}

/// How a division result is rounded to an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoundingPolicy {
    /// Truncating integer division.
    #[default]
    Floor,
    /// Round half up.
    Nearest,
    Ceil,
}

impl RoundingPolicy {
    /// Divides a non-negative numerator by a positive divisor.
    ///
    /// Returns `None` for a negative numerator or a divisor that is not positive.
    pub fn divide(self, numerator: i64, divisor: i64) -> Option<i64> {
        if numerator < 0 || divisor <= 0 {
            return None;
        }
        let quotient = numerator.checked_div(divisor)?;
        let remainder = numerator.checked_rem(divisor)?;
        let round_up = match self {
            Self::Floor => false,
            Self::Ceil => remainder > 0,
            Self::Nearest => remainder > 0 && remainder >= divisor - remainder,
        };
        if round_up { quotient.checked_add(1) } else { Some(quotient) }
    }
}

/// `target = round(source / divisor) + base`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelFormula {
    pub source_field: String,
    pub target_field: String,
    pub divisor: i64,
    pub base: i64,
    pub rounding: RoundingPolicy,
}

impl LevelFormula {
    /// Level from `xp`: `xp / divisor + 1`, truncating.
    pub fn per_xp(divisor: i64) -> Self {
        Self {
            source_field: "xp".to_string(),
            target_field: "level".to_string(),
            divisor,
            base: 1,
            rounding: RoundingPolicy::Floor,
        }
    }

    pub fn with_rounding(mut self, rounding: RoundingPolicy) -> Self {
        self.rounding = rounding;
        self
    }

    pub fn with_fields(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_field = source.into();
        self.target_field = target.into();
        self
    }

    pub fn compute(&self, source: i64) -> std::result::Result<i64, String> {
        if self.divisor <= 0 {
            return Err(format!("divisor must be positive, got {}", self.divisor));
        }
        if source < 0 {
            return Err(format!(
                "'{}' must not be negative, got {source}",
                self.source_field
            ));
        }
        self.rounding
            .divide(source, self.divisor)
            .and_then(|quotient| quotient.checked_add(self.base))
            .ok_or_else(|| format!("'{}' overflows", self.target_field))
    }

    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        let source = doc.get_i64(&self.source_field)?;
        let level = self
            .compute(source)
            .map_err(|reason| MigrateError::malformed(doc.id.as_str(), reason))?;
        doc.set(&self.target_field, level)
    }
}
