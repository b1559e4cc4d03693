//! Player documents and their schema history.
//!
//! - v1: `name`, `xp`
//! - v2: adds `level = xp / 100 + 1`
//! - v3: `level` recomputed as `xp / 200 + 1`

use crate::core::{DocId, KIND_FIELD, Result, VERSION_FIELD};
use crate::index::VersionIndex;
use crate::migration::{LevelFormula, MigrationPlan, MigrationStep};
use crate::store::DocumentStore;
use serde_json::{Value as JsonValue, json};

pub const PLAYER_KIND: &str = "player";
pub const NAME_FIELD: &str = "name";
pub const XP_FIELD: &str = "xp";
pub const LEVEL_FIELD: &str = "level";
pub const LATEST_VERSION: u32 = 3;

/// Body of a new player document at `version`.
pub fn player(name: &str, version: u32, xp: i64) -> JsonValue {
    json!({
        KIND_FIELD: PLAYER_KIND,
        VERSION_FIELD: version,
        NAME_FIELD: name,
        XP_FIELD: xp,
    })
}

pub fn level_formula_v2() -> LevelFormula {
    LevelFormula::per_xp(100).with_fields(XP_FIELD, LEVEL_FIELD)
}

pub fn level_formula_v3() -> LevelFormula {
    LevelFormula::per_xp(200).with_fields(XP_FIELD, LEVEL_FIELD)
}

pub fn v1_to_v2() -> MigrationStep {
    MigrationStep::recompute_level(1, 2, level_formula_v2())
}

pub fn v2_to_v3() -> MigrationStep {
    MigrationStep::recompute_level(2, 3, level_formula_v3())
}

pub fn steps() -> Vec<MigrationStep> {
    vec![v1_to_v2(), v2_to_v3()]
}

pub fn plan() -> Result<MigrationPlan> {
    MigrationPlan::new(LATEST_VERSION)
        .with_step(v1_to_v2())?
        .with_step(v2_to_v3())
}

pub fn version_index() -> Result<VersionIndex> {
    VersionIndex::new(PLAYER_KIND, 1..=LATEST_VERSION)
}

/// Inserts `count` players at `version`, named `"{prefix} {n}"` with `xp = n * 150`.
pub async fn seed<S>(store: &S, prefix: &str, version: u32, count: usize) -> Result<Vec<DocId>>
where
    S: DocumentStore + ?Sized,
{
    let mut ids = Vec::with_capacity(count);
    for n in 1..=count {
        let body = player(&format!("{prefix} {n}"), version, n as i64 * 150);
        let (id, _) = store.insert(body).await?;
        ids.push(id);
    }
    Ok(ids)
}
