//! One-time migration from the legacy flat key/value store.
//!
//! Before the SQLite store existed, the editor kept its entire state as one
//! JSON blob under a fixed key, shaped as `{ "state": { <collection>: {...} } }`.
//! On start-up that blob is copied into the project record and then removed.
//!
//! The copy and the removal touch two stores that share no transaction, so
//! they are two steps: the legacy key is deleted only after the save commits.
//! A crash in between leaves both copies, and the next start simply migrates
//! again (saving the same snapshot twice is harmless).

use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};

use questdesk_core::{DomainError, ProjectSnapshot};

use crate::kv::KeyValueStore;
use crate::store::ProjectStore;

/// Result of a migration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No legacy record was found; nothing changed.
    NotNeeded,
    /// The legacy record was saved as the project snapshot and removed.
    Migrated { documents: usize },
    /// A step failed; see `reason`. The legacy record is kept when reading,
    /// parsing or saving failed, so a later run can retry.
    Failed { reason: String },
}

impl MigrationOutcome {
    /// `true` only when a legacy record was migrated by this call.
    pub fn migrated(&self) -> bool {
        matches!(self, MigrationOutcome::Migrated { .. })
    }
}

/// Move the legacy blob under `legacy_key` into the project store.
///
/// Never returns an error: failures are logged and reported as
/// [`MigrationOutcome::Failed`].
#[instrument(skip(store, legacy))]
pub async fn migrate_from_legacy_store(
    store: &ProjectStore,
    legacy: &dyn KeyValueStore,
    legacy_key: &str,
) -> MigrationOutcome {
    let raw = match legacy.get(legacy_key) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("no legacy record; migration not needed");
            return MigrationOutcome::NotNeeded;
        }
        Err(err) => {
            warn!(error = %err, "failed to read legacy record");
            return MigrationOutcome::Failed {
                reason: format!("read legacy record: {err}"),
            };
        }
    };

    let snapshot = match parse_legacy(&raw) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            error!(error = %err, "legacy record is not a valid project state; keeping it");
            return MigrationOutcome::Failed {
                reason: format!("parse legacy record: {err}"),
            };
        }
    };

    if let Err(err) = store.save_project(&snapshot).await {
        error!(error = %err, "failed to save migrated snapshot; keeping legacy record");
        return MigrationOutcome::Failed {
            reason: format!("save migrated snapshot: {err}"),
        };
    }

    if let Err(err) = legacy.remove(legacy_key) {
        warn!(error = %err, "migrated snapshot saved but legacy record could not be removed");
        return MigrationOutcome::Failed {
            reason: format!("remove legacy record: {err}"),
        };
    }

    let documents = snapshot.document_count();
    info!(documents, "migrated legacy project state");
    MigrationOutcome::Migrated { documents }
}

/// Decode the legacy `{ state: {...} }` envelope into a snapshot.
///
/// Missing or `null` collections become empty; unknown keys are ignored.
fn parse_legacy(raw: &str) -> Result<ProjectSnapshot, DomainError> {
    let envelope: Value =
        serde_json::from_str(raw).map_err(|e| DomainError::corrupt(e.to_string()))?;

    let state = match envelope {
        Value::Object(mut root) => root.remove("state").unwrap_or(Value::Null),
        _ => return Err(DomainError::corrupt("legacy record is not a JSON object")),
    };

    let state = match state {
        Value::Null => Map::new(),
        Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => return Err(DomainError::corrupt("legacy `state` is not a JSON object")),
    };

    ProjectSnapshot::from_value(Value::Object(state))
}
