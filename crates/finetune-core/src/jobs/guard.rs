//! Slug validation before a job is created or renamed.

use finetune_training::{BaseModelRegistry, FineTuneId, validate_slug};
use rusqlite::Connection;
use tracing::debug;

use crate::error::{ConflictReason, FineTuneError, Result};
use crate::storage::{FineTuneRepository, SqliteFineTuneRepository};

/// Checks a candidate slug against its format, the reserved names and the
/// slugs already in use.
///
/// The check is advisory: it runs outside the write transaction, so two
/// requests can both pass it. The unique index on `fine_tunes.slug` decides
/// the race and its violation surfaces as the same `SlugExists` conflict.
pub struct UniquenessGuard<'a> {
    registry: &'a BaseModelRegistry,
}

impl<'a> UniquenessGuard<'a> {
    pub fn new(registry: &'a BaseModelRegistry) -> Self {
        Self { registry }
    }

    /// Validates `slug`, ignoring the job `exclude` when renaming it.
    pub fn validate(
        &self,
        conn: &Connection,
        slug: &str,
        exclude: Option<&FineTuneId>,
    ) -> Result<()> {
        validate_slug(slug)?;

        if self.registry.is_comparison_model_name(slug) {
            debug!(slug = %slug, "Rejected reserved fine tune slug");
            return Err(FineTuneError::Conflict(ConflictReason::ReservedName));
        }

        let holder = SqliteFineTuneRepository::new(conn).find_by_slug(slug)?;
        match holder {
            Some(existing) if Some(&existing.id) != exclude => {
                debug!(slug = %slug, holder = %existing.id, "Rejected taken fine tune slug");
                Err(FineTuneError::Conflict(ConflictReason::SlugExists))
            }
            _ => Ok(()),
        }
    }
}
