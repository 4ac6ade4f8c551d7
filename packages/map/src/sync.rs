//! Backend mutations for individual features.
//!
//! Failures never roll back local state: the caller reloads the store to
//! reconcile with whatever the backend actually holds.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use citymap_backend::{BackendError, GeometryBackend};
use citymap_geometry::{FeatureGeometry, GeometryError};
use citymap_geometry_models::{FeatureId, LocationUpdate};

use crate::store::Feature;

/// Errors from persistence calls.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The feature has never been persisted, so it has no backend row to
    /// change.
    #[error("Feature {id} is not persisted")]
    TemporaryId {
        /// The temporary id.
        id: FeatureId,
    },

    /// The geometry could not be converted to WKT.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The backend call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A move batch is already being applied.
    #[error("A modify batch is already in flight")]
    Busy,
}

/// Result of a move batch.
#[derive(Debug, Default)]
pub struct MoveReport {
    /// Ids the backend accepted.
    pub updated: Vec<i64>,
    /// Ids the backend refused, with the error.
    pub failed: Vec<(FeatureId, SyncError)>,
    /// Whether the reload after the batch succeeded.
    pub reloaded: bool,
}

impl MoveReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.reloaded
    }
}

/// Persistence calls over a [`GeometryBackend`].
pub struct PersistenceSync {
    backend: Arc<dyn GeometryBackend>,
    busy: AtomicBool,
}

/// Releases the busy latch when dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PersistenceSync {
    #[must_use]
    pub fn new(backend: Arc<dyn GeometryBackend>) -> Self {
        Self {
            backend,
            busy: AtomicBool::new(false),
        }
    }

    /// Whether a move batch is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Creates a row for `feature` and returns its new id. The feature's
    /// own id is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the geometry cannot be written or the call
    /// fails.
    pub async fn create(&self, feature: &Feature) -> Result<i64, SyncError> {
        let location = feature.to_new_location()?;
        let id = self
            .backend
            .create_location(&location)
            .await
            .inspect_err(|e| log::error!("Failed to create '{}': {e}", feature.name))?;
        log::info!("Created '{}' as {id}", feature.name);
        Ok(id)
    }

    /// Writes `feature`'s geometry (and `name`, when renaming) to row `id`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TemporaryId`] before any network call for
    /// temporary ids.
    pub async fn update(
        &self,
        id: &FeatureId,
        geometry: &FeatureGeometry,
        name: Option<&str>,
    ) -> Result<(), SyncError> {
        let backend_id = persisted(id)?;
        let update = LocationUpdate {
            id: backend_id,
            name: name.map(str::to_string),
            wkt: geometry.to_interchange()?,
        };
        self.backend
            .update_location(&update)
            .await
            .inspect_err(|e| log::error!("Failed to update {backend_id}: {e}"))?;
        Ok(())
    }

    /// Deletes row `id`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TemporaryId`] before any network call for
    /// temporary ids.
    pub async fn delete(&self, id: &FeatureId) -> Result<(), SyncError> {
        let backend_id = persisted(id)?;
        self.backend
            .delete_location(backend_id)
            .await
            .inspect_err(|e| log::error!("Failed to delete {backend_id}: {e}"))?;
        log::info!("Deleted {backend_id}");
        Ok(())
    }

    /// Creates rows for `features` in one call.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if any geometry cannot be written or the call
    /// fails.
    pub async fn create_range(&self, features: &[Feature]) -> Result<Vec<i64>, SyncError> {
        let locations = features
            .iter()
            .map(Feature::to_new_location)
            .collect::<Result<Vec<_>, _>>()?;
        let ids = self
            .backend
            .create_locations(&locations)
            .await
            .inspect_err(|e| log::error!("Failed to create {} features: {e}", features.len()))?;
        log::info!("Created {} features", ids.len());
        Ok(ids)
    }

    /// Applies a batch of moves one update at a time, then calls `reload`
    /// exactly once after every update has settled.
    ///
    /// A failed update does not stop the batch. Temporary ids are reported
    /// as failures without a network call.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Busy`] if another batch is in flight; nothing
    /// is sent in that case.
    pub async fn apply_moves<F, Fut, R, E>(
        &self,
        moves: Vec<(FeatureId, FeatureGeometry)>,
        reload: F,
    ) -> Result<MoveReport, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: std::fmt::Display,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Ignoring modify batch: another batch is in flight");
            return Err(SyncError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        let mut report = MoveReport::default();
        for (id, geometry) in moves {
            match self.update(&id, &geometry, None).await {
                Ok(()) => {
                    if let Some(backend_id) = id.persisted() {
                        report.updated.push(backend_id);
                    }
                }
                Err(e) => {
                    log::warn!("Move of {id} failed: {e}");
                    report.failed.push((id, e));
                }
            }
        }

        match reload().await {
            Ok(_) => report.reloaded = true,
            Err(e) => log::error!("Reload after modify batch failed: {e}"),
        }

        log::info!(
            "Modify batch: {} updated, {} failed",
            report.updated.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

fn persisted(id: &FeatureId) -> Result<i64, SyncError> {
    id.persisted().ok_or_else(|| {
        log::warn!("Refusing to send temporary id {id} to the backend");
        SyncError::TemporaryId { id: id.clone() }
    })
}
