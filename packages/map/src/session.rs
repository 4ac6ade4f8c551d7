//! One mounted map: the store, the interaction controller and the flows
//! that talk to the backend.
//!
//! Locks on the store and the controller are only taken for synchronous
//! sections and are always released before awaiting a dialog or a backend
//! call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use citymap_backend::{BackendError, GeometryBackend};
use citymap_capacity::CapacityCalculator;
use citymap_geocoder::{GeocodeError, GeocodedAddress, Geocoder};
use citymap_geometry::projection::to_rendering;
use citymap_geometry::{FeatureGeometry, GeometryError, ProjectionHint};
use citymap_geometry_models::{FeatureId, FeatureMetadata, GeometryKind, ProjectCategory};
use geo::{Coord, Rect};

use crate::ValidationError;
use crate::config::{MapConfig, MapOptions};
use crate::dialogs::Dialogs;
use crate::interaction::{
    DrawStep, FeatureDetails, Generation, InteractionController, InteractionError, Mode,
    NameResolution,
};
use crate::reconciler::{
    OptimizationOutcome, OptimizationReconciler, OptimizeError, SaveReport, SubmitRequest,
};
use crate::store::{self, Feature, GeometryStore, LoadReport, ProjectSummary, SharedStore};
use crate::sync::{MoveReport, PersistenceSync, SyncError};

/// Errors surfaced to the front-end. None of them end the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session has not been mounted.
    #[error("Session is not mounted")]
    NotMounted,

    /// No feature has this id.
    #[error("No feature with id {id}")]
    UnknownFeature {
        /// Requested id.
        id: FeatureId,
    },

    /// No polygon is waiting for submission.
    #[error("No polygon is waiting to be submitted")]
    NoPendingPolygon,

    #[error(transparent)]
    Interaction(#[from] InteractionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Geocode(#[from] GeocodeError),
}

/// How a draw gesture ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawResult {
    /// The feature was created on the backend.
    Saved {
        /// Backend id.
        id: i64,
    },
    /// The geometry was discarded.
    Discarded {
        /// Why, when a name was refused.
        reason: Option<ValidationError>,
    },
    /// A polygon is waiting for [`MapSession::submit_pending`].
    PendingPolygon,
}

/// The state behind one mounted map.
pub struct MapSession {
    backend: Arc<dyn GeometryBackend>,
    calculator: Arc<dyn CapacityCalculator>,
    store: SharedStore,
    controller: Mutex<InteractionController>,
    /// Geometry of each feature before its first unsent move.
    originals: Mutex<BTreeMap<FeatureId, FeatureGeometry>>,
    sync: PersistenceSync,
    reconciler: OptimizationReconciler,
    options: MapOptions,
    hint: ProjectionHint,
    mounted: AtomicBool,
}

impl MapSession {
    #[must_use]
    pub fn new(
        backend: Arc<dyn GeometryBackend>,
        calculator: Arc<dyn CapacityCalculator>,
        config: &MapConfig,
    ) -> Self {
        let store = GeometryStore::new().shared();
        let hint = ProjectionHint::from(config.backend.wire_projection);
        Self {
            sync: PersistenceSync::new(backend.clone()),
            reconciler: OptimizationReconciler::new(
                backend.clone(),
                calculator.clone(),
                store.clone(),
                config.map.clone(),
                config.backend.optimize,
                hint,
            ),
            controller: Mutex::new(InteractionController::new(config.map.clone())),
            originals: Mutex::new(BTreeMap::new()),
            backend,
            calculator,
            store,
            options: config.map.clone(),
            hint,
            mounted: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn options(&self) -> &MapOptions {
        &self.options
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn reconciler(&self) -> &OptimizationReconciler {
        &self.reconciler
    }

    /// Loads every feature and marks the session mounted.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Backend`] if the initial load fails; the
    /// session stays unmounted.
    pub async fn mount(&self) -> Result<LoadReport, SessionError> {
        let report = self.reload().await?;
        self.mounted.store(true, Ordering::Release);
        log::info!(
            "Mounted with {} features ({} skipped)",
            report.loaded,
            report.skipped
        );
        Ok(report)
    }

    /// Tears down interaction state and empties the store.
    pub fn unmount(&self) {
        self.controller().cancel();
        self.originals().clear();
        self.controller().clear_selection();
        store::lock(&self.store).clear();
        self.mounted.store(false, Ordering::Release);
        log::info!("Unmounted");
    }

    /// Replaces the store with the backend's current contents.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Backend`] if the list call fails.
    pub async fn reload(&self) -> Result<LoadReport, SessionError> {
        Ok(store::reload(
            &self.store,
            self.backend.as_ref(),
            self.hint,
            self.options.line_strings,
        )
        .await
        .inspect_err(|e| log::error!("Reload failed: {e}"))?)
    }

    #[must_use]
    pub fn features(&self) -> Vec<Feature> {
        store::lock(&self.store).all().cloned().collect()
    }

    #[must_use]
    pub fn feature(&self, id: &FeatureId) -> Option<Feature> {
        store::lock(&self.store).by_id(id).cloned()
    }

    /// Bounding box of every feature, for fitting the view.
    #[must_use]
    pub fn extent(&self) -> Option<Rect<f64>> {
        store::lock(&self.store).extent()
    }

    #[must_use]
    pub fn project_summaries(&self) -> Vec<ProjectSummary> {
        store::lock(&self.store).project_summaries(self.calculator.as_ref())
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.controller().mode()
    }

    #[must_use]
    pub fn pending_polygon(&self) -> Option<FeatureGeometry> {
        self.controller().pending_polygon().cloned()
    }

    /// # Errors
    ///
    /// See [`InteractionController::begin_draw`].
    pub fn begin_draw(&self, kind: GeometryKind) -> Result<Generation, SessionError> {
        self.ensure_mounted()?;
        let generation = self.controller().begin_draw(kind)?;
        self.discard_moves();
        Ok(generation)
    }

    /// # Errors
    ///
    /// See [`InteractionController::add_vertex`].
    pub fn add_vertex(&self, generation: Generation, coord: Coord<f64>) -> Result<(), SessionError> {
        Ok(self.controller().add_vertex(generation, coord)?)
    }

    /// # Errors
    ///
    /// See [`InteractionController::undo_vertex`].
    pub fn undo_vertex(&self, generation: Generation) -> Result<Coord<f64>, SessionError> {
        Ok(self.controller().undo_vertex(generation)?)
    }

    /// Returns to idle. Moves that were not sent are undone.
    pub fn cancel(&self) -> Generation {
        let generation = self.controller().cancel();
        self.discard_moves();
        generation
    }

    /// Starts a modify session. Unsent moves of an earlier one are undone.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotMounted`] before [`Self::mount`].
    pub fn begin_modify(&self) -> Result<Generation, SessionError> {
        self.ensure_mounted()?;
        let generation = self.controller().begin_modify();
        self.discard_moves();
        Ok(generation)
    }

    /// Completes a draw gesture, asking for a radius and a name as needed,
    /// and creates the feature on the backend.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Interaction`] if the mode changed while a
    /// dialog was open, and [`SessionError::Sync`] if the create call
    /// failed (the store is reloaded in that case).
    pub async fn finish_draw(
        &self,
        generation: Generation,
        dialogs: &dyn Dialogs,
        category: ProjectCategory,
    ) -> Result<DrawResult, SessionError> {
        let mut step = self.controller().finish_draw(generation)?;
        loop {
            match step {
                DrawStep::PendingPolygon => return Ok(DrawResult::PendingPolygon),
                DrawStep::NeedsRadius { generation, .. } => {
                    let radius = dialogs.request_radius().await;
                    let next = self.controller().resolve_radius(generation, radius)?;
                    match next {
                        Some(next) => step = next,
                        None => return Ok(DrawResult::Discarded { reason: None }),
                    }
                }
                DrawStep::NeedsName { generation, .. } => {
                    let answer = dialogs.request_name("Name").await;
                    let resolution = self
                        .controller()
                        .resolve_name(generation, answer.as_deref())?;
                    return match resolution {
                        NameResolution::Accepted { name, geometry } => {
                            let id = self.add_feature(&name, geometry, category).await?;
                            Ok(DrawResult::Saved { id })
                        }
                        NameResolution::Discarded { reason } => Ok(DrawResult::Discarded { reason }),
                    };
                }
            }
        }
    }

    /// Creates a feature on the backend and adds it to the store.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the name is refused, the kind is
    /// disabled, or the create call fails (the store is reloaded in that
    /// case).
    pub async fn add_feature(
        &self,
        name: &str,
        geometry: FeatureGeometry,
        category: ProjectCategory,
    ) -> Result<i64, SessionError> {
        self.ensure_mounted()?;
        let name = self.options.validate_name(name)?;
        if geometry.kind() == GeometryKind::LineString && !self.options.line_strings {
            return Err(InteractionError::Disabled {
                kind: GeometryKind::LineString,
            }
            .into());
        }

        let mut feature = Feature {
            id: FeatureId::new_temporary(),
            name,
            geometry: geometry.normalized(),
            category,
            metadata: FeatureMetadata::default(),
            source_polygon: None,
        };
        match self.sync.create(&feature).await {
            Ok(id) => {
                feature.id = FeatureId::Persisted(id);
                store::lock(&self.store).upsert(feature);
                Ok(id)
            }
            Err(e) => {
                self.reconcile().await;
                Err(e.into())
            }
        }
    }

    /// Looks up an address and creates a point at the match, named after
    /// the address unless `name` is given. Returns `None` if nothing
    /// matched.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Geocode`] if the lookup fails, and
    /// otherwise what [`Self::add_feature`] returns.
    pub async fn add_address(
        &self,
        geocoder: &dyn Geocoder,
        address: &str,
        name: Option<&str>,
        category: ProjectCategory,
    ) -> Result<Option<(i64, GeocodedAddress)>, SessionError> {
        self.ensure_mounted()?;
        let name = self.options.validate_name(name.unwrap_or(address))?;
        let Some(found) = geocoder.geocode(address).await? else {
            log::warn!("Address not found: '{}'", address.trim());
            return Ok(None);
        };

        let position = to_rendering(Coord {
            x: found.longitude,
            y: found.latitude,
        });
        let id = self
            .add_feature(&name, FeatureGeometry::Point(position.into()), category)
            .await?;
        Ok(Some((id, found)))
    }

    /// Selects a feature and returns what its popup shows.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownFeature`] if there is no such
    /// feature.
    pub fn details(&self, id: &FeatureId) -> Result<FeatureDetails, SessionError> {
        let feature = self.require(id)?;
        self.controller().select(id.clone());
        Ok(FeatureDetails::of(&feature)?)
    }

    /// Asks for a new name and renames the feature. Returns `false` if the
    /// prompt was dismissed.
    ///
    /// # Errors
    ///
    /// See [`Self::rename_to`].
    pub async fn rename(&self, id: &FeatureId, dialogs: &dyn Dialogs) -> Result<bool, SessionError> {
        let current = self.require(id)?;
        let Some(answer) = dialogs
            .request_name(&format!("New name for '{}'", current.name))
            .await
        else {
            return Ok(false);
        };
        self.rename_to(id, &answer).await?;
        Ok(true)
    }

    /// Renames a persisted feature.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the name is refused, the feature is
    /// unknown or temporary, or the update fails (the store is reloaded in
    /// that case).
    pub async fn rename_to(&self, id: &FeatureId, name: &str) -> Result<(), SessionError> {
        let name = self.options.validate_name(name)?;
        let feature = self.require(id)?;
        match self.sync.update(id, &feature.geometry, Some(&name)).await {
            Ok(()) => {
                store::lock(&self.store).upsert(Feature { name, ..feature });
                Ok(())
            }
            Err(e @ SyncError::TemporaryId { .. }) => Err(e.into()),
            Err(e) => {
                self.reconcile().await;
                Err(e.into())
            }
        }
    }

    /// Asks for confirmation and deletes the feature. Temporary features
    /// are only removed locally. Returns `false` if the user declined.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the feature is unknown or the delete
    /// fails (the store is reloaded in that case).
    pub async fn delete(&self, id: &FeatureId, dialogs: &dyn Dialogs) -> Result<bool, SessionError> {
        let feature = self.require(id)?;
        if !dialogs.confirm(&format!("Delete '{}'?", feature.name)).await {
            return Ok(false);
        }

        if id.is_temporary() {
            store::lock(&self.store).remove(id);
        } else if let Err(e) = self.sync.delete(id).await {
            self.reconcile().await;
            return Err(e.into());
        } else {
            store::lock(&self.store).remove(id);
        }

        let mut controller = self.controller();
        if controller.selection() == Some(id) {
            controller.clear_selection();
        }
        Ok(true)
    }

    /// Records the end of a drag and moves the feature locally. Returns
    /// `false` for temporary features, which are not updated on the
    /// backend. The move is undone if the modify session is torn down
    /// before [`Self::complete_modify`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] for stale generations, outside modify mode,
    /// or for unknown features.
    pub fn record_move(
        &self,
        generation: Generation,
        id: &FeatureId,
        geometry: FeatureGeometry,
    ) -> Result<bool, SessionError> {
        let feature = self.require(id)?;
        let accepted = self
            .controller()
            .record_move(generation, id.clone(), geometry.clone())?;
        self.originals()
            .entry(id.clone())
            .or_insert_with(|| feature.geometry.clone());
        store::lock(&self.store).upsert(Feature { geometry, ..feature });
        Ok(accepted)
    }

    /// Sends every recorded move, then reloads once.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Busy`] (leaving the recorded moves in place)
    /// while another batch is in flight, and [`SessionError::Interaction`]
    /// for stale generations.
    pub async fn complete_modify(&self, generation: Generation) -> Result<MoveReport, SessionError> {
        if self.sync.is_busy() {
            log::warn!("Ignoring modify completion: a batch is in flight");
            return Err(SyncError::Busy.into());
        }
        let moves = self.controller().take_moves(generation)?;
        self.originals().clear();
        let report = self
            .sync
            .apply_moves(moves, || {
                store::reload(
                    &self.store,
                    self.backend.as_ref(),
                    self.hint,
                    self.options.line_strings,
                )
            })
            .await?;
        Ok(report)
    }

    /// Submits the pending polygon. If it is refused before reaching the
    /// backend, it stays pending.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoPendingPolygon`] if nothing was drawn, or
    /// the [`OptimizeError`] that kept the polygon from being persisted.
    pub async fn submit_pending(&self, request: SubmitRequest) -> Result<OptimizationOutcome, SessionError> {
        self.ensure_mounted()?;
        let geometry = self
            .controller()
            .take_pending_polygon()
            .ok_or(SessionError::NoPendingPolygon)?;

        match self.reconciler.submit(geometry.clone(), request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                log::warn!("Polygon submission refused: {e}");
                self.controller().restore_pending_polygon(geometry);
                Err(e.into())
            }
        }
    }

    /// Submits a polygon that did not come from a draw gesture.
    ///
    /// # Errors
    ///
    /// Returns the [`OptimizeError`] that kept the polygon from being
    /// persisted.
    pub async fn submit_polygon(
        &self,
        geometry: FeatureGeometry,
        request: SubmitRequest,
    ) -> Result<OptimizationOutcome, SessionError> {
        self.ensure_mounted()?;
        Ok(self.reconciler.submit(geometry, request).await?)
    }

    /// # Errors
    ///
    /// See [`OptimizationReconciler::reoptimize`].
    pub async fn reoptimize(
        &self,
        polygon_id: i64,
        min_cover_count: u32,
    ) -> Result<OptimizationOutcome, SessionError> {
        Ok(self.reconciler.reoptimize(polygon_id, min_cover_count).await?)
    }

    /// Asks for confirmation and saves a polygon's merged placements.
    /// Returns `None` if the user declined.
    ///
    /// # Errors
    ///
    /// See [`OptimizationReconciler::save_points`].
    pub async fn save_points(
        &self,
        polygon_id: i64,
        dialogs: &dyn Dialogs,
    ) -> Result<Option<SaveReport>, SessionError> {
        let pending = store::lock(&self.store)
            .temporary_points_for(&FeatureId::Persisted(polygon_id))
            .count();
        if !dialogs
            .confirm(&format!("Save {pending} placements?"))
            .await
        {
            return Ok(None);
        }
        Ok(Some(self.reconciler.save_points(polygon_id).await?))
    }

    fn controller(&self) -> MutexGuard<'_, InteractionController> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn originals(&self) -> MutexGuard<'_, BTreeMap<FeatureId, FeatureGeometry>> {
        self.originals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Puts features moved since the last completed modify back where
    /// they were.
    fn discard_moves(&self) {
        let originals = std::mem::take(&mut *self.originals());
        if originals.is_empty() {
            return;
        }

        let mut store = store::lock(&self.store);
        let mut restored = 0;
        for (id, geometry) in originals {
            if let Some(feature) = store.by_id(&id).cloned() {
                store.upsert(Feature { geometry, ..feature });
                restored += 1;
            }
        }
        drop(store);
        log::debug!("Undid {restored} unsent moves");
    }

    fn require(&self, id: &FeatureId) -> Result<Feature, SessionError> {
        self.feature(id)
            .ok_or_else(|| SessionError::UnknownFeature { id: id.clone() })
    }

    fn ensure_mounted(&self) -> Result<(), SessionError> {
        if self.is_mounted() {
            Ok(())
        } else {
            Err(SessionError::NotMounted)
        }
    }

    /// Reloads after a failed mutation. A failed reload is logged and
    /// otherwise ignored; the mutation's error is what the caller sees.
    async fn reconcile(&self) {
        if let Err(e) = self.reload().await {
            log::warn!("Could not reconcile after failure: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use citymap_backend::memory::{MemoryBackend, Operation};
    use citymap_capacity::FormulaCalculator;
    use citymap_geometry_models::LocationRecord;

    use super::*;
    use crate::dialogs::ScriptedDialogs;
    use crate::reconciler::CoverRequest;

    fn record(id: i64, name: &str, wkt: &str) -> LocationRecord {
        LocationRecord {
            id,
            name: Some(name.to_string()),
            wkt: Some(wkt.to_string()),
            type_n: None,
            metadata: FeatureMetadata::default(),
        }
    }

    fn session_with(backend: &Arc<MemoryBackend>) -> MapSession {
        MapSession::new(
            backend.clone(),
            Arc::new(FormulaCalculator::default()),
            &MapConfig::default(),
        )
    }

    async fn mounted(rows: Vec<LocationRecord>) -> (Arc<MemoryBackend>, MapSession) {
        let backend = Arc::new(MemoryBackend::with_rows(rows));
        let session = session_with(&backend);
        session.mount().await.unwrap();
        (backend, session)
    }

    fn rendered(lon: f64, lat: f64) -> Coord<f64> {
        citymap_geometry::projection::to_rendering(Coord { x: lon, y: lat })
    }

    #[tokio::test]
    async fn mount_loads_and_unmount_clears() {
        let (_backend, session) = mounted(vec![
            record(1, "A", "POINT(29.1 40.98)"),
            record(2, "Broken", "POINT(x)"),
        ])
        .await;
        assert!(session.is_mounted());
        assert_eq!(session.features().len(), 1);
        assert!(session.extent().is_some());

        session.unmount();
        assert!(!session.is_mounted());
        assert!(session.features().is_empty());
        assert!(matches!(
            session.begin_draw(GeometryKind::Point),
            Err(SessionError::NotMounted)
        ));
    }

    #[tokio::test]
    async fn failed_mount_stays_unmounted() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_next(Operation::List);
        let session = session_with(&backend);
        assert!(session.mount().await.is_err());
        assert!(!session.is_mounted());
    }

    #[tokio::test]
    async fn draw_point_and_save() {
        let (backend, session) = mounted(vec![]).await;
        let generation = session.begin_draw(GeometryKind::Point).unwrap();
        session.add_vertex(generation, rendered(29.105, 40.985)).unwrap();

        let dialogs = ScriptedDialogs::new().name(Some("Bin A"));
        let result = session
            .finish_draw(generation, &dialogs, ProjectCategory::WasteManagement)
            .await
            .unwrap();
        assert_eq!(result, DrawResult::Saved { id: 1 });
        assert_eq!(backend.rows()[0].wkt.as_deref(), Some("POINT(29.105 40.985)"));
        assert_eq!(session.feature(&FeatureId::Persisted(1)).unwrap().name, "Bin A");
        assert_eq!(session.mode(), Mode::Idle);
    }

    #[tokio::test]
    async fn dismissed_name_discards_without_backend_call() {
        let (backend, session) = mounted(vec![]).await;
        let generation = session.begin_draw(GeometryKind::Point).unwrap();
        session.add_vertex(generation, rendered(29.0, 41.0)).unwrap();

        let result = session
            .finish_draw(generation, &ScriptedDialogs::new(), ProjectCategory::AllProjects)
            .await
            .unwrap();
        assert_eq!(result, DrawResult::Discarded { reason: None });
        assert_eq!(backend.count(Operation::Create), 0);
    }

    struct CancellingDialogs<'a>(&'a MapSession);

    #[async_trait]
    impl Dialogs for CancellingDialogs<'_> {
        async fn request_name(&self, _prompt: &str) -> Option<String> {
            self.0.cancel();
            Some("Too late".to_string())
        }

        async fn request_radius(&self) -> Option<f64> {
            None
        }

        async fn confirm(&self, _message: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn cancel_while_naming_rejects_the_answer() {
        let (backend, session) = mounted(vec![]).await;
        let generation = session.begin_draw(GeometryKind::Point).unwrap();
        session.add_vertex(generation, rendered(29.0, 41.0)).unwrap();

        let result = session
            .finish_draw(generation, &CancellingDialogs(&session), ProjectCategory::AllProjects)
            .await;
        assert!(matches!(
            result,
            Err(SessionError::Interaction(InteractionError::Stale { .. }))
        ));
        assert_eq!(backend.count(Operation::Create), 0);
    }

    #[tokio::test]
    async fn circle_is_saved_as_polygon() {
        let backend = Arc::new(MemoryBackend::new());
        let mut config = MapConfig::default();
        config.map.circles = true;
        let session = MapSession::new(backend.clone(), Arc::new(FormulaCalculator::default()), &config);
        session.mount().await.unwrap();

        let generation = session.begin_draw(GeometryKind::Circle).unwrap();
        session.add_vertex(generation, rendered(29.0, 41.0)).unwrap();
        let dialogs = ScriptedDialogs::new().radius(Some(100.0)).name(Some("Round"));
        let result = session
            .finish_draw(generation, &dialogs, ProjectCategory::RegionPlanning)
            .await
            .unwrap();

        assert_eq!(result, DrawResult::Saved { id: 1 });
        assert!(backend.rows()[0].wkt.as_deref().unwrap().starts_with("POLYGON(("));
    }

    #[tokio::test]
    async fn pending_polygon_flow() {
        let (backend, session) = mounted(vec![]).await;
        backend.set_optimize_response(vec![
            citymap_geometry_models::OptimizedPoint {
                id: None,
                name: None,
                wkt: "POINT(29.105 40.985)".to_string(),
            },
        ]);

        let generation = session.begin_draw(GeometryKind::Polygon).unwrap();
        for (lon, lat) in [(29.1, 40.98), (29.11, 40.98), (29.11, 40.99)] {
            session.add_vertex(generation, rendered(lon, lat)).unwrap();
        }
        let result = session
            .finish_draw(generation, &ScriptedDialogs::new(), ProjectCategory::WasteManagement)
            .await
            .unwrap();
        assert_eq!(result, DrawResult::PendingPolygon);
        assert_eq!(backend.calls().len(), 1);

        let refused = session
            .submit_pending(SubmitRequest {
                name: String::new(),
                category: ProjectCategory::WasteManagement,
                cover: CoverRequest::Fixed(1),
            })
            .await;
        assert!(matches!(refused, Err(SessionError::Optimize(OptimizeError::Validation(_)))));
        assert!(session.pending_polygon().is_some());

        let outcome = session
            .submit_pending(SubmitRequest {
                name: "Zone".to_string(),
                category: ProjectCategory::WasteManagement,
                cover: CoverRequest::Fixed(1),
            })
            .await
            .unwrap();
        assert!(!outcome.is_failure());
        assert!(session.pending_polygon().is_none());
        assert_eq!(session.features().len(), 2);

        let report = session
            .save_points(outcome.polygon_id(), &ScriptedDialogs::new().confirm_with(true))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.saved.len(), 1);
        let summaries = session.project_summaries();
        assert_eq!(summaries[0].point_count, 1);
        assert_eq!(summaries[0].capacity, Some(96.0));
    }

    #[tokio::test]
    async fn modify_batch_updates_then_reloads_once() {
        let (backend, session) = mounted(vec![
            record(1, "A", "POINT(29.1 40.98)"),
            record(2, "B", "POINT(29.2 40.98)"),
        ])
        .await;

        let generation = session.begin_modify().unwrap();
        let moved = FeatureGeometry::Point(rendered(29.15, 40.99).into());
        assert!(session
            .record_move(generation, &FeatureId::Persisted(1), moved)
            .unwrap());

        let report = session.complete_modify(generation).await.unwrap();
        assert_eq!(report.updated, [1]);
        assert!(report.is_complete());
        assert_eq!(backend.count(Operation::List), 2);
        assert_eq!(backend.rows()[0].wkt.as_deref(), Some("POINT(29.15 40.99)"));
    }

    #[tokio::test]
    async fn second_modify_completion_is_ignored_while_in_flight() {
        let (backend, session) = mounted(vec![record(1, "A", "POINT(29.1 40.98)")]).await;
        let generation = session.begin_modify().unwrap();
        let moved = FeatureGeometry::Point(rendered(29.15, 40.99).into());
        session
            .record_move(generation, &FeatureId::Persisted(1), moved)
            .unwrap();

        let (first, second) = futures::join!(
            session.complete_modify(generation),
            session.complete_modify(generation)
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(SessionError::Sync(SyncError::Busy))));
        assert_eq!(backend.count(Operation::Update), 1);
        assert_eq!(backend.count(Operation::List), 2);
    }

    #[tokio::test]
    async fn cancelled_modify_puts_features_back() {
        let (backend, session) = mounted(vec![record(1, "A", "POINT(29.2 40.9)")]).await;
        let id = FeatureId::Persisted(1);
        let before = session.feature(&id).unwrap().geometry;

        let generation = session.begin_modify().unwrap();
        let moved = FeatureGeometry::Point(rendered(29.5, 40.5).into());
        session.record_move(generation, &id, moved.clone()).unwrap();
        let again = FeatureGeometry::Point(rendered(29.6, 40.4).into());
        session.record_move(generation, &id, again).unwrap();
        assert_ne!(session.feature(&id).unwrap().geometry, before);

        session.cancel();
        assert_eq!(session.feature(&id).unwrap().geometry, before);
        assert_eq!(backend.count(Operation::Update), 0);

        // Starting a draw also abandons the moves.
        let generation = session.begin_modify().unwrap();
        session.record_move(generation, &id, moved).unwrap();
        session.begin_draw(GeometryKind::Point).unwrap();
        assert_eq!(session.feature(&id).unwrap().geometry, before);
        assert_eq!(backend.count(Operation::Update), 0);
    }

    #[tokio::test]
    async fn completed_modify_keeps_moves_after_cancel() {
        let (_backend, session) = mounted(vec![record(1, "A", "POINT(29.2 40.9)")]).await;
        let id = FeatureId::Persisted(1);

        let generation = session.begin_modify().unwrap();
        let moved = FeatureGeometry::Point(rendered(29.5, 40.5).into());
        session.record_move(generation, &id, moved).unwrap();
        session.complete_modify(generation).await.unwrap();
        session.cancel();

        let details = session.details(&id).unwrap();
        assert_eq!(details.wkt, "POINT(29.5 40.5)");
    }

    #[tokio::test]
    async fn moved_placements_survive_modify_and_save() {
        let (backend, session) = mounted(vec![]).await;
        backend.set_optimize_response(
            [(29.105, 40.985), (29.106, 40.986)]
                .into_iter()
                .map(|(lon, lat)| citymap_geometry_models::OptimizedPoint {
                    id: None,
                    name: None,
                    wkt: format!("POINT({lon} {lat})"),
                })
                .collect(),
        );
        let zone = FeatureGeometry::from_interchange(
            "POLYGON((29.1 40.98, 29.11 40.98, 29.11 40.99, 29.1 40.99, 29.1 40.98))",
            ProjectionHint::Detect,
        )
        .unwrap();
        let outcome = session
            .submit_polygon(
                zone,
                SubmitRequest {
                    name: "Zone".to_string(),
                    category: ProjectCategory::WasteManagement,
                    cover: CoverRequest::Fixed(2),
                },
            )
            .await
            .unwrap();
        let OptimizationOutcome::Merged {
            polygon_id, points, ..
        } = outcome
        else {
            panic!("expected merged placements");
        };

        let generation = session.begin_modify().unwrap();
        let moved = FeatureGeometry::Point(rendered(29.107, 40.987).into());
        assert!(!session.record_move(generation, &points[0], moved).unwrap());
        let report = session.complete_modify(generation).await.unwrap();
        assert!(report.updated.is_empty());
        assert!(report.reloaded);
        session.cancel();

        let temporaries = session
            .features()
            .into_iter()
            .filter(|f| f.id.is_temporary())
            .count();
        assert_eq!(temporaries, 2);

        let saved = session
            .save_points(polygon_id, &ScriptedDialogs::new().confirm_with(true))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.saved.len(), 2);
        assert!(backend
            .rows()
            .iter()
            .any(|row| row.wkt.as_deref() == Some("POINT(29.107 40.987)")));
    }

    #[tokio::test]
    async fn rename_validates_and_updates() {
        let (backend, session) = mounted(vec![record(1, "A", "POINT(29.1 40.98)")]).await;
        let id = FeatureId::Persisted(1);

        let too_long = "x".repeat(51);
        let dialogs = ScriptedDialogs::new().name(Some(&too_long));
        assert!(matches!(
            session.rename(&id, &dialogs).await,
            Err(SessionError::Validation(ValidationError::NameTooLong { .. }))
        ));
        assert_eq!(backend.count(Operation::Update), 0);

        let dialogs = ScriptedDialogs::new().name(Some("Renamed"));
        assert!(session.rename(&id, &dialogs).await.unwrap());
        assert_eq!(session.feature(&id).unwrap().name, "Renamed");
        assert_eq!(backend.rows()[0].name.as_deref(), Some("Renamed"));
    }

    struct FixedGeocoder(Option<(f64, f64)>);

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, _query: &str) -> Result<Option<GeocodedAddress>, GeocodeError> {
            Ok(self.0.map(|(longitude, latitude)| GeocodedAddress {
                latitude,
                longitude,
                matched_address: None,
            }))
        }
    }

    #[tokio::test]
    async fn address_becomes_a_named_point() {
        let (backend, session) = mounted(vec![]).await;
        let geocoder = FixedGeocoder(Some((29.105, 40.985)));

        let (id, found) = session
            .add_address(&geocoder, " Bağdat Caddesi 1 ", None, ProjectCategory::AllProjects)
            .await
            .unwrap()
            .unwrap();
        assert!((found.latitude - 40.985).abs() < 1e-12);
        assert_eq!(backend.rows()[0].wkt.as_deref(), Some("POINT(29.105 40.985)"));
        assert_eq!(session.feature(&FeatureId::Persisted(id)).unwrap().name, "Bağdat Caddesi 1");

        let (id, _) = session
            .add_address(&geocoder, "Somewhere", Some("Bin B"), ProjectCategory::WasteManagement)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.feature(&FeatureId::Persisted(id)).unwrap().name, "Bin B");
    }

    #[tokio::test]
    async fn unmatched_or_unnameable_address_creates_nothing() {
        let (backend, session) = mounted(vec![]).await;

        let missing = session
            .add_address(&FixedGeocoder(None), "Nowhere 1", None, ProjectCategory::AllProjects)
            .await
            .unwrap();
        assert!(missing.is_none());

        let long = "x".repeat(51);
        let refused = session
            .add_address(
                &FixedGeocoder(Some((29.0, 41.0))),
                &long,
                None,
                ProjectCategory::AllProjects,
            )
            .await;
        assert!(matches!(
            refused,
            Err(SessionError::Validation(ValidationError::NameTooLong { .. }))
        ));
        assert_eq!(backend.count(Operation::Create), 0);
    }

    #[tokio::test]
    async fn delete_flows() {
        let (backend, session) = mounted(vec![
            record(1, "A", "POINT(29.1 40.98)"),
            record(2, "B", "POINT(29.2 40.98)"),
        ])
        .await;

        let declined = ScriptedDialogs::new().confirm_with(false);
        assert!(!session.delete(&FeatureId::Persisted(1), &declined).await.unwrap());
        assert_eq!(backend.count(Operation::Delete), 0);

        session.details(&FeatureId::Persisted(1)).unwrap();
        let confirmed = ScriptedDialogs::new().confirm_with(true);
        assert!(session.delete(&FeatureId::Persisted(1), &confirmed).await.unwrap());
        assert!(session.feature(&FeatureId::Persisted(1)).is_none());

        backend.fail_next(Operation::Delete);
        let confirmed = ScriptedDialogs::new().confirm_with(true);
        assert!(session.delete(&FeatureId::Persisted(2), &confirmed).await.is_err());
        assert_eq!(backend.count(Operation::List), 2);
        assert!(session.feature(&FeatureId::Persisted(2)).is_some());
    }
}
