//! Polygon submission and merging of optimization results.
//!
//! A drawn polygon is named and sized locally, created on the backend,
//! sent to the optimizer, and the returned placements are merged into the
//! store as temporary points. From creation on, the polygon's [`Phase`] is
//! tracked by id. The polygon is always persisted before the optimizer sees
//! it, and a failed optimization leaves it in place.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use citymap_backend::config::OptimizeDefaults;
use citymap_backend::{BackendError, GeometryBackend};
use citymap_capacity::{CapacityCalculator, CapacityEstimate, CapacityParams};
use citymap_geometry::dedup::retain_unique;
use citymap_geometry::measure::geodesic_area_sq_m;
use citymap_geometry::{FeatureGeometry, GeometryError, ProjectionHint};
use citymap_geometry_models::{
    FeatureId, FeatureMetadata, GeometryKind, OptimizeParams, OptimizedPoint, ProjectCategory,
};

use crate::config::MapOptions;
use crate::store::{self, Feature, SharedStore};
use crate::ValidationError;

/// Where a persisted polygon is in the optimization flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the optimizer.
    Optimizing,
    /// Placements merged into the store.
    Merged,
    /// Optimization failed; the polygon is kept.
    Failed,
    /// Merged placements were persisted.
    Saved,
}

/// Errors from the submission flow.
#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    /// Input refused before any backend call.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A geometry could not be converted.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// A backend call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The optimizer returned no placements.
    #[error("The optimizer returned no placements")]
    EmptyResponse,

    /// An optimize or save for this polygon is still outstanding.
    #[error("Polygon {polygon_id} already has a request in flight")]
    InFlight {
        /// Polygon id.
        polygon_id: i64,
    },

    /// No persisted polygon has this id.
    #[error("No polygon with id {polygon_id}")]
    UnknownPolygon {
        /// Requested id.
        polygon_id: i64,
    },

    /// The polygon has no unsaved placements.
    #[error("Polygon {polygon_id} has no unsaved placements")]
    NothingToSave {
        /// Polygon id.
        polygon_id: i64,
    },
}

/// How many placements to ask for.
#[derive(Debug, Clone, PartialEq)]
pub enum CoverRequest {
    /// Let the capacity calculator decide from these parameters. The area
    /// is filled in from the polygon.
    Calculated(CapacityParams),
    /// A fixed count.
    Fixed(u32),
}

/// What the user entered for a polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub name: String,
    pub category: ProjectCategory,
    pub cover: CoverRequest,
}

/// Terminal result of an optimization.
#[derive(Debug)]
pub enum OptimizationOutcome {
    /// Placements were merged. `points` may be empty when every placement
    /// was a duplicate of an existing point.
    Merged {
        /// Persisted polygon id.
        polygon_id: i64,
        /// Capacity estimate, when the count was calculated.
        estimate: Option<CapacityEstimate>,
        /// Temporary ids of the merged points.
        points: Vec<FeatureId>,
        /// Placements dropped as duplicates.
        duplicates: usize,
        /// Points of an earlier optimization that were replaced.
        replaced: usize,
    },
    /// Nothing was merged. The polygon is still persisted.
    Failed {
        /// Persisted polygon id.
        polygon_id: i64,
        /// Why.
        error: OptimizeError,
    },
}

impl OptimizationOutcome {
    #[must_use]
    pub const fn polygon_id(&self) -> i64 {
        match self {
            Self::Merged { polygon_id, .. } | Self::Failed { polygon_id, .. } => *polygon_id,
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Result of saving a polygon's placements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// Backend ids of the saved points.
    pub saved: Vec<i64>,
    /// Placements dropped as duplicates of persisted points.
    pub duplicates: usize,
    /// Whether the store had to be reloaded to learn the new ids.
    pub reloaded: bool,
}

/// Runs the submission flow against a shared store.
pub struct OptimizationReconciler {
    backend: Arc<dyn GeometryBackend>,
    calculator: Arc<dyn CapacityCalculator>,
    store: SharedStore,
    options: MapOptions,
    defaults: OptimizeDefaults,
    hint: ProjectionHint,
    in_flight: Mutex<BTreeSet<i64>>,
    phases: Mutex<BTreeMap<i64, Phase>>,
}

struct InFlightGuard<'a> {
    set: &'a Mutex<BTreeSet<i64>>,
    polygon_id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.polygon_id);
    }
}

impl OptimizationReconciler {
    #[must_use]
    pub fn new(
        backend: Arc<dyn GeometryBackend>,
        calculator: Arc<dyn CapacityCalculator>,
        store: SharedStore,
        options: MapOptions,
        defaults: OptimizeDefaults,
        hint: ProjectionHint,
    ) -> Self {
        Self {
            backend,
            calculator,
            store,
            options,
            defaults,
            hint,
            in_flight: Mutex::new(BTreeSet::new()),
            phases: Mutex::new(BTreeMap::new()),
        }
    }

    /// The last phase a persisted polygon reached.
    #[must_use]
    pub fn phase(&self, polygon_id: i64) -> Option<Phase> {
        lock(&self.phases).get(&polygon_id).copied()
    }

    /// Whether an optimize or save for the polygon is outstanding.
    #[must_use]
    pub fn is_in_flight(&self, polygon_id: i64) -> bool {
        lock(&self.in_flight).contains(&polygon_id)
    }

    /// Validates, persists and optimizes a drawn polygon.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizeError`] when the polygon never got persisted:
    /// validation or conversion failed, or the create call failed. Once the
    /// polygon is persisted the result is always an
    /// [`OptimizationOutcome`].
    pub async fn submit(
        &self,
        geometry: FeatureGeometry,
        request: SubmitRequest,
    ) -> Result<OptimizationOutcome, OptimizeError> {
        let geometry = geometry.normalized();
        let FeatureGeometry::Polygon(_) = &geometry else {
            return Err(ValidationError::NotAPolygon.into());
        };
        let name = self.options.validate_name(&request.name)?;
        let (count, estimate, metadata) = self.size(&geometry, request.category, request.cover)?;

        log::debug!("Submitting polygon '{name}' for {count} placements");
        let mut polygon = Feature {
            id: FeatureId::new_temporary(),
            name,
            geometry,
            category: request.category,
            metadata,
            source_polygon: None,
        };
        let location = polygon.to_new_location()?;
        let polygon_id = self
            .backend
            .create_location(&location)
            .await
            .inspect_err(|e| log::error!("Failed to create polygon '{}': {e}", polygon.name))?;
        polygon.id = FeatureId::Persisted(polygon_id);
        store::lock(&self.store).upsert(polygon.clone());
        log::info!("Created polygon '{}' as {polygon_id}", polygon.name);

        let _guard = self.claim(polygon_id)?;
        Ok(self
            .optimize_and_merge(&polygon, &location.wkt, count, estimate)
            .await)
    }

    /// Re-runs the optimizer for a persisted polygon with a new count. The
    /// polygon's earlier placements are replaced on success.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizeError`] if the count is zero, the polygon is
    /// unknown, or a request for it is outstanding.
    pub async fn reoptimize(
        &self,
        polygon_id: i64,
        min_cover_count: u32,
    ) -> Result<OptimizationOutcome, OptimizeError> {
        if min_cover_count == 0 {
            return Err(ValidationError::NonPositiveCount.into());
        }
        let polygon = self.polygon(polygon_id)?;
        let _guard = self.claim(polygon_id)?;
        let wkt = polygon.geometry.to_interchange()?;
        Ok(self
            .optimize_and_merge(&polygon, &wkt, min_cover_count, None)
            .await)
    }

    /// Persists a polygon's merged placements in one bulk call, skipping
    /// any that duplicate a persisted point.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizeError`] if the polygon has nothing to save, a
    /// request for it is outstanding, or the bulk call fails. The store
    /// keeps the temporary points when the call fails.
    pub async fn save_points(&self, polygon_id: i64) -> Result<SaveReport, OptimizeError> {
        let polygon_key = FeatureId::Persisted(polygon_id);
        let _guard = self.claim(polygon_id)?;

        let (features, duplicates) = {
            let store = store::lock(&self.store);
            let pending: Vec<Feature> = store.temporary_points_for(&polygon_key).cloned().collect();
            let mut seen = store.persisted_point_keys();
            retain_unique(pending, &mut seen, Feature::point_key)
        };
        if features.is_empty() {
            return Err(OptimizeError::NothingToSave { polygon_id });
        }

        let locations = features
            .iter()
            .map(Feature::to_new_location)
            .collect::<Result<Vec<_>, _>>()?;
        let ids = self
            .backend
            .create_locations(&locations)
            .await
            .inspect_err(|e| log::error!("Failed to save points of {polygon_id}: {e}"))?;

        let complete = ids.len() == features.len();
        {
            let mut store = store::lock(&self.store);
            store.remove_temporary_points_for(&polygon_key);
            if complete {
                for (mut feature, id) in features.into_iter().zip(&ids) {
                    feature.id = FeatureId::Persisted(*id);
                    feature.source_polygon = None;
                    store.upsert(feature);
                }
            }
        }

        let reloaded = if complete {
            false
        } else {
            store::reload(
                &self.store,
                self.backend.as_ref(),
                self.hint,
                self.options.line_strings,
            )
            .await
            .inspect_err(|e| log::error!("Reload after save failed: {e}"))
            .is_ok()
        };

        self.set_phase(polygon_id, Phase::Saved);
        log::info!(
            "Saved {} points of polygon {polygon_id} ({duplicates} duplicates skipped)",
            ids.len()
        );
        Ok(SaveReport {
            saved: ids,
            duplicates,
            reloaded,
        })
    }

    /// Resolves the placement count, estimate and stored attributes.
    fn size(
        &self,
        geometry: &FeatureGeometry,
        category: ProjectCategory,
        cover: CoverRequest,
    ) -> Result<(u32, Option<CapacityEstimate>, FeatureMetadata), OptimizeError> {
        match cover {
            CoverRequest::Fixed(0) => Err(ValidationError::NonPositiveCount.into()),
            CoverRequest::Fixed(count) => Ok((
                count,
                None,
                FeatureMetadata {
                    min_cover_count: Some(count),
                    ..FeatureMetadata::default()
                },
            )),
            CoverRequest::Calculated(params) => {
                let area_sq_m = match geometry.to_geographic() {
                    FeatureGeometry::Polygon(polygon) => geodesic_area_sq_m(&polygon),
                    _ => return Err(ValidationError::NotAPolygon.into()),
                };
                let params = CapacityParams { area_sq_m, ..params };
                let estimate = self
                    .calculator
                    .calculate(category, &params)
                    .map_err(ValidationError::from)?;
                if estimate.min_cover_count == 0 {
                    return Err(ValidationError::NonPositiveCount.into());
                }
                log::debug!(
                    "Area {area_sq_m:.0} m² needs {} placements",
                    estimate.min_cover_count
                );
                Ok((
                    estimate.min_cover_count,
                    Some(estimate),
                    params.metadata(estimate.min_cover_count),
                ))
            }
        }
    }

    async fn optimize_and_merge(
        &self,
        polygon: &Feature,
        wkt: &str,
        count: u32,
        estimate: Option<CapacityEstimate>,
    ) -> OptimizationOutcome {
        let polygon_id = polygon.id.persisted().unwrap_or_default();
        self.set_phase(polygon_id, Phase::Optimizing);

        let params = OptimizeParams {
            cell_size: self.defaults.cell_size,
            new_bin_count: count,
            min_distance: self.defaults.min_distance,
            name_prefix: Some(polygon.name.clone()),
        };

        let result = match self.backend.optimize(wkt, &params).await {
            Ok(points) => self.merge(polygon, points),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok((points, duplicates, replaced)) => {
                self.set_phase(polygon_id, Phase::Merged);
                log::info!(
                    "Merged {} placements for '{}' ({duplicates} duplicates, {replaced} replaced)",
                    points.len(),
                    polygon.name
                );
                OptimizationOutcome::Merged {
                    polygon_id,
                    estimate,
                    points,
                    duplicates,
                    replaced,
                }
            }
            Err(error) => {
                self.set_phase(polygon_id, Phase::Failed);
                log::error!("Optimization of '{}' failed: {error}", polygon.name);
                OptimizationOutcome::Failed { polygon_id, error }
            }
        }
    }

    /// Converts the optimizer's points and swaps them in for the polygon's
    /// previous set. Nothing is touched if any point fails to convert.
    fn merge(
        &self,
        polygon: &Feature,
        points: Vec<OptimizedPoint>,
    ) -> Result<(Vec<FeatureId>, usize, usize), OptimizeError> {
        if points.is_empty() {
            return Err(OptimizeError::EmptyResponse);
        }

        let converted = points
            .iter()
            .enumerate()
            .map(|(index, point)| {
                let geometry = FeatureGeometry::from_interchange(&point.wkt, self.hint)?;
                if geometry.kind() != GeometryKind::Point {
                    return Err(GeometryError::Unsupported {
                        kind: geometry.kind().to_string(),
                    });
                }
                Ok(Feature {
                    id: FeatureId::new_temporary(),
                    name: format!("{}-{}", polygon.name, index + 1),
                    geometry,
                    category: polygon.category,
                    metadata: FeatureMetadata::default(),
                    source_polygon: Some(polygon.id.clone()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut store = store::lock(&self.store);
        let replaced = store.remove_temporary_points_for(&polygon.id);
        let mut seen = store.point_keys(None);
        let (kept, duplicates) = retain_unique(converted, &mut seen, Feature::point_key);
        let ids = kept.iter().map(|f| f.id.clone()).collect();
        for feature in kept {
            store.upsert(feature);
        }
        drop(store);

        Ok((ids, duplicates, replaced))
    }

    fn polygon(&self, polygon_id: i64) -> Result<Feature, OptimizeError> {
        let store = store::lock(&self.store);
        let feature = store
            .by_id(&FeatureId::Persisted(polygon_id))
            .ok_or(OptimizeError::UnknownPolygon { polygon_id })?;
        if feature.geometry.kind() != GeometryKind::Polygon {
            return Err(ValidationError::NotAPolygon.into());
        }
        Ok(feature.clone())
    }

    fn claim(&self, polygon_id: i64) -> Result<InFlightGuard<'_>, OptimizeError> {
        if !lock(&self.in_flight).insert(polygon_id) {
            log::warn!("Refusing request for polygon {polygon_id}: one is already in flight");
            return Err(OptimizeError::InFlight { polygon_id });
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            polygon_id,
        })
    }

    fn set_phase(&self, polygon_id: i64, phase: Phase) {
        log::debug!("Polygon {polygon_id}: {phase:?}");
        lock(&self.phases).insert(polygon_id, phase);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use citymap_backend::memory::{BackendCall, MemoryBackend, Operation};
    use citymap_capacity::{CapacityError, FormulaCalculator};

    use super::*;
    use crate::store::GeometryStore;

    const ZONE: &str = "POLYGON((29.1 40.98, 29.11 40.98, 29.11 40.99, 29.1 40.99, 29.1 40.98))";

    fn optimized(lon: f64, lat: f64) -> OptimizedPoint {
        OptimizedPoint {
            id: None,
            name: None,
            wkt: format!("POINT({lon} {lat})"),
        }
    }

    fn setup() -> (Arc<MemoryBackend>, SharedStore, OptimizationReconciler) {
        let backend = Arc::new(MemoryBackend::new());
        let store = GeometryStore::new().shared();
        let reconciler = OptimizationReconciler::new(
            backend.clone(),
            Arc::new(FormulaCalculator::default()),
            store.clone(),
            MapOptions::default(),
            OptimizeDefaults::default(),
            ProjectionHint::Detect,
        );
        (backend, store, reconciler)
    }

    fn zone() -> FeatureGeometry {
        FeatureGeometry::from_interchange(ZONE, ProjectionHint::Detect).unwrap()
    }

    fn request(name: &str, cover: CoverRequest) -> SubmitRequest {
        SubmitRequest {
            name: name.to_string(),
            category: ProjectCategory::WasteManagement,
            cover,
        }
    }

    fn three_points() -> Vec<OptimizedPoint> {
        vec![
            optimized(29.102, 40.982),
            optimized(29.104, 40.984),
            optimized(29.106, 40.986),
        ]
    }

    #[tokio::test]
    async fn test_zone_scenario() {
        let (backend, store, reconciler) = setup();
        backend.set_optimize_response(three_points());

        let outcome = reconciler
            .submit(zone(), request("Test-Zone", CoverRequest::Fixed(3)))
            .await
            .unwrap();

        let OptimizationOutcome::Merged { polygon_id, points, .. } = outcome else {
            panic!("expected merge, got {outcome:?}");
        };
        assert_eq!(points.len(), 3);
        assert_eq!(backend.count(Operation::Create), 1);
        assert_eq!(backend.count(Operation::Optimize), 1);
        assert_eq!(reconciler.phase(polygon_id), Some(Phase::Merged));

        let store = store::lock(&store);
        let mut names: Vec<String> = store
            .temporary_points_for(&FeatureId::Persisted(polygon_id))
            .map(|f| {
                assert_eq!(f.category, ProjectCategory::WasteManagement);
                f.name.clone()
            })
            .collect();
        names.sort();
        assert_eq!(names, ["Test-Zone-1", "Test-Zone-2", "Test-Zone-3"]);
    }

    #[tokio::test]
    async fn polygon_is_created_before_optimize() {
        let (backend, _store, reconciler) = setup();
        backend.set_optimize_response(three_points());
        reconciler
            .submit(zone(), request("Test-Zone", CoverRequest::Fixed(3)))
            .await
            .unwrap();

        let calls = backend.calls();
        assert!(matches!(&calls[0], BackendCall::Create { name } if name == "Test-Zone"));
        let BackendCall::Optimize { wkt, new_bin_count } = &calls[1] else {
            panic!("expected optimize, got {:?}", calls[1]);
        };
        assert_eq!(*new_bin_count, 3);
        assert_eq!(backend.rows()[0].wkt.as_deref(), Some(wkt.as_str()));
    }

    #[tokio::test]
    async fn failed_create_never_optimizes() {
        let (backend, store, reconciler) = setup();
        backend.fail_next(Operation::Create);

        let result = reconciler
            .submit(zone(), request("Test-Zone", CoverRequest::Fixed(3)))
            .await;
        assert!(matches!(result, Err(OptimizeError::Backend(_))));
        assert_eq!(backend.count(Operation::Optimize), 0);
        assert!(store::lock(&store).is_empty());
    }

    #[tokio::test]
    async fn optimize_failure_keeps_polygon_and_adds_nothing() {
        let (backend, store, reconciler) = setup();
        backend.fail_next(Operation::Optimize);

        let outcome = reconciler
            .submit(zone(), request("Test-Zone", CoverRequest::Fixed(3)))
            .await
            .unwrap();
        assert!(outcome.is_failure());
        assert_eq!(reconciler.phase(outcome.polygon_id()), Some(Phase::Failed));
        assert_eq!(store::lock(&store).len(), 1);
        assert_eq!(backend.rows().len(), 1);
    }

    #[tokio::test]
    async fn empty_response_is_a_failure() {
        let (_backend, store, reconciler) = setup();
        let outcome = reconciler
            .submit(zone(), request("Zone", CoverRequest::Fixed(2)))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            OptimizationOutcome::Failed {
                error: OptimizeError::EmptyResponse,
                ..
            }
        ));
        assert_eq!(store::lock(&store).len(), 1);
    }

    #[tokio::test]
    async fn malformed_point_merges_nothing() {
        let (backend, store, reconciler) = setup();
        let mut points = three_points();
        points.push(OptimizedPoint {
            id: None,
            name: None,
            wkt: "POINT(garbage)".to_string(),
        });
        backend.set_optimize_response(points);

        let outcome = reconciler
            .submit(zone(), request("Zone", CoverRequest::Fixed(4)))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            OptimizationOutcome::Failed {
                error: OptimizeError::Geometry(_),
                ..
            }
        ));
        assert_eq!(store::lock(&store).len(), 1);
    }

    #[tokio::test]
    async fn near_points_are_both_kept_and_exact_duplicates_dropped() {
        let (backend, _store, reconciler) = setup();
        backend.set_optimize_response(vec![
            optimized(29.105, 40.985),
            optimized(29.105_001, 40.984_999),
            optimized(29.105, 40.985),
        ]);

        let outcome = reconciler
            .submit(zone(), request("Zone", CoverRequest::Fixed(3)))
            .await
            .unwrap();
        let OptimizationOutcome::Merged { points, duplicates, .. } = outcome else {
            panic!("expected merge");
        };
        assert_eq!(points.len(), 2);
        assert_eq!(duplicates, 1);
    }

    #[tokio::test]
    async fn reoptimize_replaces_previous_set() {
        let (backend, store, reconciler) = setup();
        backend.set_optimize_response(three_points());
        let polygon_id = reconciler
            .submit(zone(), request("Zone", CoverRequest::Fixed(3)))
            .await
            .unwrap()
            .polygon_id();

        for _ in 0..2 {
            let outcome = reconciler.reoptimize(polygon_id, 3).await.unwrap();
            assert!(matches!(outcome, OptimizationOutcome::Merged { replaced: 3, .. }));
            assert_eq!(store::lock(&store).len(), 4);
        }

        backend.set_optimize_response(vec![optimized(29.105, 40.985)]);
        reconciler.reoptimize(polygon_id, 1).await.unwrap();
        let store = store::lock(&store);
        assert_eq!(store.temporary_points_for(&FeatureId::Persisted(polygon_id)).count(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_for_one_polygon_are_refused() {
        let (backend, _store, reconciler) = setup();
        backend.set_optimize_response(three_points());
        let polygon_id = reconciler
            .submit(zone(), request("Zone", CoverRequest::Fixed(3)))
            .await
            .unwrap()
            .polygon_id();

        let (a, b) = futures::join!(
            reconciler.reoptimize(polygon_id, 3),
            reconciler.reoptimize(polygon_id, 3)
        );
        assert!(a.is_ok());
        assert!(matches!(b, Err(OptimizeError::InFlight { .. })));
        assert_eq!(backend.count(Operation::Optimize), 2);
        assert!(!reconciler.is_in_flight(polygon_id));
    }

    #[tokio::test]
    async fn validation_blocks_backend_calls() {
        let (backend, _store, reconciler) = setup();
        let too_long = "x".repeat(51);
        let cases = [
            request("", CoverRequest::Fixed(3)),
            request(&too_long, CoverRequest::Fixed(3)),
            request("Zone", CoverRequest::Fixed(0)),
            request("Zone", CoverRequest::Calculated(CapacityParams::default())),
        ];
        for case in cases {
            assert!(matches!(
                reconciler.submit(zone(), case).await,
                Err(OptimizeError::Validation(_))
            ));
        }

        let point = FeatureGeometry::from_interchange("POINT(29 41)", ProjectionHint::Detect).unwrap();
        assert!(matches!(
            reconciler.submit(point, request("Zone", CoverRequest::Fixed(1))).await,
            Err(OptimizeError::Validation(ValidationError::NotAPolygon))
        ));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn calculated_count_uses_polygon_area() {
        let (backend, store, reconciler) = setup();
        backend.set_optimize_response(three_points());
        let params = CapacityParams {
            population_density: Some(0.01),
            ..CapacityParams::default()
        };

        let outcome = reconciler
            .submit(zone(), request("Zone", CoverRequest::Calculated(params)))
            .await
            .unwrap();
        let OptimizationOutcome::Merged {
            polygon_id,
            estimate: Some(estimate),
            ..
        } = outcome
        else {
            panic!("expected merge with estimate");
        };
        // ~0.94 km² at 0.01 people/m² and 0.79 kg/person in 96 kg containers.
        assert!((70..=85).contains(&estimate.min_cover_count));
        let BackendCall::Optimize { new_bin_count, .. } = &backend.calls()[1] else {
            panic!("expected optimize");
        };
        assert_eq!(*new_bin_count, estimate.min_cover_count);

        let store = store::lock(&store);
        let polygon = store.by_id(&FeatureId::Persisted(polygon_id)).unwrap();
        assert_eq!(polygon.metadata.population_density, Some(0.01));
        assert_eq!(polygon.metadata.min_cover_count, Some(estimate.min_cover_count));
    }

    #[tokio::test]
    async fn missing_capacity_parameter_is_reported() {
        let (_backend, _store, reconciler) = setup();
        let result = reconciler
            .submit(zone(), request("Zone", CoverRequest::Calculated(CapacityParams::default())))
            .await;
        assert!(matches!(
            result,
            Err(OptimizeError::Validation(ValidationError::Capacity(
                CapacityError::MissingParameter { .. }
            )))
        ));
    }

    #[tokio::test]
    async fn save_points_persists_and_dedups_against_saved_points() {
        let (backend, store, reconciler) = setup();
        backend.set_optimize_response(three_points());
        let polygon_id = reconciler
            .submit(zone(), request("Zone", CoverRequest::Fixed(3)))
            .await
            .unwrap()
            .polygon_id();

        let report = reconciler.save_points(polygon_id).await.unwrap();
        assert_eq!(report.saved.len(), 3);
        assert_eq!(report.duplicates, 0);
        assert!(!report.reloaded);
        assert_eq!(reconciler.phase(polygon_id), Some(Phase::Saved));
        assert_eq!(backend.rows().len(), 4);
        {
            let store = store::lock(&store);
            assert!(store.all().all(|f| !f.id.is_temporary()));
            assert!(store.by_id(&FeatureId::Persisted(report.saved[0])).is_some());
        }

        // The same placements again are all duplicates of saved points.
        let outcome = reconciler.reoptimize(polygon_id, 3).await.unwrap();
        assert!(matches!(
            outcome,
            OptimizationOutcome::Merged { ref points, duplicates: 3, .. } if points.is_empty()
        ));
        assert!(matches!(
            reconciler.save_points(polygon_id).await,
            Err(OptimizeError::NothingToSave { .. })
        ));
        assert_eq!(backend.count(Operation::CreateRange), 1);
    }

    #[tokio::test]
    async fn failed_save_keeps_temporary_points() {
        let (backend, store, reconciler) = setup();
        backend.set_optimize_response(three_points());
        let polygon_id = reconciler
            .submit(zone(), request("Zone", CoverRequest::Fixed(3)))
            .await
            .unwrap()
            .polygon_id();
        backend.fail_next(Operation::CreateRange);

        assert!(matches!(
            reconciler.save_points(polygon_id).await,
            Err(OptimizeError::Backend(_))
        ));
        assert_eq!(reconciler.phase(polygon_id), Some(Phase::Merged));
        assert_eq!(
            store::lock(&store)
                .temporary_points_for(&FeatureId::Persisted(polygon_id))
                .count(),
            3
        );
    }
}
