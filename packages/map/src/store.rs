//! The client-side collection of features.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use citymap_backend::{BackendError, GeometryBackend};
use citymap_capacity::CapacityCalculator;
use citymap_geometry::measure::extent;
use citymap_geometry::{CoordKey, FeatureGeometry, GeometryError, ProjectionHint};
use citymap_geometry_models::{
    FeatureId, FeatureMetadata, GeometryKind, LocationRecord, NewLocation, ProjectCategory,
};
use geo::Rect;

/// A stored geometry with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Persisted or temporary identity.
    pub id: FeatureId,
    /// Display name.
    pub name: String,
    /// Geometry in the rendering projection.
    pub geometry: FeatureGeometry,
    /// Project category.
    pub category: ProjectCategory,
    /// Category-specific attributes.
    pub metadata: FeatureMetadata,
    /// For optimization results, the polygon they were computed for.
    pub source_polygon: Option<FeatureId>,
}

impl Feature {
    /// Converts a backend row. Returns `None` (and logs) for rows without
    /// usable geometry.
    #[must_use]
    pub fn from_record(record: LocationRecord, hint: ProjectionHint, line_strings: bool) -> Option<Self> {
        let Some(wkt) = record.wkt.as_deref().filter(|w| !w.trim().is_empty()) else {
            log::warn!("Skipping location {}: no WKT", record.id);
            return None;
        };

        let geometry = match FeatureGeometry::from_interchange(wkt, hint) {
            Ok(geometry) => geometry,
            Err(e) => {
                log::warn!("Skipping location {}: {e}", record.id);
                return None;
            }
        };

        if geometry.kind() == GeometryKind::LineString && !line_strings {
            log::warn!("Skipping location {}: line strings are disabled", record.id);
            return None;
        }

        let category = ProjectCategory::from_wire(record.type_n.as_deref());
        if category == ProjectCategory::AllProjects {
            if let Some(label) = record
                .type_n
                .as_deref()
                .filter(|l| l.trim() != ProjectCategory::AllProjects.as_ref())
            {
                log::debug!("Location {} has unknown category '{label}'", record.id);
            }
        }

        Some(Self {
            id: FeatureId::Persisted(record.id),
            name: record.name.unwrap_or_default(),
            geometry,
            category,
            metadata: record.metadata,
            source_polygon: None,
        })
    }

    /// Builds the create payload for this feature.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the geometry cannot be written as WKT.
    pub fn to_new_location(&self) -> Result<NewLocation, GeometryError> {
        Ok(NewLocation {
            name: self.name.clone(),
            wkt: self.geometry.to_interchange()?,
            type_n: self.category.to_wire(),
            metadata: self.metadata.clone(),
        })
    }

    /// The dedup key, for points.
    #[must_use]
    pub fn point_key(&self) -> Option<CoordKey> {
        self.geometry.point_key()
    }
}

/// Result of replacing the store contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Features now in the store.
    pub loaded: usize,
    /// Records dropped for missing or unusable geometry.
    pub skipped: usize,
    /// Unsaved optimization placements carried over because their
    /// polygon is still present.
    pub kept: usize,
}

/// Point count and capacity of one polygon's saved placements.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSummary {
    /// Polygon id.
    pub polygon_id: FeatureId,
    /// Polygon name.
    pub name: String,
    /// Polygon category.
    pub category: ProjectCategory,
    /// Saved points named after the polygon.
    pub point_count: usize,
    /// Combined capacity, when the category has a per-point capacity.
    pub capacity: Option<f64>,
}

/// Features keyed by id. At most one feature per id.
#[derive(Debug, Default)]
pub struct GeometryStore {
    features: BTreeMap<FeatureId, Feature>,
}

/// A store shared between the session components.
pub type SharedStore = Arc<Mutex<GeometryStore>>;

impl GeometryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a store for sharing.
    #[must_use]
    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Fetches every location and replaces the store with them.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the list call fails; the store is left
    /// unchanged.
    pub async fn load_all(
        &mut self,
        backend: &dyn GeometryBackend,
        hint: ProjectionHint,
        line_strings: bool,
    ) -> Result<LoadReport, BackendError> {
        let records = backend.list_locations().await?;
        Ok(self.replace_all(records, hint, line_strings))
    }

    /// Repopulates the store from `records`, skipping records whose
    /// geometry cannot be used.
    ///
    /// Persisted features are replaced wholesale. Temporary placements are
    /// kept, with whatever geometry they have now, as long as the polygon
    /// they were computed for is among the loaded records.
    pub fn replace_all(
        &mut self,
        records: Vec<LocationRecord>,
        hint: ProjectionHint,
        line_strings: bool,
    ) -> LoadReport {
        let total = records.len();
        let mut features: BTreeMap<FeatureId, Feature> = records
            .into_iter()
            .filter_map(|r| Feature::from_record(r, hint, line_strings))
            .map(|f| (f.id.clone(), f))
            .collect();
        let loaded = features.len();

        let previous = std::mem::take(&mut self.features);
        let mut dropped = 0;
        for (id, feature) in previous {
            if !id.is_temporary() {
                continue;
            }
            if feature
                .source_polygon
                .as_ref()
                .is_some_and(|polygon| features.contains_key(polygon))
            {
                features.insert(id, feature);
            } else {
                dropped += 1;
            }
        }
        self.features = features;

        let report = LoadReport {
            loaded,
            skipped: total - loaded,
            kept: self.features.len() - loaded,
        };
        if report.skipped > 0 {
            log::warn!("Skipped {} of {total} locations", report.skipped);
        }
        if dropped > 0 {
            log::debug!("Dropped {dropped} placements whose polygon is gone");
        }
        report
    }

    /// Inserts or replaces a feature.
    pub fn upsert(&mut self, feature: Feature) {
        self.features.insert(feature.id.clone(), feature);
    }

    /// Removes a feature.
    pub fn remove(&mut self, id: &FeatureId) -> Option<Feature> {
        self.features.remove(id)
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.features.clear();
    }

    #[must_use]
    pub fn by_id(&self, id: &FeatureId) -> Option<&Feature> {
        self.features.get(id)
    }

    /// All features, persisted ids first in id order.
    pub fn all(&self) -> impl Iterator<Item = &Feature> {
        self.features.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Bounding box of every feature, for fitting the view.
    #[must_use]
    pub fn extent(&self) -> Option<Rect<f64>> {
        extent(self.features.values().map(|f| &f.geometry))
    }

    /// Temporary points computed for `polygon`.
    pub fn temporary_points_for<'a>(&'a self, polygon: &'a FeatureId) -> impl Iterator<Item = &'a Feature> {
        self.features
            .values()
            .filter(move |f| f.id.is_temporary() && f.source_polygon.as_ref() == Some(polygon))
    }

    /// Removes the temporary points computed for `polygon`.
    pub fn remove_temporary_points_for(&mut self, polygon: &FeatureId) -> usize {
        let before = self.features.len();
        self.features
            .retain(|_, f| !(f.id.is_temporary() && f.source_polygon.as_ref() == Some(polygon)));
        before - self.features.len()
    }

    /// Dedup keys of every point, optionally leaving out the temporary
    /// points of one polygon.
    #[must_use]
    pub fn point_keys(&self, except_temporaries_of: Option<&FeatureId>) -> BTreeSet<CoordKey> {
        self.features
            .values()
            .filter(|f| {
                !(f.id.is_temporary()
                    && except_temporaries_of.is_some()
                    && f.source_polygon.as_ref() == except_temporaries_of)
            })
            .filter_map(Feature::point_key)
            .collect()
    }

    /// Dedup keys of persisted points.
    #[must_use]
    pub fn persisted_point_keys(&self) -> BTreeSet<CoordKey> {
        self.features
            .values()
            .filter(|f| !f.id.is_temporary())
            .filter_map(Feature::point_key)
            .collect()
    }

    /// Groups persisted points under the polygon whose name prefixes
    /// theirs (`"{polygon}-"`). A point matching several polygon names
    /// counts toward the longest one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn project_summaries(&self, calculator: &dyn CapacityCalculator) -> Vec<ProjectSummary> {
        let polygons: Vec<&Feature> = self
            .features
            .values()
            .filter(|f| {
                !f.id.is_temporary() && f.geometry.kind() == GeometryKind::Polygon && !f.name.is_empty()
            })
            .collect();

        let mut counts = vec![0usize; polygons.len()];
        for point in self
            .features
            .values()
            .filter(|f| !f.id.is_temporary() && f.geometry.kind() == GeometryKind::Point)
        {
            let owner = polygons
                .iter()
                .enumerate()
                .filter(|(_, p)| {
                    point
                        .name
                        .strip_prefix(p.name.as_str())
                        .is_some_and(|rest| rest.starts_with('-'))
                })
                .max_by_key(|(_, p)| p.name.len());
            if let Some((index, _)) = owner {
                counts[index] += 1;
            }
        }

        polygons
            .into_iter()
            .zip(counts)
            .map(|(polygon, point_count)| ProjectSummary {
                polygon_id: polygon.id.clone(),
                name: polygon.name.clone(),
                category: polygon.category,
                point_count,
                capacity: calculator
                    .unit_capacity(polygon.category)
                    .map(|unit| unit * point_count as f64),
            })
            .collect()
    }
}

/// Locks a shared store, recovering from poisoning.
pub fn lock(store: &SharedStore) -> MutexGuard<'_, GeometryStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fetches every location and replaces the shared store's contents. The
/// lock is only taken once the response has arrived.
///
/// # Errors
///
/// Returns [`BackendError`] if the list call fails; the store is left
/// unchanged.
pub async fn reload(
    store: &SharedStore,
    backend: &dyn GeometryBackend,
    hint: ProjectionHint,
    line_strings: bool,
) -> Result<LoadReport, BackendError> {
    let records = backend.list_locations().await?;
    let report = lock(store).replace_all(records, hint, line_strings);
    log::info!("Reloaded {} features", report.loaded);
    Ok(report)
}
