//! Draw, modify and select lifecycles.
//!
//! The controller is a synchronous state machine. Anything that waits on
//! the user (a name, a radius) happens outside it: the caller receives a
//! [`DrawStep`] carrying the handler [`Generation`], awaits the dialog, and
//! hands the answer back with that generation. If the mode changed in the
//! meantime the generation is stale and the answer is rejected.

use std::collections::BTreeMap;

use citymap_geometry::measure::{Measurement, measure};
use citymap_geometry::{FeatureGeometry, GeometryError};
use citymap_geometry_models::{FeatureId, GeometryKind};
use geo::{Coord, LineString, Point, Polygon};

use crate::config::MapOptions;
use crate::store::Feature;
use crate::ValidationError;

/// Identifies the handlers of one activation of a mode.
pub type Generation = u64;

/// The active interaction mode. Selection runs alongside every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No gesture in progress.
    Idle,
    /// Drawing a geometry of this kind.
    Drawing(GeometryKind),
    /// Dragging existing features.
    Modifying,
}

/// Errors from interaction events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InteractionError {
    /// The event came from handlers that were torn down.
    #[error("Handler generation {got} is no longer active (current is {current})")]
    Stale {
        /// Generation the event carried.
        got: Generation,
        /// Active generation.
        current: Generation,
    },

    /// The event needs draw mode.
    #[error("Not drawing")]
    NotDrawing,

    /// The event needs modify mode.
    #[error("Not modifying")]
    NotModifying,

    /// The geometry kind is not enabled.
    #[error("Drawing {kind} is disabled")]
    Disabled {
        /// Requested kind.
        kind: GeometryKind,
    },

    /// The gesture ended with too few vertices.
    #[error("A {kind} needs at least {needed} vertices, got {got}")]
    TooFewVertices {
        /// Kind being drawn.
        kind: GeometryKind,
        /// Minimum vertex count.
        needed: usize,
        /// Vertices placed.
        got: usize,
    },

    /// There is no vertex to remove.
    #[error("Nothing to undo")]
    NothingToUndo,

    /// A drawn polygon is still waiting to be submitted.
    #[error("A polygon is already waiting to be submitted")]
    PolygonPending,
}

/// What the caller has to do after a draw gesture completes.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawStep {
    /// Ask for a circle radius, then call
    /// [`InteractionController::resolve_radius`].
    NeedsRadius {
        /// Active generation.
        generation: Generation,
        /// Circle center.
        center: Coord<f64>,
    },
    /// Ask for a name, then call [`InteractionController::resolve_name`].
    NeedsName {
        /// Active generation.
        generation: Generation,
        /// The completed geometry.
        geometry: FeatureGeometry,
    },
    /// The polygon is held for submission; see
    /// [`InteractionController::take_pending_polygon`].
    PendingPolygon,
}

/// Outcome of answering the name prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum NameResolution {
    /// The geometry can be saved under `name`.
    Accepted {
        /// Validated name.
        name: String,
        /// The completed geometry.
        geometry: FeatureGeometry,
    },
    /// The geometry was thrown away. `reason` is `None` when the prompt
    /// was dismissed.
    Discarded {
        /// Why the name was refused.
        reason: Option<ValidationError>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Sketching(Vec<Coord<f64>>),
    AwaitingRadius(Coord<f64>),
    AwaitingName(FeatureGeometry),
}

/// The interaction state machine.
#[derive(Debug)]
pub struct InteractionController {
    options: MapOptions,
    mode: Mode,
    generation: Generation,
    stage: Option<Stage>,
    moves: BTreeMap<FeatureId, FeatureGeometry>,
    selection: Option<FeatureId>,
    pending_polygon: Option<FeatureGeometry>,
}

impl InteractionController {
    #[must_use]
    pub const fn new(options: MapOptions) -> Self {
        Self {
            options,
            mode: Mode::Idle,
            generation: 0,
            stage: None,
            moves: BTreeMap::new(),
            selection: None,
            pending_polygon: None,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// The generation of the active handlers.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub const fn options(&self) -> &MapOptions {
        &self.options
    }

    /// Vertices placed in the current sketch.
    #[must_use]
    pub fn vertices(&self) -> &[Coord<f64>] {
        match &self.stage {
            Some(Stage::Sketching(vertices)) => vertices,
            _ => &[],
        }
    }

    /// Enters draw mode, tearing down whatever was active.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::Disabled`] for kinds whose capability is
    /// off, and [`InteractionError::PolygonPending`] when starting a polygon
    /// while another one waits for submission.
    pub fn begin_draw(&mut self, kind: GeometryKind) -> Result<Generation, InteractionError> {
        let enabled = match kind {
            GeometryKind::Point | GeometryKind::Polygon => true,
            GeometryKind::LineString => self.options.line_strings,
            GeometryKind::Circle => self.options.circles,
        };
        if !enabled {
            return Err(InteractionError::Disabled { kind });
        }
        if kind == GeometryKind::Polygon && self.pending_polygon.is_some() {
            return Err(InteractionError::PolygonPending);
        }

        self.teardown();
        self.mode = Mode::Drawing(kind);
        self.stage = Some(Stage::Sketching(Vec::new()));
        log::debug!("Drawing {kind} (generation {})", self.generation);
        Ok(self.generation)
    }

    /// Enters modify mode, tearing down whatever was active.
    pub fn begin_modify(&mut self) -> Generation {
        self.teardown();
        self.mode = Mode::Modifying;
        log::debug!("Modifying (generation {})", self.generation);
        self.generation
    }

    /// Returns to idle, discarding any in-progress geometry, unsaved moves
    /// and the pending polygon.
    pub fn cancel(&mut self) -> Generation {
        if self.pending_polygon.take().is_some() {
            log::debug!("Discarded pending polygon");
        }
        self.teardown();
        self.generation
    }

    /// Places a vertex. Points and circles keep only the last one.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError`] for stale generations or outside a
    /// sketch.
    pub fn add_vertex(&mut self, generation: Generation, coord: Coord<f64>) -> Result<(), InteractionError> {
        let kind = self.drawing_kind(generation)?;
        let Some(Stage::Sketching(vertices)) = &mut self.stage else {
            return Err(InteractionError::NotDrawing);
        };
        if matches!(kind, GeometryKind::Point | GeometryKind::Circle) {
            vertices.clear();
        }
        vertices.push(coord);
        Ok(())
    }

    /// Removes the last vertex of a line string or polygon sketch.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::NothingToUndo`] if there is no vertex to
    /// remove.
    pub fn undo_vertex(&mut self, generation: Generation) -> Result<Coord<f64>, InteractionError> {
        let kind = self.drawing_kind(generation)?;
        if !matches!(kind, GeometryKind::LineString | GeometryKind::Polygon) {
            return Err(InteractionError::NothingToUndo);
        }
        match &mut self.stage {
            Some(Stage::Sketching(vertices)) => vertices.pop().ok_or(InteractionError::NothingToUndo),
            _ => Err(InteractionError::NothingToUndo),
        }
    }

    /// Completes the sketch.
    ///
    /// Polygons become the pending polygon and the controller returns to
    /// idle. Other kinds wait for a radius and/or a name.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::TooFewVertices`] if the sketch is
    /// incomplete; the sketch is kept so drawing can continue.
    pub fn finish_draw(&mut self, generation: Generation) -> Result<DrawStep, InteractionError> {
        let kind = self.drawing_kind(generation)?;
        let Some(Stage::Sketching(vertices)) = &self.stage else {
            return Err(InteractionError::NotDrawing);
        };

        let needed = match kind {
            GeometryKind::Point | GeometryKind::Circle => 1,
            GeometryKind::LineString => 2,
            GeometryKind::Polygon => 3,
        };
        if vertices.len() < needed {
            return Err(InteractionError::TooFewVertices {
                kind,
                needed,
                got: vertices.len(),
            });
        }

        let vertices = vertices.clone();
        match kind {
            GeometryKind::Point => Ok(self.await_name(FeatureGeometry::Point(Point(vertices[0])))),
            GeometryKind::LineString => {
                Ok(self.await_name(FeatureGeometry::LineString(LineString::new(vertices))))
            }
            GeometryKind::Polygon => {
                self.pending_polygon = Some(FeatureGeometry::Polygon(Polygon::new(
                    LineString::new(vertices),
                    vec![],
                )));
                self.teardown();
                log::debug!("Polygon held for submission");
                Ok(DrawStep::PendingPolygon)
            }
            GeometryKind::Circle => {
                let center = vertices[0];
                self.stage = Some(Stage::AwaitingRadius(center));
                Ok(DrawStep::NeedsRadius {
                    generation: self.generation,
                    center,
                })
            }
        }
    }

    /// Answers the radius prompt. `None` or a non-positive radius discards
    /// the circle.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError`] for stale generations or when no radius
    /// was asked for.
    pub fn resolve_radius(
        &mut self,
        generation: Generation,
        radius: Option<f64>,
    ) -> Result<Option<DrawStep>, InteractionError> {
        self.drawing_kind(generation)?;
        let Some(Stage::AwaitingRadius(center)) = &self.stage else {
            return Err(InteractionError::NotDrawing);
        };
        let center = *center;

        match radius.filter(|r| r.is_finite() && *r > 0.0) {
            Some(radius) => Ok(Some(self.await_name(FeatureGeometry::Circle { center, radius }))),
            None => {
                log::debug!("Circle discarded: no valid radius");
                self.teardown();
                Ok(None)
            }
        }
    }

    /// Answers the name prompt and returns to idle either way.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError`] for stale generations or when no name
    /// was asked for.
    pub fn resolve_name(
        &mut self,
        generation: Generation,
        name: Option<&str>,
    ) -> Result<NameResolution, InteractionError> {
        self.drawing_kind(generation)?;
        if !matches!(self.stage, Some(Stage::AwaitingName(_))) {
            return Err(InteractionError::NotDrawing);
        }
        let Some(Stage::AwaitingName(geometry)) = self.stage.take() else {
            return Err(InteractionError::NotDrawing);
        };
        self.teardown();

        let Some(name) = name else {
            log::debug!("Drawing discarded: name prompt dismissed");
            return Ok(NameResolution::Discarded { reason: None });
        };
        match self.options.validate_name(name) {
            Ok(name) => Ok(NameResolution::Accepted { name, geometry }),
            Err(e) => {
                log::warn!("Drawing discarded: {e}");
                Ok(NameResolution::Discarded { reason: Some(e) })
            }
        }
    }

    /// Records the end of a drag. Returns `false` for temporary features,
    /// which are never updated on the backend.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError`] for stale generations or outside modify
    /// mode.
    pub fn record_move(
        &mut self,
        generation: Generation,
        id: FeatureId,
        geometry: FeatureGeometry,
    ) -> Result<bool, InteractionError> {
        self.check(generation)?;
        if self.mode != Mode::Modifying {
            return Err(InteractionError::NotModifying);
        }
        if id.is_temporary() {
            log::debug!("Ignoring move of temporary feature {id}");
            return Ok(false);
        }
        self.moves.insert(id, geometry);
        Ok(true)
    }

    /// Drains the recorded moves for a batch update.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError`] for stale generations or outside modify
    /// mode.
    pub fn take_moves(
        &mut self,
        generation: Generation,
    ) -> Result<Vec<(FeatureId, FeatureGeometry)>, InteractionError> {
        self.check(generation)?;
        if self.mode != Mode::Modifying {
            return Err(InteractionError::NotModifying);
        }
        Ok(std::mem::take(&mut self.moves).into_iter().collect())
    }

    pub fn select(&mut self, id: FeatureId) {
        self.selection = Some(id);
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    #[must_use]
    pub const fn selection(&self) -> Option<&FeatureId> {
        self.selection.as_ref()
    }

    #[must_use]
    pub const fn pending_polygon(&self) -> Option<&FeatureGeometry> {
        self.pending_polygon.as_ref()
    }

    /// Hands the pending polygon to the submission flow.
    pub fn take_pending_polygon(&mut self) -> Option<FeatureGeometry> {
        self.pending_polygon.take()
    }

    /// Puts a polygon back after a submission was refused locally.
    pub fn restore_pending_polygon(&mut self, geometry: FeatureGeometry) {
        self.pending_polygon = Some(geometry);
    }

    fn await_name(&mut self, geometry: FeatureGeometry) -> DrawStep {
        self.stage = Some(Stage::AwaitingName(geometry.clone()));
        DrawStep::NeedsName {
            generation: self.generation,
            geometry,
        }
    }

    fn teardown(&mut self) {
        self.stage = None;
        self.moves.clear();
        self.mode = Mode::Idle;
        self.generation += 1;
    }

    const fn check(&self, generation: Generation) -> Result<(), InteractionError> {
        if generation == self.generation {
            Ok(())
        } else {
            Err(InteractionError::Stale {
                got: generation,
                current: self.generation,
            })
        }
    }

    fn drawing_kind(&self, generation: Generation) -> Result<GeometryKind, InteractionError> {
        self.check(generation)?;
        match self.mode {
            Mode::Drawing(kind) => Ok(kind),
            _ => Err(InteractionError::NotDrawing),
        }
    }
}

/// What the detail popup shows for a selected feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDetails {
    pub id: FeatureId,
    pub name: String,
    pub kind: GeometryKind,
    /// Interchange WKT.
    pub wkt: String,
    pub measurement: Option<Measurement>,
    /// Where to anchor the popup, in the rendering projection.
    pub anchor: Option<Coord<f64>>,
}

impl FeatureDetails {
    /// Builds the details of `feature`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the geometry cannot be written as WKT.
    pub fn of(feature: &Feature) -> Result<Self, GeometryError> {
        Ok(Self {
            id: feature.id.clone(),
            name: feature.name.clone(),
            kind: feature.geometry.kind(),
            wkt: feature.geometry.to_interchange()?,
            measurement: measure(&feature.geometry),
            anchor: feature.geometry.anchor(),
        })
    }
}

#[cfg(test)]
mod tests {
    use citymap_geometry_models::{FeatureMetadata, ProjectCategory};

    use super::*;

    fn controller() -> InteractionController {
        InteractionController::new(MapOptions::default())
    }

    fn c(x: f64, y: f64) -> Coord<f64> {
        Coord { x, y }
    }

    #[test]
    fn point_draw_with_valid_name() {
        let mut ctl = controller();
        let generation = ctl.begin_draw(GeometryKind::Point).unwrap();
        ctl.add_vertex(generation, c(1.0, 1.0)).unwrap();
        ctl.add_vertex(generation, c(2.0, 2.0)).unwrap();

        let step = ctl.finish_draw(generation).unwrap();
        let DrawStep::NeedsName { generation, geometry } = step else {
            panic!("expected a name prompt, got {step:?}");
        };
        assert_eq!(geometry, FeatureGeometry::Point(Point::new(2.0, 2.0)));

        let resolution = ctl.resolve_name(generation, Some(" Bin 1 ")).unwrap();
        assert_eq!(
            resolution,
            NameResolution::Accepted {
                name: "Bin 1".to_string(),
                geometry
            }
        );
        assert_eq!(ctl.mode(), Mode::Idle);
    }

    #[test]
    fn invalid_or_dismissed_name_discards() {
        let mut ctl = controller();
        for answer in [None, Some(""), Some(&*"x".repeat(51))] {
            let generation = ctl.begin_draw(GeometryKind::Point).unwrap();
            ctl.add_vertex(generation, c(1.0, 1.0)).unwrap();
            ctl.finish_draw(generation).unwrap();
            assert!(matches!(
                ctl.resolve_name(generation, answer).unwrap(),
                NameResolution::Discarded { .. }
            ));
            assert_eq!(ctl.mode(), Mode::Idle);
        }
    }

    #[test]
    fn polygon_becomes_pending() {
        let mut ctl = controller();
        let generation = ctl.begin_draw(GeometryKind::Polygon).unwrap();
        ctl.add_vertex(generation, c(0.0, 0.0)).unwrap();
        ctl.add_vertex(generation, c(10.0, 0.0)).unwrap();
        assert!(matches!(
            ctl.finish_draw(generation),
            Err(InteractionError::TooFewVertices { needed: 3, got: 2, .. })
        ));
        ctl.add_vertex(generation, c(10.0, 10.0)).unwrap();

        assert_eq!(ctl.finish_draw(generation).unwrap(), DrawStep::PendingPolygon);
        assert_eq!(ctl.mode(), Mode::Idle);
        assert!(ctl.pending_polygon().is_some());
        assert_eq!(
            ctl.begin_draw(GeometryKind::Polygon),
            Err(InteractionError::PolygonPending)
        );

        let polygon = ctl.take_pending_polygon().unwrap();
        let FeatureGeometry::Polygon(p) = polygon else {
            panic!("expected polygon");
        };
        assert!(p.exterior().is_closed());
        assert!(ctl.begin_draw(GeometryKind::Polygon).is_ok());
    }

    #[test]
    fn undo_removes_last_vertex() {
        let mut ctl = controller();
        let generation = ctl.begin_draw(GeometryKind::Polygon).unwrap();
        assert_eq!(ctl.undo_vertex(generation), Err(InteractionError::NothingToUndo));
        ctl.add_vertex(generation, c(0.0, 0.0)).unwrap();
        ctl.add_vertex(generation, c(5.0, 5.0)).unwrap();
        assert_eq!(ctl.undo_vertex(generation).unwrap(), c(5.0, 5.0));
        assert_eq!(ctl.vertices(), &[c(0.0, 0.0)]);
    }

    #[test]
    fn switching_modes_invalidates_old_handlers() {
        let mut ctl = controller();
        let draw = ctl.begin_draw(GeometryKind::Polygon).unwrap();
        ctl.add_vertex(draw, c(0.0, 0.0)).unwrap();

        let modify = ctl.begin_modify();
        assert_eq!(ctl.mode(), Mode::Modifying);
        assert!(matches!(
            ctl.add_vertex(draw, c(1.0, 1.0)),
            Err(InteractionError::Stale { .. })
        ));
        assert!(ctl.vertices().is_empty());

        ctl.cancel();
        assert!(matches!(
            ctl.record_move(modify, FeatureId::Persisted(1), FeatureGeometry::Point(Point::new(0.0, 0.0))),
            Err(InteractionError::Stale { .. })
        ));
        assert_eq!(ctl.mode(), Mode::Idle);
    }

    #[test]
    fn name_answer_after_cancel_is_stale() {
        let mut ctl = controller();
        let generation = ctl.begin_draw(GeometryKind::Point).unwrap();
        ctl.add_vertex(generation, c(1.0, 1.0)).unwrap();
        ctl.finish_draw(generation).unwrap();
        ctl.cancel();
        assert!(matches!(
            ctl.resolve_name(generation, Some("late")),
            Err(InteractionError::Stale { .. })
        ));
    }

    #[test]
    fn circles_and_lines_need_capabilities() {
        let mut ctl = controller();
        assert_eq!(
            ctl.begin_draw(GeometryKind::Circle),
            Err(InteractionError::Disabled {
                kind: GeometryKind::Circle
            })
        );
        assert!(ctl.begin_draw(GeometryKind::LineString).is_err());

        let mut ctl = InteractionController::new(MapOptions {
            circles: true,
            ..MapOptions::default()
        });
        let generation = ctl.begin_draw(GeometryKind::Circle).unwrap();
        ctl.add_vertex(generation, c(100.0, 100.0)).unwrap();
        let step = ctl.finish_draw(generation).unwrap();
        assert!(matches!(step, DrawStep::NeedsRadius { .. }));
        let step = ctl.resolve_radius(generation, Some(250.0)).unwrap();
        assert!(matches!(
            step,
            Some(DrawStep::NeedsName {
                geometry: FeatureGeometry::Circle { .. },
                ..
            })
        ));
    }

    #[test]
    fn circle_without_radius_is_discarded() {
        let mut ctl = InteractionController::new(MapOptions {
            circles: true,
            ..MapOptions::default()
        });
        let generation = ctl.begin_draw(GeometryKind::Circle).unwrap();
        ctl.add_vertex(generation, c(0.0, 0.0)).unwrap();
        ctl.finish_draw(generation).unwrap();
        assert_eq!(ctl.resolve_radius(generation, Some(-1.0)).unwrap(), None);
        assert_eq!(ctl.mode(), Mode::Idle);
    }

    #[test]
    fn moves_skip_temporary_features() {
        let mut ctl = controller();
        let generation = ctl.begin_modify();
        let geometry = FeatureGeometry::Point(Point::new(1.0, 1.0));
        assert!(ctl.record_move(generation, FeatureId::Persisted(7), geometry.clone()).unwrap());
        assert!(!ctl.record_move(generation, FeatureId::new_temporary(), geometry).unwrap());

        let moves = ctl.take_moves(generation).unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].0, FeatureId::Persisted(7));
        assert!(ctl.take_moves(generation).unwrap().is_empty());
    }

    #[test]
    fn details_show_wkt_and_area() {
        let feature = Feature {
            id: FeatureId::Persisted(3),
            name: "Zone".to_string(),
            geometry: FeatureGeometry::from_interchange(
                "POLYGON((29 41, 29.01 41, 29.01 41.01, 29 41.01, 29 41))",
                citymap_geometry::ProjectionHint::Detect,
            )
            .unwrap(),
            category: ProjectCategory::RegionPlanning,
            metadata: FeatureMetadata::default(),
            source_polygon: None,
        };
        let details = FeatureDetails::of(&feature).unwrap();
        assert_eq!(details.kind, GeometryKind::Polygon);
        assert!(details.wkt.starts_with("POLYGON((29 41,"));
        assert!(matches!(
            details.measurement,
            Some(Measurement::Area { square_meters }) if square_meters > 500_000.0
        ));
        assert!(details.anchor.is_some());
    }
}
