#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Placement count and capacity estimates per project category.
//!
//! The optimization flow asks a [`CapacityCalculator`] how many
//! placements a polygon needs before it calls the backend. The
//! calculator is pure and synchronous; [`FormulaCalculator`] implements
//! the municipal sizing rules for waste containers, storm drain manholes
//! and parking.

use citymap_geometry_models::{FeatureMetadata, ProjectCategory, UsageType};
use serde::{Deserialize, Serialize};

/// Errors from capacity estimation. All of them are validation errors:
/// the caller blocks submission and no backend call is made.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CapacityError {
    /// A parameter the category needs was not supplied.
    #[error("Missing parameter: {name}")]
    MissingParameter {
        /// Parameter name.
        name: &'static str,
    },

    /// A numeric parameter was zero, negative or not finite.
    #[error("Parameter {name} must be positive, got {value}")]
    NonPositive {
        /// Parameter name.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The category has no sizing rule.
    #[error("No capacity rule for category {category}")]
    UnsupportedCategory {
        /// The category.
        category: ProjectCategory,
    },
}

/// Inputs to a capacity estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityParams {
    /// Polygon area in square meters.
    pub area_sq_m: f64,
    /// People per square meter (waste).
    pub population_density: Option<f64>,
    /// Rainfall intensity in mm/min (infrastructure).
    pub rainfall_intensity: Option<f64>,
    /// Storm duration in minutes (infrastructure).
    pub duration: Option<f64>,
    /// Land-use type (parking).
    pub usage_type: Option<UsageType>,
}

impl CapacityParams {
    /// The attributes worth storing next to the polygon.
    #[must_use]
    pub const fn metadata(&self, min_cover_count: u32) -> FeatureMetadata {
        FeatureMetadata {
            population_density: self.population_density,
            rainfall_intensity: self.rainfall_intensity,
            duration: self.duration,
            usage_type: self.usage_type,
            min_cover_count: Some(min_cover_count),
        }
    }
}

/// Result of a capacity estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityEstimate {
    /// Number of placements the optimizer should produce.
    pub min_cover_count: u32,
    /// Total capacity of those placements, in the category's unit
    /// (kg/day, liters, parking spaces).
    pub capacity: f64,
}

/// Sizing rule collaborator.
pub trait CapacityCalculator: Send + Sync {
    /// Estimates placements and capacity for a polygon of `category`.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError`] if a required parameter is missing or not
    /// positive, or the category has no rule.
    fn calculate(
        &self,
        category: ProjectCategory,
        params: &CapacityParams,
    ) -> Result<CapacityEstimate, CapacityError>;

    /// Capacity of one placement in `category`, if the rule has one.
    fn unit_capacity(&self, category: ProjectCategory) -> Option<f64>;
}

/// Constants of the municipal sizing formulas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FormulaCalculator {
    /// Household waste per person per day, kg.
    pub waste_per_person_kg: f64,
    /// Container capacity, kg.
    pub container_capacity_kg: f64,
    /// Collections per day.
    pub collections_per_day: f64,
    /// Fraction of rainfall that runs off the surface.
    pub runoff_coefficient: f64,
    /// Liters one manhole can drain.
    pub manhole_capacity_l: f64,
    /// Square meters of building per required parking space.
    pub building_area_per_space: f64,
}

impl Default for FormulaCalculator {
    fn default() -> Self {
        Self {
            waste_per_person_kg: 0.79,
            container_capacity_kg: 96.0,
            collections_per_day: 1.0,
            runoff_coefficient: 0.9,
            manhole_capacity_l: 500.0,
            building_area_per_space: 100.0,
        }
    }
}

impl FormulaCalculator {
    /// Building density factor per land-use type.
    #[must_use]
    pub const fn building_density(usage: Option<UsageType>) -> f64 {
        match usage {
            Some(UsageType::Residential) => 0.8,
            Some(UsageType::Commercial) => 1.2,
            Some(UsageType::Mixed) | None => 1.0,
        }
    }
}

impl CapacityCalculator for FormulaCalculator {
    fn calculate(
        &self,
        category: ProjectCategory,
        params: &CapacityParams,
    ) -> Result<CapacityEstimate, CapacityError> {
        let area = positive("area_sq_m", Some(params.area_sq_m))?;

        match category {
            ProjectCategory::WasteManagement => {
                let density = positive("population_density", params.population_density)?;
                let waste_per_day = density * area * self.waste_per_person_kg;
                let count = ceil_count(
                    waste_per_day / (self.container_capacity_kg * self.collections_per_day),
                );
                Ok(CapacityEstimate {
                    min_cover_count: count,
                    capacity: f64::from(count) * self.container_capacity_kg,
                })
            }
            ProjectCategory::InfrastructureManagement => {
                let intensity = positive("rainfall_intensity", params.rainfall_intensity)?;
                let duration = positive("duration", params.duration)?;
                let rainwater_l = area * intensity * duration * self.runoff_coefficient;
                let count = ceil_count(rainwater_l / self.manhole_capacity_l);
                Ok(CapacityEstimate {
                    min_cover_count: count,
                    capacity: f64::from(count) * self.manhole_capacity_l,
                })
            }
            ProjectCategory::ParkingPlanning => {
                let building_area = area * Self::building_density(params.usage_type);
                let count = ceil_count(building_area / self.building_area_per_space);
                Ok(CapacityEstimate {
                    min_cover_count: count,
                    capacity: f64::from(count),
                })
            }
            ProjectCategory::RegionPlanning | ProjectCategory::AllProjects => {
                Err(CapacityError::UnsupportedCategory { category })
            }
        }
    }

    fn unit_capacity(&self, category: ProjectCategory) -> Option<f64> {
        match category {
            ProjectCategory::WasteManagement => Some(self.container_capacity_kg),
            ProjectCategory::InfrastructureManagement => Some(self.manhole_capacity_l),
            ProjectCategory::ParkingPlanning => Some(1.0),
            ProjectCategory::RegionPlanning | ProjectCategory::AllProjects => None,
        }
    }
}

fn positive(name: &'static str, value: Option<f64>) -> Result<f64, CapacityError> {
    let value = value.ok_or(CapacityError::MissingParameter { name })?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(CapacityError::NonPositive { name, value })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn ceil_count(value: f64) -> u32 {
    value.ceil().clamp(1.0, f64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(area: f64) -> CapacityParams {
        CapacityParams {
            area_sq_m: area,
            ..CapacityParams::default()
        }
    }

    #[test]
    fn waste_containers() {
        // 10_000 m² * 0.05 p/m² = 500 people * 0.79 = 395 kg/day -> 5 containers
        let estimate = FormulaCalculator::default()
            .calculate(
                ProjectCategory::WasteManagement,
                &CapacityParams {
                    population_density: Some(0.05),
                    ..params(10_000.0)
                },
            )
            .unwrap();
        assert_eq!(estimate.min_cover_count, 5);
        assert!((estimate.capacity - 480.0).abs() < 1e-9);
    }

    #[test]
    fn manholes() {
        // 1000 m² * 2 mm/min * 10 min * 0.9 = 18_000 L -> 36 manholes
        let estimate = FormulaCalculator::default()
            .calculate(
                ProjectCategory::InfrastructureManagement,
                &CapacityParams {
                    rainfall_intensity: Some(2.0),
                    duration: Some(10.0),
                    ..params(1000.0)
                },
            )
            .unwrap();
        assert_eq!(estimate.min_cover_count, 36);
    }

    #[test]
    fn parking_spaces_by_usage() {
        let calc = FormulaCalculator::default();
        let commercial = calc
            .calculate(
                ProjectCategory::ParkingPlanning,
                &CapacityParams {
                    usage_type: Some(UsageType::Commercial),
                    ..params(1000.0)
                },
            )
            .unwrap();
        assert_eq!(commercial.min_cover_count, 12);

        let unspecified = calc
            .calculate(ProjectCategory::ParkingPlanning, &params(1000.0))
            .unwrap();
        assert_eq!(unspecified.min_cover_count, 10);
    }

    #[test]
    fn rejects_non_positive_parameters() {
        let calc = FormulaCalculator::default();
        assert_eq!(
            calc.calculate(
                ProjectCategory::WasteManagement,
                &CapacityParams {
                    population_density: Some(0.0),
                    ..params(10.0)
                }
            ),
            Err(CapacityError::NonPositive {
                name: "population_density",
                value: 0.0
            })
        );
        assert!(matches!(
            calc.calculate(ProjectCategory::ParkingPlanning, &params(-5.0)),
            Err(CapacityError::NonPositive { name: "area_sq_m", .. })
        ));
        assert_eq!(
            calc.calculate(ProjectCategory::WasteManagement, &params(10.0)),
            Err(CapacityError::MissingParameter {
                name: "population_density"
            })
        );
    }

    #[test]
    fn sentinel_has_no_rule() {
        let calc = FormulaCalculator::default();
        assert!(matches!(
            calc.calculate(ProjectCategory::AllProjects, &params(10.0)),
            Err(CapacityError::UnsupportedCategory { .. })
        ));
        assert_eq!(calc.unit_capacity(ProjectCategory::AllProjects), None);
        assert_eq!(
            calc.unit_capacity(ProjectCategory::WasteManagement),
            Some(96.0)
        );
    }
}
