//! Menu-driven interface using `dialoguer` for running the client flows
//! without memorizing subcommands.

use citymap_capacity::CapacityParams;
use citymap_cli_utils::{MultiProgress, TerminalDialogs, spinner};
use citymap_geocoder::Geocoder;
use citymap_geometry::{FeatureGeometry, Projection, ProjectionHint};
use citymap_geometry_models::{ProjectCategory, UsageType};
use citymap_map::reconciler::{CoverRequest, OptimizationOutcome, SubmitRequest};
use citymap_map::{Dialogs, MapSession};
use dialoguer::{Confirm, Input, Select};

const USAGE_TYPES: [UsageType; 3] = [UsageType::Residential, UsageType::Commercial, UsageType::Mixed];

/// Top-level actions available in the interactive menu.
enum Action {
    ListFeatures,
    ProjectSummary,
    AddFeature,
    AddAddress,
    OptimizePolygon,
    Reload,
    Quit,
}

impl Action {
    const ALL: &[Self] = &[
        Self::ListFeatures,
        Self::ProjectSummary,
        Self::AddFeature,
        Self::AddAddress,
        Self::OptimizePolygon,
        Self::Reload,
        Self::Quit,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::ListFeatures => "List features",
            Self::ProjectSummary => "Project summary",
            Self::AddFeature => "Add a feature from WKT",
            Self::AddAddress => "Add a point at an address",
            Self::OptimizePolygon => "Optimize a polygon",
            Self::Reload => "Reload from backend",
            Self::Quit => "Quit",
        }
    }
}

/// Runs the menu loop until the user quits.
///
/// # Errors
///
/// Returns an error if the terminal cannot be read. Failed operations are
/// logged and the menu is shown again.
pub async fn run(
    session: &MapSession,
    dialogs: &TerminalDialogs,
    geocoder: &dyn Geocoder,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();

    loop {
        let idx = multi.suspend(|| {
            Select::new()
                .with_prompt("What would you like to do?")
                .items(&labels)
                .default(0)
                .interact()
        })?;

        let result = match Action::ALL[idx] {
            Action::ListFeatures => {
                for feature in session.features() {
                    println!("{:>8}  {}  {}", feature.id.to_string(), feature.geometry.kind(), feature.name);
                }
                Ok(())
            }
            Action::ProjectSummary => {
                for summary in session.project_summaries() {
                    println!(
                        "{}: {} points, capacity {:?}",
                        summary.name, summary.point_count, summary.capacity
                    );
                }
                Ok(())
            }
            Action::AddFeature => add_feature(session, dialogs, multi).await,
            Action::AddAddress => add_address(session, geocoder, multi).await,
            Action::OptimizePolygon => optimize_polygon(session, dialogs, multi).await,
            Action::Reload => spinner(multi, "Reloading", session.reload())
                .await
                .map(|report| println!("{} features loaded", report.loaded))
                .map_err(Into::into),
            Action::Quit => return Ok(()),
        };

        if let Err(e) = result {
            log::error!("{e}");
        }
    }
}

fn select_category(multi: &MultiProgress) -> Result<ProjectCategory, Box<dyn std::error::Error>> {
    let labels: Vec<String> = ProjectCategory::ALL.iter().map(ToString::to_string).collect();
    let idx = multi.suspend(|| {
        Select::new()
            .with_prompt("Project category")
            .items(&labels)
            .default(0)
            .interact()
    })?;
    Ok(ProjectCategory::ALL[idx])
}

fn read_geometry(multi: &MultiProgress, prompt: &str) -> Result<FeatureGeometry, Box<dyn std::error::Error>> {
    let wkt: String = multi.suspend(|| Input::new().with_prompt(prompt).interact_text())?;
    Ok(FeatureGeometry::from_interchange(
        &wkt,
        ProjectionHint::Explicit(Projection::Geographic),
    )?)
}

async fn add_feature(
    session: &MapSession,
    dialogs: &TerminalDialogs,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let geometry = read_geometry(multi, "Geometry (EPSG:4326 WKT)")?;
    let Some(name) = dialogs.request_name("Name").await else {
        return Ok(());
    };
    let category = select_category(multi)?;
    let id = spinner(multi, "Creating", session.add_feature(&name, geometry, category)).await?;
    println!("Created {id}");
    Ok(())
}

async fn add_address(
    session: &MapSession,
    geocoder: &dyn Geocoder,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let address: String = multi.suspend(|| Input::new().with_prompt("Address").interact_text())?;
    let category = select_category(multi)?;
    let added = spinner(
        multi,
        "Looking up address",
        session.add_address(geocoder, &address, None, category),
    )
    .await?;
    match added {
        Some((id, found)) => println!(
            "Created {id} at {:.6}, {:.6}",
            found.latitude, found.longitude
        ),
        None => println!("Address not found"),
    }
    Ok(())
}

/// A capacity formula input asked for in the optimize flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parameter {
    PopulationDensity,
    RainfallIntensity,
    Duration,
    Usage,
}

impl Parameter {
    /// What the formula for `category` needs. Empty when the category has
    /// no formula and only a fixed count makes sense.
    const fn for_category(category: ProjectCategory) -> &'static [Self] {
        match category {
            ProjectCategory::WasteManagement => &[Self::PopulationDensity],
            ProjectCategory::InfrastructureManagement => &[Self::RainfallIntensity, Self::Duration],
            ProjectCategory::ParkingPlanning => &[Self::Usage],
            ProjectCategory::RegionPlanning | ProjectCategory::AllProjects => &[],
        }
    }

    const fn prompt(self) -> &'static str {
        match self {
            Self::PopulationDensity => "Population density (people/m²)",
            Self::RainfallIntensity => "Rainfall intensity (mm/min)",
            Self::Duration => "Storm duration (minutes)",
            Self::Usage => "Land-use type",
        }
    }

    /// Stores a numeric answer. Land use is chosen from a list instead.
    const fn assign(self, params: &mut CapacityParams, value: f64) {
        match self {
            Self::PopulationDensity => params.population_density = Some(value),
            Self::RainfallIntensity => params.rainfall_intensity = Some(value),
            Self::Duration => params.duration = Some(value),
            Self::Usage => {}
        }
    }
}

/// Prompts for each parameter. The area is filled in from the polygon
/// when the request is sized.
fn read_capacity_params(
    multi: &MultiProgress,
    parameters: &[Parameter],
) -> Result<CapacityParams, Box<dyn std::error::Error>> {
    let mut params = CapacityParams::default();
    for parameter in parameters {
        if *parameter == Parameter::Usage {
            let labels: Vec<String> = USAGE_TYPES.iter().map(ToString::to_string).collect();
            let idx = multi.suspend(|| {
                Select::new()
                    .with_prompt(parameter.prompt())
                    .items(&labels)
                    .default(0)
                    .interact()
            })?;
            params.usage_type = Some(USAGE_TYPES[idx]);
        } else {
            let value: f64 =
                multi.suspend(|| Input::new().with_prompt(parameter.prompt()).interact_text())?;
            parameter.assign(&mut params, value);
        }
    }
    Ok(params)
}

fn read_cover(
    multi: &MultiProgress,
    category: ProjectCategory,
) -> Result<CoverRequest, Box<dyn std::error::Error>> {
    let parameters = Parameter::for_category(category);
    let calculated = !parameters.is_empty()
        && multi.suspend(|| {
            Confirm::new()
                .with_prompt("Calculate the number of placements from capacity parameters?")
                .default(true)
                .interact()
        })?;
    if calculated {
        return Ok(CoverRequest::Calculated(read_capacity_params(multi, parameters)?));
    }

    let count: u32 = multi.suspend(|| {
        Input::new()
            .with_prompt("Number of placements")
            .default(1)
            .interact_text()
    })?;
    Ok(CoverRequest::Fixed(count))
}

async fn optimize_polygon(
    session: &MapSession,
    dialogs: &TerminalDialogs,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let geometry = read_geometry(multi, "Polygon (EPSG:4326 WKT)")?;
    let Some(name) = dialogs.request_name("Polygon name").await else {
        return Ok(());
    };
    let category = select_category(multi)?;
    let cover = read_cover(multi, category)?;

    let request = SubmitRequest {
        name,
        category,
        cover,
    };
    let outcome = spinner(multi, "Optimizing", session.submit_polygon(geometry, request)).await?;
    match outcome {
        OptimizationOutcome::Failed { polygon_id, error } => {
            log::error!("Polygon {polygon_id} saved; optimization failed: {error}");
        }
        OptimizationOutcome::Merged {
            polygon_id,
            estimate,
            points,
            ..
        } => {
            if let Some(estimate) = estimate {
                println!(
                    "Estimated {} placements ({} capacity)",
                    estimate.min_cover_count, estimate.capacity
                );
            }
            println!("{} placements merged", points.len());
            if points.is_empty() {
                return Ok(());
            }
            if let Some(report) = session.save_points(polygon_id, dialogs).await? {
                println!("Saved {} placements", report.saved.len());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_categories_ask_for_their_parameters() {
        assert_eq!(
            Parameter::for_category(ProjectCategory::WasteManagement),
            [Parameter::PopulationDensity]
        );
        assert_eq!(
            Parameter::for_category(ProjectCategory::InfrastructureManagement),
            [Parameter::RainfallIntensity, Parameter::Duration]
        );
        assert_eq!(
            Parameter::for_category(ProjectCategory::ParkingPlanning),
            [Parameter::Usage]
        );
        assert!(Parameter::for_category(ProjectCategory::RegionPlanning).is_empty());
        assert!(Parameter::for_category(ProjectCategory::AllProjects).is_empty());
    }

    #[test]
    fn numeric_answers_fill_calculated_request() {
        let mut params = CapacityParams::default();
        for (parameter, value) in [(Parameter::RainfallIntensity, 1.5), (Parameter::Duration, 20.0)] {
            parameter.assign(&mut params, value);
        }
        Parameter::Usage.assign(&mut params, 3.0);

        assert_eq!(params.rainfall_intensity, Some(1.5));
        assert_eq!(params.duration, Some(20.0));
        assert_eq!(params.population_density, None);
        assert_eq!(params.usage_type, None);
    }

    #[test]
    fn every_category_with_a_formula_is_calculable() {
        let calculator = citymap_capacity::FormulaCalculator::default();
        for category in ProjectCategory::ALL {
            let mut params = CapacityParams {
                area_sq_m: 10_000.0,
                ..CapacityParams::default()
            };
            for parameter in Parameter::for_category(*category) {
                parameter.assign(&mut params, 1.0);
            }
            if Parameter::for_category(*category).contains(&Parameter::Usage) {
                params.usage_type = Some(UsageType::Mixed);
            }
            let calculable = citymap_capacity::CapacityCalculator::calculate(
                &calculator,
                *category,
                &params,
            )
            .is_ok();
            assert_eq!(calculable, !Parameter::for_category(*category).is_empty(), "{category}");
        }
    }
}
