//! Handlers for the non-interactive subcommands.

use std::str::FromStr;

use citymap_capacity::CapacityParams;
use citymap_cli_utils::{MultiProgress, TerminalDialogs, spinner};
use citymap_geocoder::Geocoder;
use citymap_geometry::{FeatureGeometry, Projection, ProjectionHint};
use citymap_geometry_models::{FeatureId, ProjectCategory};
use citymap_map::dialogs::ScriptedDialogs;
use citymap_map::reconciler::{CoverRequest, OptimizationOutcome, SubmitRequest};
use citymap_map::{Feature, MapSession};

use crate::{AddArgs, Commands, OptimizeArgs};

/// Command-line WKT is always longitude/latitude.
const INPUT: ProjectionHint = ProjectionHint::Explicit(Projection::Geographic);

/// Accepts a short slug or the full category label.
///
/// # Errors
///
/// Returns a message naming the value if it matches no category.
pub fn parse_category(value: &str) -> Result<ProjectCategory, String> {
    let value = value.trim();
    match value.to_lowercase().as_str() {
        "waste" => Ok(ProjectCategory::WasteManagement),
        "region" => Ok(ProjectCategory::RegionPlanning),
        "infrastructure" => Ok(ProjectCategory::InfrastructureManagement),
        "parking" => Ok(ProjectCategory::ParkingPlanning),
        "all" => Ok(ProjectCategory::AllProjects),
        _ => ProjectCategory::from_str(value).map_err(|_| format!("unknown category '{value}'")),
    }
}

pub async fn run(
    command: Commands,
    session: &MapSession,
    dialogs: &TerminalDialogs,
    geocoder: &dyn Geocoder,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::List { category } => list(session, category),
        Commands::Show { id } => show(session, &FeatureId::Persisted(id))?,
        Commands::Add(args) => add(session, args, geocoder, multi).await?,
        Commands::Rename { id, name } => {
            let id = FeatureId::Persisted(id);
            match name {
                Some(name) => session.rename_to(&id, &name).await?,
                None => {
                    if !session.rename(&id, dialogs).await? {
                        println!("Rename cancelled");
                        return Ok(());
                    }
                }
            }
            show(session, &id)?;
        }
        Commands::Delete { id, yes } => {
            let id = FeatureId::Persisted(id);
            let deleted = if yes {
                session
                    .delete(&id, &ScriptedDialogs::new().confirm_with(true))
                    .await?
            } else {
                session.delete(&id, dialogs).await?
            };
            println!("{}", if deleted { "Deleted" } else { "Delete cancelled" });
        }
        Commands::Move { id, wkt } => move_feature(session, id, &wkt, multi).await?,
        Commands::Optimize(args) => optimize(session, args, dialogs, multi).await?,
        Commands::Reoptimize {
            polygon_id,
            count,
            save,
        } => {
            let outcome = spinner(multi, "Optimizing", session.reoptimize(polygon_id, count)).await?;
            finish_optimization(session, outcome, save, dialogs, multi).await?;
        }
        Commands::Summary => summary(session),
    }
    Ok(())
}

fn list(session: &MapSession, category: Option<ProjectCategory>) {
    let features: Vec<Feature> = session
        .features()
        .into_iter()
        .filter(|f| category.is_none_or(|c| f.category == c))
        .collect();

    for feature in &features {
        println!(
            "{:>8}  {:<10}  {:<18}  {}",
            feature.id.to_string(),
            feature.geometry.kind().to_string(),
            feature.category.to_string(),
            feature.name
        );
    }
    println!("{} features", features.len());
}

async fn add(
    session: &MapSession,
    args: AddArgs,
    geocoder: &dyn Geocoder,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = match (args.wkt, args.address) {
        (Some(wkt), _) => {
            let name = args.name.ok_or("--name is required with --wkt")?;
            let geometry = FeatureGeometry::from_interchange(&wkt, INPUT)?;
            spinner(multi, "Creating", session.add_feature(&name, geometry, args.category)).await?
        }
        (None, Some(address)) => {
            let added = spinner(
                multi,
                "Looking up address",
                session.add_address(geocoder, &address, args.name.as_deref(), args.category),
            )
            .await?;
            let Some((id, found)) = added else {
                return Err(format!("Address not found: {address}").into());
            };
            if let Some(matched) = found.matched_address {
                println!("Matched {matched}");
            }
            id
        }
        (None, None) => return Err("either --wkt or --address is required".into()),
    };
    println!("Created {id}");
    show(session, &FeatureId::Persisted(id))
}

fn show(session: &MapSession, id: &FeatureId) -> Result<(), Box<dyn std::error::Error>> {
    let details = session.details(id)?;
    println!("{} ({}) {}", details.name, details.kind, details.id);
    println!("  {}", details.wkt);
    if let Some(measurement) = details.measurement {
        println!("  {measurement}");
    }
    Ok(())
}

async fn move_feature(
    session: &MapSession,
    id: i64,
    wkt: &str,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = FeatureId::Persisted(id);
    let geometry = FeatureGeometry::from_interchange(wkt, INPUT)?;

    let generation = session.begin_modify()?;
    session.record_move(generation, &id, geometry)?;
    let report = spinner(multi, "Saving move", session.complete_modify(generation)).await;
    session.cancel();
    let report = report?;

    if let Some((id, e)) = report.failed.first() {
        return Err(format!("Move of {id} failed: {e}").into());
    }
    if !report.reloaded {
        log::warn!("Move saved but the map could not be reloaded");
    }
    show(session, &id)
}

async fn optimize(
    session: &MapSession,
    args: OptimizeArgs,
    dialogs: &TerminalDialogs,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let geometry = FeatureGeometry::from_interchange(&args.wkt, INPUT)?;
    let cover = args.count.map_or_else(
        || {
            CoverRequest::Calculated(CapacityParams {
                area_sq_m: 0.0,
                population_density: args.density,
                rainfall_intensity: args.rainfall,
                duration: args.duration,
                usage_type: args.usage,
            })
        },
        CoverRequest::Fixed,
    );
    let request = SubmitRequest {
        name: args.name,
        category: args.category,
        cover,
    };

    let outcome = spinner(multi, "Optimizing", session.submit_polygon(geometry, request)).await?;
    finish_optimization(session, outcome, args.save, dialogs, multi).await
}

/// Prints an outcome and saves its placements, with or without a prompt.
async fn finish_optimization(
    session: &MapSession,
    outcome: OptimizationOutcome,
    save: bool,
    dialogs: &TerminalDialogs,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let polygon_id = match outcome {
        OptimizationOutcome::Failed { polygon_id, error } => {
            println!("Polygon {polygon_id} saved; optimization failed");
            return Err(error.into());
        }
        OptimizationOutcome::Merged {
            polygon_id,
            estimate,
            points,
            duplicates,
            replaced,
        } => {
            if let Some(estimate) = estimate {
                println!(
                    "Estimated {} placements ({} capacity)",
                    estimate.min_cover_count, estimate.capacity
                );
            }
            println!(
                "Polygon {polygon_id}: {} placements merged, {duplicates} duplicates dropped, {replaced} replaced",
                points.len()
            );
            if points.is_empty() {
                return Ok(());
            }
            polygon_id
        }
    };

    let report = if save {
        let confirmed = ScriptedDialogs::new().confirm_with(true);
        spinner(multi, "Saving placements", session.save_points(polygon_id, &confirmed)).await?
    } else {
        session.save_points(polygon_id, dialogs).await?
    };
    match report {
        Some(report) => println!(
            "Saved {} placements ({} duplicates skipped)",
            report.saved.len(),
            report.duplicates
        ),
        None => println!("Placements not saved"),
    }
    Ok(())
}

fn summary(session: &MapSession) {
    for summary in session.project_summaries() {
        let capacity = summary
            .capacity
            .map_or_else(|| "-".to_string(), |c| format!("{c:.1}"));
        println!(
            "{:>8}  {:<24}  {:<18}  {:>5} points  capacity {capacity}",
            summary.polygon_id.to_string(),
            summary.name,
            summary.category.to_string(),
            summary.point_count
        );
    }
}
