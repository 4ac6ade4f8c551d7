#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line client for the city map backend.
//!
//! Every subcommand mounts a [`MapSession`] against the configured backend
//! and runs one flow through it. Without a subcommand an interactive menu
//! is shown instead.
//!
//! Uses `indicatif-log-bridge` (via [`citymap_cli_utils::init_logger`]) to
//! route `log` output through `indicatif::MultiProgress` so that log lines
//! and spinners never fight for the terminal.

mod commands;
mod interactive;

use std::path::PathBuf;
use std::sync::Arc;

use citymap_backend::HttpBackend;
use citymap_capacity::FormulaCalculator;
use citymap_cli_utils::{TerminalDialogs, spinner};
use citymap_geocoder::NominatimGeocoder;
use citymap_geometry_models::{ProjectCategory, UsageType};
use citymap_map::{MapConfig, MapSession};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "citymap", about = "Municipal map client")]
struct Cli {
    /// Client configuration file (defaults to the embedded configuration)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides `backend.base_url` from the configuration
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List every feature
    List {
        /// Only show this category (e.g., "waste", "parking")
        #[arg(long, value_parser = commands::parse_category)]
        category: Option<ProjectCategory>,
    },
    /// Show one feature with its measurement
    Show {
        /// Backend id
        id: i64,
    },
    /// Create a feature from longitude/latitude WKT or at an address
    Add(AddArgs),
    /// Rename a feature, prompting when `--name` is omitted
    Rename {
        /// Backend id
        id: i64,
        /// New name
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a feature
    Delete {
        /// Backend id
        id: i64,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Move a feature to new longitude/latitude WKT
    Move {
        /// Backend id
        id: i64,
        /// Geometry in EPSG:4326 WKT
        #[arg(long)]
        wkt: String,
    },
    /// Submit a polygon and merge the optimizer's placements
    Optimize(OptimizeArgs),
    /// Re-run optimization of a saved polygon with a new placement count
    Reoptimize {
        /// Backend id of the polygon
        polygon_id: i64,
        /// Number of placements
        #[arg(long)]
        count: u32,
        /// Save the merged placements without prompting
        #[arg(long)]
        save: bool,
    },
    /// Point counts and capacities per project polygon
    Summary,
}

#[derive(Args)]
struct AddArgs {
    /// Display name (defaults to the address)
    #[arg(long, required_unless_present = "address")]
    name: Option<String>,
    /// Geometry in EPSG:4326 WKT (e.g., "POINT(29.1 40.98)")
    #[arg(long, required_unless_present = "address", conflicts_with = "address")]
    wkt: Option<String>,
    /// Look up this address and place a point at the match
    #[arg(long)]
    address: Option<String>,
    /// Project category
    #[arg(long, value_parser = commands::parse_category, default_value = "all")]
    category: ProjectCategory,
}

#[derive(Args)]
struct OptimizeArgs {
    /// Polygon name; placements are named `<name>-1`, `<name>-2`, ...
    #[arg(long)]
    name: String,
    /// Polygon in EPSG:4326 WKT
    #[arg(long)]
    wkt: String,
    /// Project category
    #[arg(long, value_parser = commands::parse_category)]
    category: ProjectCategory,
    /// Fixed number of placements (skips the capacity formula)
    #[arg(long)]
    count: Option<u32>,
    /// People per square meter (waste)
    #[arg(long)]
    density: Option<f64>,
    /// Rainfall intensity in mm/min (infrastructure)
    #[arg(long)]
    rainfall: Option<f64>,
    /// Storm duration in minutes (infrastructure)
    #[arg(long)]
    duration: Option<f64>,
    /// Land-use type (parking): residential, commercial or mixed
    #[arg(long)]
    usage: Option<UsageType>,
    /// Save the merged placements without prompting
    #[arg(long)]
    save: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = citymap_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MapConfig::load(path)?,
        None => MapConfig::embedded()?,
    };
    if let Some(base_url) = cli.base_url {
        config.backend.base_url = base_url;
    }
    log::debug!("Using backend at {}", config.backend.base_url);

    let backend = Arc::new(HttpBackend::new(config.backend.clone())?);
    let session = MapSession::new(backend, Arc::new(FormulaCalculator::default()), &config);
    let geocoder = NominatimGeocoder::new(config.geocoder.clone())?;
    let dialogs = TerminalDialogs::new(multi.clone(), config.map.max_name_len);

    spinner(&multi, "Loading features", session.mount()).await?;

    let result = match cli.command {
        Some(command) => commands::run(command, &session, &dialogs, &geocoder, &multi).await,
        None => interactive::run(&session, &dialogs, &geocoder, &multi).await,
    };

    session.unmount();
    result
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("citymap").chain(args.iter().copied()))
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn add_takes_wkt_or_address() {
        let Ok(Cli {
            command: Some(Commands::Add(args)),
            ..
        }) = parse(&["add", "--address", "Bağdat Caddesi 1, Kadıköy"])
        else {
            panic!("expected add");
        };
        assert_eq!(args.address.as_deref(), Some("Bağdat Caddesi 1, Kadıköy"));
        assert!(args.name.is_none());
        assert_eq!(args.category, ProjectCategory::AllProjects);

        assert!(parse(&["add", "--name", "A", "--wkt", "POINT(29 41)"]).is_ok());
        assert!(parse(&["add", "--wkt", "POINT(29 41)"]).is_err());
        assert!(parse(&["add", "--name", "A"]).is_err());
        assert!(parse(&["add", "--wkt", "POINT(29 41)", "--address", "X"]).is_err());
    }
}
