#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the crop rotation joiner.
//!
//! Reads a current-year parcel survey and any number of historical ones,
//! links every current parcel to its largest-overlap predecessor in each
//! historical year, and writes the crop history as one column per year.
//!
//! Uses `indicatif-log-bridge` (via [`crop_rotation_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod pipeline;

use std::path::PathBuf;

use clap::Parser;
use crop_rotation_io::{PlotIoError, RunConfig};
use crop_rotation_plots_models::Year;

#[derive(Parser, Debug, Default)]
#[command(
    name = "crop_rotation_cli",
    about = "Join crop rotation history onto current-year parcels by largest overlap"
)]
struct Cli {
    /// Current-year dataset (`GeoJSON` `FeatureCollection`, year in the file name)
    #[arg(long = "cur")]
    current: Option<PathBuf>,
    /// Directory holding one historical dataset per year
    #[arg(long = "hist")]
    historical_dir: Option<PathBuf>,
    /// Output `GeoJSON` path; a CSV is written next to it.
    /// Defaults to `joined-plots_<start>-<current>.geojson`.
    #[arg(long = "out")]
    output: Option<PathBuf>,
    /// TOML run file with an explicit `year -> dataset` mapping.
    /// Command-line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Crop code attribute in historical datasets (default: `CODE`)
    #[arg(long)]
    key_hist: Option<String>,
    /// Crop code attribute in the current dataset (default: `CODE`)
    #[arg(long)]
    key_cur: Option<String>,
    /// Id attribute in historical datasets (default: `ID`)
    #[arg(long)]
    id_hist: Option<String>,
    /// Id attribute in the current dataset (default: `ID`)
    #[arg(long)]
    id_cur: Option<String>,
    /// Current year, when the current file name does not contain it
    #[arg(long)]
    current_year: Option<Year>,
    /// Overlaps at or below this area (square units) never match (default: 1.0)
    #[arg(long)]
    min_overlap: Option<f64>,
    /// Prefix of the per-year crop code columns (default: `CODE`)
    #[arg(long)]
    column_prefix: Option<String>,
    /// Worker threads for the join (default: one per CPU)
    #[arg(long)]
    threads: Option<usize>,
}

impl Cli {
    /// Builds the run configuration from the TOML file, if any, with
    /// explicit flags taking precedence.
    fn run_config(&self) -> Result<RunConfig, PlotIoError> {
        let mut config = match (&self.config, &self.current) {
            (Some(path), _) => RunConfig::load(path)?,
            (None, Some(current)) => RunConfig::new(current.clone()),
            (None, None) => {
                return Err(PlotIoError::InvalidConfig(
                    "either --cur or --config is required".to_string(),
                ));
            }
        };

        if let Some(current) = &self.current {
            config.current.clone_from(current);
        }
        if self.historical_dir.is_some() {
            config.historical_dir.clone_from(&self.historical_dir);
        }
        if self.output.is_some() {
            config.output.clone_from(&self.output);
        }
        if self.current_year.is_some() {
            config.current_year = self.current_year;
        }
        if self.min_overlap.is_some() {
            config.min_overlap_area = self.min_overlap;
        }
        if self.column_prefix.is_some() {
            config.column_prefix.clone_from(&self.column_prefix);
        }

        let keys = &mut config.keys;
        for (flag, key) in [
            (&self.key_hist, &mut keys.crop_hist),
            (&self.key_cur, &mut keys.crop_cur),
            (&self.id_hist, &mut keys.id_hist),
            (&self.id_cur, &mut keys.id_cur),
        ] {
            if let Some(value) = flag {
                key.clone_from(value);
            }
        }

        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = crop_rotation_cli_utils::init_logger();
    let cli = Cli::parse();

    let config = cli.run_config()?;
    let summary = pipeline::run(&config, cli.threads, &multi)?;

    log::info!(
        "Wrote {} rows with crop history for {:?}",
        summary.rows,
        summary.years
    );

    for path in &summary.written {
        println!("{}", path.display());
    }

    Ok(())
}
