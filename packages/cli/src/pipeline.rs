//! End-to-end run: load surveys, join, export.
//!
//! Every configuration check happens before the first dataset is joined,
//! so a bad year, key, or coordinate system fails the run early.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crop_rotation_cli_utils::{IndicatifProgress, MultiProgress};
use crop_rotation_io::{
    ExportLayout, LoadOptions, RunConfig, default_output_path, ensure_shared_crs, export_all,
    load_plot_table,
};
use crop_rotation_join::{JoinOptions, historical_years, join_rotations};
use crop_rotation_plots_models::{PlotTable, Year};

/// What a finished run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub rows: usize,
    pub years: Vec<Year>,
    pub written: Vec<PathBuf>,
}

/// Runs the full join described by `config`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, a dataset cannot be
/// loaded, the datasets disagree on their coordinate system, or the
/// output cannot be written.
pub fn run(
    config: &RunConfig,
    threads: Option<usize>,
    multi: &MultiProgress,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let start = Instant::now();

    config.validate()?;
    let options = JoinOptions {
        min_overlap_area: config.min_overlap_area(),
        threads,
    };
    options.validate()?;

    let current_year = config.current_year()?;
    let datasets = config.historical_datasets()?;
    if datasets.is_empty() {
        log::warn!("No historical datasets configured; only current-year codes will be exported");
    }

    let loading = IndicatifProgress::steps_bar(
        multi,
        "Loading surveys",
        u64::try_from(datasets.len() + 1).unwrap_or(u64::MAX),
    );

    let current = load_plot_table(
        &config.current,
        current_year,
        &LoadOptions::current(config.keys.current_keys()),
    )?;
    loading.inc(1);

    let historical_options = LoadOptions::historical(config.keys.historical_keys());
    let mut historical = BTreeMap::new();
    for (&year, path) in &datasets {
        loading.set_message(format!("Loading {year}"));
        historical.insert(year, load_plot_table(path, year, &historical_options)?);
        loading.inc(1);
    }
    loading.finish(format!("Loaded {} survey(s)", datasets.len() + 1));

    let crs = ensure_shared_crs(tables_by_path(config, &current, &datasets, &historical))?;
    if let Some(crs) = &crs {
        log::info!("Coordinate system: {crs}");
    }

    let joining = IndicatifProgress::parcels_bar(multi, "Joining rotations");
    let records = join_rotations(&current, &historical, &options, Some(joining))?;

    let years = historical_years(current_year, &historical);
    let layout = ExportLayout::new(
        &records,
        &config.keys.id_cur,
        config.column_prefix(),
        current_year,
        &years,
    );

    let output = config.output.clone().unwrap_or_else(|| {
        let start_year = years.first().copied().unwrap_or(current_year).min(current_year);
        default_output_path(start_year, current_year)
    });
    let written = export_all(&output, &records, &layout, crs.as_deref())?;

    log::info!(
        "Joined {} parcels across {} year(s) in {:.1}s",
        records.len(),
        years.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(RunSummary {
        rows: records.len(),
        years,
        written,
    })
}

fn tables_by_path<'a>(
    config: &'a RunConfig,
    current: &'a PlotTable,
    datasets: &'a BTreeMap<Year, PathBuf>,
    historical: &'a BTreeMap<Year, PlotTable>,
) -> Vec<(&'a Path, &'a PlotTable)> {
    std::iter::once((config.current.as_path(), current))
        .chain(datasets.iter().filter_map(|(year, path)| {
            historical
                .get(year)
                .map(|table| (path.as_path(), table))
        }))
        .collect()
}
