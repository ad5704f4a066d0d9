#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reading survey datasets and writing joined crop rotations.
//!
//! - [`loader`] turns a `GeoJSON` `FeatureCollection` into a
//!   [`PlotTable`](crop_rotation_plots_models::PlotTable).
//! - [`catalog`] infers survey years from file names, discovers historical
//!   datasets, and reads the TOML run configuration.
//! - [`export`] flattens joined records into one column per year and
//!   writes `GeoJSON` and CSV.

pub mod catalog;
pub mod export;
pub mod loader;

pub use catalog::{KeyConfig, RunConfig, discover_historical, ensure_shared_crs, infer_year};
pub use export::{
    ExportLayout, csv_path_for, default_output_path, export_all, write_csv, write_geojson,
};
pub use loader::{LoadOptions, load_plot_table, parse_plot_table};

use crop_rotation_plots_models::Year;

/// Errors from loading, discovering, or exporting datasets.
#[derive(Debug, thiserror::Error)]
pub enum PlotIoError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A dataset file could not be opened or created.
    #[error("Failed to access {dataset}: {source}")]
    Access {
        dataset: String,
        source: std::io::Error,
    },

    /// The dataset is not valid `GeoJSON`.
    #[error("Invalid GeoJSON in {dataset}: {source}")]
    GeoJson {
        dataset: String,
        source: serde_json::Error,
    },

    /// The dataset is `GeoJSON` but not a `FeatureCollection`.
    #[error("{dataset} is not a GeoJSON FeatureCollection")]
    NotFeatureCollection { dataset: String },

    /// A feature holds a geometry that is not polygonal.
    #[error("{dataset}: feature {row} has unsupported geometry type {kind}")]
    UnsupportedGeometry {
        dataset: String,
        row: usize,
        kind: String,
    },

    /// No feature in a non-empty dataset carries the crop attribute.
    #[error("{dataset}: no feature has the crop attribute '{key}'")]
    MissingAttribute { dataset: String, key: String },

    /// The dataset name contains no 4-digit year.
    #[error("Cannot infer a 4-digit year from dataset name {dataset}")]
    MissingYear { dataset: String },

    /// Two historical datasets infer the same year.
    #[error("Datasets {first} and {second} both resolve to year {year}")]
    DuplicateYear {
        year: Year,
        first: String,
        second: String,
    },

    /// The current-year dataset does not exist.
    #[error("Current-year dataset not found: {dataset}")]
    CurrentDatasetMissing { dataset: String },

    /// Two datasets declare different coordinate systems.
    #[error("{dataset} uses coordinate system {found}, expected {expected}")]
    CrsMismatch {
        dataset: String,
        expected: String,
        found: String,
    },

    /// The run configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV writing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
