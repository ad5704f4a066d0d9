//! Which datasets take part in a run, and for which years.
//!
//! Survey files carry their year in the file name (`schlaege_2023.geojson`).
//! A run is described by a [`RunConfig`], either read from TOML or built
//! from command-line flags, which resolves to the current-year dataset and
//! an explicit `year -> dataset` mapping for history.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crop_rotation_plots_models::{AttributeKeys, DEFAULT_CROP_KEY, DEFAULT_ID_KEY, PlotTable, Year};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::PlotIoError;

/// Infers the survey year from the file name of `path`.
///
/// Takes the first run of exactly four digits, so `nrw_2019_v2.geojson`
/// yields `2019` while `parcels_20190.geojson` yields nothing.
#[must_use]
pub fn infer_year(path: &Path) -> Option<Year> {
    let name = path.file_name()?.to_str()?;
    let re = Regex::new(r"(?:^|[^0-9])([0-9]{4})(?:[^0-9]|$)").unwrap_or_else(|_| unreachable!());
    re.captures(name)?.get(1)?.as_str().parse().ok()
}

/// Like [`infer_year`], but a missing year is an error naming `path`.
///
/// # Errors
///
/// Returns [`PlotIoError::MissingYear`] if the file name has no year.
pub fn require_year(path: &Path) -> Result<Year, PlotIoError> {
    infer_year(path).ok_or_else(|| PlotIoError::MissingYear {
        dataset: path.display().to_string(),
    })
}

/// Scans `dir` for one dataset per historical year.
///
/// Hidden files and subdirectories are skipped. The dataset whose year is
/// `current_year` is left out, so the current survey never matches itself.
///
/// # Errors
///
/// Returns [`PlotIoError`] if the directory cannot be read, a file name
/// has no year, or two files resolve to the same year.
pub fn discover_historical(
    dir: &Path,
    current_year: Year,
) -> Result<BTreeMap<Year, PathBuf>, PlotIoError> {
    let entries = std::fs::read_dir(dir).map_err(|source| PlotIoError::Access {
        dataset: dir.display().to_string(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !entry.file_type()?.is_file() {
            continue;
        }
        paths.push(entry.path());
    }
    paths.sort();

    let mut datasets = BTreeMap::new();
    for path in paths {
        let year = require_year(&path)?;
        if year == current_year {
            log::info!(
                "Not importing {}: it is the current year ({year})",
                path.display()
            );
            continue;
        }
        insert_unique(&mut datasets, year, path)?;
    }

    log::info!(
        "Found {} historical dataset(s) in {}: {:?}",
        datasets.len(),
        dir.display(),
        datasets.keys().collect::<Vec<_>>()
    );

    Ok(datasets)
}

fn insert_unique(
    datasets: &mut BTreeMap<Year, PathBuf>,
    year: Year,
    path: PathBuf,
) -> Result<(), PlotIoError> {
    if let Some(first) = datasets.get(&year) {
        return Err(PlotIoError::DuplicateYear {
            year,
            first: first.display().to_string(),
            second: path.display().to_string(),
        });
    }
    datasets.insert(year, path);
    Ok(())
}

/// Checks that every table declaring a coordinate system declares the
/// same one, and returns it.
///
/// Tables without a declaration are assumed to share the others' system.
///
/// # Errors
///
/// Returns [`PlotIoError::CrsMismatch`] naming the first dataset that
/// disagrees.
pub fn ensure_shared_crs<'a>(
    tables: impl IntoIterator<Item = (&'a Path, &'a PlotTable)>,
) -> Result<Option<String>, PlotIoError> {
    let mut shared: Option<&'a str> = None;

    for (path, table) in tables {
        let Some(crs) = table.crs.as_deref() else {
            log::debug!("{}: no coordinate system declared", path.display());
            continue;
        };
        match shared {
            None => shared = Some(crs),
            Some(expected) if expected != crs => {
                return Err(PlotIoError::CrsMismatch {
                    dataset: path.display().to_string(),
                    expected: expected.to_string(),
                    found: crs.to_string(),
                });
            }
            Some(_) => {}
        }
    }

    Ok(shared.map(str::to_string))
}

/// Attribute key names for current and historical datasets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeyConfig {
    pub crop_hist: String,
    pub crop_cur: String,
    pub id_hist: String,
    pub id_cur: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            crop_hist: DEFAULT_CROP_KEY.to_string(),
            crop_cur: DEFAULT_CROP_KEY.to_string(),
            id_hist: DEFAULT_ID_KEY.to_string(),
            id_cur: DEFAULT_ID_KEY.to_string(),
        }
    }
}

impl KeyConfig {
    #[must_use]
    pub fn historical_keys(&self) -> AttributeKeys {
        AttributeKeys {
            crop: self.crop_hist.clone(),
            id: self.id_hist.clone(),
        }
    }

    #[must_use]
    pub fn current_keys(&self) -> AttributeKeys {
        AttributeKeys {
            crop: self.crop_cur.clone(),
            id: self.id_cur.clone(),
        }
    }

    fn validate(&self) -> Result<(), PlotIoError> {
        for (name, value) in [
            ("crop_hist", &self.crop_hist),
            ("crop_cur", &self.crop_cur),
            ("id_hist", &self.id_hist),
            ("id_cur", &self.id_cur),
        ] {
            if value.trim().is_empty() {
                return Err(PlotIoError::InvalidConfig(format!(
                    "attribute key '{name}' must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Everything a run needs to know about its inputs and outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Current-year dataset; defines the output rows.
    pub current: PathBuf,
    /// Current year; inferred from `current` when absent.
    #[serde(default)]
    pub current_year: Option<Year>,
    /// Directory scanned for one dataset per historical year.
    #[serde(default)]
    pub historical_dir: Option<PathBuf>,
    /// Explicit historical datasets keyed by 4-digit year.
    #[serde(default)]
    pub historical: BTreeMap<String, PathBuf>,
    /// Output `GeoJSON` path; a CSV is written next to it.
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub min_overlap_area: Option<f64>,
    /// Prefix of the per-year crop code columns.
    #[serde(default)]
    pub column_prefix: Option<String>,
    #[serde(default)]
    pub keys: KeyConfig,
}

impl RunConfig {
    /// A configuration for `current` with every option at its default.
    #[must_use]
    pub fn new(current: PathBuf) -> Self {
        Self {
            current,
            current_year: None,
            historical_dir: None,
            historical: BTreeMap::new(),
            output: None,
            min_overlap_area: None,
            column_prefix: None,
            keys: KeyConfig::default(),
        }
    }

    /// Parses a TOML run configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PlotIoError::Toml`] if the document is malformed.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, PlotIoError> {
        Ok(toml::de::from_str(toml_str)?)
    }

    /// Reads a TOML run configuration from `path`.
    ///
    /// Relative dataset paths are resolved against the directory holding
    /// the configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`PlotIoError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, PlotIoError> {
        let toml_str = std::fs::read_to_string(path).map_err(|source| PlotIoError::Access {
            dataset: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&toml_str)?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.relative_to(base))
    }

    fn relative_to(mut self, base: &Path) -> Self {
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };

        self.current = resolve(self.current);
        self.historical_dir = self.historical_dir.map(resolve);
        self.output = self.output.map(resolve);
        self.historical = self
            .historical
            .into_iter()
            .map(|(year, p)| (year, resolve(p)))
            .collect();
        self
    }

    /// Checks the configuration before any dataset is read.
    ///
    /// # Errors
    ///
    /// Returns [`PlotIoError`] for empty key names, a missing current
    /// dataset, or a current year that cannot be determined.
    pub fn validate(&self) -> Result<(), PlotIoError> {
        self.keys.validate()?;

        if self
            .column_prefix
            .as_deref()
            .is_some_and(|prefix| prefix.trim().is_empty())
        {
            return Err(PlotIoError::InvalidConfig(
                "column prefix must not be empty".to_string(),
            ));
        }
        if !self.current.is_file() {
            return Err(PlotIoError::CurrentDatasetMissing {
                dataset: self.current.display().to_string(),
            });
        }
        self.current_year()?;
        Ok(())
    }

    /// The configured current year, or the one in the current file name.
    ///
    /// # Errors
    ///
    /// Returns [`PlotIoError::MissingYear`] if neither is available.
    pub fn current_year(&self) -> Result<Year, PlotIoError> {
        self.current_year
            .map_or_else(|| require_year(&self.current), Ok)
    }

    /// Resolves the historical `year -> dataset` mapping.
    ///
    /// Explicit entries and the scanned directory are merged; the current
    /// year is excluded from both.
    ///
    /// # Errors
    ///
    /// Returns [`PlotIoError`] for a year key that is not four digits, an
    /// unreadable directory, an undeterminable year, or a year claimed by
    /// two datasets.
    pub fn historical_datasets(&self) -> Result<BTreeMap<Year, PathBuf>, PlotIoError> {
        let current_year = self.current_year()?;

        let mut datasets = match &self.historical_dir {
            Some(dir) => discover_historical(dir, current_year)?,
            None => BTreeMap::new(),
        };

        for (key, path) in &self.historical {
            let year = parse_year_key(key)?;
            if year == current_year {
                log::info!(
                    "Not importing {}: it is the current year ({year})",
                    path.display()
                );
                continue;
            }
            insert_unique(&mut datasets, year, path.clone())?;
        }

        Ok(datasets)
    }

    #[must_use]
    pub fn min_overlap_area(&self) -> f64 {
        self.min_overlap_area
            .unwrap_or(crop_rotation_plots_models::DEFAULT_MIN_OVERLAP_AREA)
    }

    #[must_use]
    pub fn column_prefix(&self) -> &str {
        self.column_prefix
            .as_deref()
            .unwrap_or(crop_rotation_plots_models::DEFAULT_COLUMN_PREFIX)
    }
}

fn parse_year_key(key: &str) -> Result<Year, PlotIoError> {
    let key = key.trim();
    if key.len() == 4 && key.chars().all(|c| c.is_ascii_digit()) {
        key.parse()
            .map_err(|_| PlotIoError::InvalidConfig(format!("invalid year key '{key}'")))
    } else {
        Err(PlotIoError::InvalidConfig(format!(
            "historical year key '{key}' is not a 4-digit year"
        )))
    }
}
