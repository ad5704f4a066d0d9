#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parcel, plot table, and joined rotation record types.
//!
//! A [`PlotTable`] holds every [`Parcel`] surveyed in one year. Parcel
//! boundaries are redrawn each year, so the only link between years is
//! geometric overlap. The result of linking is one [`JoinedRecord`] per
//! current-year parcel, carrying a sparse `year -> crop code` mapping.

use std::collections::BTreeMap;
use std::fmt;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

/// A survey year (e.g. `2023`).
pub type Year = i32;

/// Default attribute key holding the crop code.
pub const DEFAULT_CROP_KEY: &str = "CODE";

/// Default attribute key holding the parcel id.
pub const DEFAULT_ID_KEY: &str = "ID";

/// Default prefix for per-year crop code columns in exports (`CODE_2021`).
pub const DEFAULT_COLUMN_PREFIX: &str = "CODE";

/// Overlaps at or below this many square units are treated as noise.
pub const DEFAULT_MIN_OVERLAP_AREA: f64 = 1.0;

/// A crop classification code (e.g. `"115"` for winter wheat).
///
/// Codes are categories, not quantities, so they are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CropCode(String);

impl CropCode {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads a crop code from a `GeoJSON` property value.
    ///
    /// Integral numbers lose any fractional part (`115.0` becomes `"115"`)
    /// since survey exports frequently store integer codes as floats.
    /// Returns `None` for `null`, empty strings, arrays, and objects.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(Self::new(trimmed))
                }
            }
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self(i.to_string()))
                } else if let Some(u) = n.as_u64() {
                    Some(Self(u.to_string()))
                } else {
                    let f = n.as_f64()?;
                    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
                        Some(Self((f as i64).to_string()))
                    } else {
                        Some(Self(n.to_string()))
                    }
                }
            }
            serde_json::Value::Bool(b) => Some(Self(b.to_string())),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for CropCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CropCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u32> for CropCode {
    fn from(value: u32) -> Self {
        Self(value.to_string())
    }
}

/// Attribute key names used when reading one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AttributeKeys {
    /// Attribute holding the crop code.
    pub crop: String,
    /// Attribute holding the parcel id. Source values are overwritten with
    /// sequential row ids; the key only names the exported column.
    pub id: String,
}

impl Default for AttributeKeys {
    fn default() -> Self {
        Self {
            crop: DEFAULT_CROP_KEY.to_string(),
            id: DEFAULT_ID_KEY.to_string(),
        }
    }
}

/// A single parcel of land as surveyed in one year.
#[derive(Debug, Clone, PartialEq)]
pub struct Parcel {
    /// 1-based row position within its [`PlotTable`].
    pub id: u64,
    /// Parcel footprint in projected planar units. Empty when the source
    /// feature had no geometry.
    pub geometry: MultiPolygon<f64>,
    /// Crop grown on the parcel, if the source recorded one.
    pub crop_code: Option<CropCode>,
    /// Remaining source attributes, minus the id and crop keys.
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Parcel {
    #[must_use]
    pub fn new(id: u64, geometry: MultiPolygon<f64>, crop_code: Option<CropCode>) -> Self {
        Self {
            id,
            geometry,
            crop_code,
            attributes: serde_json::Map::new(),
        }
    }

    /// Whether the parcel has no polygons at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty()
    }
}

/// Every parcel surveyed in one year, in stable source row order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotTable {
    pub year: Year,
    /// Keys the table was loaded with.
    pub keys: AttributeKeys,
    /// Coordinate reference system name declared by the source, if any.
    pub crs: Option<String>,
    parcels: Vec<Parcel>,
}

impl PlotTable {
    /// Creates a table from parcels in row order.
    ///
    /// Parcel ids are reassigned to `1..=n` so they always match row
    /// order, whatever ids the caller supplied.
    #[must_use]
    pub fn new(year: Year, keys: AttributeKeys, parcels: Vec<Parcel>) -> Self {
        let parcels = parcels
            .into_iter()
            .zip(1_u64..)
            .map(|(mut parcel, id)| {
                parcel.id = id;
                parcel
            })
            .collect();

        Self {
            year,
            keys,
            crs: None,
            parcels,
        }
    }

    /// An empty table for `year` with default keys.
    #[must_use]
    pub fn empty(year: Year) -> Self {
        Self::new(year, AttributeKeys::default(), Vec::new())
    }

    #[must_use]
    pub fn with_crs(mut self, crs: Option<String>) -> Self {
        self.crs = crs;
        self
    }

    #[must_use]
    pub fn parcels(&self) -> &[Parcel] {
        &self.parcels
    }

    /// Looks up a parcel by its row id.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<&Parcel> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        self.parcels.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }
}

/// The winning historical parcel for one current parcel in one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearMatch {
    pub crop_code: CropCode,
    /// Row id of the matched parcel in that year's table.
    pub parcel_id: u64,
    /// Intersection area with the current parcel, in square units.
    pub overlap_area: f64,
}

/// One current-year parcel annotated with its crop history.
///
/// The id and geometry are fixed at construction. Only the year mapping
/// grows, one year at a time, through [`JoinedRecord::record_year`].
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRecord {
    current_id: u64,
    current_geometry: MultiPolygon<f64>,
    current_code: Option<CropCode>,
    attributes: serde_json::Map<String, serde_json::Value>,
    years: BTreeMap<Year, YearMatch>,
}

impl JoinedRecord {
    /// Starts a record for a current-year parcel with no history.
    #[must_use]
    pub fn from_parcel(parcel: &Parcel) -> Self {
        Self {
            current_id: parcel.id,
            current_geometry: parcel.geometry.clone(),
            current_code: parcel.crop_code.clone(),
            attributes: parcel.attributes.clone(),
            years: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn current_id(&self) -> u64 {
        self.current_id
    }

    #[must_use]
    pub const fn current_geometry(&self) -> &MultiPolygon<f64> {
        &self.current_geometry
    }

    /// The crop code of the current-year parcel itself.
    #[must_use]
    pub const fn current_code(&self) -> Option<&CropCode> {
        self.current_code.as_ref()
    }

    #[must_use]
    pub const fn attributes(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.attributes
    }

    /// Historical matches keyed by year, ascending.
    #[must_use]
    pub const fn years(&self) -> &BTreeMap<Year, YearMatch> {
        &self.years
    }

    /// The crop code matched in `year`, if any.
    #[must_use]
    pub fn code_for(&self, year: Year) -> Option<&CropCode> {
        self.years.get(&year).map(|m| &m.crop_code)
    }

    /// Records the outcome for `year`. `None` leaves the year absent.
    pub fn record_year(&mut self, year: Year, outcome: Option<YearMatch>) {
        if let Some(found) = outcome {
            self.years.insert(year, found);
        }
    }
}
