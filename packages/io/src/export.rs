//! Writes joined records as one flat row per current parcel.
//!
//! Columns are the current id, the carried current-year attributes, the
//! current parcel's own crop code as `<prefix>_<current year>`, and one
//! `<prefix>_<year>` column per historical year in ascending order. Years
//! without a match are `null` in `GeoJSON` and empty in CSV.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crop_rotation_plots_models::{JoinedRecord, Year};
use geojson::{Feature, FeatureCollection, Geometry};
use serde_json::Value;

use crate::PlotIoError;

/// Column naming and order for an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportLayout {
    pub id_column: String,
    /// Carried attributes, sorted by name.
    pub attribute_columns: Vec<String>,
    pub column_prefix: String,
    pub current_year: Year,
    /// Historical years, ascending.
    pub years: Vec<Year>,
}

impl ExportLayout {
    /// Derives the layout from the records being exported.
    ///
    /// Every year in `years` gets a column even if no record matched in it.
    /// Carried attributes whose names collide with a generated column are
    /// dropped.
    #[must_use]
    pub fn new(
        records: &[JoinedRecord],
        id_column: &str,
        column_prefix: &str,
        current_year: Year,
        years: &[Year],
    ) -> Self {
        let mut years = years.to_vec();
        years.sort_unstable();
        years.dedup();
        years.retain(|&year| year != current_year);

        let mut layout = Self {
            id_column: id_column.to_string(),
            attribute_columns: Vec::new(),
            column_prefix: column_prefix.to_string(),
            current_year,
            years,
        };

        let generated: BTreeSet<String> = layout.code_columns().into_iter().collect();
        let mut attributes = BTreeSet::new();
        for record in records {
            for key in record.attributes().keys() {
                if key == id_column || generated.contains(key) {
                    continue;
                }
                attributes.insert(key.clone());
            }
        }

        let clashing = records
            .iter()
            .flat_map(|r| r.attributes().keys())
            .filter(|key| generated.contains(*key))
            .collect::<BTreeSet<_>>();
        if !clashing.is_empty() {
            log::warn!("Dropping source attributes that clash with crop code columns: {clashing:?}");
        }

        layout.attribute_columns = attributes.into_iter().collect();
        layout
    }

    /// Column name for `year`'s crop code (`CODE_2021`).
    #[must_use]
    pub fn year_column(&self, year: Year) -> String {
        format!("{}_{year}", self.column_prefix)
    }

    fn code_columns(&self) -> Vec<String> {
        std::iter::once(self.current_year)
            .chain(self.years.iter().copied())
            .map(|year| self.year_column(year))
            .collect()
    }

    /// All column names in output order.
    #[must_use]
    pub fn headers(&self) -> Vec<String> {
        let mut headers = Vec::with_capacity(2 + self.attribute_columns.len() + self.years.len());
        headers.push(self.id_column.clone());
        headers.extend(self.attribute_columns.iter().cloned());
        headers.extend(self.code_columns());
        headers
    }

    /// Values of `record` in [`ExportLayout::headers`] order.
    #[must_use]
    pub fn row_values(&self, record: &JoinedRecord) -> Vec<Value> {
        let mut values = Vec::with_capacity(2 + self.attribute_columns.len() + self.years.len());
        values.push(Value::from(record.current_id()));
        values.extend(
            self.attribute_columns
                .iter()
                .map(|key| record.attributes().get(key).cloned().unwrap_or(Value::Null)),
        );
        values.push(code_value(record.current_code().map(ToString::to_string)));
        values.extend(
            self.years
                .iter()
                .map(|&year| code_value(record.code_for(year).map(ToString::to_string))),
        );
        values
    }

    /// `record` as a `GeoJSON` properties object.
    #[must_use]
    pub fn properties(&self, record: &JoinedRecord) -> serde_json::Map<String, Value> {
        self.headers()
            .into_iter()
            .zip(self.row_values(record))
            .collect()
    }
}

fn code_value(code: Option<String>) -> Value {
    code.map_or(Value::Null, Value::String)
}

/// Writes `records` as a `GeoJSON` `FeatureCollection`.
///
/// `crs`, when known, is written back as the legacy `crs` member so the
/// output declares the same system as the inputs.
///
/// # Errors
///
/// Returns [`PlotIoError`] if serialization or writing fails.
pub fn write_geojson(
    mut writer: impl Write,
    records: &[JoinedRecord],
    layout: &ExportLayout,
    crs: Option<&str>,
) -> Result<(), PlotIoError> {
    let features = records
        .iter()
        .map(|record| {
            let geometry = record.current_geometry();
            Feature {
                bbox: None,
                geometry: (!geometry.0.is_empty())
                    .then(|| Geometry::new(geojson::Value::from(geometry))),
                id: None,
                properties: Some(layout.properties(record)),
                foreign_members: None,
            }
        })
        .collect();

    let foreign_members = crs.map(|name| {
        let mut members = serde_json::Map::new();
        members.insert(
            "crs".to_string(),
            serde_json::json!({ "type": "name", "properties": { "name": name } }),
        );
        members
    });

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    };

    serde_json::to_writer(&mut writer, &collection)?;
    writer.flush()?;
    Ok(())
}

/// Writes `records` as CSV without geometry.
///
/// # Errors
///
/// Returns [`PlotIoError`] if writing fails.
pub fn write_csv(
    writer: impl Write,
    records: &[JoinedRecord],
    layout: &ExportLayout,
) -> Result<(), PlotIoError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(layout.headers())?;

    for record in records {
        csv.write_record(layout.row_values(record).iter().map(csv_cell))?;
    }

    csv.flush()?;
    Ok(())
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
            value.to_string()
        }
    }
}

/// Writes the `GeoJSON` result to `path` and the CSV next to it.
///
/// When `path` itself ends in `.csv`, only the CSV is written. Returns the
/// paths written.
///
/// # Errors
///
/// Returns [`PlotIoError`] if a file cannot be created or written.
pub fn export_all(
    path: &Path,
    records: &[JoinedRecord],
    layout: &ExportLayout,
    crs: Option<&str>,
) -> Result<Vec<PathBuf>, PlotIoError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut written = Vec::with_capacity(2);
    let csv_path = csv_path_for(path);

    if csv_path != path {
        log::info!("Exporting {} rows to {}", records.len(), path.display());
        write_geojson(BufWriter::new(create(path)?), records, layout, crs)?;
        written.push(path.to_path_buf());
    }

    log::info!("Exporting {} rows to {}", records.len(), csv_path.display());
    write_csv(BufWriter::new(create(&csv_path)?), records, layout)?;
    written.push(csv_path);

    Ok(written)
}

fn create(path: &Path) -> Result<File, PlotIoError> {
    File::create(path).map_err(|source| PlotIoError::Access {
        dataset: path.display().to_string(),
        source,
    })
}

/// The geometry-free CSV companion of an output path.
#[must_use]
pub fn csv_path_for(path: &Path) -> PathBuf {
    path.with_extension("csv")
}

/// Output path used when none is configured.
#[must_use]
pub fn default_output_path(start_year: Year, current_year: Year) -> PathBuf {
    PathBuf::from(format!("joined-plots_{start_year}-{current_year}.geojson"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crop_rotation_plots_models::{CropCode, Parcel, YearMatch};
    use geo::{MultiPolygon, Rect, coord};

    fn records() -> Vec<JoinedRecord> {
        let square = MultiPolygon(vec![
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }).to_polygon(),
        ]);

        let mut first = Parcel::new(1, square, Some(CropCode::from(411)));
        first
            .attributes
            .insert("AREA_HA".to_string(), serde_json::json!(0.01));
        first
            .attributes
            .insert("CODE_2020".to_string(), serde_json::json!("stale"));

        let mut second = Parcel::new(2, MultiPolygon(vec![]), None);
        second
            .attributes
            .insert("NAME".to_string(), serde_json::json!("Nordfeld"));

        let mut a = JoinedRecord::from_parcel(&first);
        a.record_year(
            2020,
            Some(YearMatch {
                crop_code: CropCode::from(115),
                parcel_id: 1,
                overlap_area: 60.0,
            }),
        );
        let b = JoinedRecord::from_parcel(&second);

        vec![a, b]
    }

    fn layout(records: &[JoinedRecord]) -> ExportLayout {
        ExportLayout::new(records, "ID", "CODE", 2023, &[2021, 2020, 2023])
    }

    #[test]
    fn headers_are_ordered_and_clashes_dropped() {
        let records = records();
        let layout = layout(&records);

        assert_eq!(
            layout.headers(),
            vec!["ID", "AREA_HA", "NAME", "CODE_2023", "CODE_2020", "CODE_2021"]
        );
    }

    #[test]
    fn absent_years_are_null() {
        let records = records();
        let layout = layout(&records);

        let values = layout.row_values(&records[0]);
        assert_eq!(values[0], serde_json::json!(1));
        assert_eq!(values[3], serde_json::json!("411"));
        assert_eq!(values[4], serde_json::json!("115"));
        assert_eq!(values[5], Value::Null);

        let values = layout.row_values(&records[1]);
        assert_eq!(values[1], Value::Null);
        assert_eq!(values[2], serde_json::json!("Nordfeld"));
        assert_eq!(values[3], Value::Null);
    }

    #[test]
    fn csv_has_no_geometry_and_empty_cells_for_absent_years() {
        let records = records();
        let layout = layout(&records);

        let mut out = Vec::new();
        write_csv(&mut out, &records, &layout).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "ID,AREA_HA,NAME,CODE_2023,CODE_2020,CODE_2021");
        assert_eq!(lines[1], "1,0.01,,411,115,");
        assert_eq!(lines[2], "2,,Nordfeld,,,");
        assert!(!text.contains("Polygon"));
    }

    #[test]
    fn geojson_round_trips_through_geojson_parser() {
        let records = records();
        let layout = layout(&records);

        let mut out = Vec::new();
        write_geojson(&mut out, &records, &layout, Some("EPSG:25832")).unwrap();

        let parsed: geojson::GeoJson = serde_json::from_slice(&out).unwrap();
        let geojson::GeoJson::FeatureCollection(collection) = parsed else {
            panic!("expected a FeatureCollection");
        };
        assert_eq!(collection.features.len(), 2);

        let first = &collection.features[0];
        assert!(first.geometry.is_some());
        assert_eq!(first.property("CODE_2020"), Some(&serde_json::json!("115")));
        assert_eq!(first.property("CODE_2021"), Some(&Value::Null));
        assert!(collection.features[1].geometry.is_none());

        let crs = collection
            .foreign_members
            .as_ref()
            .and_then(|m| m.get("crs"))
            .and_then(|c| c.pointer("/properties/name"))
            .and_then(Value::as_str);
        assert_eq!(crs, Some("EPSG:25832"));
    }

    #[test]
    fn output_paths() {
        assert_eq!(
            default_output_path(2015, 2023),
            PathBuf::from("joined-plots_2015-2023.geojson")
        );
        assert_eq!(
            csv_path_for(Path::new("out/joined.geojson")),
            PathBuf::from("out/joined.csv")
        );
        assert_eq!(
            csv_path_for(Path::new("out/joined.csv")),
            PathBuf::from("out/joined.csv")
        );
    }
}
