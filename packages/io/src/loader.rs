//! Loads `GeoJSON` survey datasets into [`PlotTable`]s.
//!
//! Every feature becomes one [`Parcel`] in file order. Ids are always
//! reassigned from row position; whatever id the source carried is
//! discarded.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crop_rotation_plots_models::{AttributeKeys, CropCode, Parcel, PlotTable, Year};
use geo::{Geometry, MultiPolygon, Polygon};
use geojson::GeoJson;

use crate::PlotIoError;

/// How to read one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub keys: AttributeKeys,
    /// Keep the remaining feature properties on each parcel. Only the
    /// current-year table needs them, for export.
    pub keep_attributes: bool,
}

impl LoadOptions {
    /// Options for a historical dataset: only geometry and crop code.
    #[must_use]
    pub const fn historical(keys: AttributeKeys) -> Self {
        Self {
            keys,
            keep_attributes: false,
        }
    }

    /// Options for the current-year dataset: every attribute is carried.
    #[must_use]
    pub const fn current(keys: AttributeKeys) -> Self {
        Self {
            keys,
            keep_attributes: true,
        }
    }
}

/// Loads the `GeoJSON` file at `path` as the plot table for `year`.
///
/// # Errors
///
/// Returns [`PlotIoError`] if the file cannot be read, is not a
/// `FeatureCollection`, holds non-polygonal geometry, or lacks the crop
/// attribute entirely.
pub fn load_plot_table(
    path: &Path,
    year: Year,
    options: &LoadOptions,
) -> Result<PlotTable, PlotIoError> {
    let dataset = path.display().to_string();
    log::info!("Importing {year} plots: {dataset}");

    let file = File::open(path).map_err(|source| PlotIoError::Access {
        dataset: dataset.clone(),
        source,
    })?;
    let table = parse_plot_table(BufReader::new(file), &dataset, year, options)?;

    log::info!("Number of rows in {year}: {}", table.len());
    Ok(table)
}

/// Parses a `GeoJSON` `FeatureCollection` from `reader`.
///
/// `dataset` names the source in error messages.
///
/// # Errors
///
/// See [`load_plot_table`].
pub fn parse_plot_table(
    reader: impl Read,
    dataset: &str,
    year: Year,
    options: &LoadOptions,
) -> Result<PlotTable, PlotIoError> {
    let geojson: GeoJson =
        serde_json::from_reader(reader).map_err(|source| PlotIoError::GeoJson {
            dataset: dataset.to_string(),
            source,
        })?;

    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(PlotIoError::NotFeatureCollection {
            dataset: dataset.to_string(),
        });
    };

    let crs = collection
        .foreign_members
        .as_ref()
        .and_then(declared_crs);

    let keys = &options.keys;
    let mut parcels = Vec::with_capacity(collection.features.len());
    let mut with_crop_key = 0_usize;

    for (row, feature) in collection.features.into_iter().enumerate() {
        let geometry = match feature.geometry {
            Some(geometry) => to_multi_polygon(geometry).map_err(|kind| {
                PlotIoError::UnsupportedGeometry {
                    dataset: dataset.to_string(),
                    row,
                    kind,
                }
            })?,
            None => MultiPolygon(Vec::new()),
        };

        let mut properties = feature.properties.unwrap_or_default();
        let raw_code = properties.remove(&keys.crop);
        if raw_code.is_some() {
            with_crop_key += 1;
        }
        let crop_code = raw_code.as_ref().and_then(CropCode::from_json);
        properties.remove(&keys.id);

        let mut parcel = Parcel::new(0, geometry, crop_code);
        if options.keep_attributes {
            parcel.attributes = properties;
        }
        parcels.push(parcel);
    }

    if !parcels.is_empty() && with_crop_key == 0 {
        return Err(PlotIoError::MissingAttribute {
            dataset: dataset.to_string(),
            key: keys.crop.clone(),
        });
    }

    let missing_codes = parcels.iter().filter(|p| p.crop_code.is_none()).count();
    if missing_codes > 0 {
        log::debug!("{dataset}: {missing_codes} feature(s) have no crop code");
    }

    Ok(PlotTable::new(year, keys.clone(), parcels).with_crs(crs))
}

/// Reads the legacy `crs` member (`{"type": "name", "properties":
/// {"name": ...}}`) of a `FeatureCollection`.
fn declared_crs(members: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    members
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()
        .map(normalize_crs_name)
}

/// Maps the spellings of an EPSG code (`urn:ogc:def:crs:EPSG::25832`,
/// `EPSG:25832`) to `EPSG:25832`. Other names pass through unchanged.
#[must_use]
pub fn normalize_crs_name(name: &str) -> String {
    let trimmed = name.trim();
    let code = trimmed
        .rsplit(':')
        .next()
        .filter(|code| !code.is_empty() && code.chars().all(|c| c.is_ascii_digit()));

    match code {
        Some(code) if trimmed.to_ascii_uppercase().contains("EPSG") => format!("EPSG:{code}"),
        _ => trimmed.to_string(),
    }
}

/// Converts a `GeoJSON` geometry into a [`MultiPolygon`].
///
/// On failure returns the name of the offending geometry type.
fn to_multi_polygon(geometry: geojson::Geometry) -> Result<MultiPolygon<f64>, String> {
    let geometry: Geometry<f64> = geometry
        .try_into()
        .map_err(|e: geojson::Error| e.to_string())?;

    let mut polygons = Vec::new();
    collect_polygons(geometry, &mut polygons)?;
    Ok(MultiPolygon(polygons))
}

fn collect_polygons(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>) -> Result<(), String> {
    match geometry {
        Geometry::Polygon(polygon) => out.push(polygon),
        Geometry::MultiPolygon(multi) => out.extend(multi.0),
        Geometry::Rect(rect) => out.push(rect.to_polygon()),
        Geometry::GeometryCollection(collection) => {
            for member in collection.0 {
                collect_polygons(member, out)?;
            }
        }
        Geometry::Point(_) => return Err("Point".to_string()),
        Geometry::Line(_) => return Err("Line".to_string()),
        Geometry::LineString(_) => return Err("LineString".to_string()),
        Geometry::MultiPoint(_) => return Err("MultiPoint".to_string()),
        Geometry::MultiLineString(_) => return Err("MultiLineString".to_string()),
        Geometry::Triangle(triangle) => out.push(triangle.to_polygon()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    const SURVEY: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::25832" } },
        "features": [
            {
                "type": "Feature",
                "properties": { "ID": 900, "CODE": 115.0, "AREA_HA": 0.006 },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0, 0], [6, 0], [6, 10], [0, 10], [0, 0]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "ID": 17, "CODE": "459" },
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[6, 0], [10, 0], [10, 5], [6, 5], [6, 0]]],
                        [[[6, 5], [10, 5], [10, 10], [6, 10], [6, 5]]]
                    ]
                }
            },
            {
                "type": "Feature",
                "properties": { "ID": 3, "CODE": null },
                "geometry": null
            }
        ]
    }"#;

    fn parse(options: &LoadOptions) -> PlotTable {
        parse_plot_table(SURVEY.as_bytes(), "2020.geojson", 2020, options).unwrap()
    }

    #[test]
    fn assigns_sequential_ids_over_source_ids() {
        let table = parse(&LoadOptions::historical(AttributeKeys::default()));

        let ids: Vec<u64> = table.parcels().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(table.year, 2020);
    }

    #[test]
    fn reads_codes_and_geometries() {
        let table = parse(&LoadOptions::historical(AttributeKeys::default()));
        let parcels = table.parcels();

        assert_eq!(parcels[0].crop_code, Some(CropCode::from("115")));
        assert_eq!(parcels[1].crop_code, Some(CropCode::from("459")));
        assert_eq!(parcels[2].crop_code, None);

        assert!((parcels[0].geometry.unsigned_area() - 60.0).abs() < 1e-9);
        assert_eq!(parcels[1].geometry.0.len(), 2);
        assert!(parcels[2].is_empty());
    }

    #[test]
    fn historical_tables_drop_attributes() {
        let table = parse(&LoadOptions::historical(AttributeKeys::default()));

        assert!(table.parcels().iter().all(|p| p.attributes.is_empty()));
    }

    #[test]
    fn current_tables_keep_other_attributes() {
        let table = parse(&LoadOptions::current(AttributeKeys::default()));
        let attributes = &table.parcels()[0].attributes;

        assert_eq!(attributes.get("AREA_HA"), Some(&serde_json::json!(0.006)));
        assert!(!attributes.contains_key("ID"));
        assert!(!attributes.contains_key("CODE"));
    }

    #[test]
    fn captures_declared_crs() {
        let table = parse(&LoadOptions::historical(AttributeKeys::default()));

        assert_eq!(table.crs.as_deref(), Some("EPSG:25832"));
    }

    #[test]
    fn custom_crop_key() {
        let json = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"NUTZCODE": 411},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}}
        ]}"#;
        let keys = AttributeKeys {
            crop: "NUTZCODE".to_string(),
            id: "FID".to_string(),
        };

        let table =
            parse_plot_table(json.as_bytes(), "x", 2021, &LoadOptions::historical(keys)).unwrap();
        assert_eq!(table.parcels()[0].crop_code, Some(CropCode::from("411")));
        assert_eq!(table.keys.id, "FID");
    }

    #[test]
    fn missing_crop_key_everywhere_is_an_error() {
        let keys = AttributeKeys {
            crop: "KULTUR".to_string(),
            ..AttributeKeys::default()
        };

        let result = parse_plot_table(
            SURVEY.as_bytes(),
            "2020.geojson",
            2020,
            &LoadOptions::historical(keys),
        );
        assert!(matches!(
            result,
            Err(PlotIoError::MissingAttribute { ref key, .. }) if key == "KULTUR"
        ));
    }

    #[test]
    fn empty_collection_is_an_empty_table() {
        let json = r#"{"type": "FeatureCollection", "features": []}"#;

        let table = parse_plot_table(
            json.as_bytes(),
            "2022.geojson",
            2022,
            &LoadOptions::historical(AttributeKeys::default()),
        )
        .unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn rejects_point_geometry() {
        let json = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"CODE": 1},
             "geometry": {"type": "Point", "coordinates": [0, 0]}}
        ]}"#;

        let result = parse_plot_table(
            json.as_bytes(),
            "bad.geojson",
            2020,
            &LoadOptions::historical(AttributeKeys::default()),
        );
        assert!(matches!(
            result,
            Err(PlotIoError::UnsupportedGeometry { row: 0, ref kind, .. }) if kind == "Point"
        ));
    }

    #[test]
    fn rejects_bare_geometry() {
        let json = r#"{"type": "Point", "coordinates": [0, 0]}"#;

        let result = parse_plot_table(
            json.as_bytes(),
            "bad.geojson",
            2020,
            &LoadOptions::historical(AttributeKeys::default()),
        );
        assert!(matches!(
            result,
            Err(PlotIoError::NotFeatureCollection { .. })
        ));
    }

    #[test]
    fn normalizes_epsg_spellings() {
        assert_eq!(normalize_crs_name("urn:ogc:def:crs:EPSG::25832"), "EPSG:25832");
        assert_eq!(normalize_crs_name("EPSG:25832"), "EPSG:25832");
        assert_eq!(
            normalize_crs_name("urn:ogc:def:crs:OGC:1.3:CRS84"),
            "urn:ogc:def:crs:OGC:1.3:CRS84"
        );
    }
}
