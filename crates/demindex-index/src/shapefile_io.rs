//! Shapefile materialisation of the index.

use crate::schema::{
    clamp_text, IndexRecord, DBF_MAX_CHAR_WIDTH, FIELD_LINK, FIELD_LINKAWS, FIELD_PROJECT, INDEX_FIELDS,
    WGS84_WKT,
};
use crate::coverage::text_value;
use crate::{IndexError, Result};
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing, Shape};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sidecar extensions written alongside the `.shp`.
const SHAPEFILE_PARTS: [&str; 3] = ["shp", "shx", "dbf"];

fn table_builder() -> Result<TableWriterBuilder> {
    let mut builder = TableWriterBuilder::new();
    for field in INDEX_FIELDS.iter() {
        let name = FieldName::try_from(field.name)
            .map_err(|e| IndexError::Schema(format!("field {}: {:?}", field.name, e)))?;
        builder = builder.add_character_field(name, field.dbf_width());
    }
    Ok(builder)
}

fn to_shape(record: &IndexRecord) -> Polygon {
    let points: Vec<Point> = record.footprint.iter().map(|&[x, y]| Point::new(x, y)).collect();
    Polygon::new(PolygonRing::Outer(points))
}

fn to_row(record: &IndexRecord) -> Record {
    let mut row = Record::default();
    for (name, value) in [
        (FIELD_PROJECT, &record.project),
        (FIELD_LINK, &record.link),
        (FIELD_LINKAWS, &record.linkaws),
    ] {
        let text = clamp_text(value, DBF_MAX_CHAR_WIDTH as usize);
        if text.len() < value.len() {
            warn!(field = name, len = value.len(), "Value truncated in .dbf; journal keeps the full text");
        }
        row.insert(name.to_string(), FieldValue::Character(Some(text.to_string())));
    }
    row
}

/// Write `records` as a polygon shapefile at `shp_path`.
///
/// Files are written under a temporary name and renamed into place, so a
/// reader never sees a half-written index.
pub fn write_index_shapefile(shp_path: &Path, records: &[IndexRecord]) -> Result<()> {
    let stem = shp_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| IndexError::InvalidName(shp_path.display().to_string()))?;
    let tmp_path = shp_path.with_file_name(format!("{}.tmp.shp", stem));

    {
        let mut writer = shapefile::Writer::from_path(&tmp_path, table_builder()?)?;
        for record in records {
            writer.write_shape_and_record(&to_shape(record), &to_row(record))?;
        }
    }

    for ext in SHAPEFILE_PARTS {
        fs::rename(tmp_path.with_extension(ext), shp_path.with_extension(ext))?;
    }
    write_prj(shp_path)?;
    debug!(path = %shp_path.display(), records = records.len(), "Materialised index shapefile");
    Ok(())
}

/// Write the WGS84 `.prj` next to `shp_path`.
pub fn write_prj(shp_path: &Path) -> Result<PathBuf> {
    let prj = shp_path.with_extension("prj");
    fs::write(&prj, WGS84_WKT)?;
    Ok(prj)
}

/// Read an index shapefile back into records.
///
/// Shapes that are not polygons, or rows without a mirror link, are skipped.
pub fn read_index_shapefile(shp_path: &Path) -> Result<Vec<IndexRecord>> {
    let mut reader = shapefile::Reader::from_path(shp_path)?;
    let mut records = Vec::new();

    for item in reader.iter_shapes_and_records() {
        let (shape, row) = item?;
        let polygon = match shape {
            Shape::Polygon(p) => p,
            other => {
                debug!(shape = ?other.shapetype(), "Skipping non-polygon shape");
                continue;
            }
        };
        let linkaws = text_value(&row, FIELD_LINKAWS);
        if linkaws.is_empty() {
            continue;
        }
        let footprint = polygon
            .rings()
            .first()
            .map(|ring| ring.points().iter().map(|p| [p.x, p.y]).collect())
            .unwrap_or_default();

        records.push(IndexRecord {
            project: text_value(&row, FIELD_PROJECT),
            link: text_value(&row, FIELD_LINK),
            linkaws,
            footprint,
            indexed_at: None,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let shp = dir.path().join("coverage.shp");
        let poly = polygon![(x: -91.0, y: 37.0), (x: -90.9, y: 37.0), (x: -90.9, y: 36.9), (x: -91.0, y: 36.9)];
        let long_link = format!("https://rockyweb.usgs.gov/{}.tif", "x".repeat(300));
        let records = vec![
            IndexRecord::new("MO_A", "https://r/a.tif", "http://s/a.tif", &poly),
            IndexRecord::new("MO_B", long_link.clone(), "http://s/b.tif", &poly),
        ];

        write_index_shapefile(&shp, &records).unwrap();
        for ext in ["shp", "shx", "dbf", "prj"] {
            assert!(shp.with_extension(ext).exists(), "missing .{}", ext);
        }
        assert!(!dir.path().join("coverage.tmp.shp").exists());
        assert_eq!(std::fs::read_to_string(shp.with_extension("prj")).unwrap(), WGS84_WKT);

        let back = read_index_shapefile(&shp).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].project, "MO_A");
        assert_eq!(back[0].linkaws, "http://s/a.tif");
        assert_eq!(back[1].link.len(), 254);
        assert!(long_link.starts_with(&back[1].link));
        assert_eq!(back[0].footprint.len(), 5);
    }
}
