//! Output index schema and record type.

use chrono::{DateTime, Utc};
use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

/// Survey project name field.
pub const FIELD_PROJECT: &str = "project";
/// Primary (catalog service) tile URL field.
pub const FIELD_LINK: &str = "link";
/// Mirror (object storage) tile URL field. Unique across the index.
pub const FIELD_LINKAWS: &str = "linkaws";

/// dBASE character fields hold at most this many bytes.
pub const DBF_MAX_CHAR_WIDTH: u8 = 254;

/// CRS of the output index, written verbatim as the `.prj` file.
pub const WGS84_WKT: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

/// A text attribute of the output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextField {
    /// Field name.
    pub name: &'static str,
    /// Declared width.
    pub width: u16,
}

impl TextField {
    /// Width actually written to the `.dbf`.
    pub fn dbf_width(&self) -> u8 {
        self.width.min(DBF_MAX_CHAR_WIDTH as u16) as u8
    }
}

/// Attribute fields of the output index, in column order.
pub const INDEX_FIELDS: [TextField; 3] = [
    TextField { name: FIELD_PROJECT, width: 255 },
    TextField { name: FIELD_LINK, width: 400 },
    TextField { name: FIELD_LINKAWS, width: 400 },
];

/// One indexed tile: footprint plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Survey project the tile belongs to.
    pub project: String,
    /// Catalog service URL.
    pub link: String,
    /// Mirror URL the tile was downloaded from.
    pub linkaws: String,
    /// Outer ring as `[lon, lat]` pairs, closed.
    pub footprint: Vec<[f64; 2]>,
    /// When the record was appended. Absent for records adopted from a shapefile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
}

impl IndexRecord {
    /// Build a record from a footprint polygon. Interior rings are dropped.
    pub fn new(project: impl Into<String>, link: impl Into<String>, linkaws: impl Into<String>, footprint: &Polygon<f64>) -> Self {
        Self {
            project: project.into(),
            link: link.into(),
            linkaws: linkaws.into(),
            footprint: footprint.exterior().coords().map(|c| [c.x, c.y]).collect(),
            indexed_at: Some(Utc::now()),
        }
    }

    /// Footprint as a single-part polygon.
    pub fn polygon(&self) -> Polygon<f64> {
        let ring: LineString<f64> = self
            .footprint
            .iter()
            .map(|&[x, y]| Coord { x, y })
            .collect();
        Polygon::new(ring, vec![])
    }
}

/// Truncate `value` to at most `max` bytes on a character boundary.
pub(crate) fn clamp_text(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
