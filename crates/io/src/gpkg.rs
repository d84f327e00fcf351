// GeoPackage (SQLite) geometry codec, layer reader and writer

use std::path::Path;

use geo::BoundingRect;
use geo_types::{Coord, Geometry, GeometryCollection, LineString, MultiPolygon, Polygon, Rect};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection, OpenFlags};

use crate::error::IoError;
use crate::table::{Row, Table};

/// `GPKG` as a big-endian integer.
const APPLICATION_ID: i32 = 1_196_444_487;
const USER_VERSION: i32 = 10_200;

const SCHEMA: &str = r#"
CREATE TABLE gpkg_spatial_ref_sys (
    srs_name TEXT NOT NULL,
    srs_id INTEGER PRIMARY KEY,
    organization TEXT NOT NULL,
    organization_coordsys_id INTEGER NOT NULL,
    definition TEXT NOT NULL,
    description TEXT
);

CREATE TABLE gpkg_contents (
    table_name TEXT NOT NULL PRIMARY KEY,
    data_type TEXT NOT NULL,
    identifier TEXT UNIQUE,
    description TEXT DEFAULT '',
    last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    min_x DOUBLE,
    min_y DOUBLE,
    max_x DOUBLE,
    max_y DOUBLE,
    srs_id INTEGER REFERENCES gpkg_spatial_ref_sys(srs_id)
);

CREATE TABLE gpkg_geometry_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    geometry_type_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL REFERENCES gpkg_spatial_ref_sys(srs_id),
    z TINYINT NOT NULL,
    m TINYINT NOT NULL,
    PRIMARY KEY (table_name, column_name)
);

INSERT INTO gpkg_spatial_ref_sys VALUES
    ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', NULL),
    ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', NULL),
    ('WGS 84 geodetic', 4326, 'EPSG', 4326, 'undefined', NULL);
"#;

pub const GEOMETRY_COLUMN: &str = "geom";

// ---------------------------------------------------------------------------
// Geometry codec
// ---------------------------------------------------------------------------

/// Decode a GeoPackage geometry blob. Plain WKB is accepted as well.
pub fn decode(blob: &[u8]) -> Result<Geometry<f64>, String> {
    let wkb = if blob.starts_with(b"GP") {
        if blob.len() < 8 {
            return Err("truncated GeoPackage header".into());
        }
        let flags = blob[3];
        let envelope_len = match (flags >> 1) & 0b111 {
            0 => 0,
            1 => 32,
            2 | 3 => 48,
            4 => 64,
            other => return Err(format!("invalid envelope indicator {other}")),
        };
        if flags & 0b1_0000 != 0 {
            return Ok(Geometry::MultiPolygon(MultiPolygon::new(vec![])));
        }
        blob.get(8 + envelope_len..).ok_or("truncated GeoPackage envelope")?
    } else {
        blob
    };
    let mut reader = WkbReader { buf: wkb, pos: 0 };
    reader.geometry()
}

/// Encode a multi-polygon as a little-endian GeoPackage blob with an XY
/// envelope.
pub fn encode(geometry: &MultiPolygon<f64>, srs_id: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(b"GP");
    out.push(0);
    match geometry.bounding_rect() {
        Some(r) => {
            out.push(0b0000_0011);
            out.extend_from_slice(&srs_id.to_le_bytes());
            for v in [r.min().x, r.max().x, r.min().y, r.max().y] {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        None => {
            out.push(0b0001_0001);
            out.extend_from_slice(&srs_id.to_le_bytes());
        }
    }

    out.push(1);
    out.extend_from_slice(&6u32.to_le_bytes());
    out.extend_from_slice(&(geometry.0.len() as u32).to_le_bytes());
    for polygon in &geometry.0 {
        out.push(1);
        out.extend_from_slice(&3u32.to_le_bytes());
        let rings: Vec<&LineString<f64>> =
            std::iter::once(polygon.exterior()).chain(polygon.interiors()).collect();
        out.extend_from_slice(&(rings.len() as u32).to_le_bytes());
        for ring in rings {
            out.extend_from_slice(&(ring.0.len() as u32).to_le_bytes());
            for c in &ring.0 {
                out.extend_from_slice(&c.x.to_le_bytes());
                out.extend_from_slice(&c.y.to_le_bytes());
            }
        }
    }
    out
}

struct WkbReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl WkbReader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], String> {
        let end = self.pos + n;
        let bytes = self.buf.get(self.pos..end).ok_or("truncated WKB")?;
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self, le: bool) -> Result<u32, String> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(if le { u32::from_le_bytes(b) } else { u32::from_be_bytes(b) })
    }

    /// Element count whose smallest encoding is `min_size` bytes. Counts
    /// the remaining input cannot hold are rejected before allocating.
    fn count(&mut self, le: bool, min_size: usize) -> Result<usize, String> {
        let n = self.u32(le)? as usize;
        let left = self.buf.len() - self.pos;
        if n.saturating_mul(min_size) > left {
            return Err(format!("truncated WKB: {n} elements declared, {left} bytes left"));
        }
        Ok(n)
    }

    fn f64(&mut self, le: bool) -> Result<f64, String> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(if le { f64::from_le_bytes(b) } else { f64::from_be_bytes(b) })
    }

    fn geometry(&mut self) -> Result<Geometry<f64>, String> {
        let le = match self.take(1)?[0] {
            0 => false,
            1 => true,
            other => return Err(format!("invalid WKB byte order {other}")),
        };
        let raw = self.u32(le)?;
        // ISO (x1000) and EWKB (high bit flags) dimension markers
        let mut extra = usize::from(raw & 0x8000_0000 != 0) + usize::from(raw & 0x4000_0000 != 0);
        let code = raw & 0x0FFF_FFFF;
        extra += match code / 1000 {
            1 | 2 => 1,
            3 => 2,
            _ => 0,
        };
        if raw & 0x2000_0000 != 0 {
            self.u32(le)?;
        }

        match code % 1000 {
            3 => Ok(Geometry::Polygon(self.polygon(le, extra)?)),
            6 => {
                // byte order, type and ring count
                let n = self.count(le, 9)?;
                let mut polygons = Vec::with_capacity(n);
                for _ in 0..n {
                    match self.geometry()? {
                        Geometry::Polygon(p) => polygons.push(p),
                        _ => return Err("multipolygon member is not a polygon".into()),
                    }
                }
                Ok(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
            }
            7 => {
                let n = self.count(le, 5)?;
                let mut members = Vec::with_capacity(n);
                for _ in 0..n {
                    members.push(self.geometry()?);
                }
                Ok(Geometry::GeometryCollection(GeometryCollection::new_from(members)))
            }
            other => Err(format!("unsupported WKB geometry type {other}")),
        }
    }

    fn polygon(&mut self, le: bool, extra: usize) -> Result<Polygon<f64>, String> {
        let n_rings = self.count(le, 4)?;
        let mut rings = Vec::with_capacity(n_rings);
        for _ in 0..n_rings {
            let n_points = self.count(le, 16 + 8 * extra)?;
            let mut coords = Vec::with_capacity(n_points);
            for _ in 0..n_points {
                let x = self.f64(le)?;
                let y = self.f64(le)?;
                for _ in 0..extra {
                    self.f64(le)?;
                }
                coords.push(Coord { x, y });
            }
            rings.push(LineString::new(coords));
        }
        let mut rings = rings.into_iter();
        let exterior = rings.next().unwrap_or_else(|| LineString::new(vec![]));
        Ok(Polygon::new(exterior, rings.collect()))
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

pub fn open(path: &Path) -> Result<Connection, IoError> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| IoError::open(path, e))
}

/// Feature and attribute tables listed in `gpkg_contents`, sorted by name.
pub fn layers(conn: &Connection) -> Result<Vec<String>, IoError> {
    let mut stmt = conn.prepare(
        "SELECT table_name FROM gpkg_contents WHERE data_type IN ('features', 'attributes') ORDER BY table_name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Feature tables only: the layers that carry objects. Attribute tables such
/// as QGIS `layer_styles` are left out.
pub fn feature_layers(conn: &Connection) -> Result<Vec<String>, IoError> {
    let mut stmt = conn.prepare(
        "SELECT table_name FROM gpkg_contents WHERE data_type = 'features' ORDER BY table_name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn geometry_column(conn: &Connection, layer: &str) -> Option<String> {
    conn.query_row(
        "SELECT column_name FROM gpkg_geometry_columns WHERE table_name = ?1",
        params![layer],
        |row| row.get(0),
    )
    .ok()
}

/// Read one layer, or the first feature layer when `layer` is `None`. The
/// geometry column comes from `gpkg_geometry_columns`, falling back to
/// `geometry_hint` for plain SQLite tables.
pub fn read_layer(
    path: &Path,
    layer: Option<&str>,
    geometry_hint: Option<&str>,
) -> Result<Table, IoError> {
    let conn = open(path)?;
    let layer = match layer {
        Some(name) => {
            if !layers(&conn)?.iter().any(|l| l == name) {
                return Err(IoError::MissingLayer { path: path.to_path_buf(), name: name.into() });
            }
            name.to_string()
        }
        None => feature_layers(&conn)?.into_iter().next().ok_or_else(|| IoError::MissingLayer {
            path: path.to_path_buf(),
            name: "<first feature layer>".into(),
        })?,
    };

    let source = format!("{}/{layer}", file_name(path));
    let geometry_col = geometry_column(&conn, &layer).or_else(|| geometry_hint.map(String::from));

    let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", layer.replace('"', "\"\"")))?;
    let all_columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let geometry_idx = geometry_col
        .as_deref()
        .and_then(|g| all_columns.iter().position(|c| c.eq_ignore_ascii_case(g)));
    let headers: Vec<String> = all_columns
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != geometry_idx)
        .map(|(_, c)| c.clone())
        .collect();

    let mut rows = Vec::new();
    let mut query = stmt.query([])?;
    let mut number = 0;
    while let Some(row) = query.next()? {
        number += 1;
        let mut values = Vec::with_capacity(headers.len());
        let mut geometry = None;
        for i in 0..all_columns.len() {
            let value = row.get_ref(i)?;
            if Some(i) == geometry_idx {
                geometry = Some(match value {
                    ValueRef::Blob(b) => decode(b),
                    ValueRef::Null => Err("missing geometry".into()),
                    _ => Err("geometry column is not a blob".into()),
                });
            } else {
                values.push(value_to_string(value));
            }
        }
        rows.push(Row { number, values, geometry });
    }

    Ok(Table { source, headers, rows })
}

fn value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => crate::table::format_number(f),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(_) => String::new(),
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Real,
    Integer,
}

impl FieldType {
    fn sql(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Real => "REAL",
            Self::Integer => "INTEGER",
        }
    }
}

/// A fresh GeoPackage. Existing files at the path are replaced. Everything
/// is written in one transaction committed by [`GpkgWriter::finish`].
pub struct GpkgWriter {
    conn: Connection,
    srs_id: i32,
    extents: Vec<(String, Option<Rect<f64>>)>,
}

impl GpkgWriter {
    pub fn create(path: &Path, srs_id: i32) -> Result<Self, IoError> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let conn = Connection::open(path).map_err(|e| IoError::open(path, e))?;
        conn.execute_batch(&format!(
            "PRAGMA application_id = {APPLICATION_ID}; PRAGMA user_version = {USER_VERSION};"
        ))?;
        conn.execute_batch(SCHEMA)?;
        if srs_id > 0 && srs_id != 4326 {
            conn.execute(
                "INSERT INTO gpkg_spatial_ref_sys VALUES (?1, ?2, 'EPSG', ?2, 'undefined', NULL)",
                params![format!("EPSG:{srs_id}"), srs_id],
            )?;
        }
        conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(Self { conn, srs_id, extents: Vec::new() })
    }

    pub fn add_layer(&mut self, name: &str, fields: &[(&str, FieldType)]) -> Result<(), IoError> {
        let mut columns = vec![
            "fid INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            format!("{GEOMETRY_COLUMN} MULTIPOLYGON"),
        ];
        columns.extend(fields.iter().map(|(n, t)| format!("\"{n}\" {}", t.sql())));
        self.conn.execute_batch(&format!("CREATE TABLE \"{name}\" ({})", columns.join(", ")))?;
        self.conn.execute(
            "INSERT INTO gpkg_contents (table_name, data_type, identifier, srs_id) VALUES (?1, 'features', ?1, ?2)",
            params![name, self.srs_id],
        )?;
        self.conn.execute(
            "INSERT INTO gpkg_geometry_columns VALUES (?1, ?2, 'MULTIPOLYGON', ?3, 0, 0)",
            params![name, GEOMETRY_COLUMN, self.srs_id],
        )?;
        self.extents.push((name.to_string(), None));
        Ok(())
    }

    /// `values` follow the field order given to `add_layer`.
    pub fn insert(
        &mut self,
        layer: &str,
        geometry: &MultiPolygon<f64>,
        values: Vec<Value>,
    ) -> Result<(), IoError> {
        let placeholders: Vec<String> = (0..values.len() + 1).map(|i| format!("?{}", i + 1)).collect();
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO \"{layer}\" VALUES (NULL, {})",
            placeholders.join(", ")
        ))?;
        let mut row: Vec<Value> = Vec::with_capacity(values.len() + 1);
        row.push(Value::Blob(encode(geometry, self.srs_id)));
        row.extend(values);
        stmt.execute(rusqlite::params_from_iter(row))?;

        if let (Some(entry), Some(r)) =
            (self.extents.iter_mut().find(|(n, _)| n == layer), geometry.bounding_rect())
        {
            entry.1 = Some(match entry.1 {
                None => r,
                Some(acc) => Rect::new(
                    (acc.min().x.min(r.min().x), acc.min().y.min(r.min().y)),
                    (acc.max().x.max(r.max().x), acc.max().y.max(r.max().y)),
                ),
            });
        }
        Ok(())
    }

    pub fn finish(self) -> Result<(), IoError> {
        for (name, extent) in &self.extents {
            if let Some(r) = extent {
                self.conn.execute(
                    "UPDATE gpkg_contents SET min_x = ?1, min_y = ?2, max_x = ?3, max_y = ?4 WHERE table_name = ?5",
                    params![r.min().x, r.min().y, r.max().x, r.max().y, name],
                )?;
            }
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use geo_types::polygon;

    fn square_with_hole() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon!(
            exterior: [
                (x: 0.0, y: 0.0),
                (x: 10.0, y: 0.0),
                (x: 10.0, y: 10.0),
                (x: 0.0, y: 10.0),
                (x: 0.0, y: 0.0),
            ],
            interiors: [[
                (x: 2.0, y: 2.0),
                (x: 4.0, y: 2.0),
                (x: 4.0, y: 4.0),
                (x: 2.0, y: 2.0),
            ]],
        )])
    }

    #[test]
    fn header_layout() {
        let blob = encode(&square_with_hole(), 28992);
        assert_eq!(&blob[0..2], b"GP");
        assert_eq!(blob[3], 0b0000_0011);
        assert_eq!(i32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]]), 28992);
        assert_eq!(f64::from_le_bytes(blob[16..24].try_into().unwrap()), 10.0);
        // WKB starts after the 32-byte envelope
        assert_eq!(blob[40], 1);
        assert_eq!(u32::from_le_bytes(blob[41..45].try_into().unwrap()), 6);
    }

    #[test]
    fn decode_reads_back_encoded() {
        let original = square_with_hole();
        let Geometry::MultiPolygon(decoded) = decode(&encode(&original, 28992)).unwrap() else {
            panic!("expected multipolygon");
        };
        assert_eq!(decoded, original);
        assert!((decoded.unsigned_area() - 98.0).abs() < 1e-9);
    }

    #[test]
    fn decode_big_endian_polygon_z() {
        // ISO WKB PolygonZ (1003), big endian, one ring of 4 points
        let mut wkb = vec![0u8];
        wkb.extend_from_slice(&1003u32.to_be_bytes());
        wkb.extend_from_slice(&1u32.to_be_bytes());
        wkb.extend_from_slice(&4u32.to_be_bytes());
        for (x, y) in [(0.0f64, 0.0f64), (4.0, 0.0), (0.0, 4.0), (0.0, 0.0)] {
            wkb.extend_from_slice(&x.to_be_bytes());
            wkb.extend_from_slice(&y.to_be_bytes());
            wkb.extend_from_slice(&7.5f64.to_be_bytes());
        }
        let Geometry::Polygon(p) = decode(&wkb).unwrap() else {
            panic!("expected polygon");
        };
        assert!((p.unsigned_area() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(b"GP").is_err());
        assert!(decode(&[1, 1, 0, 0, 0]).unwrap_err().contains("unsupported"));
        assert!(decode(&[9]).unwrap_err().contains("byte order"));
    }

    #[test]
    fn oversized_counts_are_truncation_errors() {
        // multipolygon claiming u32::MAX members with no bytes behind it
        let err = decode(&[1, 6, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err();
        assert!(err.contains("truncated WKB"), "{err}");

        // collection, polygon rings and ring points the same way
        assert!(decode(&[1, 7, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err().contains("truncated"));
        assert!(decode(&[1, 3, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err().contains("truncated"));
        let mut ring = vec![1, 3, 0, 0, 0, 1, 0, 0, 0];
        ring.extend_from_slice(&0x1000_0000u32.to_le_bytes());
        ring.extend_from_slice(&[0u8; 32]);
        assert!(decode(&ring).unwrap_err().contains("truncated"));
    }

    #[test]
    fn empty_flag_decodes_to_empty() {
        let blob = encode(&MultiPolygon::new(vec![]), 28992);
        let Geometry::MultiPolygon(mp) = decode(&blob).unwrap() else {
            panic!("expected multipolygon");
        };
        assert!(mp.0.is_empty());
    }

    #[test]
    fn write_then_read_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpkg");
        let mut writer = GpkgWriter::create(&path, 28992).unwrap();
        writer
            .add_layer("bor_groenobjecten", &[("guid", FieldType::Text), ("measure", FieldType::Real)])
            .unwrap();
        writer
            .insert(
                "bor_groenobjecten",
                &square_with_hole(),
                vec![Value::Text("{A}".into()), Value::Real(0.5)],
            )
            .unwrap();
        writer.finish().unwrap();

        let conn = open(&path).unwrap();
        assert_eq!(layers(&conn).unwrap(), vec!["bor_groenobjecten"]);
        let app_id: i32 = conn.query_row("PRAGMA application_id", [], |r| r.get(0)).unwrap();
        assert_eq!(app_id, APPLICATION_ID);

        let table = read_layer(&path, None, None).unwrap();
        assert_eq!(table.source, "out.gpkg/bor_groenobjecten");
        assert_eq!(table.headers, vec!["fid", "guid", "measure"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].values, vec!["1", "{A}", "0.5"]);
        assert!(matches!(table.rows[0].geometry, Some(Ok(Geometry::MultiPolygon(_)))));

        // overwrite replaces the file
        let writer = GpkgWriter::create(&path, 28992).unwrap();
        writer.finish().unwrap();
        assert!(layers(&open(&path).unwrap()).unwrap().is_empty());
    }

    /// Adds a QGIS-style attribute table next to the feature layers.
    fn add_style_table(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE layer_styles (id INTEGER PRIMARY KEY, f_table_name TEXT, styleName TEXT);
             INSERT INTO layer_styles (f_table_name, styleName) VALUES ('wegdeel', 'default');
             INSERT INTO gpkg_contents (table_name, data_type, identifier)
                 VALUES ('layer_styles', 'attributes', 'layer_styles');",
        )
        .unwrap();
    }

    #[test]
    fn first_layer_skips_attribute_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gisib.gpkg");
        let mut writer = GpkgWriter::create(&path, 28992).unwrap();
        writer.add_layer("verhardingen", &[("guid", FieldType::Text)]).unwrap();
        writer.insert("verhardingen", &square_with_hole(), vec![Value::Text("{V}".into())]).unwrap();
        writer.finish().unwrap();
        add_style_table(&path);

        let conn = open(&path).unwrap();
        assert_eq!(layers(&conn).unwrap(), vec!["layer_styles", "verhardingen"]);
        assert_eq!(feature_layers(&conn).unwrap(), vec!["verhardingen"]);

        let table = read_layer(&path, None, None).unwrap();
        assert_eq!(table.source, "gisib.gpkg/verhardingen");
        // still reachable by name
        assert_eq!(read_layer(&path, Some("layer_styles"), None).unwrap().rows.len(), 1);
    }

    #[test]
    fn missing_layer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.gpkg");
        GpkgWriter::create(&path, 28992).unwrap().finish().unwrap();
        let err = read_layer(&path, Some("wijken"), None).unwrap_err();
        assert!(matches!(err, IoError::MissingLayer { .. }));
    }
}
