//! Loaders for BOR layers, the BGT folder, district boundaries and the
//! IMBOR–IMGeo control table.
//!
//! A source that cannot be opened, or lacks a required column, is fatal.
//! Individual records that cannot be read become [`Problem`]s and the rest of
//! the batch loads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use geo::BooleanOps;
use geo_types::{Geometry, MultiPolygon};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use bgtcheck_recon::config::{AreaSource, BgtColumns, BorColumns, RuleColumns};
use bgtcheck_recon::geometry::{check, into_multipolygon};
use bgtcheck_recon::{Area, AssetCategory, BgtClass, Problem, RuleRow, SpatialObject};

use crate::error::IoError;
use crate::table::{self, Row, Table};
use crate::{gpkg, SourceFormat};

/// Objects plus the records that failed to load.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub objects: Vec<SpatialObject>,
    pub failures: Vec<Problem>,
}

impl LoadOutcome {
    fn extend(&mut self, other: LoadOutcome) {
        self.objects.extend(other.objects);
        self.failures.extend(other.failures);
    }
}

/// Read a layer (GeoPackage), sheet (Excel) or the whole file (CSV).
pub fn read_table(
    path: &Path,
    layer: Option<&str>,
    geometry_column: Option<&str>,
) -> Result<Table, IoError> {
    if !path.exists() {
        return Err(IoError::open(path, "file not found"));
    }
    let table = match SourceFormat::of(path)? {
        SourceFormat::GeoPackage => gpkg::read_layer(path, layer, geometry_column)?,
        SourceFormat::Csv => table::read_csv(path)?,
        SourceFormat::Xlsx => table::read_sheet(path, layer)?,
    };
    debug!(source = %table.source, rows = table.rows.len(), "table read");
    Ok(table)
}

/// Geometry of a row: decoded binary for GeoPackage, WKT text otherwise.
fn row_geometry(row: &Row, wkt_column: Option<usize>) -> Result<MultiPolygon<f64>, String> {
    let geometry = match &row.geometry {
        Some(decoded) => decoded.clone()?,
        None => {
            let idx = wkt_column.ok_or("no geometry column")?;
            parse_wkt(row.get(idx))?
        }
    };
    into_multipolygon(geometry)
}

pub fn parse_wkt(text: &str) -> Result<Geometry<f64>, String> {
    if text.is_empty() {
        return Err("missing geometry".into());
    }
    wkt::Wkt::<f64>::from_str(text)
        .map_err(|e| format!("invalid WKT: {e}"))
        .and_then(|w| w.try_into().map_err(|e: wkt::conversion::Error| format!("invalid WKT: {e:?}")))
}

/// WKT column index for text sources; binary sources need none.
fn wkt_column(table: &Table, name: &str) -> Result<Option<usize>, IoError> {
    if table.rows.iter().all(|r| r.geometry.is_some()) && !table.rows.is_empty() {
        return Ok(None);
    }
    match table.column(name).or_else(|| table.column("wkt")) {
        Some(idx) => Ok(Some(idx)),
        None if table.rows.is_empty() => Ok(None),
        None => Err(IoError::missing_column(&table.source, name)),
    }
}

/// Missing height level means ground level.
fn parse_height_level(raw: &str) -> Result<i32, String> {
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse::<i32>()
        .or_else(|_| {
            raw.replace(',', ".")
                .parse::<f64>()
                .map_err(|_| ())
                .and_then(|f| if f.fract() == 0.0 { Ok(f as i32) } else { Err(()) })
        })
        .map_err(|_| format!("invalid height level '{raw}'"))
}

// ---------------------------------------------------------------------------
// BOR
// ---------------------------------------------------------------------------

pub fn load_bor(
    path: &Path,
    layer: Option<&str>,
    columns: &BorColumns,
    category: AssetCategory,
) -> Result<LoadOutcome, IoError> {
    let table = read_table(path, layer, Some(&columns.geometry))?;
    let id_col = table.require(&columns.id)?;
    let type_col = table.require(&columns.object_type)?;
    let height_col = table.column(&columns.height_level);
    let geom_col = wkt_column(&table, &columns.geometry)?;

    let mut out = LoadOutcome::default();
    for row in &table.rows {
        let id = row.get(id_col);
        if id.is_empty() {
            out.failures.push(Problem::load(
                &table.source,
                None,
                format!("row {}: empty id", row.number),
            ));
            continue;
        }
        let height = match height_col.map(|c| parse_height_level(row.get(c))).transpose() {
            Ok(h) => h.unwrap_or(0),
            Err(msg) => {
                out.failures.push(Problem::load(&table.source, Some(id.to_string()), msg));
                continue;
            }
        };
        let geometry = match row_geometry(row, geom_col) {
            Ok(g) => g,
            Err(msg) => {
                out.failures.push(Problem::geometry(&table.source, id, msg));
                continue;
            }
        };
        let mut object =
            SpatialObject::bor(id, category, row.get(type_col), geometry).with_height_level(height);
        for (i, header) in table.headers.iter().enumerate() {
            if i != id_col && i != type_col && Some(i) != geom_col && !row.get(i).is_empty() {
                object = object.with_attribute(header.clone(), row.get(i));
            }
        }
        out.objects.push(object);
    }
    info!(
        %category,
        source = %table.source,
        objects = out.objects.len(),
        failures = out.failures.len(),
        "BOR loaded"
    );
    Ok(out)
}

// ---------------------------------------------------------------------------
// BGT
// ---------------------------------------------------------------------------

/// Load every `.gpkg` feature layer and `.csv` file under `folder`, in path
/// order. Layers and files that cannot be read are reported as failures.
///
/// BGT downloads ship one file per class (`bgt_wegdeel.gpkg`), so the class
/// falls back to the layer or file name when the class column is absent.
pub fn load_bgt_folder(folder: &Path, columns: &BgtColumns) -> Result<LoadOutcome, IoError> {
    if !folder.is_dir() {
        return Err(IoError::open(folder, "not a directory"));
    }
    let mut out = LoadOutcome::default();
    for path in source_files(folder, &[SourceFormat::GeoPackage, SourceFormat::Csv]) {
        match SourceFormat::of(&path)? {
            SourceFormat::GeoPackage => {
                let layers = gpkg::open(&path).and_then(|conn| gpkg::feature_layers(&conn));
                let layers = match layers {
                    Ok(layers) => layers,
                    Err(e) => {
                        out.failures.push(unreadable(&gpkg::file_name(&path), e));
                        continue;
                    }
                };
                for layer in layers {
                    let loaded = gpkg::read_layer(&path, Some(&layer), Some(&columns.geometry))
                        .and_then(|table| load_bgt_table(&table, &layer, columns));
                    match loaded {
                        Ok(layer_out) => out.extend(layer_out),
                        Err(e) => out.failures.push(unreadable(
                            &format!("{}/{layer}", gpkg::file_name(&path)),
                            e,
                        )),
                    }
                }
            }
            _ => {
                let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
                let loaded = table::read_csv(&path).and_then(|table| load_bgt_table(&table, &stem, columns));
                match loaded {
                    Ok(file_out) => out.extend(file_out),
                    Err(e) => out.failures.push(unreadable(&gpkg::file_name(&path), e)),
                }
            }
        }
    }
    info!(objects = out.objects.len(), failures = out.failures.len(), "BGT loaded");
    Ok(out)
}

/// A BGT file or layer that cannot be read is skipped; the rest of the folder loads.
fn unreadable(source: &str, err: IoError) -> Problem {
    warn!(source, error = %err, "BGT source skipped");
    Problem::load(source, None, err.to_string())
}

fn load_bgt_table(table: &Table, name: &str, columns: &BgtColumns) -> Result<LoadOutcome, IoError> {
    let mut out = LoadOutcome::default();
    if table.rows.is_empty() {
        return Ok(out);
    }
    let id_col = table.require(&columns.id)?;
    let class_col = table.column(&columns.class);
    let fallback_class = class_from_name(name);
    if class_col.is_none() && fallback_class.is_none() {
        return Err(IoError::missing_column(&table.source, &columns.class));
    }
    let appearance_col = table.column(&columns.appearance);
    let height_col = table.column(&columns.height_level);
    let geom_col = wkt_column(table, &columns.geometry)?;

    for row in &table.rows {
        let id = row.get(id_col);
        if id.is_empty() {
            out.failures.push(Problem::load(&table.source, None, format!("row {}: empty id", row.number)));
            continue;
        }
        let class = match class_col.map(|c| row.get(c)).filter(|s| !s.is_empty()) {
            Some(raw) => BgtClass::parse(raw),
            None => fallback_class,
        };
        let Some(class) = class else {
            out.failures.push(Problem::load(
                &table.source,
                Some(id.to_string()),
                format!("unknown BGT class '{}'", class_col.map(|c| row.get(c)).unwrap_or("")),
            ));
            continue;
        };
        let height = match height_col.map(|c| parse_height_level(row.get(c))).transpose() {
            Ok(h) => h.unwrap_or(0),
            Err(msg) => {
                out.failures.push(Problem::load(&table.source, Some(id.to_string()), msg));
                continue;
            }
        };
        let geometry = match row_geometry(row, geom_col) {
            Ok(g) => g,
            Err(msg) => {
                out.failures.push(Problem::geometry(&table.source, id, msg));
                continue;
            }
        };
        let appearance = appearance_col.map(|c| row.get(c)).unwrap_or("");
        out.objects.push(
            SpatialObject::bgt(id, class, appearance, geometry)
                .with_height_level(height)
                .with_attribute("source", table.source.clone()),
        );
    }
    Ok(out)
}

/// `bgt_begroeidterreindeel` -> begroeid terreindeel.
fn class_from_name(name: &str) -> Option<BgtClass> {
    let lower = name.to_lowercase();
    let stripped = lower.strip_prefix("bgt_").or_else(|| lower.strip_prefix("bgt-")).unwrap_or(&lower);
    BgtClass::parse(stripped)
}

// ---------------------------------------------------------------------------
// Areas
// ---------------------------------------------------------------------------

/// District boundaries keyed by name. Rows sharing a name are merged.
/// Reference data: any unreadable row is fatal.
pub fn load_areas(path: &Path, source: &AreaSource) -> Result<Vec<Area>, IoError> {
    let table = read_table(path, source.layer.as_deref(), Some(&source.geometry_column))?;
    let name_col = table.require(&source.name_column)?;
    let geom_col = wkt_column(&table, &source.geometry_column)?;

    let mut merged: BTreeMap<String, MultiPolygon<f64>> = BTreeMap::new();
    for row in &table.rows {
        let name = row.get(name_col);
        if name.is_empty() {
            continue;
        }
        let geometry = row_geometry(row, geom_col)
            .and_then(|g| check(&g).map(|_| g))
            .map_err(|msg| IoError::InvalidData {
                source_name: table.source.clone(),
                message: format!("area '{name}': {msg}"),
            })?;
        match merged.remove(name) {
            Some(existing) => merged.insert(name.to_string(), existing.union(&geometry)),
            None => merged.insert(name.to_string(), geometry),
        };
    }
    info!(areas = merged.len(), source = %table.source, "areas loaded");
    Ok(merged.into_iter().map(|(name, geometry)| Area::new(name, geometry)).collect())
}

// ---------------------------------------------------------------------------
// Rule table
// ---------------------------------------------------------------------------

/// Control table rows with 1-based sheet row numbers (header is row 1).
pub fn load_rule_rows(
    path: &Path,
    sheet: Option<&str>,
    columns: &RuleColumns,
) -> Result<Vec<RuleRow>, IoError> {
    let table = read_table(path, sheet, None)?;
    let category = table.require(&columns.category)?;
    let bor_type = table.require(&columns.bor_type)?;
    let bgt_class = table.require(&columns.bgt_class)?;
    let bgt_type = table.require(&columns.bgt_type)?;
    let verdict = columns.verdict.as_deref().map(|v| table.require(v)).transpose()?;

    let rows = table
        .rows
        .iter()
        .map(|row| RuleRow {
            row: row.number + 1,
            category: row.get(category).to_string(),
            bor_type: row.get(bor_type).to_string(),
            bgt_class: row.get(bgt_class).to_string(),
            bgt_type: row.get(bgt_type).to_string(),
            verdict: verdict.map(|v| row.get(v).to_string()),
        })
        .collect::<Vec<_>>();
    info!(rows = rows.len(), source = %table.source, "rule table read");
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Folder walk
// ---------------------------------------------------------------------------

/// Files under `folder` with one of the given formats, sorted by path.
pub(crate) fn source_files(folder: &Path, formats: &[SourceFormat]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| SourceFormat::of(p).is_ok_and(|f| formats.contains(&f)))
        .collect();
    files.sort();
    files
}
