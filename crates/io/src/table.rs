// Tabular sources: CSV/TSV and Excel sheets, plus the shared row model

use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use geo_types::Geometry;

use crate::error::IoError;
use crate::gpkg::file_name;

/// Rows of one layer, sheet or CSV file. Values are kept as text.
#[derive(Debug, Clone)]
pub struct Table {
    /// `file` or `file/layer`, used in problem reports.
    pub source: String,
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone)]
pub struct Row {
    /// 1-based data row number (the header is not counted).
    pub number: usize,
    pub values: Vec<String>,
    /// Decoded binary geometry, for GeoPackage layers only.
    pub geometry: Option<Result<Geometry<f64>, String>>,
}

impl Table {
    /// Case-insensitive header lookup.
    pub fn column(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
    }

    pub fn require(&self, name: &str) -> Result<usize, IoError> {
        self.column(name).ok_or_else(|| IoError::missing_column(&self.source, name))
    }
}

impl Row {
    pub fn get(&self, idx: usize) -> &str {
        self.values.get(idx).map(|s| s.trim()).unwrap_or("")
    }
}

/// Whole floats print without a fraction so ids and codes read back as typed.
pub fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

pub fn read_csv(path: &Path) -> Result<Table, IoError> {
    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        rows.push(Row {
            number: i + 1,
            values: record.iter().map(String::from).collect(),
            geometry: None,
        });
    }
    Ok(Table { source: file_name(path), headers, rows })
}

/// Read file and convert to UTF-8 if needed (Windows-1252 exports from Excel).
pub fn read_file_as_utf8(path: &Path) -> Result<String, IoError> {
    let mut file = std::fs::File::open(path).map_err(|e| IoError::open(path, e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

/// Pick the delimiter that gives the most consistent field count over the
/// first lines. WKT geometries contain commas, so semicolon and tab win ties.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    let mut best = b',';
    let mut best_score = 0u64;
    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let target = counts.first().copied().unwrap_or(0);
        if target <= 1 {
            continue;
        }
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * 1000 + target as u64;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Excel
// ---------------------------------------------------------------------------

pub fn sheet_names(path: &Path) -> Result<Vec<String>, IoError> {
    let workbook = open_workbook_auto(path).map_err(|e| IoError::open(path, e))?;
    Ok(workbook.sheet_names().to_vec())
}

/// Read a sheet; the first non-empty row is the header. `None` reads the
/// first sheet.
pub fn read_sheet(path: &Path, sheet: Option<&str>) -> Result<Table, IoError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| IoError::open(path, e))?;
    let names = workbook.sheet_names().to_vec();
    let name = match sheet {
        Some(s) => names
            .iter()
            .find(|n| n.trim().eq_ignore_ascii_case(s.trim()))
            .cloned()
            .ok_or_else(|| IoError::MissingLayer { path: path.to_path_buf(), name: s.into() })?,
        None => names.first().cloned().ok_or_else(|| IoError::MissingLayer {
            path: path.to_path_buf(),
            name: "<first sheet>".into(),
        })?,
    };
    let range = workbook.worksheet_range(&name)?;

    let mut rows_iter = range
        .rows()
        .map(|r| r.iter().map(cell_to_string).collect::<Vec<String>>())
        .skip_while(|r| r.iter().all(|c| c.trim().is_empty()));
    let headers = rows_iter.next().unwrap_or_default();
    let rows = rows_iter
        .enumerate()
        .filter(|(_, values)| values.iter().any(|c| !c.trim().is_empty()))
        .map(|(i, values)| Row { number: i + 1, values, geometry: None })
        .collect();

    Ok(Table { source: format!("{}/{name}", file_name(path)), headers, rows })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => format_number(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_with_wkt_and_semicolons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bgt.csv");
        std::fs::write(
            &path,
            "\u{feff}lokaalid;type;wkt\nG1;wegdeel;POLYGON((0 0, 1 0, 1 1, 0 0))\nG2;pand;POLYGON((0 0, 2 0, 2 2, 0 0))\n",
        )
        .unwrap();
        let table = read_csv(&path).unwrap();
        assert_eq!(table.headers, vec!["lokaalid", "type", "wkt"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].get(0), "G2");
        assert_eq!(table.rows[0].get(2), "POLYGON((0 0, 1 0, 1 1, 0 0))");
        assert_eq!(table.column("LOKAALID"), Some(0));
        assert!(matches!(table.require("guid"), Err(IoError::MissingColumn { .. })));
    }

    #[test]
    fn csv_comma_with_quoted_wkt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bor.csv");
        std::fs::write(
            &path,
            "guid,type,geometry\n{A},Gras,\"POLYGON((0 0, 1 0, 1 1, 0 0))\"\n{B},Haag,\"POLYGON((0 0, 1 0, 1 1, 0 0))\"\n",
        )
        .unwrap();
        let table = read_csv(&path).unwrap();
        assert_eq!(table.headers.len(), 3);
        assert_eq!(table.rows[0].get(1), "Gras");
    }

    #[test]
    fn latin1_csv_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wijken.csv");
        let mut bytes = b"naam;geometry\nCaf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b";POLYGON((0 0, 1 0, 1 1, 0 0))\n");
        std::fs::write(&path, bytes).unwrap();
        let table = read_csv(&path).unwrap();
        assert_eq!(table.rows[0].get(0), "Café");
    }

    #[test]
    fn sheet_round_trip_through_xlsxwriter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controletabel.xlsx");
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let ws = workbook.add_worksheet();
        ws.set_name("IMBOR").unwrap();
        for (c, h) in ["Objecttype", "TYPE", "ObjectType", "bgttype"].iter().enumerate() {
            ws.write_string(0, c as u16, *h).unwrap();
        }
        ws.write_string(1, 0, "Groenobject").unwrap();
        ws.write_string(1, 1, "Gras").unwrap();
        ws.write_string(1, 2, "begroeid terreindeel").unwrap();
        ws.write_string(1, 3, "grasland overig").unwrap();
        ws.write_number(2, 0, 12.0).unwrap();
        workbook.save(&path).unwrap();

        assert_eq!(sheet_names(&path).unwrap(), vec!["IMBOR"]);
        let table = read_sheet(&path, Some("imbor")).unwrap();
        assert_eq!(table.source, "controletabel.xlsx/IMBOR");
        assert_eq!(table.headers[3], "bgttype");
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get(3), "grasland overig");
        assert_eq!(table.rows[1].get(0), "12");

        assert!(matches!(
            read_sheet(&path, Some("Blad2")),
            Err(IoError::MissingLayer { .. })
        ));
    }
}
