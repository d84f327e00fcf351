// GUID collection from earlier import results

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info, warn};

use bgtcheck_recon::exclusion::normalize_guid;

use crate::error::IoError;
use crate::table::{self, Table};
use crate::{gpkg, load, SourceFormat};

/// Every BOR GUID found under `folder`: GeoPackage layers, spreadsheet
/// sheets (except `skip_sheets`) and CSV files. Files that cannot be read
/// are logged and skipped. The result is sorted and deduplicated.
pub fn collect_guids(folder: &Path, skip_sheets: &[String]) -> Result<Vec<String>, IoError> {
    if !folder.is_dir() {
        return Err(IoError::open(folder, "not a directory"));
    }
    let mut guids = BTreeSet::new();
    let formats = [SourceFormat::GeoPackage, SourceFormat::Csv, SourceFormat::Xlsx];
    for path in load::source_files(folder, &formats) {
        match tables_in(&path, skip_sheets) {
            Ok(tables) => {
                for t in &tables {
                    let before = guids.len();
                    collect_from(t, &mut guids);
                    debug!(source = %t.source, added = guids.len() - before, "exclusion table read");
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable exclusion file"),
        }
    }
    info!(guids = guids.len(), folder = %folder.display(), "exclusion GUIDs collected");
    Ok(guids.into_iter().collect())
}

fn tables_in(path: &Path, skip_sheets: &[String]) -> Result<Vec<Table>, IoError> {
    match SourceFormat::of(path)? {
        SourceFormat::GeoPackage => {
            let conn = gpkg::open(path)?;
            gpkg::layers(&conn)?
                .iter()
                .map(|layer| gpkg::read_layer(path, Some(layer), None))
                .collect()
        }
        SourceFormat::Xlsx => table::sheet_names(path)?
            .iter()
            .filter(|s| !skip_sheets.iter().any(|skip| skip.trim().eq_ignore_ascii_case(s.trim())))
            .map(|s| table::read_sheet(path, Some(s)))
            .collect(),
        SourceFormat::Csv => Ok(vec![table::read_csv(path)?]),
    }
}

/// `guid` exactly, otherwise the first header containing it (`bor_guid`).
fn guid_column(table: &Table) -> Option<usize> {
    table.column("guid").or_else(|| {
        table.headers.iter().position(|h| h.to_lowercase().contains("guid"))
    })
}

fn collect_from(table: &Table, guids: &mut BTreeSet<String>) {
    let Some(col) = guid_column(table) else {
        debug!(source = %table.source, "no guid column");
        return;
    };
    guids.extend(table.rows.iter().filter_map(|r| normalize_guid(r.get(col))));
}
