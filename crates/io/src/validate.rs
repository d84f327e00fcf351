//! Post-run consistency checks on the written output directory.
//!
//! Findings are problems, not errors: the caller decides whether they fail
//! the run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use rusqlite::Connection;
use tracing::{debug, info};

use bgtcheck_recon::config::ReconConfig;
use bgtcheck_recon::{AssetCategory, Bucket, Problem, RunReport};

use crate::error::IoError;
use crate::gpkg;
use crate::table::{self, Table};
use crate::writer::{
    bgt_layer, bor_layer, bucket_file, expected_files, import_file, ADD_SHEET, IMPORT_COLUMNS,
    MATCH_SHEET, REMOVE_COLUMNS, REMOVE_SHEET,
};

pub struct OutputValidator<'a> {
    config: &'a ReconConfig,
}

impl<'a> OutputValidator<'a> {
    pub fn new(config: &'a ReconConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, dir: &Path, report: &RunReport) -> Vec<Problem> {
        let mut problems = Vec::new();

        for name in expected_files(self.config, report) {
            if !dir.join(&name).is_file() {
                problems.push(Problem::output(&name, None, "expected output file is missing"));
            }
        }

        check_handled(report, &mut problems);

        let categories: Vec<AssetCategory> = report.summary.categories.keys().copied().collect();
        let mut written_ids: BTreeMap<AssetCategory, BTreeSet<String>> = BTreeMap::new();

        for bucket in Bucket::PAIR_BUCKETS {
            if !self.config.output.writes(bucket) {
                continue;
            }
            let name = bucket_file(bucket);
            let expected = |c: AssetCategory| report.bucket(bucket).filter(|p| p.category == c).count();
            match check_bucket_file(&dir.join(&name), &categories, true, expected) {
                Ok(ids) => merge(&mut written_ids, ids),
                Err(p) => problems.push(p.into_problem(&name)),
            }
        }

        if self.config.output.unmatched {
            let name = bucket_file(Bucket::Unmatched);
            let expected = |c: AssetCategory| report.unmatched.iter().filter(|u| u.category == c).count();
            match check_bucket_file(&dir.join(&name), &categories, false, expected) {
                Ok(ids) => merge(&mut written_ids, ids),
                Err(p) => problems.push(p.into_problem(&name)),
            }
        }

        // only complete when every outcome bucket is on disk
        let complete = Bucket::PAIR_BUCKETS.iter().all(|b| self.config.output.writes(*b))
            && self.config.output.unmatched;
        if complete {
            for (category, stats) in &report.summary.categories {
                let written = written_ids.get(category).map_or(0, |ids| ids.len());
                let expected = stats.in_scope.saturating_sub(stats.failed);
                if written != expected {
                    problems.push(Problem::output(
                        bor_layer(*category),
                        None,
                        format!("{written} BOR objects written, {expected} in scope"),
                    ));
                }
            }
        }

        if self.config.output.import_files {
            for category in report.derived.import_plans.keys() {
                let name = import_file(*category);
                let path = dir.join(&name);
                if path.is_file() {
                    check_import_file(&path, &name, &mut problems);
                }
            }
        }

        if problems.is_empty() {
            info!(dir = %dir.display(), "output validated");
        } else {
            info!(dir = %dir.display(), problems = problems.len(), "output validation found problems");
        }
        problems
    }
}

/// Every in-scope BOR object has exactly one outcome kind.
fn check_handled(report: &RunReport, problems: &mut Vec<Problem>) {
    let paired: BTreeSet<(AssetCategory, &str)> =
        report.pairs.iter().map(|p| (p.category, p.bor_id.as_str())).collect();
    for u in &report.unmatched {
        if paired.contains(&(u.category, u.bor_id.as_str())) {
            problems.push(Problem::output(
                u.category.as_str(),
                Some(u.bor_id.clone()),
                "object is both paired and unmatched",
            ));
        }
    }

    let handled = report.handled_bor_ids();
    for (category, stats) in &report.summary.categories {
        let count = handled.iter().filter(|(c, _)| c == category).count();
        let expected = stats.in_scope.saturating_sub(stats.failed);
        if count != expected {
            problems.push(Problem::output(
                category.as_str(),
                None,
                format!("{count} of {expected} in-scope BOR objects handled"),
            ));
        }
    }
}

enum FileProblem {
    Unreadable(IoError),
    Inconsistent(String),
}

impl FileProblem {
    fn into_problem(self, name: &str) -> Problem {
        match self {
            Self::Unreadable(e) => Problem::output(name, None, format!("cannot read: {e}")),
            Self::Inconsistent(msg) => Problem::output(name, None, msg),
        }
    }
}

impl From<IoError> for FileProblem {
    fn from(e: IoError) -> Self {
        Self::Unreadable(e)
    }
}

impl From<rusqlite::Error> for FileProblem {
    fn from(e: rusqlite::Error) -> Self {
        Self::Unreadable(e.into())
    }
}

/// Open a bucket GeoPackage, check its layers and row counts, and return the
/// BOR ids it holds per category.
fn check_bucket_file(
    path: &Path,
    categories: &[AssetCategory],
    with_bgt: bool,
    expected: impl Fn(AssetCategory) -> usize,
) -> Result<BTreeMap<AssetCategory, BTreeSet<String>>, FileProblem> {
    if !path.is_file() {
        // reported with the expected-file check
        return Ok(BTreeMap::new());
    }
    let conn = gpkg::open(path)?;
    let layers: BTreeSet<String> = gpkg::layers(&conn)?.into_iter().collect();

    let mut ids = BTreeMap::new();
    for &category in categories {
        let mut wanted = vec![bor_layer(category)];
        if with_bgt {
            wanted.push(bgt_layer(category));
        }
        for layer in &wanted {
            if !layers.contains(layer) {
                return Err(FileProblem::Inconsistent(format!("layer '{layer}' is missing")));
            }
            let rows = row_count(&conn, layer)?;
            if rows != expected(category) {
                return Err(FileProblem::Inconsistent(format!(
                    "layer '{layer}' has {rows} rows, report has {}",
                    expected(category)
                )));
            }
        }
        ids.insert(category, guids(&conn, &bor_layer(category))?);
    }
    debug!(path = %path.display(), "bucket file checked");
    Ok(ids)
}

fn row_count(conn: &Connection, layer: &str) -> Result<usize, rusqlite::Error> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{layer}\""), [], |r| r.get(0))?;
    Ok(n as usize)
}

fn guids(conn: &Connection, layer: &str) -> Result<BTreeSet<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("SELECT DISTINCT guid FROM \"{layer}\""))?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(ids)
}

fn merge(into: &mut BTreeMap<AssetCategory, BTreeSet<String>>, from: BTreeMap<AssetCategory, BTreeSet<String>>) {
    for (category, ids) in from {
        into.entry(category).or_default().extend(ids);
    }
}

// ---------------------------------------------------------------------------
// Import workbooks
// ---------------------------------------------------------------------------

fn check_import_file(path: &Path, name: &str, problems: &mut Vec<Problem>) {
    let mut sheets = HashMap::new();
    for (sheet, columns) in [
        (MATCH_SHEET, &IMPORT_COLUMNS[..]),
        (ADD_SHEET, &IMPORT_COLUMNS[..]),
        (REMOVE_SHEET, &REMOVE_COLUMNS[..]),
    ] {
        match table::read_sheet(path, Some(sheet)) {
            Ok(t) => {
                let missing: Vec<&str> = columns.iter().copied().filter(|c| t.column(c).is_none()).collect();
                if missing.is_empty() {
                    sheets.insert(sheet, t);
                } else {
                    problems.push(Problem::output(
                        format!("{name}/{sheet}"),
                        None,
                        format!("missing columns: {}", missing.join(", ")),
                    ));
                }
            }
            Err(e) => problems.push(Problem::output(name, None, format!("cannot read sheet '{sheet}': {e}"))),
        }
    }

    // a BOR object is either matched or removed, a BGT object matched or added once
    duplicates(name, "guid", &[MATCH_SHEET, REMOVE_SHEET], &sheets, problems);
    duplicates(name, "lokaalid", &[MATCH_SHEET, ADD_SHEET], &sheets, problems);
}

fn duplicates(
    name: &str,
    column: &str,
    sheet_names: &[&str],
    sheets: &HashMap<&str, Table>,
    problems: &mut Vec<Problem>,
) {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    for sheet in sheet_names {
        let Some(t) = sheets.get(sheet) else { continue };
        let Some(col) = t.column(column) else { continue };
        for row in &t.rows {
            let id = row.get(col);
            if !id.is_empty() {
                *seen.entry(id.to_string()).or_default() += 1;
            }
        }
    }
    for (id, count) in seen.into_iter().filter(|(_, n)| *n > 1) {
        problems.push(Problem::output(
            name,
            Some(id),
            format!("{column} appears {count} times across {}", sheet_names.join("/")),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::write_import_plan;
    use bgtcheck_recon::derived::{ImportPlan, ImportRecord, RemoveRecord};

    fn record(bor: &str, bgt: &str) -> ImportRecord {
        ImportRecord { bor_id: bor.into(), bgt_id: bgt.into(), measure: 0.5 }
    }

    #[test]
    fn duplicate_ids_across_sheets_are_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import_groenobjecten.xlsx");
        let plan = ImportPlan {
            matches: vec![record("{A}", "G1"), record("{B}", "G2")],
            add: vec![record("{A}", "G2")],
            remove: vec![RemoveRecord {
                bor_id: "{B}".into(),
                bgt_id: "G1".into(),
                measure: 0.4,
                kept_by: "{A}".into(),
            }],
        };
        write_import_plan(&path, &plan).unwrap();

        let mut problems = Vec::new();
        check_import_file(&path, "import_groenobjecten.xlsx", &mut problems);
        let ids: Vec<&str> = problems.iter().filter_map(|p| p.object_id.as_deref()).collect();
        assert_eq!(ids, vec!["{B}", "G2"]);
    }

    #[test]
    fn clean_plan_has_no_problems() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import_terreindeel.xlsx");
        let plan = ImportPlan {
            matches: vec![record("{A}", "G1")],
            add: vec![record("{A}", "G2")],
            remove: vec![],
        };
        write_import_plan(&path, &plan).unwrap();
        let mut problems = Vec::new();
        check_import_file(&path, "import_terreindeel.xlsx", &mut problems);
        assert!(problems.is_empty(), "{problems:?}");
    }
}
