//! Persist a run: one GeoPackage per bucket, import workbooks per category,
//! testcase samples and `summary.json`.
//!
//! Every file is written fresh; a rerun into the same directory replaces the
//! previous results.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use geo_types::MultiPolygon;
use rusqlite::types::Value;
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use tracing::{info, warn};

use bgtcheck_recon::audit::AuditFinding;
use bgtcheck_recon::config::ReconConfig;
use bgtcheck_recon::derived::{ImportPlan, ImportRecord, RemoveRecord, TestcaseSet};
use bgtcheck_recon::model::{PairRecord, RunMeta, RunSummary, UnmatchedRecord};
use bgtcheck_recon::{AssetCategory, Bucket, MatchInput, Problem, RunReport, SpatialObject};

use crate::error::IoError;
use crate::gpkg::{FieldType, GpkgWriter};

pub const SUMMARY_FILE: &str = "summary.json";

/// Import workbook sheets and their columns.
pub const MATCH_SHEET: &str = "match";
pub const ADD_SHEET: &str = "add";
pub const REMOVE_SHEET: &str = "remove";
pub const IMPORT_COLUMNS: [&str; 3] = ["guid", "lokaalid", "measure"];
pub const REMOVE_COLUMNS: [&str; 4] = ["guid", "lokaalid", "measure", "kept_by"];

const BOR_PAIR_FIELDS: [(&str, FieldType); 8] = [
    ("guid", FieldType::Text),
    ("type", FieldType::Text),
    ("lokaalid", FieldType::Text),
    ("bgt_type", FieldType::Text),
    ("overlap_measure", FieldType::Real),
    ("reverse_measure", FieldType::Real),
    ("match_measure", FieldType::Real),
    ("retention", FieldType::Text),
];

const BGT_PAIR_FIELDS: [(&str, FieldType); 5] = [
    ("lokaalid", FieldType::Text),
    ("type", FieldType::Text),
    ("guid", FieldType::Text),
    ("bor_type", FieldType::Text),
    ("overlap_measure", FieldType::Real),
];

const UNMATCHED_FIELDS: [(&str, FieldType); 2] = [("guid", FieldType::Text), ("type", FieldType::Text)];

pub fn bucket_file(bucket: Bucket) -> String {
    format!("{bucket}.gpkg")
}

pub fn import_file(category: AssetCategory) -> String {
    format!("import_{category}.xlsx")
}

pub fn testcase_file(bucket: Bucket) -> String {
    format!("testcases_{bucket}.gpkg")
}

pub fn bor_layer(category: AssetCategory) -> String {
    format!("bor_{category}")
}

pub fn bgt_layer(category: AssetCategory) -> String {
    format!("bgt_{category}")
}

// ---------------------------------------------------------------------------
// ResultWriter
// ---------------------------------------------------------------------------

/// Sink for the pairs of one bucket.
pub trait ResultWriter {
    /// Write `records` as the contents of `bucket`, replacing earlier output.
    fn write(&mut self, bucket: Bucket, records: &[&PairRecord]) -> Result<PathBuf, IoError>;
}

/// Geometry lookup over the run input.
struct ObjectLookup<'a> {
    bor: HashMap<(AssetCategory, &'a str), &'a SpatialObject>,
    bgt: HashMap<&'a str, &'a SpatialObject>,
}

impl<'a> ObjectLookup<'a> {
    fn new(input: &'a MatchInput) -> Self {
        let mut bor = HashMap::new();
        for (&category, objects) in &input.bor {
            for o in objects {
                bor.entry((category, o.id.as_str())).or_insert(o);
            }
        }
        let mut bgt = HashMap::new();
        for o in &input.bgt {
            bgt.entry(o.id.as_str()).or_insert(o);
        }
        Self { bor, bgt }
    }

    fn bor_geometry(&self, category: AssetCategory, id: &str) -> MultiPolygon<f64> {
        match self.bor.get(&(category, id)) {
            Some(o) => o.geometry.clone(),
            None => {
                warn!(%category, id, "BOR object not in input, writing empty geometry");
                MultiPolygon::new(vec![])
            }
        }
    }

    fn bgt_object(&self, id: &str) -> Option<&'a SpatialObject> {
        self.bgt.get(id).copied()
    }

    fn bgt_geometry(&self, id: &str) -> MultiPolygon<f64> {
        match self.bgt_object(id) {
            Some(o) => o.geometry.clone(),
            None => {
                warn!(id, "BGT object not in input, writing empty geometry");
                MultiPolygon::new(vec![])
            }
        }
    }
}

/// Writes `<bucket>.gpkg` with a `bor_<category>` and `bgt_<category>`
/// layer for every category of the run, one row per pair.
pub struct GpkgBucketWriter<'a> {
    dir: PathBuf,
    srs_id: i32,
    categories: Vec<AssetCategory>,
    lookup: ObjectLookup<'a>,
}

impl<'a> GpkgBucketWriter<'a> {
    pub fn new(dir: &Path, srs_id: i32, input: &'a MatchInput) -> Self {
        Self {
            dir: dir.to_path_buf(),
            srs_id,
            categories: input.bor.keys().copied().collect(),
            lookup: ObjectLookup::new(input),
        }
    }

    pub fn write_unmatched(&mut self, records: &[UnmatchedRecord]) -> Result<PathBuf, IoError> {
        let path = self.dir.join(bucket_file(Bucket::Unmatched));
        let mut gpkg = GpkgWriter::create(&path, self.srs_id)?;
        for &category in &self.categories {
            let layer = bor_layer(category);
            gpkg.add_layer(&layer, &UNMATCHED_FIELDS)?;
            for r in records.iter().filter(|r| r.category == category) {
                let geometry = self.lookup.bor_geometry(category, &r.bor_id);
                gpkg.insert(&layer, &geometry, vec![text(&r.bor_id), text(&r.bor_type)])?;
            }
        }
        gpkg.finish()?;
        info!(path = %path.display(), records = records.len(), "unmatched written");
        Ok(path)
    }

    /// Sampled objects of one bucket, BOR and BGT side.
    pub fn write_testcases(&mut self, set: &TestcaseSet, pairs: &[PairRecord]) -> Result<PathBuf, IoError> {
        let path = self.dir.join(testcase_file(set.bucket));
        let mut gpkg = GpkgWriter::create(&path, self.srs_id)?;
        for &category in &self.categories {
            let bor = bor_layer(category);
            let bgt = bgt_layer(category);
            gpkg.add_layer(&bor, &UNMATCHED_FIELDS)?;
            gpkg.add_layer(&bgt, &[("lokaalid", FieldType::Text), ("type", FieldType::Text), ("guid", FieldType::Text)])?;
            for entry in set.entries.iter().filter(|e| e.category == category) {
                let bor_type = pairs
                    .iter()
                    .find(|p| p.category == category && p.bor_id == entry.bor_id)
                    .map(|p| p.bor_type.as_str())
                    .unwrap_or("");
                let geometry = self.lookup.bor_geometry(category, &entry.bor_id);
                gpkg.insert(&bor, &geometry, vec![text(&entry.bor_id), text(bor_type)])?;
                for bgt_id in &entry.bgt_ids {
                    let bgt_type = self
                        .lookup
                        .bgt_object(bgt_id)
                        .and_then(|o| o.bgt_type())
                        .map(|t| t.to_string())
                        .unwrap_or_default();
                    let geometry = self.lookup.bgt_geometry(bgt_id);
                    gpkg.insert(&bgt, &geometry, vec![text(bgt_id), Value::Text(bgt_type), text(&entry.bor_id)])?;
                }
            }
        }
        gpkg.finish()?;
        info!(path = %path.display(), entries = set.entries.len(), "testcases written");
        Ok(path)
    }
}

impl ResultWriter for GpkgBucketWriter<'_> {
    fn write(&mut self, bucket: Bucket, records: &[&PairRecord]) -> Result<PathBuf, IoError> {
        let path = self.dir.join(bucket_file(bucket));
        let mut gpkg = GpkgWriter::create(&path, self.srs_id)?;
        for &category in &self.categories {
            let bor = bor_layer(category);
            let bgt = bgt_layer(category);
            gpkg.add_layer(&bor, &BOR_PAIR_FIELDS)?;
            gpkg.add_layer(&bgt, &BGT_PAIR_FIELDS)?;
            for p in records.iter().filter(|p| p.category == category) {
                let geometry = self.lookup.bor_geometry(category, &p.bor_id);
                gpkg.insert(
                    &bor,
                    &geometry,
                    vec![
                        text(&p.bor_id),
                        text(&p.bor_type),
                        text(&p.bgt_id),
                        text(&p.bgt_type),
                        Value::Real(p.overlap_measure),
                        Value::Real(p.reverse_measure),
                        Value::Real(p.match_measure),
                        Value::Text(retention_name(p)),
                    ],
                )?;
                let geometry = self.lookup.bgt_geometry(&p.bgt_id);
                gpkg.insert(
                    &bgt,
                    &geometry,
                    vec![
                        text(&p.bgt_id),
                        text(&p.bgt_type),
                        text(&p.bor_id),
                        text(&p.bor_type),
                        Value::Real(p.overlap_measure),
                    ],
                )?;
            }
        }
        gpkg.finish()?;
        info!(%bucket, path = %path.display(), pairs = records.len(), "bucket written");
        Ok(path)
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn retention_name(p: &PairRecord) -> String {
    serde_json::to_value(p.retention)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Import workbook
// ---------------------------------------------------------------------------

/// `import_<category>.xlsx` with `match`, `add` and `remove` sheets.
pub fn write_import_plan(path: &Path, plan: &ImportPlan) -> Result<(), IoError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let header = Format::new().set_bold();
    let mut workbook = Workbook::new();

    for (name, records) in [(MATCH_SHEET, &plan.matches), (ADD_SHEET, &plan.add)] {
        let ws = workbook.add_worksheet();
        ws.set_name(name)?;
        for (col, h) in IMPORT_COLUMNS.iter().enumerate() {
            ws.write_string_with_format(0, col as u16, *h, &header)?;
        }
        for (i, ImportRecord { bor_id, bgt_id, measure }) in records.iter().enumerate() {
            let row = i as u32 + 1;
            ws.write_string(row, 0, bor_id)?;
            ws.write_string(row, 1, bgt_id)?;
            ws.write_number(row, 2, *measure)?;
        }
    }

    let ws = workbook.add_worksheet();
    ws.set_name(REMOVE_SHEET)?;
    for (col, h) in REMOVE_COLUMNS.iter().enumerate() {
        ws.write_string_with_format(0, col as u16, *h, &header)?;
    }
    for (i, RemoveRecord { bor_id, bgt_id, measure, kept_by }) in plan.remove.iter().enumerate() {
        let row = i as u32 + 1;
        ws.write_string(row, 0, bor_id)?;
        ws.write_string(row, 1, bgt_id)?;
        ws.write_number(row, 2, *measure)?;
        ws.write_string(row, 3, kept_by)?;
    }

    workbook.save(path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// summary.json
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SummaryFile<'a> {
    meta: &'a RunMeta,
    summary: &'a RunSummary,
    problems: &'a [Problem],
    audit: &'a [AuditFinding],
}

pub fn write_summary(path: &Path, report: &RunReport) -> Result<(), IoError> {
    let file = File::create(path)?;
    let summary = SummaryFile {
        meta: &report.meta,
        summary: &report.summary,
        problems: &report.problems,
        audit: &report.audit,
    };
    serde_json::to_writer_pretty(BufWriter::new(file), &summary)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Files the output flags of `config` ask for, relative to the output
/// directory.
pub fn expected_files(config: &ReconConfig, report: &RunReport) -> Vec<String> {
    let mut files: Vec<String> = Bucket::PAIR_BUCKETS
        .iter()
        .filter(|b| config.output.writes(**b))
        .map(|b| bucket_file(*b))
        .collect();
    if config.output.unmatched {
        files.push(bucket_file(Bucket::Unmatched));
    }
    if config.output.import_files {
        files.extend(report.derived.import_plans.keys().map(|c| import_file(*c)));
    }
    files.extend(report.derived.testcases.iter().map(|t| testcase_file(t.bucket)));
    if config.output.summary_json {
        files.push(SUMMARY_FILE.to_string());
    }
    files
}

/// Write every enabled output of `report` into `dir`.
pub fn write_outputs(
    dir: &Path,
    config: &ReconConfig,
    report: &RunReport,
    input: &MatchInput,
) -> Result<Vec<PathBuf>, IoError> {
    std::fs::create_dir_all(dir).map_err(|e| IoError::open(dir, e))?;
    let srs_id = i32::try_from(config.crs_epsg).unwrap_or(0);
    let mut writer = GpkgBucketWriter::new(dir, srs_id, input);
    let mut written = Vec::new();

    for bucket in Bucket::PAIR_BUCKETS {
        if config.output.writes(bucket) {
            let records: Vec<&PairRecord> = report.bucket(bucket).collect();
            written.push(writer.write(bucket, &records)?);
        }
    }
    if config.output.unmatched {
        written.push(writer.write_unmatched(&report.unmatched)?);
    }
    if config.output.import_files {
        for (category, plan) in &report.derived.import_plans {
            let path = dir.join(import_file(*category));
            write_import_plan(&path, plan)?;
            info!(
                %category,
                matches = plan.matches.len(),
                add = plan.add.len(),
                remove = plan.remove.len(),
                "import plan written"
            );
            written.push(path);
        }
    }
    for set in &report.derived.testcases {
        written.push(writer.write_testcases(set, &report.pairs)?);
    }
    if config.output.summary_json {
        let path = dir.join(SUMMARY_FILE);
        write_summary(&path, report)?;
        written.push(path);
    }
    info!(files = written.len(), dir = %dir.display(), "outputs written");
    Ok(written)
}
