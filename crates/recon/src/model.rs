use std::collections::{BTreeMap, BTreeSet};

use geo_types::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::audit::AuditFinding;
use crate::derived::DerivedOutputs;
use crate::exclusion::ExclusionSet;

// ---------------------------------------------------------------------------
// Type codes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    Bor,
    Bgt,
}

impl std::fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bor => write!(f, "bor"),
            Self::Bgt => write!(f, "bgt"),
        }
    }
}

/// BOR object category. Each category has its own source layer and matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssetCategory {
    #[serde(rename = "groenobjecten")]
    Green,
    #[serde(rename = "terreindeel")]
    Terrain,
    #[serde(rename = "verhardingen")]
    Paved,
}

impl AssetCategory {
    pub const ALL: [AssetCategory; 3] = [Self::Green, Self::Terrain, Self::Paved];

    /// Accepts layer names (`groenobjecten`), control table names
    /// (`Groenobject`) and the english aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        match squash(raw).as_str() {
            "groenobject" | "groenobjecten" | "green" => Some(Self::Green),
            "terreindeel" | "terreindelen" | "terrain" => Some(Self::Terrain),
            "verharding" | "verhardingen" | "verhardingsobject" | "verhardingsobjecten"
            | "paved" => Some(Self::Paved),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "groenobjecten",
            Self::Terrain => "terreindeel",
            Self::Paved => "verhardingen",
        }
    }
}

impl std::fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IMGeo object class of a BGT record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BgtClass {
    BegroeidTerreindeel,
    OnbegroeidTerreindeel,
    Wegdeel,
    OndersteunendWegdeel,
    Waterdeel,
    OndersteunendWaterdeel,
    Vegetatieobject,
    Scheiding,
    Pand,
    OverigBouwwerk,
    Kunstwerkdeel,
    Overbruggingsdeel,
    Tunneldeel,
    Spoor,
    FunctioneelGebied,
    OngeclassificeerdObject,
}

impl BgtClass {
    pub fn parse(raw: &str) -> Option<Self> {
        let class = match squash(raw).as_str() {
            "begroeidterreindeel" => Self::BegroeidTerreindeel,
            "onbegroeidterreindeel" => Self::OnbegroeidTerreindeel,
            "wegdeel" => Self::Wegdeel,
            "ondersteunendwegdeel" => Self::OndersteunendWegdeel,
            "waterdeel" => Self::Waterdeel,
            "ondersteunendwaterdeel" => Self::OndersteunendWaterdeel,
            "vegetatieobject" => Self::Vegetatieobject,
            "scheiding" => Self::Scheiding,
            "pand" => Self::Pand,
            "overigbouwwerk" => Self::OverigBouwwerk,
            "kunstwerkdeel" => Self::Kunstwerkdeel,
            "overbruggingsdeel" => Self::Overbruggingsdeel,
            "tunneldeel" => Self::Tunneldeel,
            "spoor" => Self::Spoor,
            "functioneelgebied" => Self::FunctioneelGebied,
            "ongeclassificeerdobject" => Self::OngeclassificeerdObject,
            _ => return None,
        };
        Some(class)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BegroeidTerreindeel => "begroeid_terreindeel",
            Self::OnbegroeidTerreindeel => "onbegroeid_terreindeel",
            Self::Wegdeel => "wegdeel",
            Self::OndersteunendWegdeel => "ondersteunend_wegdeel",
            Self::Waterdeel => "waterdeel",
            Self::OndersteunendWaterdeel => "ondersteunend_waterdeel",
            Self::Vegetatieobject => "vegetatieobject",
            Self::Scheiding => "scheiding",
            Self::Pand => "pand",
            Self::OverigBouwwerk => "overig_bouwwerk",
            Self::Kunstwerkdeel => "kunstwerkdeel",
            Self::Overbruggingsdeel => "overbruggingsdeel",
            Self::Tunneldeel => "tunneldeel",
            Self::Spoor => "spoor",
            Self::FunctioneelGebied => "functioneel_gebied",
            Self::OngeclassificeerdObject => "ongeclassificeerd_object",
        }
    }
}

impl std::fmt::Display for BgtClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase and strip separators so `Begroeid terreindeel`,
/// `begroeid_terreindeel` and `BegroeidTerreindeel` compare equal.
fn squash(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Type values are compared case-insensitively after trimming.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BorType {
    pub category: AssetCategory,
    pub code: String,
}

impl BorType {
    pub fn new(category: AssetCategory, code: &str) -> Self {
        Self { category, code: normalize_code(code) }
    }
}

impl std::fmt::Display for BorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.category, self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BgtType {
    pub class: BgtClass,
    pub code: String,
}

impl BgtType {
    pub fn new(class: BgtClass, code: &str) -> Self {
        Self { class, code: normalize_code(code) }
    }
}

impl std::fmt::Display for BgtType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.class, self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Bor(BorType),
    Bgt(BgtType),
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bor(t) => t.fmt(f),
            Self::Bgt(t) => t.fmt(f),
        }
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// One registry record, BOR or BGT.
#[derive(Debug, Clone)]
pub struct SpatialObject {
    pub id: String,
    pub object_type: ObjectType,
    pub geometry: MultiPolygon<f64>,
    /// Relative height level; missing values load as 0.
    pub height_level: i32,
    pub attributes: BTreeMap<String, String>,
}

impl SpatialObject {
    pub fn bor(
        id: impl Into<String>,
        category: AssetCategory,
        code: &str,
        geometry: MultiPolygon<f64>,
    ) -> Self {
        Self {
            id: id.into(),
            object_type: ObjectType::Bor(BorType::new(category, code)),
            geometry,
            height_level: 0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn bgt(id: impl Into<String>, class: BgtClass, code: &str, geometry: MultiPolygon<f64>) -> Self {
        Self {
            id: id.into(),
            object_type: ObjectType::Bgt(BgtType::new(class, code)),
            geometry,
            height_level: 0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_height_level(mut self, level: i32) -> Self {
        self.height_level = level;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn source(&self) -> SourceSystem {
        match self.object_type {
            ObjectType::Bor(_) => SourceSystem::Bor,
            ObjectType::Bgt(_) => SourceSystem::Bgt,
        }
    }

    pub fn bor_type(&self) -> Option<&BorType> {
        match &self.object_type {
            ObjectType::Bor(t) => Some(t),
            ObjectType::Bgt(_) => None,
        }
    }

    pub fn bgt_type(&self) -> Option<&BgtType> {
        match &self.object_type {
            ObjectType::Bgt(t) => Some(t),
            ObjectType::Bor(_) => None,
        }
    }
}

/// A named district with its boundary.
#[derive(Debug, Clone)]
pub struct Area {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

impl Area {
    pub fn new(name: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self { name: name.into(), geometry }
    }
}

/// Pre-loaded records for one run.
#[derive(Debug, Default)]
pub struct MatchInput {
    pub areas: Vec<Area>,
    pub bor: BTreeMap<AssetCategory, Vec<SpatialObject>>,
    pub bgt: Vec<SpatialObject>,
    pub exclusions: ExclusionSet,
    /// Per-record failures reported by the loaders.
    pub load_problems: Vec<Problem>,
}

impl MatchInput {
    pub fn find_bor(&self, category: AssetCategory, id: &str) -> Option<&SpatialObject> {
        self.bor.get(&category)?.iter().find(|o| o.id == id)
    }

    pub fn find_bgt(&self, id: &str) -> Option<&SpatialObject> {
        self.bgt.iter().find(|o| o.id == id)
    }
}

// ---------------------------------------------------------------------------
// Problems
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    /// Unparseable, empty or degenerate geometry on one object.
    GeometryError,
    /// A source record could not be read.
    LoadError,
    /// A written output file is missing or inconsistent with the report.
    OutputError,
}

/// Per-object / per-record error. Never aborts a run.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    pub kind: ProblemKind,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    pub message: String,
}

impl Problem {
    pub fn geometry(source: impl Into<String>, object_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ProblemKind::GeometryError,
            source: source.into(),
            object_id: Some(object_id.to_string()),
            message: message.into(),
        }
    }

    pub fn load(source: impl Into<String>, object_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ProblemKind::LoadError,
            source: source.into(),
            object_id,
            message: message.into(),
        }
    }

    pub fn output(source: impl Into<String>, object_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ProblemKind::OutputError,
            source: source.into(),
            object_id,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ProblemKind::GeometryError => "geometry error",
            ProblemKind::LoadError => "load error",
            ProblemKind::OutputError => "output error",
        };
        match &self.object_id {
            Some(id) => write!(f, "{kind} [{}] '{id}': {}", self.source, self.message),
            None => write!(f, "{kind} [{}]: {}", self.source, self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Allowed type combination.
    Overlaps,
    /// Type combination absent from, or denied by, the rule table.
    InvalidTypes,
    /// Co-dominant matches that need a human decision.
    ManualBuckets,
    /// BOR objects without any surviving BGT counterpart.
    Unmatched,
    /// Import records derived from `Overlaps`; never assigned to a pair.
    ImportFiles,
}

impl Bucket {
    /// Buckets a candidate pair can land in.
    pub const PAIR_BUCKETS: [Bucket; 3] = [Self::Overlaps, Self::InvalidTypes, Self::ManualBuckets];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overlaps => "overlaps",
            Self::InvalidTypes => "invalid_types",
            Self::ManualBuckets => "manual_buckets",
            Self::Unmatched => "unmatched",
            Self::ImportFiles => "import_files",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a refined pair survived the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// The single dominant match of its BOR object.
    Dominant,
    /// One of several matches within the co-dominance margin.
    CoDominant,
    /// Hedge exception: every qualifying segment is kept.
    HedgeSegment,
}

/// A classified pair, owned and serializable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairRecord {
    pub category: AssetCategory,
    pub bucket: Bucket,
    pub bor_id: String,
    pub bgt_id: String,
    pub bor_type: String,
    pub bgt_type: String,
    /// Intersection area / BOR area.
    pub overlap_measure: f64,
    /// Intersection area / BGT area.
    pub reverse_measure: f64,
    /// The category matcher's ranking measure.
    pub match_measure: f64,
    pub retention: Retention,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedRecord {
    pub category: AssetCategory,
    pub bor_id: String,
    pub bor_type: String,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategorySummary {
    pub loaded: usize,
    pub in_scope: usize,
    pub excluded: usize,
    pub skipped: usize,
    pub out_of_area: usize,
    /// In scope, but matching failed with a geometry error.
    pub failed: usize,
    pub bucket_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub categories: BTreeMap<AssetCategory, CategorySummary>,
    pub bgt_in_scope: usize,
    pub total_pairs: usize,
    pub overlaps: usize,
    pub invalid_types: usize,
    pub manual_buckets: usize,
    pub unmatched: usize,
    pub excluded: usize,
    pub skipped: usize,
    pub problems: usize,
    pub audit_findings: usize,
    /// No candidate pair survived in the selected area.
    pub zero_matches: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub areas: Vec<String>,
    pub negate: bool,
    pub exclude_guids: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub meta: RunMeta,
    pub summary: RunSummary,
    pub pairs: Vec<PairRecord>,
    pub unmatched: Vec<UnmatchedRecord>,
    pub problems: Vec<Problem>,
    pub derived: DerivedOutputs,
    pub audit: Vec<AuditFinding>,
}

impl RunReport {
    pub fn bucket(&self, bucket: Bucket) -> impl Iterator<Item = &PairRecord> + '_ {
        self.pairs.iter().filter(move |p| p.bucket == bucket)
    }

    /// Every BOR id that received an outcome (pair bucket or unmatched).
    pub fn handled_bor_ids(&self) -> BTreeSet<(AssetCategory, &str)> {
        self.pairs
            .iter()
            .map(|p| (p.category, p.bor_id.as_str()))
            .chain(self.unmatched.iter().map(|u| (u.category, u.bor_id.as_str())))
            .collect()
    }
}
