use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::error::ReconError;
use crate::model::{normalize_code, AssetCategory, BgtClass, Bucket};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    pub name: String,
    /// Projected CRS of every source; written into the output GeoPackages.
    #[serde(default = "default_crs")]
    pub crs_epsg: u32,
    pub sources: SourcesConfig,
    #[serde(default)]
    pub run: RunSwitches,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub testcases: TestcaseConfig,
}

fn default_crs() -> u32 {
    28992
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Source locations. Relative paths are resolved against the directory of
/// the config file by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    pub areas: AreaSource,
    pub rules: RuleSource,
    pub bgt: BgtSource,
    /// Keyed by category name (`groenobjecten`, `terreindeel`, `verhardingen`).
    pub bor: BTreeMap<String, BorSource>,
    #[serde(default)]
    pub exclude: Option<ExcludeSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AreaSource {
    pub file: String,
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default = "default_area_name_column")]
    pub name_column: String,
    #[serde(default = "default_geometry_column")]
    pub geometry_column: String,
}

fn default_area_name_column() -> String {
    "naam".into()
}

fn default_geometry_column() -> String {
    "geometry".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleSource {
    pub file: String,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub columns: RuleColumns,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuleColumns {
    pub category: String,
    pub bor_type: String,
    pub bgt_class: String,
    pub bgt_type: String,
    /// Absent column means every listed row is allowed.
    pub verdict: Option<String>,
}

impl Default for RuleColumns {
    fn default() -> Self {
        Self {
            category: "Objecttype".into(),
            bor_type: "TYPE".into(),
            bgt_class: "ObjectType".into(),
            bgt_type: "bgttype".into(),
            verdict: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BgtSource {
    pub folder: String,
    #[serde(default)]
    pub columns: BgtColumns,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BgtColumns {
    pub id: String,
    pub class: String,
    pub appearance: String,
    pub height_level: String,
    pub geometry: String,
}

impl Default for BgtColumns {
    fn default() -> Self {
        Self {
            id: "lokaalid".into(),
            class: "type".into(),
            appearance: "bgtfysvkn".into(),
            height_level: "hoogtelig".into(),
            geometry: default_geometry_column(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BorSource {
    pub file: String,
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub columns: BorColumns,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BorColumns {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub height_level: String,
    pub geometry: String,
}

impl Default for BorColumns {
    fn default() -> Self {
        Self {
            id: "guid".into(),
            object_type: "type".into(),
            height_level: "relatieve_hoogteligging".into(),
            geometry: default_geometry_column(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExcludeSource {
    pub folder: String,
    /// Spreadsheet sheets never read for GUIDs (case-insensitive).
    #[serde(default = "default_skip_sheets")]
    pub skip_sheets: Vec<String>,
}

fn default_skip_sheets() -> Vec<String> {
    vec!["remove".into()]
}

// ---------------------------------------------------------------------------
// Run switches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunSwitches {
    /// District names; empty means no area filter.
    pub areas: Vec<String>,
    pub negate: bool,
    pub exclude_guids: bool,
}

// ---------------------------------------------------------------------------
// Matching + Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum overlap measure for a candidate pair. Inclusive.
    pub materiality_threshold: f64,
    pub co_dominance_margin: f64,
    pub prefer_same_height_level: bool,
    /// BOR green types that keep every qualifying segment.
    pub hedge_types: Vec<String>,
    pub hedge_bgt_classes: Vec<String>,
    /// BOR types never matched; counted as skipped.
    pub skip_types: Vec<String>,
    /// Only index BGT objects whose class appears in the rule table.
    pub restrict_bgt_to_rule_classes: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            materiality_threshold: 0.10,
            co_dominance_margin: 0.01,
            prefer_same_height_level: true,
            hedge_types: vec!["haag".into()],
            hedge_bgt_classes: vec!["vegetatieobject".into(), "begroeid_terreindeel".into()],
            skip_types: vec!["rietland".into(), "moeras".into()],
            restrict_bgt_to_rule_classes: false,
        }
    }
}

impl MatchingConfig {
    pub fn hedge_type_set(&self) -> HashSet<String> {
        self.hedge_types.iter().map(|t| normalize_code(t)).collect()
    }

    pub fn skip_type_set(&self) -> HashSet<String> {
        self.skip_types.iter().map(|t| normalize_code(t)).collect()
    }

    /// Unparseable names are rejected by `ReconConfig::validate`.
    pub fn hedge_class_set(&self) -> HashSet<BgtClass> {
        self.hedge_bgt_classes.iter().filter_map(|c| BgtClass::parse(c)).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Share of *both* objects that must be covered to report a finding.
    pub threshold: f64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { enabled: true, threshold: 0.5 }
    }
}

// ---------------------------------------------------------------------------
// Output + Testcases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: String,
    pub overlaps: bool,
    pub invalid_types: bool,
    pub manual_buckets: bool,
    pub import_files: bool,
    pub unmatched: bool,
    pub summary_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "output".into(),
            overlaps: true,
            invalid_types: true,
            manual_buckets: true,
            import_files: true,
            unmatched: false,
            summary_json: true,
        }
    }
}

impl OutputConfig {
    pub fn writes(&self, bucket: Bucket) -> bool {
        match bucket {
            Bucket::Overlaps => self.overlaps,
            Bucket::InvalidTypes => self.invalid_types,
            Bucket::ManualBuckets => self.manual_buckets,
            Bucket::Unmatched => self.unmatched,
            Bucket::ImportFiles => self.import_files,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TestcaseConfig {
    pub manual_buckets: bool,
    pub invalid_types: bool,
    pub sample_size: usize,
}

impl Default for TestcaseConfig {
    fn default() -> Self {
        Self { manual_buckets: false, invalid_types: false, sample_size: 10 }
    }
}

impl TestcaseConfig {
    pub fn buckets(&self) -> Vec<Bucket> {
        let mut out = Vec::new();
        if self.manual_buckets {
            out.push(Bucket::ManualBuckets);
        }
        if self.invalid_types {
            out.push(Bucket::InvalidTypes);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let m = &self.matching;
        if !(0.0..=1.0).contains(&m.materiality_threshold) {
            return Err(ReconError::ConfigValidation(format!(
                "matching.materiality_threshold must be within [0, 1], got {}",
                m.materiality_threshold
            )));
        }
        if !(0.0..=1.0).contains(&m.co_dominance_margin) {
            return Err(ReconError::ConfigValidation(format!(
                "matching.co_dominance_margin must be within [0, 1], got {}",
                m.co_dominance_margin
            )));
        }
        for class in &m.hedge_bgt_classes {
            if BgtClass::parse(class).is_none() {
                return Err(ReconError::ConfigValidation(format!(
                    "matching.hedge_bgt_classes: unknown BGT class '{class}'"
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.audit.threshold) || self.audit.threshold == 0.0 {
            return Err(ReconError::ConfigValidation(format!(
                "audit.threshold must be within (0, 1], got {}",
                self.audit.threshold
            )));
        }

        if self.testcases.sample_size == 0 && !self.testcases.buckets().is_empty() {
            return Err(ReconError::ConfigValidation(
                "testcases.sample_size must be at least 1".into(),
            ));
        }

        if self.sources.bor.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one [sources.bor.<category>] is required".into(),
            ));
        }
        self.bor_sources()?;

        if self.run.exclude_guids && self.sources.exclude.is_none() {
            return Err(ReconError::ConfigValidation(
                "run.exclude_guids is set but [sources.exclude] is missing".into(),
            ));
        }

        if self.output.directory.trim().is_empty() {
            return Err(ReconError::ConfigValidation("output.directory is empty".into()));
        }

        Ok(())
    }

    /// BOR sources keyed by parsed category, in category order.
    pub fn bor_sources(&self) -> Result<BTreeMap<AssetCategory, &BorSource>, ReconError> {
        let mut out = BTreeMap::new();
        for (key, source) in &self.sources.bor {
            let category = AssetCategory::parse(key).ok_or_else(|| {
                ReconError::ConfigValidation(format!("sources.bor: unknown category '{key}'"))
            })?;
            if out.insert(category, source).is_some() {
                return Err(ReconError::ConfigValidation(format!(
                    "sources.bor: category '{category}' configured twice"
                )));
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod fixtures {
    pub const MINIMAL: &str = r#"
name = "Gemeente test"

[sources.areas]
file = "wijken.gpkg"

[sources.rules]
file = "controletabel.xlsx"

[sources.bgt]
folder = "bgt"

[sources.bor.groenobjecten]
file = "gisib.gpkg"
layer = "groenobjecten"

[sources.bor.terreindeel]
file = "gisib.gpkg"
layer = "terreindeel"

[sources.bor.verhardingen]
file = "gisib.gpkg"
layer = "verhardingen"
"#;
}

#[cfg(test)]
mod tests {
    use super::fixtures::MINIMAL;
    use super::*;

    #[test]
    fn parse_minimal_applies_defaults() {
        let config = ReconConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.name, "Gemeente test");
        assert_eq!(config.crs_epsg, 28992);
        assert_eq!(config.sources.areas.name_column, "naam");
        assert_eq!(config.sources.bgt.columns.id, "lokaalid");
        assert_eq!(config.sources.bgt.columns.height_level, "hoogtelig");
        assert_eq!(config.matching.materiality_threshold, 0.10);
        assert_eq!(config.matching.co_dominance_margin, 0.01);
        assert!(config.matching.prefer_same_height_level);
        assert_eq!(config.audit.threshold, 0.5);
        assert!(config.output.writes(Bucket::Overlaps));
        assert!(!config.output.writes(Bucket::Unmatched));
        assert!(config.run.areas.is_empty());
        assert!(!config.run.negate);

        let bor = config.bor_sources().unwrap();
        assert_eq!(
            bor.keys().copied().collect::<Vec<_>>(),
            vec![AssetCategory::Green, AssetCategory::Terrain, AssetCategory::Paved]
        );
        assert_eq!(bor[&AssetCategory::Green].columns.id, "guid");
        assert_eq!(bor[&AssetCategory::Paved].columns.height_level, "relatieve_hoogteligging");
    }

    #[test]
    fn parse_overrides() {
        let input = format!(
            r#"{MINIMAL}
[run]
areas = ["Centrum", "Noord"]
negate = true

[matching]
materiality_threshold = 0.25
hedge_types = ["Haag", "Heg"]

[output]
directory = "out"
unmatched = true

[testcases]
manual_buckets = true
sample_size = 3
"#
        );
        let config = ReconConfig::from_toml(&input).unwrap();
        assert_eq!(config.run.areas, vec!["Centrum", "Noord"]);
        assert!(config.run.negate);
        assert_eq!(config.matching.materiality_threshold, 0.25);
        assert!(config.matching.hedge_type_set().contains("heg"));
        assert_eq!(config.matching.co_dominance_margin, 0.01);
        assert_eq!(config.output.directory, "out");
        assert!(config.output.writes(Bucket::Unmatched));
        assert_eq!(config.testcases.buckets(), vec![Bucket::ManualBuckets]);
    }

    #[test]
    fn reject_threshold_out_of_range() {
        let input = format!("{MINIMAL}\n[matching]\nmateriality_threshold = 1.5\n");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
        assert!(err.to_string().contains("materiality_threshold"));
    }

    #[test]
    fn reject_unknown_bor_category() {
        let input = format!("{MINIMAL}\n[sources.bor.kunstwerken]\nfile = \"k.gpkg\"\n");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("kunstwerken"));
    }

    #[test]
    fn reject_duplicate_category_alias() {
        let input = format!("{MINIMAL}\n[sources.bor.Groenobject]\nfile = \"g.gpkg\"\n");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn reject_unknown_hedge_class() {
        let input = format!("{MINIMAL}\n[matching]\nhedge_bgt_classes = [\"struik\"]\n");
        assert!(ReconConfig::from_toml(&input).is_err());
    }

    #[test]
    fn reject_exclude_flag_without_source() {
        let input = format!("{MINIMAL}\n[run]\nexclude_guids = true\n");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("sources.exclude"));
    }

    #[test]
    fn reject_missing_sources() {
        let err = ReconConfig::from_toml("name = \"x\"\n").unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }
}
