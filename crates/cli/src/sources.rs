//! Config loading and source resolution for the subcommands.

use std::path::{Path, PathBuf};

use tracing::info;

use bgtcheck_io::{collect_guids, load_areas, load_bgt_folder, load_bor, load_rule_rows, IoError};
use bgtcheck_recon::{ExclusionSet, MatchInput, ReconConfig, ReconError, RuleTable};

use crate::exit_codes::{recon_exit_code, EXIT_CONFIG, EXIT_SOURCE};
use crate::CliError;

/// Flags that override the `[run]` and `[output]` sections of the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub areas: Vec<String>,
    pub negate: bool,
    pub exclude_guids: bool,
    pub output_dir: Option<PathBuf>,
}

/// A parsed, validated config and the directory its relative paths start at.
pub struct LoadedConfig {
    pub config: ReconConfig,
    pub base_dir: PathBuf,
}

impl LoadedConfig {
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.config.output.directory)
    }
}

pub fn recon_err(err: ReconError) -> CliError {
    let hint = match &err {
        ReconError::UnknownArea { .. } => Some("check --area against the district layer names".to_string()),
        ReconError::MalformedRuleTable { .. } => {
            Some("row numbers count the header as row 1".to_string())
        }
        _ => None,
    };
    CliError { code: recon_exit_code(&err), message: err.to_string(), hint }
}

pub fn source_err(err: IoError) -> CliError {
    CliError { code: EXIT_SOURCE, message: err.to_string(), hint: None }
}

/// Read the config, apply command-line overrides and validate the result.
pub fn load_config(path: &Path, overrides: &Overrides) -> Result<LoadedConfig, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| CliError {
        code: EXIT_CONFIG,
        message: format!("cannot read config {}: {e}", path.display()),
        hint: Some("pass the config path or set BGTCHECK_CONFIG".to_string()),
    })?;
    let mut config = ReconConfig::from_toml(&text).map_err(recon_err)?;

    if !overrides.areas.is_empty() {
        config.run.areas = overrides.areas.clone();
    }
    config.run.negate |= overrides.negate;
    config.run.exclude_guids |= overrides.exclude_guids;
    if let Some(dir) = &overrides.output_dir {
        config.output.directory = dir.to_string_lossy().into_owned();
    }
    config.validate().map_err(recon_err)?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(LoadedConfig { config, base_dir })
}

/// Reference data: the rule table. Fatal on any error.
pub fn load_rules(loaded: &LoadedConfig) -> Result<RuleTable, CliError> {
    let rules = &loaded.config.sources.rules;
    let rows = load_rule_rows(&loaded.resolve(&rules.file), rules.sheet.as_deref(), &rules.columns)
        .map_err(source_err)?;
    let table = RuleTable::from_rows(rows).map_err(recon_err)?;
    info!(combinations = table.len(), "rule table loaded");
    Ok(table)
}

/// Everything the engine needs: districts, BOR layers, BGT folder, exclusions.
pub fn load_input(loaded: &LoadedConfig) -> Result<MatchInput, CliError> {
    let config = &loaded.config;
    let sources = &config.sources;

    let mut input = MatchInput {
        areas: load_areas(&loaded.resolve(&sources.areas.file), &sources.areas).map_err(source_err)?,
        ..Default::default()
    };

    for (category, source) in config.bor_sources().map_err(recon_err)? {
        let outcome = load_bor(&loaded.resolve(&source.file), source.layer.as_deref(), &source.columns, category)
            .map_err(source_err)?;
        input.bor.insert(category, outcome.objects);
        input.load_problems.extend(outcome.failures);
    }

    let bgt = load_bgt_folder(&loaded.resolve(&sources.bgt.folder), &sources.bgt.columns).map_err(source_err)?;
    input.bgt = bgt.objects;
    input.load_problems.extend(bgt.failures);

    if config.run.exclude_guids {
        if let Some(exclude) = &sources.exclude {
            let guids = collect_guids(&loaded.resolve(&exclude.folder), &exclude.skip_sheets).map_err(source_err)?;
            input.exclusions = ExclusionSet::from_ids(Some(guids));
            info!(excluded = input.exclusions.len(), "exclusion set built");
        }
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
name = "test"

[sources.areas]
file = "wijken.csv"

[sources.rules]
file = "regels/controletabel.xlsx"

[sources.bgt]
folder = "/data/bgt"

[sources.bor.groenobjecten]
file = "groen.gpkg"

[sources.exclude]
folder = "import"
"#;

    #[test]
    fn overrides_and_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bgtcheck.toml");
        std::fs::write(&path, CONFIG).unwrap();

        let overrides = Overrides {
            areas: vec!["Centrum".into()],
            negate: true,
            exclude_guids: true,
            output_dir: Some(PathBuf::from("uit")),
        };
        let loaded = load_config(&path, &overrides).unwrap();
        assert_eq!(loaded.config.run.areas, vec!["Centrum"]);
        assert!(loaded.config.run.negate);
        assert!(loaded.config.run.exclude_guids);
        assert_eq!(loaded.output_dir(), dir.path().join("uit"));
        assert_eq!(
            loaded.resolve(&loaded.config.sources.rules.file),
            dir.path().join("regels/controletabel.xlsx")
        );
        assert_eq!(loaded.resolve("/data/bgt"), PathBuf::from("/data/bgt"));
    }

    #[test]
    fn missing_config_is_a_config_error() {
        let err = load_config(Path::new("/nonexistent/bgtcheck.toml"), &Overrides::default())
            .err()
            .unwrap();
        assert_eq!(err.code, EXIT_CONFIG);
        assert!(err.hint.is_some());
    }

    #[test]
    fn missing_rule_table_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bgtcheck.toml");
        std::fs::write(&path, CONFIG).unwrap();
        let loaded = load_config(&path, &Overrides::default()).unwrap();
        let err = load_rules(&loaded).err().unwrap();
        assert_eq!(err.code, EXIT_SOURCE);
    }
}
