//! `bgtcheck run | validate | check-output`.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use bgtcheck_io::{write_outputs, OutputValidator};
use bgtcheck_recon::area::AreaFilter;
use bgtcheck_recon::{Engine, MatchInput, Problem, RunReport};

use crate::exit_codes::{EXIT_ERROR, EXIT_OUTPUT, EXIT_OUTPUT_INVALID, EXIT_SOURCE};
use crate::sources::{load_config, load_input, load_rules, recon_err, source_err, LoadedConfig, Overrides};
use crate::CliError;

pub struct RunArgs {
    pub config: PathBuf,
    pub overrides: Overrides,
    pub strict: bool,
    pub json: bool,
}

pub fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let loaded = load_config(&args.config, &args.overrides)?;
    let (report, input) = match_sources(&loaded)?;

    let out_dir = loaded.output_dir();
    let written = write_outputs(&out_dir, &loaded.config, &report, &input)
        .map_err(|e| CliError { code: EXIT_OUTPUT, message: e.to_string(), hint: None })?;
    eprintln!("wrote {} files to {}", written.len(), out_dir.display());

    let problems = OutputValidator::new(&loaded.config).validate(&out_dir, &report);
    finish(&report, &problems, args.strict, args.json)
}

/// Parse and validate the config, load the reference data and check that the
/// selected areas exist. No matching, no output.
pub fn cmd_validate(config: PathBuf, overrides: Overrides) -> Result<(), CliError> {
    let loaded = load_config(&config, &overrides)?;
    let rules = load_rules(&loaded)?;
    let areas = &loaded.config.sources.areas;
    let districts = bgtcheck_io::load_areas(&loaded.resolve(&areas.file), areas)
        .map_err(source_err)?;
    AreaFilter::new(&districts)
        .resolve(&loaded.config.run.areas, loaded.config.run.negate)
        .map_err(recon_err)?;

    let bor = loaded.config.bor_sources().map_err(recon_err)?;
    let mut missing = Vec::new();
    for source in bor.values() {
        check_exists(&loaded.resolve(&source.file), &mut missing);
    }
    check_exists(&loaded.resolve(&loaded.config.sources.bgt.folder), &mut missing);
    if let Some(exclude) = &loaded.config.sources.exclude {
        check_exists(&loaded.resolve(&exclude.folder), &mut missing);
    }
    if !missing.is_empty() {
        return Err(CliError {
            code: EXIT_SOURCE,
            message: format!("missing sources: {}", missing.join(", ")),
            hint: None,
        });
    }

    eprintln!(
        "config ok: '{}', {} BOR categories, {} rule combinations, {} districts",
        loaded.config.name,
        bor.len(),
        rules.len(),
        districts.len()
    );
    Ok(())
}

/// Re-run matching in memory and check an existing output directory against it.
pub fn cmd_check_output(config: PathBuf, overrides: Overrides, strict: bool) -> Result<(), CliError> {
    let loaded = load_config(&config, &overrides)?;
    let out_dir = loaded.output_dir();
    if !out_dir.is_dir() {
        return Err(CliError {
            code: EXIT_OUTPUT_INVALID,
            message: format!("output directory {} does not exist", out_dir.display()),
            hint: Some("run `bgtcheck run` first".to_string()),
        });
    }
    let (report, _) = match_sources(&loaded)?;
    let problems = OutputValidator::new(&loaded.config).validate(&out_dir, &report);
    if problems.is_empty() {
        eprintln!("output ok: {}", out_dir.display());
        return Ok(());
    }
    for p in &problems {
        warn!("{p}");
    }
    if strict {
        return Err(CliError {
            code: EXIT_OUTPUT_INVALID,
            message: format!("{} output problems", problems.len()),
            hint: None,
        });
    }
    eprintln!("warning: {} output problems", problems.len());
    Ok(())
}

fn check_exists(path: &Path, missing: &mut Vec<String>) {
    if !path.exists() {
        missing.push(path.display().to_string());
    }
}

fn match_sources(loaded: &LoadedConfig) -> Result<(RunReport, MatchInput), CliError> {
    let rules = load_rules(loaded)?;
    let input = load_input(loaded)?;
    info!(
        bor = input.bor.values().map(Vec::len).sum::<usize>(),
        bgt = input.bgt.len(),
        load_problems = input.load_problems.len(),
        "sources loaded"
    );
    let report = Engine::new(loaded.config.clone(), rules).run(&input).map_err(recon_err)?;
    Ok((report, input))
}

fn finish(report: &RunReport, problems: &[Problem], strict: bool, json: bool) -> Result<(), CliError> {
    if json {
        let out = serde_json::json!({
            "meta": report.meta,
            "summary": report.summary,
            "output_problems": problems,
        });
        let text = serde_json::to_string_pretty(&out)
            .map_err(|e| CliError { code: EXIT_ERROR, message: format!("JSON serialization error: {e}"), hint: None })?;
        println!("{text}");
    }

    let s = &report.summary;
    eprintln!(
        "{} pairs: {} overlaps, {} invalid types, {} manual; {} unmatched, {} excluded, {} skipped, {} problems",
        s.total_pairs,
        s.overlaps,
        s.invalid_types,
        s.manual_buckets,
        s.unmatched,
        s.excluded,
        s.skipped,
        s.problems,
    );
    if s.zero_matches {
        eprintln!("warning: no matches found in the selected area");
    }

    if problems.is_empty() {
        return Ok(());
    }
    for p in problems {
        warn!("{p}");
    }
    if strict {
        return Err(CliError {
            code: EXIT_OUTPUT_INVALID,
            message: format!("output validation found {} problems", problems.len()),
            hint: Some("inspect the output directory or rerun without --strict".to_string()),
        });
    }
    eprintln!("warning: output validation found {} problems", problems.len());
    Ok(())
}
