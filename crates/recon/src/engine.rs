use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::area::{AreaFilter, Region};
use crate::audit::audit_overlaps;
use crate::classify::to_record;
use crate::config::ReconConfig;
use crate::derived::{build_import_plan, build_testcases, DerivedOutputs};
use crate::error::ReconError;
use crate::geometry;
use crate::matcher::{matcher_for, Matcher, Refinement};
use crate::model::{
    AssetCategory, CategorySummary, MatchInput, PairRecord, Problem, RunMeta, RunReport,
    SpatialObject, UnmatchedRecord,
};
use crate::overlap::SpatialIndex;
use crate::rules::RuleTable;
use crate::summary::compute_summary;

/// Immutable run context: validated config plus the rule table.
pub struct Engine {
    config: ReconConfig,
    rules: RuleTable,
}

impl Engine {
    pub fn new(config: ReconConfig, rules: RuleTable) -> Self {
        Self { config, rules }
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn run(&self, input: &MatchInput) -> Result<RunReport, ReconError> {
        run(&self.config, &self.rules, input)
    }
}

/// Outcome of one BOR object, produced independently by a worker.
enum ObjectOutcome {
    Pairs(Vec<PairRecord>),
    Unmatched(UnmatchedRecord),
    Failed(Problem),
}

/// Run matching per config. Returns classified pairs, derived outputs and
/// the summary. Only area resolution can fail; per-object errors end up in
/// `RunReport::problems`.
pub fn run(
    config: &ReconConfig,
    rules: &RuleTable,
    input: &MatchInput,
) -> Result<RunReport, ReconError> {
    let region = AreaFilter::new(&input.areas).resolve(&config.run.areas, config.run.negate)?;
    if !config.run.areas.is_empty() {
        info!(areas = ?config.run.areas, negate = config.run.negate, "area filter resolved");
    }

    let mut problems = input.load_problems.clone();

    let bgt = bgt_in_scope(config, rules, &input.bgt, &region, &mut problems);
    let index = SpatialIndex::build(bgt.iter().copied());
    info!(bgt = index.len(), "spatial index built");

    let skip_types = config.matching.skip_type_set();
    let threshold = config.matching.materiality_threshold;

    let mut scope: BTreeMap<AssetCategory, CategorySummary> = BTreeMap::new();
    let mut pairs = Vec::new();
    let mut unmatched = Vec::new();
    let mut audited: Vec<&SpatialObject> = Vec::new();

    for (&category, objects) in &input.bor {
        let stats = scope.entry(category).or_default();
        stats.loaded = objects.len();

        let mut sorted: Vec<&SpatialObject> = objects.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut seen = HashSet::new();
        let mut in_scope = Vec::with_capacity(sorted.len());
        for object in sorted {
            if !seen.insert(object.id.as_str()) {
                problems.push(Problem::load(
                    category.as_str(),
                    Some(object.id.clone()),
                    "duplicate id, later record ignored",
                ));
                continue;
            }
            if let Err(msg) = geometry::check(&object.geometry) {
                problems.push(Problem::geometry(category.as_str(), &object.id, msg));
                continue;
            }
            if !region.contains_object(&object.geometry) {
                stats.out_of_area += 1;
                continue;
            }
            if input.exclusions.contains(&object.id) {
                stats.excluded += 1;
                continue;
            }
            if object.bor_type().is_some_and(|t| skip_types.contains(&t.code)) {
                stats.skipped += 1;
                continue;
            }
            in_scope.push(object);
        }
        stats.in_scope = in_scope.len();
        info!(
            %category,
            loaded = stats.loaded,
            in_scope = stats.in_scope,
            excluded = stats.excluded,
            skipped = stats.skipped,
            out_of_area = stats.out_of_area,
            "BOR objects selected"
        );

        let matcher = matcher_for(category, &config.matching);
        let outcomes: Vec<ObjectOutcome> = in_scope
            .par_iter()
            .map(|&bor| match_object(matcher.as_ref(), &index, bor, threshold, rules))
            .collect();

        let before = pairs.len();
        let mut failed = 0;
        for outcome in outcomes {
            match outcome {
                ObjectOutcome::Pairs(found) => pairs.extend(found),
                ObjectOutcome::Unmatched(record) => unmatched.push(record),
                ObjectOutcome::Failed(problem) => {
                    failed += 1;
                    problems.push(problem);
                }
            }
        }
        if let Some(stats) = scope.get_mut(&category) {
            stats.failed = failed;
        }
        debug!(%category, pairs = pairs.len() - before, "category matched");
        audited.extend(in_scope);
    }

    let audit = if config.audit.enabled {
        let (findings, audit_problems) = audit_overlaps(&audited, config.audit.threshold);
        problems.extend(audit_problems);
        findings
    } else {
        Vec::new()
    };

    let mut derived = DerivedOutputs::default();
    for &category in input.bor.keys() {
        derived.import_plans.insert(category, build_import_plan(category, &pairs));
    }
    derived.testcases = build_testcases(&config.testcases, &pairs);

    for problem in &problems {
        warn!("{problem}");
    }

    let summary = compute_summary(scope, &pairs, &unmatched, index.len(), problems.len(), audit.len());
    info!(
        pairs = summary.total_pairs,
        overlaps = summary.overlaps,
        invalid_types = summary.invalid_types,
        manual_buckets = summary.manual_buckets,
        unmatched = summary.unmatched,
        problems = summary.problems,
        "matching complete"
    );
    if summary.zero_matches {
        warn!("no matches found in the selected area");
    }

    Ok(RunReport {
        meta: RunMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            areas: config.run.areas.clone(),
            negate: config.run.negate,
            exclude_guids: config.run.exclude_guids,
        },
        summary,
        pairs,
        unmatched,
        problems,
        derived,
        audit,
    })
}

/// Valid BGT objects inside the region, first record per id.
fn bgt_in_scope<'a>(
    config: &ReconConfig,
    rules: &RuleTable,
    objects: &'a [SpatialObject],
    region: &Region,
    problems: &mut Vec<Problem>,
) -> Vec<&'a SpatialObject> {
    let classes = rules.referenced_bgt_classes();
    let restrict = config.matching.restrict_bgt_to_rule_classes;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for object in objects {
        if !seen.insert(object.id.as_str()) {
            problems.push(Problem::load("bgt", Some(object.id.clone()), "duplicate id, later record ignored"));
            continue;
        }
        if let Err(msg) = geometry::check(&object.geometry) {
            problems.push(Problem::geometry("bgt", &object.id, msg));
            continue;
        }
        if restrict && !object.bgt_type().is_some_and(|t| classes.contains(&t.class)) {
            continue;
        }
        if region.contains_object(&object.geometry) {
            out.push(object);
        }
    }
    out
}

fn match_object(
    matcher: &dyn Matcher,
    index: &SpatialIndex<'_>,
    bor: &SpatialObject,
    threshold: f64,
    rules: &RuleTable,
) -> ObjectOutcome {
    let category = matcher.category();
    let candidates = match index.candidates(bor, threshold) {
        Ok(c) => c,
        Err(msg) => return ObjectOutcome::Failed(Problem::geometry(category.as_str(), &bor.id, msg)),
    };
    let unmatched = || {
        ObjectOutcome::Unmatched(UnmatchedRecord {
            category,
            bor_id: bor.id.clone(),
            bor_type: bor.bor_type().map(|t| t.code.clone()).unwrap_or_default(),
        })
    };
    match matcher.refine_object(bor, candidates) {
        Refinement::NoOverlap => unmatched(),
        Refinement::Matched(refined) if refined.is_empty() => unmatched(),
        Refinement::Matched(refined) => {
            ObjectOutcome::Pairs(refined.iter().filter_map(|p| to_record(p, rules)).collect())
        }
    }
}
