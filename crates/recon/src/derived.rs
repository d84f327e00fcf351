//! Outputs derived from classified pairs: per-category import plans and
//! testcase samples.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::config::TestcaseConfig;
use crate::model::{AssetCategory, Bucket, PairRecord};

#[derive(Debug, Clone, Default, Serialize)]
pub struct DerivedOutputs {
    pub import_plans: BTreeMap<AssetCategory, ImportPlan>,
    pub testcases: Vec<TestcaseSet>,
}

// ---------------------------------------------------------------------------
// Import plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportRecord {
    pub bor_id: String,
    pub bgt_id: String,
    pub measure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoveRecord {
    pub bor_id: String,
    pub bgt_id: String,
    pub measure: f64,
    /// BOR object that keeps the contested BGT match.
    pub kept_by: String,
}

/// What to do in the BOR registry after an accepted run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportPlan {
    /// BOR object linked to its best allowed BGT object.
    #[serde(rename = "match")]
    pub matches: Vec<ImportRecord>,
    /// BGT objects to add to BOR.
    pub add: Vec<ImportRecord>,
    /// BOR objects losing a contested BGT object.
    pub remove: Vec<RemoveRecord>,
}

impl ImportPlan {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty() && self.add.is_empty() && self.remove.is_empty()
    }
}

/// Build the import plan of one category from its `overlaps` pairs.
pub fn build_import_plan(category: AssetCategory, pairs: &[PairRecord]) -> ImportPlan {
    let mut per_bor: BTreeMap<&str, Vec<&PairRecord>> = BTreeMap::new();
    for p in pairs.iter().filter(|p| p.category == category && p.bucket == Bucket::Overlaps) {
        per_bor.entry(p.bor_id.as_str()).or_default().push(p);
    }

    // best pair per BOR object: highest measure, then lowest BGT id
    let mut best: BTreeMap<&str, &PairRecord> = BTreeMap::new();
    for (bor_id, ps) in &per_bor {
        if let Some(top) = ps.iter().copied().min_by(|a, b| {
            b.match_measure.total_cmp(&a.match_measure).then_with(|| a.bgt_id.cmp(&b.bgt_id))
        }) {
            best.insert(*bor_id, top);
        }
    }

    let mut claims: BTreeMap<&str, Vec<&PairRecord>> = BTreeMap::new();
    for p in best.values() {
        claims.entry(p.bgt_id.as_str()).or_default().push(p);
    }

    let mut plan = ImportPlan::default();
    for (bgt_id, mut claimants) in claims {
        claimants.sort_by(|a, b| {
            b.match_measure.total_cmp(&a.match_measure).then_with(|| a.bor_id.cmp(&b.bor_id))
        });
        let keeper = claimants[0];
        plan.matches.push(record(keeper));
        for loser in &claimants[1..] {
            plan.remove.push(RemoveRecord {
                bor_id: loser.bor_id.clone(),
                bgt_id: bgt_id.to_string(),
                measure: loser.match_measure,
                kept_by: keeper.bor_id.clone(),
            });
        }
    }

    let matched_bgt: HashSet<&str> = best.values().map(|p| p.bgt_id.as_str()).collect();
    let removed: HashSet<String> = plan.remove.iter().map(|r| r.bor_id.clone()).collect();
    let mut added: HashSet<&str> = HashSet::new();
    for (bor_id, ps) in &per_bor {
        if removed.contains(*bor_id) {
            continue;
        }
        let Some(top) = best.get(bor_id) else { continue };
        let mut rest: Vec<&PairRecord> =
            ps.iter().copied().filter(|p| !std::ptr::eq(*p, *top)).collect();
        rest.sort_by(|a, b| a.bgt_id.cmp(&b.bgt_id));
        for p in rest {
            if !matched_bgt.contains(p.bgt_id.as_str()) && added.insert(p.bgt_id.as_str()) {
                plan.add.push(record(p));
            }
        }
    }

    plan.matches.sort_by(|a, b| a.bor_id.cmp(&b.bor_id));
    plan.add.sort_by(|a, b| a.bor_id.cmp(&b.bor_id).then_with(|| a.bgt_id.cmp(&b.bgt_id)));
    plan.remove.sort_by(|a, b| a.bor_id.cmp(&b.bor_id));
    plan
}

fn record(p: &PairRecord) -> ImportRecord {
    ImportRecord { bor_id: p.bor_id.clone(), bgt_id: p.bgt_id.clone(), measure: p.match_measure }
}

// ---------------------------------------------------------------------------
// Testcases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestcaseEntry {
    pub category: AssetCategory,
    pub bor_id: String,
    pub bgt_ids: Vec<String>,
}

/// Sample of one bucket for manual inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestcaseSet {
    pub bucket: Bucket,
    pub entries: Vec<TestcaseEntry>,
}

/// First `sample_size` BOR objects (by category, then id) of each enabled bucket.
pub fn build_testcases(config: &TestcaseConfig, pairs: &[PairRecord]) -> Vec<TestcaseSet> {
    config
        .buckets()
        .into_iter()
        .map(|bucket| {
            let mut grouped: BTreeMap<(AssetCategory, &str), BTreeSet<&str>> = BTreeMap::new();
            for p in pairs.iter().filter(|p| p.bucket == bucket) {
                grouped.entry((p.category, p.bor_id.as_str())).or_default().insert(p.bgt_id.as_str());
            }
            let entries = grouped
                .into_iter()
                .take(config.sample_size)
                .map(|((category, bor_id), bgt)| TestcaseEntry {
                    category,
                    bor_id: bor_id.to_string(),
                    bgt_ids: bgt.into_iter().map(String::from).collect(),
                })
                .collect();
            TestcaseSet { bucket, entries }
        })
        .collect()
}
