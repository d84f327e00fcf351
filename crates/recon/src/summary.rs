use std::collections::BTreeMap;

use crate::model::{AssetCategory, Bucket, CategorySummary, PairRecord, RunSummary, UnmatchedRecord};

/// Compute summary statistics from classified pairs and scope counts.
pub fn compute_summary(
    mut categories: BTreeMap<AssetCategory, CategorySummary>,
    pairs: &[PairRecord],
    unmatched: &[UnmatchedRecord],
    bgt_in_scope: usize,
    problems: usize,
    audit_findings: usize,
) -> RunSummary {
    let mut overlaps = 0;
    let mut invalid_types = 0;
    let mut manual_buckets = 0;

    for p in pairs {
        *categories
            .entry(p.category)
            .or_default()
            .bucket_counts
            .entry(p.bucket.to_string())
            .or_insert(0) += 1;

        match p.bucket {
            Bucket::Overlaps => overlaps += 1,
            Bucket::InvalidTypes => invalid_types += 1,
            Bucket::ManualBuckets => manual_buckets += 1,
            Bucket::Unmatched | Bucket::ImportFiles => {}
        }
    }
    for u in unmatched {
        *categories
            .entry(u.category)
            .or_default()
            .bucket_counts
            .entry(Bucket::Unmatched.to_string())
            .or_insert(0) += 1;
    }

    let excluded = categories.values().map(|c| c.excluded).sum();
    let skipped = categories.values().map(|c| c.skipped).sum();

    RunSummary {
        categories,
        bgt_in_scope,
        total_pairs: pairs.len(),
        overlaps,
        invalid_types,
        manual_buckets,
        unmatched: unmatched.len(),
        excluded,
        skipped,
        problems,
        audit_findings,
        zero_matches: pairs.is_empty(),
    }
}
