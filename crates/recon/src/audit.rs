//! Overlap audit of the BOR registry itself.
//!
//! Two BOR objects at the same height level that cover most of each other
//! usually mean a duplicate or a drawing error. Findings are reported next to
//! the match results and never block them.

use rayon::prelude::*;
use serde::Serialize;

use crate::model::{AssetCategory, Problem, SpatialObject};
use crate::overlap::SpatialIndex;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditFinding {
    pub first_category: AssetCategory,
    pub first_id: String,
    pub second_category: AssetCategory,
    pub second_id: String,
    pub height_level: i32,
    /// Share of the first object covered by the second.
    pub first_fraction: f64,
    pub second_fraction: f64,
}

/// Report every pair whose intersection covers more than `threshold` of both
/// objects. Each pair is reported once, ordered by (category, id).
pub fn audit_overlaps(
    objects: &[&SpatialObject],
    threshold: f64,
) -> (Vec<AuditFinding>, Vec<Problem>) {
    let index = SpatialIndex::build(objects.iter().copied());

    let per_object: Vec<Result<Vec<AuditFinding>, Problem>> = objects
        .par_iter()
        .map(|&object| {
            let Some(key) = sort_key(object) else {
                return Ok(Vec::new());
            };
            let hits = index.overlapping(object).map_err(|msg| {
                Problem::geometry(key.0.as_str(), &object.id, msg)
            })?;
            let mut found = Vec::new();
            for (other, overlap) in hits {
                let Some(other_key) = sort_key(other) else { continue };
                if other_key <= key || other.height_level != object.height_level {
                    continue;
                }
                if overlap.bor_fraction > threshold && overlap.bgt_fraction > threshold {
                    found.push(AuditFinding {
                        first_category: key.0,
                        first_id: object.id.clone(),
                        second_category: other_key.0,
                        second_id: other.id.clone(),
                        height_level: object.height_level,
                        first_fraction: overlap.bor_fraction,
                        second_fraction: overlap.bgt_fraction,
                    });
                }
            }
            Ok(found)
        })
        .collect();

    let mut findings = Vec::new();
    let mut problems = Vec::new();
    for outcome in per_object {
        match outcome {
            Ok(found) => findings.extend(found),
            Err(problem) => problems.push(problem),
        }
    }
    findings.sort_by(|a, b| {
        (a.first_category, &a.first_id, a.second_category, &a.second_id).cmp(&(
            b.first_category,
            &b.first_id,
            b.second_category,
            &b.second_id,
        ))
    });
    if !findings.is_empty() {
        tracing::warn!(findings = findings.len(), "overlapping objects inside BOR");
    }
    (findings, problems)
}

fn sort_key(object: &SpatialObject) -> Option<(AssetCategory, &str)> {
    object.bor_type().map(|t| (t.category, object.id.as_str()))
}
