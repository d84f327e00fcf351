use std::collections::{BTreeMap, HashSet};

use crate::config::MatchingConfig;
use crate::model::{AssetCategory, BgtClass, Retention, SpatialObject};
use crate::overlap::CandidatePair;

/// A candidate pair that survived category refinement.
#[derive(Debug, Clone, Copy)]
pub struct RefinedPair<'a> {
    pub pair: CandidatePair<'a>,
    /// The category's ranking measure.
    pub measure: f64,
    pub retention: Retention,
}

#[derive(Debug)]
pub enum Refinement<'a> {
    Matched(Vec<RefinedPair<'a>>),
    /// No candidate left for this BOR object.
    NoOverlap,
}

#[derive(Debug, Clone, Copy)]
pub struct MatcherSettings {
    pub co_dominance_margin: f64,
    pub prefer_same_height_level: bool,
}

impl From<&MatchingConfig> for MatcherSettings {
    fn from(m: &MatchingConfig) -> Self {
        Self {
            co_dominance_margin: m.co_dominance_margin,
            prefer_same_height_level: m.prefer_same_height_level,
        }
    }
}

/// Category-specific refinement of raw candidate pairs.
///
/// The provided methods implement the shared reduction: height-level
/// preference, ranking and co-dominance. Variants override `measure` or
/// `refine_object` for their delta.
pub trait Matcher: Send + Sync {
    fn category(&self) -> AssetCategory;

    fn settings(&self) -> &MatcherSettings;

    fn measure(&self, pair: &CandidatePair<'_>) -> f64 {
        pair.overlap.bor_fraction
    }

    /// Refine the candidates of a single BOR object.
    fn refine_object<'a>(
        &self,
        bor: &'a SpatialObject,
        candidates: Vec<CandidatePair<'a>>,
    ) -> Refinement<'a> {
        if candidates.is_empty() {
            return Refinement::NoOverlap;
        }
        let candidates = self.prefer_height_level(bor, candidates);
        Refinement::Matched(self.reduce_to_dominant(candidates))
    }

    /// Refine a flat candidate list, grouped per BOR object (by id).
    fn refine<'a>(
        &self,
        candidates: Vec<CandidatePair<'a>>,
    ) -> Vec<(&'a SpatialObject, Refinement<'a>)> {
        let mut grouped: BTreeMap<&'a str, (&'a SpatialObject, Vec<CandidatePair<'a>>)> =
            BTreeMap::new();
        for c in candidates {
            grouped.entry(c.bor.id.as_str()).or_insert_with(|| (c.bor, Vec::new())).1.push(c);
        }
        grouped
            .into_values()
            .map(|(bor, cs)| (bor, self.refine_object(bor, cs)))
            .collect()
    }

    /// Drop candidates at other height levels when at least one shares the
    /// BOR object's level.
    fn prefer_height_level<'a>(
        &self,
        bor: &SpatialObject,
        mut candidates: Vec<CandidatePair<'a>>,
    ) -> Vec<CandidatePair<'a>> {
        if self.settings().prefer_same_height_level
            && candidates.iter().any(|c| c.bgt.height_level == bor.height_level)
        {
            candidates.retain(|c| c.bgt.height_level == bor.height_level);
        }
        candidates
    }

    /// Keep the dominant pair, or every pair within the co-dominance margin
    /// of the top measure.
    fn reduce_to_dominant<'a>(&self, candidates: Vec<CandidatePair<'a>>) -> Vec<RefinedPair<'a>> {
        let mut ranked: Vec<(f64, CandidatePair<'a>)> =
            candidates.into_iter().map(|c| (self.measure(&c), c)).collect();
        ranked.sort_by(|(ma, a), (mb, b)| mb.total_cmp(ma).then_with(|| a.bgt.id.cmp(&b.bgt.id)));

        let Some(&(top, _)) = ranked.first() else {
            return Vec::new();
        };
        let margin = self.settings().co_dominance_margin;
        // Tolerate float noise at the margin edge.
        let co: Vec<(f64, CandidatePair<'a>)> =
            ranked.into_iter().take_while(|(m, _)| top - m <= margin + 1e-12).collect();

        let retention = if co.len() == 1 { Retention::Dominant } else { Retention::CoDominant };
        co.into_iter()
            .map(|(measure, pair)| RefinedPair { pair, measure, retention })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Green objects. Hedges follow parcels by design and keep every qualifying
/// segment instead of one dominant match.
pub struct GreenMatcher {
    settings: MatcherSettings,
    hedge_types: HashSet<String>,
    hedge_classes: HashSet<BgtClass>,
}

impl GreenMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            settings: config.into(),
            hedge_types: config.hedge_type_set(),
            hedge_classes: config.hedge_class_set(),
        }
    }

    pub fn is_hedge(&self, bor: &SpatialObject) -> bool {
        bor.bor_type().is_some_and(|t| self.hedge_types.contains(&t.code))
    }
}

impl Matcher for GreenMatcher {
    fn category(&self) -> AssetCategory {
        AssetCategory::Green
    }

    fn settings(&self) -> &MatcherSettings {
        &self.settings
    }

    fn refine_object<'a>(
        &self,
        bor: &'a SpatialObject,
        mut candidates: Vec<CandidatePair<'a>>,
    ) -> Refinement<'a> {
        if !self.is_hedge(bor) {
            if candidates.is_empty() {
                return Refinement::NoOverlap;
            }
            let candidates = self.prefer_height_level(bor, candidates);
            return Refinement::Matched(self.reduce_to_dominant(candidates));
        }

        candidates.retain(|c| {
            c.bgt.bgt_type().is_some_and(|t| self.hedge_classes.contains(&t.class))
        });
        if candidates.is_empty() {
            return Refinement::NoOverlap;
        }
        let mut segments = self.prefer_height_level(bor, candidates);
        segments.sort_by(|a, b| a.bgt.id.cmp(&b.bgt.id));
        Refinement::Matched(
            segments
                .into_iter()
                .map(|pair| RefinedPair {
                    measure: self.measure(&pair),
                    pair,
                    retention: Retention::HedgeSegment,
                })
                .collect(),
        )
    }
}

pub struct TerrainMatcher {
    settings: MatcherSettings,
}

impl TerrainMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self { settings: config.into() }
    }
}

impl Matcher for TerrainMatcher {
    fn category(&self) -> AssetCategory {
        AssetCategory::Terrain
    }

    fn settings(&self) -> &MatcherSettings {
        &self.settings
    }
}

/// Paved surfaces rank by how well both outlines agree, so a small BOR
/// patch inside a large road section does not win over a tight fit.
pub struct PavedMatcher {
    settings: MatcherSettings,
}

impl PavedMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self { settings: config.into() }
    }
}

impl Matcher for PavedMatcher {
    fn category(&self) -> AssetCategory {
        AssetCategory::Paved
    }

    fn settings(&self) -> &MatcherSettings {
        &self.settings
    }

    fn measure(&self, pair: &CandidatePair<'_>) -> f64 {
        (pair.overlap.bor_fraction + pair.overlap.bgt_fraction) / 2.0
    }
}

pub fn matcher_for(category: AssetCategory, config: &MatchingConfig) -> Box<dyn Matcher> {
    match category {
        AssetCategory::Green => Box::new(GreenMatcher::new(config)),
        AssetCategory::Terrain => Box::new(TerrainMatcher::new(config)),
        AssetCategory::Paved => Box::new(PavedMatcher::new(config)),
    }
}
