use crate::matcher::RefinedPair;
use crate::model::{Bucket, PairRecord, Retention, SpatialObject};
use crate::rules::{RuleTable, Verdict};

/// Terminal bucket of one refined pair. Independent of every other pair.
pub fn classify(pair: &RefinedPair<'_>, rules: &RuleTable) -> Bucket {
    if pair.retention == Retention::CoDominant {
        return Bucket::ManualBuckets;
    }
    match rules.verdict_for(pair.pair.bor, pair.pair.bgt) {
        Verdict::Allowed => Bucket::Overlaps,
        Verdict::Disallowed => Bucket::InvalidTypes,
    }
}

/// Classify and detach from the borrowed objects.
pub fn to_record(pair: &RefinedPair<'_>, rules: &RuleTable) -> Option<PairRecord> {
    let bor = pair.pair.bor.bor_type()?;
    Some(PairRecord {
        category: bor.category,
        bucket: classify(pair, rules),
        bor_id: pair.pair.bor.id.clone(),
        bgt_id: pair.pair.bgt.id.clone(),
        bor_type: bor.code.clone(),
        bgt_type: type_label(pair.pair.bgt),
        overlap_measure: pair.pair.overlap.bor_fraction,
        reverse_measure: pair.pair.overlap.bgt_fraction,
        match_measure: pair.measure,
        retention: pair.retention,
    })
}

fn type_label(object: &SpatialObject) -> String {
    object.object_type.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::fixtures::rect;
    use crate::model::{AssetCategory, BgtClass};
    use crate::overlap::{CandidatePair, Overlap};
    use crate::rules::fixtures::row;

    fn refined<'a>(
        bor: &'a SpatialObject,
        bgt: &'a SpatialObject,
        retention: Retention,
    ) -> RefinedPair<'a> {
        RefinedPair {
            pair: CandidatePair {
                bor,
                bgt,
                overlap: Overlap { intersection_area: 0.5, bor_fraction: 0.5, bgt_fraction: 0.25 },
            },
            measure: 0.5,
            retention,
        }
    }

    #[test]
    fn buckets_by_retention_and_rule() {
        let rules = RuleTable::from_rows(vec![row(2, "Groenobject", "Gras", "begroeid terreindeel", "grasland overig")])
            .unwrap();
        let gras = SpatialObject::bor("B1", AssetCategory::Green, "Gras", rect(0.0, 0.0, 1.0, 1.0));
        let allowed = SpatialObject::bgt("G1", BgtClass::BegroeidTerreindeel, "grasland overig", rect(0.0, 0.0, 1.0, 1.0));
        let denied = SpatialObject::bgt("G2", BgtClass::Wegdeel, "fietspad", rect(0.0, 0.0, 1.0, 1.0));

        assert_eq!(classify(&refined(&gras, &allowed, Retention::Dominant), &rules), Bucket::Overlaps);
        assert_eq!(classify(&refined(&gras, &denied, Retention::Dominant), &rules), Bucket::InvalidTypes);
        assert_eq!(classify(&refined(&gras, &allowed, Retention::HedgeSegment), &rules), Bucket::Overlaps);
        // co-dominance wins over the rule verdict
        assert_eq!(classify(&refined(&gras, &allowed, Retention::CoDominant), &rules), Bucket::ManualBuckets);
    }

    #[test]
    fn record_carries_both_measures() {
        let rules = RuleTable::default();
        let b = SpatialObject::bor("B1", AssetCategory::Paved, "Asfalt", rect(0.0, 0.0, 1.0, 1.0));
        let g = SpatialObject::bgt("G1", BgtClass::Wegdeel, "Rijbaan lokale weg", rect(0.0, 0.0, 1.0, 1.0));
        let rec = to_record(&refined(&b, &g, Retention::Dominant), &rules).unwrap();
        assert_eq!(rec.category, AssetCategory::Paved);
        assert_eq!(rec.bucket, Bucket::InvalidTypes);
        assert_eq!(rec.bor_type, "asfalt");
        assert_eq!(rec.bgt_type, "wegdeel/rijbaan lokale weg");
        assert_eq!(rec.overlap_measure, 0.5);
        assert_eq!(rec.reverse_measure, 0.25);
    }
}
