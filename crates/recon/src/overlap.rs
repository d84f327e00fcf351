use geo::{Area as _, BooleanOps, Intersects};
use rstar::{RTree, RTreeObject, AABB};

use crate::geometry::envelope;
use crate::model::SpatialObject;

/// Area shared by two objects, as a fraction of each.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlap {
    pub intersection_area: f64,
    /// Intersection / BOR area, clamped to [0, 1]. The overlap measure.
    pub bor_fraction: f64,
    /// Intersection / BGT area, clamped to [0, 1].
    pub bgt_fraction: f64,
}

/// A BOR object and one BGT object it overlaps materially.
#[derive(Debug, Clone, Copy)]
pub struct CandidatePair<'a> {
    pub bor: &'a SpatialObject,
    pub bgt: &'a SpatialObject,
    pub overlap: Overlap,
}

struct IndexEntry {
    slot: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Bulk-loaded R-tree over object bounding boxes. Built once per run and
/// shared read-only by the workers.
pub struct SpatialIndex<'a> {
    objects: Vec<&'a SpatialObject>,
    areas: Vec<f64>,
    tree: RTree<IndexEntry>,
}

impl<'a> SpatialIndex<'a> {
    /// Objects must already have passed `geometry::check`.
    pub fn build(objects: impl IntoIterator<Item = &'a SpatialObject>) -> Self {
        let objects: Vec<&'a SpatialObject> = objects.into_iter().collect();
        let areas = objects.iter().map(|o| o.geometry.unsigned_area()).collect();
        let entries = objects
            .iter()
            .enumerate()
            .filter_map(|(slot, o)| {
                envelope(&o.geometry).map(|r| IndexEntry {
                    slot,
                    envelope: AABB::from_corners([r.min().x, r.min().y], [r.max().x, r.max().y]),
                })
            })
            .collect();
        Self { objects, areas, tree: RTree::bulk_load(entries) }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Slots of indexed objects whose geometry truly intersects `object`.
    fn intersecting(&self, object: &SpatialObject) -> Vec<usize> {
        let Some(rect) = envelope(&object.geometry) else {
            return Vec::new();
        };
        let query = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        let mut slots: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .map(|e| e.slot)
            .filter(|&slot| self.objects[slot].geometry.intersects(&object.geometry))
            .collect();
        slots.sort_unstable();
        slots
    }

    /// Every indexed object overlapping `bor` with an overlap measure of at
    /// least `threshold`, ordered by id.
    ///
    /// Errors when an intersection area is not a finite number.
    pub fn candidates(
        &self,
        bor: &'a SpatialObject,
        threshold: f64,
    ) -> Result<Vec<CandidatePair<'a>>, String> {
        let bor_area = bor.geometry.unsigned_area();
        let mut out = Vec::new();
        for slot in self.intersecting(bor) {
            let other = self.objects[slot];
            let Some(overlap) = measure(bor, bor_area, other, self.areas[slot])? else {
                continue;
            };
            if overlap.bor_fraction >= threshold {
                out.push(CandidatePair { bor, bgt: other, overlap });
            }
        }
        out.sort_by(|a, b| a.bgt.id.cmp(&b.bgt.id));
        Ok(out)
    }

    /// Indexed objects other than `object` itself (by identity) whose
    /// overlap with it has positive area.
    pub fn overlapping(
        &self,
        object: &'a SpatialObject,
    ) -> Result<Vec<(&'a SpatialObject, Overlap)>, String> {
        let area = object.geometry.unsigned_area();
        let mut out = Vec::new();
        for slot in self.intersecting(object) {
            let other = self.objects[slot];
            if std::ptr::eq(other, object) {
                continue;
            }
            if let Some(overlap) = measure(object, area, other, self.areas[slot])? {
                out.push((other, overlap));
            }
        }
        Ok(out)
    }
}

/// `None` when the shared area is zero (touching edges or corners).
fn measure(
    a: &SpatialObject,
    a_area: f64,
    b: &SpatialObject,
    b_area: f64,
) -> Result<Option<Overlap>, String> {
    let intersection_area = a.geometry.intersection(&b.geometry).unsigned_area();
    if !intersection_area.is_finite() {
        return Err(format!("non-finite intersection area with '{}'", b.id));
    }
    if intersection_area <= 0.0 {
        return Ok(None);
    }
    Ok(Some(Overlap {
        intersection_area,
        bor_fraction: fraction(intersection_area, a_area),
        bgt_fraction: fraction(intersection_area, b_area),
    }))
}

fn fraction(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        return 0.0;
    }
    (part / whole).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::fixtures::rect;
    use crate::model::{AssetCategory, BgtClass};

    fn bor() -> SpatialObject {
        SpatialObject::bor("B1", AssetCategory::Terrain, "zand", rect(0.0, 0.0, 10.0, 10.0))
    }

    fn bgt(id: &str, geometry: geo_types::MultiPolygon<f64>) -> SpatialObject {
        SpatialObject::bgt(id, BgtClass::OnbegroeidTerreindeel, "zand", geometry)
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let b = bor();
        // 5 x 5 inside a 10 x 10 object: exactly 0.25
        let g = vec![bgt("G1", rect(5.0, 5.0, 15.0, 15.0))];
        let index = SpatialIndex::build(g.iter());

        let kept = index.candidates(&b, 0.25).unwrap();
        assert_eq!(kept.len(), 1);
        assert!((kept[0].overlap.bor_fraction - 0.25).abs() < 1e-12);
        assert!((kept[0].overlap.bgt_fraction - 0.25).abs() < 1e-12);

        assert!(index.candidates(&b, 0.2500001).unwrap().is_empty());
    }

    #[test]
    fn candidates_sorted_by_bgt_id_and_filtered() {
        let b = bor();
        let g = vec![
            bgt("G3", rect(0.0, 0.0, 4.0, 10.0)),
            bgt("G1", rect(4.0, 0.0, 10.0, 10.0)),
            bgt("G2", rect(9.5, 0.0, 20.0, 1.0)),
            bgt("G9", rect(50.0, 50.0, 60.0, 60.0)),
        ];
        let index = SpatialIndex::build(g.iter());
        let ids: Vec<&str> = index
            .candidates(&b, 0.10)
            .unwrap()
            .iter()
            .map(|c| c.bgt.id.as_str())
            .collect();
        assert_eq!(ids, vec!["G1", "G3"]);
    }

    #[test]
    fn touching_objects_have_no_overlap() {
        let b = bor();
        let g = vec![bgt("G1", rect(10.0, 0.0, 20.0, 10.0))];
        let index = SpatialIndex::build(g.iter());
        assert!(index.candidates(&b, 0.0).unwrap().is_empty());
    }

    #[test]
    fn overlapping_skips_self() {
        let objects = vec![
            SpatialObject::bor("A", AssetCategory::Green, "gras", rect(0.0, 0.0, 10.0, 10.0)),
            SpatialObject::bor("B", AssetCategory::Green, "gras", rect(1.0, 1.0, 10.0, 10.0)),
        ];
        let index = SpatialIndex::build(objects.iter());
        let hits = index.overlapping(&objects[0]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "B");
        assert!((hits[0].1.bor_fraction - 0.81).abs() < 1e-9);
        assert!((hits[0].1.bgt_fraction - 1.0).abs() < 1e-9);
    }
}
