use geo::{Area as _, BooleanOps, BoundingRect, Intersects};
use geo_types::{MultiPolygon, Rect};

use crate::error::ReconError;
use crate::model::Area;

/// Region objects must share area with to be in scope.
#[derive(Debug, Clone)]
pub enum Region {
    /// No selection: every object is in scope.
    Everywhere,
    Within(MultiPolygon<f64>),
}

impl Region {
    /// True when the object and the region overlap with positive area.
    /// Touching the boundary is not enough, so an object never belongs to
    /// both a selection and its negation.
    pub fn contains_object(&self, geometry: &MultiPolygon<f64>) -> bool {
        match self {
            Self::Everywhere => true,
            Self::Within(region) => {
                region.intersects(geometry) && region.intersection(geometry).unsigned_area() > 0.0
            }
        }
    }

    pub fn geometry(&self) -> Option<&MultiPolygon<f64>> {
        match self {
            Self::Everywhere => None,
            Self::Within(g) => Some(g),
        }
    }
}

/// Resolves district names against the loaded district boundaries.
pub struct AreaFilter<'a> {
    areas: &'a [Area],
}

impl<'a> AreaFilter<'a> {
    pub fn new(areas: &'a [Area]) -> Self {
        Self { areas }
    }

    pub fn names(&self) -> Vec<String> {
        self.areas.iter().map(|a| a.name.clone()).collect()
    }

    /// Union of the selected districts, or its complement within the
    /// bounding rectangle of all districts when `negate` is set.
    pub fn resolve(&self, selection: &[String], negate: bool) -> Result<Region, ReconError> {
        if selection.is_empty() {
            return Ok(Region::Everywhere);
        }

        let mut missing = Vec::new();
        let mut picked: Vec<&Area> = Vec::new();
        for name in selection {
            let name = name.trim();
            let hits: Vec<&Area> = self.areas.iter().filter(|a| a.name.trim() == name).collect();
            if hits.is_empty() {
                missing.push(name.to_string());
            }
            for hit in hits {
                if !picked.iter().any(|p| std::ptr::eq(*p, hit)) {
                    picked.push(hit);
                }
            }
        }
        if !missing.is_empty() {
            return Err(ReconError::UnknownArea { names: missing, known: self.names() });
        }

        let union = union_all(picked.iter().map(|a| &a.geometry));
        if !negate {
            return Ok(Region::Within(union));
        }

        let extent = self.extent().map(|r| MultiPolygon::new(vec![r.to_polygon()]));
        Ok(Region::Within(match extent {
            Some(extent) => extent.difference(&union),
            None => MultiPolygon::new(vec![]),
        }))
    }

    /// Bounding rectangle of every known district.
    fn extent(&self) -> Option<Rect<f64>> {
        self.areas
            .iter()
            .filter_map(|a| a.geometry.bounding_rect())
            .reduce(|acc, r| {
                Rect::new(
                    (acc.min().x.min(r.min().x), acc.min().y.min(r.min().y)),
                    (acc.max().x.max(r.max().x), acc.max().y.max(r.max().y)),
                )
            })
    }
}

fn union_all<'g>(mut geometries: impl Iterator<Item = &'g MultiPolygon<f64>>) -> MultiPolygon<f64> {
    let Some(first) = geometries.next() else {
        return MultiPolygon::new(vec![]);
    };
    geometries.fold(first.clone(), |acc, g| acc.union(g))
}
