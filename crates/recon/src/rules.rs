use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::error::ReconError;
use crate::model::{AssetCategory, BgtClass, BgtType, BorType, SpatialObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    Disallowed,
}

impl Verdict {
    /// Empty text means the row itself is the permission.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "" | "allowed" | "ja" | "yes" | "true" | "1" | "toegestaan" => Some(Self::Allowed),
            "disallowed" | "nee" | "no" | "false" | "0" | "niet toegestaan" => {
                Some(Self::Disallowed)
            }
            _ => None,
        }
    }
}

/// One row of the control table as read from disk. `row` is the 1-based
/// sheet row used in error messages.
#[derive(Debug, Clone, Default)]
pub struct RuleRow {
    pub row: usize,
    pub category: String,
    pub bor_type: String,
    pub bgt_class: String,
    pub bgt_type: String,
    pub verdict: Option<String>,
}

/// Allow-list of (BOR type, BGT type) combinations.
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: HashMap<BorType, HashMap<BgtType, Verdict>>,
    classes: BTreeSet<BgtClass>,
    len: usize,
}

impl RuleTable {
    pub fn from_rows<I>(rows: I) -> Result<Self, ReconError>
    where
        I: IntoIterator<Item = RuleRow>,
    {
        let mut table = RuleTable::default();
        for row in rows {
            let category = AssetCategory::parse(&row.category).ok_or_else(|| {
                ReconError::malformed_rule(row.row, format!("unknown category '{}'", row.category))
            })?;
            let class = BgtClass::parse(&row.bgt_class).ok_or_else(|| {
                ReconError::malformed_rule(row.row, format!("unknown BGT class '{}'", row.bgt_class))
            })?;
            if row.bor_type.trim().is_empty() {
                return Err(ReconError::malformed_rule(row.row, "blank BOR type"));
            }
            if row.bgt_type.trim().is_empty() {
                return Err(ReconError::malformed_rule(row.row, "blank BGT type"));
            }
            let raw_verdict = row.verdict.as_deref().unwrap_or("");
            let verdict = Verdict::parse(raw_verdict).ok_or_else(|| {
                ReconError::malformed_rule(row.row, format!("unrecognised verdict '{raw_verdict}'"))
            })?;

            let bor = BorType::new(category, &row.bor_type);
            let bgt = BgtType::new(class, &row.bgt_type);
            let entry = table.rules.entry(bor.clone()).or_default();
            match entry.get(&bgt) {
                Some(existing) if *existing != verdict => {
                    return Err(ReconError::malformed_rule(
                        row.row,
                        format!("conflicting verdicts for {bor} -> {bgt}"),
                    ));
                }
                Some(_) => {}
                None => {
                    entry.insert(bgt, verdict);
                    table.classes.insert(class);
                    table.len += 1;
                }
            }
        }
        tracing::debug!(rules = table.len, "rule table built");
        Ok(table)
    }

    /// Absent combinations are disallowed.
    pub fn lookup(&self, bor: &BorType, bgt: &BgtType) -> Verdict {
        self.rules
            .get(bor)
            .and_then(|m| m.get(bgt))
            .copied()
            .unwrap_or(Verdict::Disallowed)
    }

    pub fn verdict_for(&self, bor: &SpatialObject, bgt: &SpatialObject) -> Verdict {
        match (bor.bor_type(), bgt.bgt_type()) {
            (Some(b), Some(g)) => self.lookup(b, g),
            _ => Verdict::Disallowed,
        }
    }

    /// BGT classes mentioned anywhere in the table.
    pub fn referenced_bgt_classes(&self) -> &BTreeSet<BgtClass> {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::RuleRow;

    pub fn row(n: usize, category: &str, bor: &str, class: &str, bgt: &str) -> RuleRow {
        RuleRow {
            row: n,
            category: category.into(),
            bor_type: bor.into(),
            bgt_class: class.into(),
            bgt_type: bgt.into(),
            verdict: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::row;
    use super::*;

    fn bor(code: &str) -> BorType {
        BorType::new(AssetCategory::Green, code)
    }

    #[test]
    fn listed_pairs_allowed_rest_denied() {
        let table = RuleTable::from_rows(vec![
            row(2, "Groenobject", "Gras", "Begroeid terreindeel", "grasland overig"),
            row(3, "Groenobject", "Haag", "vegetatieobject", "haag"),
        ])
        .unwrap();
        assert_eq!(table.len(), 2);
        let gras = BgtType::new(BgtClass::BegroeidTerreindeel, "Grasland Overig");
        assert_eq!(table.lookup(&bor(" gras "), &gras), Verdict::Allowed);
        assert_eq!(table.lookup(&bor("heester"), &gras), Verdict::Disallowed);
        let other_category = BorType::new(AssetCategory::Terrain, "gras");
        assert_eq!(table.lookup(&other_category, &gras), Verdict::Disallowed);
        assert_eq!(
            table.referenced_bgt_classes().iter().copied().collect::<Vec<_>>(),
            vec![BgtClass::BegroeidTerreindeel, BgtClass::Vegetatieobject]
        );
    }

    #[test]
    fn explicit_verdict_column() {
        let mut denied = row(2, "Verhardingsobject", "Asfalt", "wegdeel", "rijbaan lokale weg");
        denied.verdict = Some("Nee".into());
        let table = RuleTable::from_rows(vec![denied]).unwrap();
        let bgt = BgtType::new(BgtClass::Wegdeel, "rijbaan lokale weg");
        assert_eq!(
            table.lookup(&BorType::new(AssetCategory::Paved, "asfalt"), &bgt),
            Verdict::Disallowed
        );
    }

    #[test]
    fn identical_duplicates_accepted() {
        let table = RuleTable::from_rows(vec![
            row(2, "Terreindeel", "Zand", "onbegroeid terreindeel", "zand"),
            row(3, "terreindeel", "ZAND", "onbegroeid_terreindeel", "Zand"),
        ])
        .unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn conflicting_duplicates_rejected() {
        let mut second = row(5, "Terreindeel", "Zand", "onbegroeid terreindeel", "zand");
        second.verdict = Some("no".into());
        let err = RuleTable::from_rows(vec![
            row(4, "Terreindeel", "Zand", "onbegroeid terreindeel", "zand"),
            second,
        ])
        .unwrap_err();
        assert!(matches!(err, ReconError::MalformedRuleTable { row: 5, .. }));
    }

    #[test]
    fn malformed_rows_name_the_row() {
        let cases = vec![
            (row(7, "Kunstwerk", "Brug", "wegdeel", "x"), "unknown category"),
            (row(8, "Groenobject", "Gras", "kasteel", "x"), "unknown BGT class"),
            (row(9, "Groenobject", " ", "wegdeel", "x"), "blank BOR type"),
            (row(10, "Groenobject", "Gras", "wegdeel", ""), "blank BGT type"),
        ];
        for (r, needle) in cases {
            let n = r.row;
            let err = RuleTable::from_rows(vec![r]).unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains(&format!("row {n}")), "{msg}");
            assert!(msg.contains(needle), "{msg}");
        }

        let mut bad = row(11, "Groenobject", "Gras", "wegdeel", "x");
        bad.verdict = Some("misschien".into());
        assert!(RuleTable::from_rows(vec![bad]).unwrap_err().to_string().contains("misschien"));
    }

    #[test]
    fn verdict_words() {
        for w in ["", "Allowed", "ja", "YES", "true", "1"] {
            assert_eq!(Verdict::parse(w), Some(Verdict::Allowed), "{w}");
        }
        for w in ["disallowed", "Nee", "no", "FALSE", "0"] {
            assert_eq!(Verdict::parse(w), Some(Verdict::Disallowed), "{w}");
        }
        assert_eq!(Verdict::parse("maybe"), None);
    }
}
