use std::collections::HashSet;

/// BOR identifiers already handled in an earlier run.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    ids: HashSet<String>,
}

impl ExclusionSet {
    /// Absent source yields the empty set.
    pub fn from_ids<I, S>(source: Option<I>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = source
            .into_iter()
            .flatten()
            .filter_map(|id| normalize_guid(id.as_ref()))
            .collect();
        Self { ids }
    }

    pub fn contains(&self, id: &str) -> bool {
        normalize_guid(id).is_some_and(|id| self.ids.contains(&id))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Trimmed identifier; blanks are dropped.
pub fn normalize_guid(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_source_is_empty() {
        let set = ExclusionSet::from_ids(None::<Vec<String>>);
        assert!(set.is_empty());
        assert!(!set.contains("{A}"));
    }

    #[test]
    fn ids_are_trimmed_and_blanks_dropped() {
        let set = ExclusionSet::from_ids(Some(vec![" {A} ", "", "   ", "{B}", "{A}"]));
        assert_eq!(set.len(), 2);
        assert!(set.contains("{A}"));
        assert!(set.contains("  {B}"));
        assert!(!set.contains(""));
    }
}
