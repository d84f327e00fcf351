use thiserror::Error;

/// Fatal engine errors. Anything raised here aborts the run before matching.
///
/// Per-object data errors are not errors at this level: they are collected
/// as [`crate::model::Problem`]s and the run continues.
#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// Config validation error (bad threshold, unknown category, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),

    /// One or more requested areas have no matching district.
    #[error("unknown area(s): {} (known: {})", names.join(", "), known.join(", "))]
    UnknownArea { names: Vec<String>, known: Vec<String> },

    /// A rule table row cannot be interpreted.
    #[error("malformed rule table, row {row}: {reason}")]
    MalformedRuleTable { row: usize, reason: String },

    /// IO error (source file unreadable, etc.).
    #[error("IO error: {0}")]
    Io(String),
}

impl ReconError {
    pub fn malformed_rule(row: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRuleTable { row, reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_area_lists_names() {
        let err = ReconError::UnknownArea {
            names: vec!["Nord".into(), "Zuyd".into()],
            known: vec!["Noord".into(), "Zuid".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Nord, Zuyd"));
        assert!(msg.contains("known: Noord, Zuid"));
    }

    #[test]
    fn malformed_rule_mentions_row() {
        let err = ReconError::malformed_rule(7, "unknown BGT class 'kasteel'");
        assert_eq!(
            err.to_string(),
            "malformed rule table, row 7: unknown BGT class 'kasteel'"
        );
    }
}
