//! CLI Exit Code Registry
//!
//! Single source of truth for `bgtcheck` exit codes. Scripts and schedulers
//! rely on them; never renumber.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Success (also: zero matches, output warnings w/o --strict) |
//! | 1    | General error (unspecified)                               |
//! | 2    | Usage error (bad arguments, no config given)              |
//! | 3    | Config file unreadable, unparseable or invalid            |
//! | 4    | Requested area not found in the district layer           |
//! | 5    | Rule table malformed                                      |
//! | 6    | Required source missing or unreadable                     |
//! | 7    | Output could not be written                               |
//! | 8    | Output validation problems with --strict                  |

/// Success.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
/// Raised by clap itself; listed here to reserve the code.
#[allow(dead_code)]
pub const EXIT_USAGE: u8 = 2;

/// Config cannot be read, parsed or validated.
pub const EXIT_CONFIG: u8 = 3;

/// `--area` / `run.areas` names a district that does not exist.
pub const EXIT_UNKNOWN_AREA: u8 = 4;

/// Control table row cannot be interpreted.
pub const EXIT_RULE_TABLE: u8 = 5;

/// BOR layer, BGT folder, district layer, control table or exclusion folder
/// cannot be opened.
pub const EXIT_SOURCE: u8 = 6;

/// Writing a result file failed.
pub const EXIT_OUTPUT: u8 = 7;

/// Output validator reported problems and `--strict` is set.
pub const EXIT_OUTPUT_INVALID: u8 = 8;

use bgtcheck_recon::ReconError;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_CONFIG,
        ReconError::UnknownArea { .. } => EXIT_UNKNOWN_AREA,
        ReconError::MalformedRuleTable { .. } => EXIT_RULE_TABLE,
        ReconError::Io(_) => EXIT_SOURCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_CONFIG,
            EXIT_UNKNOWN_AREA,
            EXIT_RULE_TABLE,
            EXIT_SOURCE,
            EXIT_OUTPUT,
            EXIT_OUTPUT_INVALID,
        ];
        let unique: std::collections::HashSet<u8> = codes.iter().copied().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn engine_errors_map_to_codes() {
        let err = ReconError::UnknownArea { names: vec!["Nord".into()], known: vec![] };
        assert_eq!(recon_exit_code(&err), EXIT_UNKNOWN_AREA);
        assert_eq!(recon_exit_code(&ReconError::malformed_rule(3, "x")), EXIT_RULE_TABLE);
        assert_eq!(recon_exit_code(&ReconError::ConfigParse("x".into())), EXIT_CONFIG);
    }
}
