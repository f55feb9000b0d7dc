//! "Did you mean" suggestions for unknown parameter names.

use crate::{all_config_paths, split_path};

/// Highest edit distance still considered a typo.
const MAX_EDIT_DISTANCE: usize = 2;

/// Lowest Jaro-Winkler similarity still considered a typo.
const MIN_SIMILARITY: f64 = 0.92;

/// Suggest the registered path closest to an unknown `Section.Attribute`.
///
/// Candidates in the same section are preferred. An attribute that exists
/// verbatim in another section (a parameter put in the wrong section) is
/// suggested as well.
pub fn suggest(unknown: &str) -> Option<&'static str> {
    let (section, attr) = split_path(unknown)?;
    let attr_lower = attr.to_lowercase();

    let mut best: Option<(usize, f64, &'static str)> = None;
    for candidate in all_config_paths() {
        let Some((cand_section, cand_attr)) = split_path(candidate) else {
            continue;
        };

        if cand_attr == attr && !cand_section.eq_ignore_ascii_case(section) {
            return Some(candidate);
        }
        if !cand_section.eq_ignore_ascii_case(section) {
            continue;
        }

        let cand_lower = cand_attr.to_lowercase();
        let distance = strsim::damerau_levenshtein(&attr_lower, &cand_lower);
        let similarity = strsim::jaro_winkler(&attr_lower, &cand_lower);
        if distance > MAX_EDIT_DISTANCE && similarity < MIN_SIMILARITY {
            continue;
        }

        let better = match best {
            None => true,
            Some((d, s, _)) => distance < d || (distance == d && similarity > s),
        };
        if better {
            best = Some((distance, similarity, candidate));
        }
    }

    best.map(|(_, _, candidate)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_typo() {
        assert_eq!(suggest("Data.splittng"), Some("Data.splitting"));
        assert_eq!(suggest("Site.storagSite"), Some("Site.storageSite"));
    }

    #[test]
    fn test_case_difference() {
        assert_eq!(suggest("General.transferlogs"), Some("General.transferLogs"));
    }

    #[test]
    fn test_wrong_section() {
        assert_eq!(suggest("Data.storageSite"), Some("Site.storageSite"));
    }

    #[test]
    fn test_section_case_typo() {
        assert_eq!(suggest("data.unitsPerJob"), Some("Data.unitsPerJob"));
    }

    #[test]
    fn test_no_suggestion_for_garbage() {
        assert_eq!(suggest("Data.qqqqqqqqqqqq"), None);
        assert_eq!(suggest("nodot"), None);
    }
}
