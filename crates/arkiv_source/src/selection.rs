use arkiv_core::ArchiveError;
use regex::Regex;

/// Databases that are never archived, on top of configured exclusions.
pub const SYSTEM_DATABASES: [&str; 3] = ["mysql", "performance_schema", "information_schema"];

/// Default WHERE guard: selects nothing until the operator configures one.
pub const DEFAULT_WHERE: &str = "1=1 LIMIT 0";

/// Split a configured list on comma, semicolon or newline, dropping
/// whitespace and empty entries.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.replace(' ', "")
        .split([',', ';', '\n'])
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Anchored union over exclusion names: `^(a|b|c)$`.
pub fn exclusion_regex(names: &[String]) -> Result<Regex, ArchiveError> {
    let pattern = format!("^({})$", names.join("|"));
    Regex::new(&pattern)
        .map_err(|e| ArchiveError::Config(format!("invalid exclusion pattern '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_split_on_all_three_separators() {
        assert_eq!(
            split_list("a, b;c\nd"),
            vec!["a", "b", "c", "d"]
        );
        assert!(split_list("").is_empty());
        assert!(split_list(" , ;\n").is_empty());
    }

    #[test]
    fn exclusions_are_anchored() {
        let re = exclusion_regex(&[
            "nova".to_string(),
            "glance_.*".to_string(),
        ])
        .unwrap();
        assert!(re.is_match("nova"));
        assert!(re.is_match("glance_images"));
        assert!(!re.is_match("nova_api"));
        assert!(!re.is_match("xnova"));
    }

    #[test]
    fn empty_exclusion_list_matches_nothing_real() {
        let re = exclusion_regex(&[]).unwrap();
        assert!(!re.is_match("anything"));
        assert!(re.is_match(""));
    }

    #[test]
    fn invalid_patterns_become_config_errors() {
        assert!(exclusion_regex(&["(".to_string()]).is_err());
    }
}
