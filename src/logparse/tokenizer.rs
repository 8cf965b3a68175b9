//! Log line tokenizer.
//!
//! Parses FortiAnalyzer export lines: each line is a sequence of
//! `"field=value"` tokens where values may carry escaped embedded
//! quotes (`"field=""value"""`). The escaped form is matched first so
//! a value containing an internal quote is not truncated at it.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `"field=""value"""` - escaped-quoted values.
    static ref PAIR_ESCAPED: Regex = Regex::new(r#""([^"=]+)=""([^"]*)""""#).unwrap();

    /// `"field=value"` - plain numeric/simple values.
    static ref PAIR_SIMPLE: Regex = Regex::new(r#""([^"=]+)=([^",]+)""#).unwrap();
}

/// Parse a single export line into its raw key-value map.
///
/// Returns `None` for blank lines and lines with no recognizable
/// pairs. Empty values are skipped, matching the vendor export's habit
/// of emitting placeholders for unset fields.
pub fn parse_line(line: &str) -> Option<BTreeMap<String, String>> {
    if line.trim().is_empty() {
        return None;
    }

    let mut result = BTreeMap::new();

    // Escaped-quote pairs win; a simple-pattern match on the same
    // field would truncate at the value's internal quote.
    for caps in PAIR_ESCAPED.captures_iter(line) {
        let field = caps[1].trim().to_string();
        let value = caps[2].trim().to_string();
        if !field.is_empty() && !value.is_empty() {
            result.insert(field, value);
        }
    }

    for caps in PAIR_SIMPLE.captures_iter(line) {
        let field = caps[1].trim().to_string();
        if field.is_empty() || result.contains_key(&field) {
            continue;
        }
        let value = caps[2].trim().trim_matches('"').to_string();
        if !value.is_empty() {
            result.insert(field, value);
        }
    }

    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

/// Parse a full export: one entry per non-empty line.
pub fn parse_file(content: &str) -> Vec<BTreeMap<String, String>> {
    content.lines().filter_map(parse_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_pairs() {
        let line = r#""itime=1767622897","date=2026-01-05","srcip=10.0.0.5""#;
        let entry = parse_line(line).unwrap();
        assert_eq!(entry.get("itime").map(|s| s.as_str()), Some("1767622897"));
        assert_eq!(entry.get("date").map(|s| s.as_str()), Some("2026-01-05"));
        assert_eq!(entry.get("srcip").map(|s| s.as_str()), Some("10.0.0.5"));
    }

    #[test]
    fn test_escaped_pairs_preferred() {
        // devid carries the escaped-quote form; the simple pattern
        // would otherwise capture a truncated value.
        let line = r#""devid=""FG200FT921904709""","policyid=42""#;
        let entry = parse_line(line).unwrap();
        assert_eq!(
            entry.get("devid").map(|s| s.as_str()),
            Some("FG200FT921904709")
        );
        assert_eq!(entry.get("policyid").map(|s| s.as_str()), Some("42"));
    }

    #[test]
    fn test_escaped_value_with_spaces() {
        let line = r#""msg=""Connection reset by peer""","action=client-rst""#;
        let entry = parse_line(line).unwrap();
        assert_eq!(
            entry.get("msg").map(|s| s.as_str()),
            Some("Connection reset by peer")
        );
    }

    #[test]
    fn test_blank_and_garbage_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("no pairs here").is_none());
    }

    #[test]
    fn test_parse_file_skips_empty_lines() {
        let content = "\"a=1\"\n\n\"b=2\"\n";
        let entries = parse_file(content);
        assert_eq!(entries.len(), 2);
    }
}
