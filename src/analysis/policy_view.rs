//! Analyzer input view over stored policies.
//!
//! The host hands the analyzers policy rows as JSON. Depending on the
//! store's capabilities the list fields arrive as resolved name lists
//! (object-mapping tables present) or as the legacy comma-joined text
//! columns; both forms normalize into the same `PolicyRecord`.
//!
//! Also home of the wildcard predicate shared by all analyzers.

use serde_json::Value;

use crate::diff::engine::IncomingPolicy;
use crate::storage::capabilities::StoreCapabilities;
use crate::storage::models::PolicyRecord;

/// Tokens treated as "open" in policy fields.
const WILDCARD_TOKENS: &[&str] = &["all", "any", "0.0.0.0/0", "0.0.0.0 0.0.0.0", "all_icmp"];

/// True if a single value is a wildcard token.
pub fn is_wildcard_token(value: &str) -> bool {
    let v = value.to_lowercase();
    let v = v.trim();
    WILDCARD_TOKENS.contains(&v)
}

/// True if any value in a list field is open.
pub fn has_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| is_wildcard_token(v))
}

/// Service fields additionally treat the `always` schedule token as
/// open when it leaks into the service list.
pub fn service_open(values: &[String]) -> bool {
    has_wildcard(values) || values.iter().any(|v| v.to_lowercase().trim() == "always")
}

/// Normalize one host policy row into a `PolicyRecord`.
///
/// Accepts list fields as arrays or comma-joined strings, and both the
/// vendor display keys and the normalized column names.
pub fn record_from_row(row: &Value) -> PolicyRecord {
    let device_id = row
        .get("device_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let vdom = row
        .get("vdom")
        .and_then(|v| v.as_str())
        .unwrap_or("root")
        .to_string();

    IncomingPolicy::from_value(row).into_record(&device_id, &vdom)
}

/// Normalize all host policy rows for one analysis call.
///
/// `caps` records which store path produced the rows; with mapping
/// tables absent, list fields come from the joined text columns and
/// unresolved object names are carried through as plain strings.
pub fn records_from_rows(rows: &[Value], caps: &StoreCapabilities) -> Vec<PolicyRecord> {
    if !caps.object_mappings {
        log::debug!(
            "POLICY_VIEW_FALLBACK reason=no_object_mappings rows={}",
            rows.len()
        );
    }
    rows.iter().map(record_from_row).collect()
}
