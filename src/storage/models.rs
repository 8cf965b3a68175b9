//! Database models for firewall analysis storage.
//!
//! These models represent the structure of data in the host's database
//! tables. The Python host owns the schema and the transactions; the
//! core produces and consumes these records across the PyO3 boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Finding severity levels, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

/// Change types recorded in the policy history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
        }
    }
}

/// Recommendation lifecycle status. Only the host workflow moves a
/// recommendation out of `Open`; the analyzers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Open,
    Acknowledged,
    Resolved,
    Ignored,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Open => "open",
            RecommendationStatus::Acknowledged => "acknowledged",
            RecommendationStatus::Resolved => "resolved",
            RecommendationStatus::Ignored => "ignored",
        }
    }
}

/// Versioned accessor keys for the policy raw attribute map.
///
/// Optional vendor fields (display values, security profiles) live in
/// the raw map until they are normalized into columns. Analyzers go
/// through these constants, never ad hoc string keys.
pub mod raw_keys {
    pub const DESTINATION_DISPLAY: &str = "Destination";
    pub const SOURCE_DISPLAY: &str = "Source";
    pub const BYTES_DISPLAY: &str = "Bytes";
    pub const HIT_COUNT: &str = "Hit Count";
    pub const NAT: &str = "NAT";
    pub const INTERFACE_PAIR: &str = "Interface Pair";
    pub const STATUS: &str = "Status";
    pub const IPS_PROFILE: &str = "ips-sensor";
    pub const AV_PROFILE: &str = "av-profile";
    pub const SSL_INSPECTION: &str = "ssl-ssh-profile";
}

/// One firewall policy in a device baseline.
///
/// Identity is (device_id, vdom, policy_id), unique per baseline.
/// Mutated only by the diff engine on import; analyzers read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub device_id: String,
    pub vdom: String,
    pub policy_id: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: String,
    pub action: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub src_intf: Vec<String>,
    #[serde(default)]
    pub dst_intf: Vec<String>,
    #[serde(default)]
    pub src_addr: Vec<String>,
    #[serde(default)]
    pub dst_addr: Vec<String>,
    #[serde(default)]
    pub service: Vec<String>,
    #[serde(default)]
    pub nat: String,
    #[serde(default)]
    pub bytes: i64,
    #[serde(default)]
    pub hit_count: i64,
    /// Full vendor record, keyed per `raw_keys`. BTreeMap keeps the
    /// serialized form stable for history snapshots.
    #[serde(default)]
    pub raw: BTreeMap<String, Value>,
}

fn default_status() -> String {
    "enable".to_string()
}

impl PolicyRecord {
    pub fn is_enabled(&self) -> bool {
        !self.status.eq_ignore_ascii_case("disable")
    }

    pub fn is_accept(&self) -> bool {
        self.action.to_lowercase().contains("accept")
    }

    /// String value from the raw attribute map, if present and a string.
    pub fn raw_str(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(|v| v.as_str())
    }

    /// Display value for the destination column: the vendor export's
    /// `Destination` string when present, else the stored list joined.
    pub fn destination_display(&self) -> String {
        match self.raw_str(raw_keys::DESTINATION_DISPLAY) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => join_list(&self.dst_addr),
        }
    }
}

/// Comma-join a list field into the host's string search column form.
pub fn join_list(values: &[String]) -> String {
    values.join(", ")
}

/// Sorted-join used for diff equality: order-insensitive imports must
/// compare equal.
pub fn normalized_list(values: &[String]) -> String {
    let mut sorted: Vec<&str> = values.iter().map(|s| s.as_str()).collect();
    sorted.sort_unstable();
    sorted.join(", ")
}

/// A network interface on a device. Identity is (device_id, name);
/// policies reference it by name only (weak reference).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Interface {
    pub device_id: String,
    pub name: String,
    #[serde(default)]
    pub vdom: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type", default)]
    pub intf_type: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub vlan_id: Option<u32>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub allowaccess: Vec<String>,
}

/// A firewall address object. Identity is (device_id, vdom, name).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressObject {
    pub device_id: String,
    pub vdom: String,
    pub name: String,
    /// ipmask, iprange, fqdn, geography, group
    #[serde(rename = "type", default)]
    pub addr_type: String,
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default)]
    pub start_ip: Option<String>,
    #[serde(default)]
    pub end_ip: Option<String>,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub associated_interface: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

/// A firewall service object. Identity is (device_id, vdom, name).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceObject {
    pub device_id: String,
    pub vdom: String,
    pub name: String,
    /// TCP/UDP/SCTP, ICMP, IP, ALL
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub tcp_portrange: Option<String>,
    #[serde(default)]
    pub udp_portrange: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub icmptype: Option<i32>,
    #[serde(default)]
    pub icmpcode: Option<i32>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

/// A virtual domain. Identity is (device_id, name).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vdom {
    pub device_id: String,
    pub name: String,
    #[serde(default)]
    pub comments: Option<String>,
}

/// One normalized traffic log record. Immutable once created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub itime: Option<i64>,
    #[serde(default)]
    pub eventtime: Option<i64>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub devid: Option<String>,
    #[serde(default)]
    pub devname: Option<String>,
    #[serde(default)]
    pub vdom: Option<String>,
    #[serde(default)]
    pub log_id: Option<String>,
    #[serde(default)]
    pub log_type: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub src_intf: Option<String>,
    #[serde(default)]
    pub src_intf_role: Option<String>,
    #[serde(default)]
    pub src_ip: Option<String>,
    #[serde(default)]
    pub src_port: Option<i64>,
    #[serde(default)]
    pub src_country: Option<String>,
    #[serde(default)]
    pub src_city: Option<String>,
    #[serde(default)]
    pub src_mac: Option<String>,
    #[serde(default)]
    pub dst_intf: Option<String>,
    #[serde(default)]
    pub dst_intf_role: Option<String>,
    #[serde(default)]
    pub dst_ip: Option<String>,
    #[serde(default)]
    pub dst_port: Option<i64>,
    #[serde(default)]
    pub dst_country: Option<String>,
    #[serde(default)]
    pub dst_city: Option<String>,
    #[serde(default)]
    pub policy_id: Option<i64>,
    #[serde(default)]
    pub policy_uuid: Option<String>,
    #[serde(default)]
    pub policy_type: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub protocol: Option<i64>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub app_cat: Option<String>,
    #[serde(default)]
    pub sent_bytes: Option<i64>,
    #[serde(default)]
    pub rcvd_bytes: Option<i64>,
    #[serde(default)]
    pub sent_pkts: Option<i64>,
    #[serde(default)]
    pub rcvd_pkts: Option<i64>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub session_id: Option<i64>,
    #[serde(default)]
    pub nat_type: Option<String>,
    /// Original key-value map, retained for audit/display.
    #[serde(default)]
    pub raw_data: BTreeMap<String, String>,
}

/// Byte/connection totals for one IP in the session summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TalkerStat {
    pub ip: String,
    pub count: u64,
    pub bytes: u64,
}

/// Aggregate statistics for one import session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportStats {
    pub by_action: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub by_service: BTreeMap<String, u64>,
    pub by_vdom: BTreeMap<String, u64>,
    pub by_policy: BTreeMap<String, u64>,
    pub top_talkers: Vec<TalkerStat>,
    pub top_destinations: Vec<TalkerStat>,
}

/// Groups the records produced by one ingestion call. Summary fields
/// are filled once at completion and never rewritten afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportSession {
    pub id: String,
    pub device_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    pub log_count: u64,
    pub rejected_count: u64,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    pub stats: ImportStats,
}

/// Immutable audit row for one policy change. Created only by the diff
/// engine; never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub device_id: String,
    pub vdom: String,
    pub policy_id: String,
    #[serde(default)]
    pub policy_uuid: Option<String>,
    pub change_type: ChangeType,
    /// Field transitions plus the pre-change state for recovery.
    pub delta: Value,
    /// Full state immediately after the recorded change; for deletes,
    /// the last known state.
    pub snapshot: Value,
    #[serde(default)]
    pub import_session_id: Option<String>,
}

/// Structured replacement-policy suggestion attached to a finding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestedPolicy {
    pub src_addr: String,
    pub dst_addr: String,
    #[serde(default)]
    pub src_intf: Option<String>,
    #[serde(default)]
    pub dst_intf: Option<String>,
    pub service: String,
    pub action: String,
}

/// A security finding. The natural dedup key is
/// (device_id, category, title-or-related_policy_id); the deduplicator
/// guarantees at most one open row per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub device_id: String,
    pub category: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    #[serde(default)]
    pub related_policy_id: Option<String>,
    #[serde(default)]
    pub related_vdom: Option<String>,
    #[serde(default)]
    pub cli_remediation: Option<String>,
    #[serde(default)]
    pub suggested_policy: Option<SuggestedPolicy>,
    #[serde(default)]
    pub evidence: Value,
    #[serde(default)]
    pub affected_count: i64,
    pub status: RecommendationStatus,
}

impl Recommendation {
    pub fn new(device_id: &str, category: &str, severity: Severity, title: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            category: category.to_string(),
            severity,
            title: title.to_string(),
            description: String::new(),
            recommendation: String::new(),
            related_policy_id: None,
            related_vdom: None,
            cli_remediation: None,
            suggested_policy: None,
            evidence: Value::Null,
            affected_count: 0,
            status: RecommendationStatus::Open,
        }
    }
}

/// One row of the host's device registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    #[serde(default)]
    pub serial: Option<String>,
    /// HA peer serial; log batches from the passive member report it.
    #[serde(default)]
    pub secondary_serial: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_list_is_order_insensitive() {
        let a = vec!["port2".to_string(), "port1".to_string()];
        let b = vec!["port1".to_string(), "port2".to_string()];
        assert_eq!(normalized_list(&a), normalized_list(&b));
        assert_eq!(normalized_list(&a), "port1, port2");
    }

    #[test]
    fn test_destination_display_prefers_raw_map() {
        let mut policy = PolicyRecord {
            dst_addr: vec!["grp-dmz".to_string()],
            ..Default::default()
        };
        assert_eq!(policy.destination_display(), "grp-dmz");

        policy.raw.insert(
            raw_keys::DESTINATION_DISPLAY.to_string(),
            serde_json::json!("DMZ Servers (10.0.5.0/24)"),
        );
        assert_eq!(policy.destination_display(), "DMZ Servers (10.0.5.0/24)");
    }

    #[test]
    fn test_policy_status_helpers() {
        let p = PolicyRecord {
            action: "ACCEPT".to_string(),
            status: "enable".to_string(),
            ..Default::default()
        };
        assert!(p.is_enabled());
        assert!(p.is_accept());

        let q = PolicyRecord {
            action: "deny".to_string(),
            status: "DISABLE".to_string(),
            ..Default::default()
        };
        assert!(!q.is_enabled());
        assert!(!q.is_accept());
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(Severity::High.as_str(), "high");
    }
}
