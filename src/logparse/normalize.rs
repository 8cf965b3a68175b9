//! Log record normalization.
//!
//! Maps vendor field names onto the canonical LogRecord field set with
//! soft numeric/timestamp coercion: an invalid value becomes absent,
//! it never rejects the record.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::storage::models::LogRecord;

/// Protocol number to name mapping.
const PROTOCOLS: &[(i64, &str)] = &[
    (1, "ICMP"),
    (6, "TCP"),
    (17, "UDP"),
    (47, "GRE"),
    (50, "ESP"),
    (51, "AH"),
    (58, "ICMPv6"),
    (89, "OSPF"),
    (132, "SCTP"),
];

/// Resolve a protocol number to its display name.
pub fn protocol_name(proto: i64) -> String {
    PROTOCOLS
        .iter()
        .find(|(num, _)| *num == proto)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("PROTO-{}", proto))
}

/// Safely convert a raw field to an integer.
pub fn to_int(value: Option<&String>) -> Option<i64> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Normalize one raw key-value entry to the canonical field set.
///
/// The original map is retained verbatim in `raw_data` for
/// audit/display.
pub fn normalize_entry(raw: &BTreeMap<String, String>) -> LogRecord {
    let mut rec = LogRecord {
        raw_data: raw.clone(),
        ..Default::default()
    };

    // Timestamps: `date` + `time` combined, soft failure.
    if let (Some(date), Some(time)) = (raw.get("date"), raw.get("time")) {
        let dt_str = format!("{} {}", date, time);
        if let Ok(dt) = NaiveDateTime::parse_from_str(&dt_str, "%Y-%m-%d %H:%M:%S") {
            rec.timestamp = Some(dt.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    }
    rec.itime = to_int(raw.get("itime"));
    rec.eventtime = to_int(raw.get("eventtime"));

    // Device info
    rec.devid = raw.get("devid").cloned();
    rec.devname = raw.get("devname").cloned();
    rec.vdom = raw.get("vd").or_else(|| raw.get("vdom")).cloned();

    // Log type
    rec.log_id = raw.get("logid").cloned();
    rec.log_type = raw.get("type").cloned();
    rec.subtype = raw.get("subtype").cloned();
    rec.level = raw.get("level").cloned();

    // Source
    rec.src_intf = raw.get("srcintf").cloned();
    rec.src_intf_role = raw.get("srcintfrole").cloned();
    rec.src_ip = raw.get("srcip").cloned();
    rec.src_port = to_int(raw.get("srcport"));
    rec.src_country = raw.get("srccountry").cloned();
    rec.src_city = raw.get("srccity").cloned();
    rec.src_mac = raw.get("srcmac").or_else(|| raw.get("mastersrcmac")).cloned();

    // Destination
    rec.dst_intf = raw.get("dstintf").cloned();
    rec.dst_intf_role = raw.get("dstintfrole").cloned();
    rec.dst_ip = raw.get("dstip").cloned();
    rec.dst_port = to_int(raw.get("dstport"));
    rec.dst_country = raw.get("dstcountry").cloned();
    rec.dst_city = raw.get("dstcity").cloned();

    // Policy (loose reference, may not resolve to a stored policy)
    rec.policy_id = to_int(raw.get("policyid"));
    rec.policy_uuid = raw.get("poluuid").cloned();
    rec.policy_type = raw.get("policytype").cloned();

    // Traffic
    rec.action = raw.get("action").cloned();
    rec.protocol = to_int(raw.get("proto"));
    rec.service = raw.get("service").cloned();
    rec.app = raw.get("app").cloned();
    rec.app_cat = raw.get("appcat").cloned();

    // Counters
    rec.sent_bytes = to_int(raw.get("sentbyte"));
    rec.rcvd_bytes = to_int(raw.get("rcvdbyte"));
    rec.sent_pkts = to_int(raw.get("sentpkt"));
    rec.rcvd_pkts = to_int(raw.get("rcvdpkt"));
    rec.duration = to_int(raw.get("duration"));

    // Session
    rec.session_id = to_int(raw.get("sessionid"));
    rec.nat_type = raw.get("trandisp").cloned();

    rec
}

/// Parse a vendor byte-count display string to a byte count.
///
/// Known-ambiguous heuristic, preserved on purpose: with a unit suffix
/// ("64.5 MB") the dot is a decimal point and commas are stripped;
/// without one ("44.728.514", "44,728,514") dots and commas are
/// thousands separators. Stored counters depend on this exact
/// behavior.
pub fn parse_bytes_str(value: &str) -> i64 {
    let s = value.trim();
    if s.is_empty() {
        return 0;
    }

    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() >= 2 {
        let unit_factor: i64 = match parts[1].to_uppercase().as_str() {
            "B" => 1,
            "KB" => 1024,
            "MB" => 1024 * 1024,
            "GB" => 1024 * 1024 * 1024,
            "TB" => 1024_i64.pow(4),
            "PB" => 1024_i64.pow(5),
            _ => 1,
        };
        let val: f64 = parts[0].replace(',', "").parse().unwrap_or(0.0);
        return (val * unit_factor as f64) as i64;
    }

    let cleaned: String = parts
        .first()
        .map(|p| p.chars().filter(|c| c.is_ascii_digit()).collect())
        .unwrap_or_default();
    cleaned.parse().unwrap_or(0)
}

/// Parse a hit-count display string ("44.728.514", "1,000") by
/// stripping everything that is not a digit.
pub fn parse_hit_count(value: &str) -> i64 {
    let cleaned: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    cleaned.parse().unwrap_or(0)
}

/// Normalize a vendor NAT field to the stored label.
pub fn nat_status_label(value: &serde_json::Value) -> String {
    let enabled = match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_i64() == Some(1),
        serde_json::Value::String(s) => matches!(
            s.to_lowercase().as_str(),
            "enabled" | "enable" | "snat" | "dnat" | "nat"
        ),
        _ => false,
    };
    if enabled {
        "Enabled".to_string()
    } else {
        "Disabled".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_normalize_core_fields() {
        let entry = raw(&[
            ("date", "2026-01-05"),
            ("time", "14:30:00"),
            ("devid", "FG200FT921904709"),
            ("vd", "root"),
            ("srcip", "10.0.0.5"),
            ("srcport", "51544"),
            ("dstip", "203.0.113.9"),
            ("dstport", "443"),
            ("policyid", "42"),
            ("action", "accept"),
            ("proto", "6"),
            ("service", "HTTPS"),
            ("sentbyte", "1024"),
            ("rcvdbyte", "4096"),
        ]);

        let rec = normalize_entry(&entry);
        assert_eq!(rec.timestamp.as_deref(), Some("2026-01-05T14:30:00"));
        assert_eq!(rec.devid.as_deref(), Some("FG200FT921904709"));
        assert_eq!(rec.vdom.as_deref(), Some("root"));
        assert_eq!(rec.src_port, Some(51544));
        assert_eq!(rec.dst_port, Some(443));
        assert_eq!(rec.policy_id, Some(42));
        assert_eq!(rec.protocol, Some(6));
        assert_eq!(rec.sent_bytes, Some(1024));
        assert_eq!(rec.raw_data.len(), 14);
    }

    #[test]
    fn test_soft_coercion_failures() {
        let entry = raw(&[
            ("date", "2026-01-05"),
            ("time", "not-a-time"),
            ("srcport", "abc"),
            ("policyid", "n/a"),
            ("action", "deny"),
        ]);
        let rec = normalize_entry(&entry);
        assert!(rec.timestamp.is_none());
        assert!(rec.src_port.is_none());
        assert!(rec.policy_id.is_none());
        assert_eq!(rec.action.as_deref(), Some("deny"));
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!(protocol_name(6), "TCP");
        assert_eq!(protocol_name(17), "UDP");
        assert_eq!(protocol_name(99), "PROTO-99");
    }

    #[test]
    fn test_bytes_heuristic_with_unit() {
        // Unit suffix: dot is a decimal point.
        assert_eq!(parse_bytes_str("1.5 GB"), 1610612736);
        assert_eq!(parse_bytes_str("64 KB"), 65536);
        assert_eq!(parse_bytes_str("1,500 MB"), 1500 * 1024 * 1024);
        assert_eq!(parse_bytes_str("0 B"), 0);
    }

    #[test]
    fn test_bytes_heuristic_without_unit() {
        // No unit: dots and commas are thousands separators.
        assert_eq!(parse_bytes_str("44.728.514"), 44728514);
        assert_eq!(parse_bytes_str("44,728,514"), 44728514);
        assert_eq!(parse_bytes_str("1024"), 1024);
        assert_eq!(parse_bytes_str(""), 0);
        assert_eq!(parse_bytes_str("garbage"), 0);
    }

    #[test]
    fn test_hit_count_parsing() {
        assert_eq!(parse_hit_count("44.728.514"), 44728514);
        assert_eq!(parse_hit_count("1,000"), 1000);
        assert_eq!(parse_hit_count(""), 0);
    }

    #[test]
    fn test_nat_status_label() {
        use serde_json::json;
        assert_eq!(nat_status_label(&json!("enable")), "Enabled");
        assert_eq!(nat_status_label(&json!("SNAT")), "Enabled");
        assert_eq!(nat_status_label(&json!(1)), "Enabled");
        assert_eq!(nat_status_label(&json!(true)), "Enabled");
        assert_eq!(nat_status_label(&json!("disable")), "Disabled");
        assert_eq!(nat_status_label(&json!(null)), "Disabled");
    }
}
