//! Policy reconciliation engine.
//!
//! Compares a stored policy baseline for one (device, vdom) scope
//! against a newly imported set and produces the added/modified/deleted
//! report plus one history row per change. The outcome is a single
//! value the host commits atomically: either the whole diff and its
//! history land, or none of it does.
//!
//! The operation is idempotent: re-applying the same incoming set
//! against the resulting baseline yields an empty diff.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

use crate::error::CoreError;
use crate::logging::structured::LogContext;
use crate::logparse::normalize::{nat_status_label, parse_bytes_str, parse_hit_count};
use crate::storage::models::{raw_keys, ChangeType, HistoryEntry, PolicyRecord};
use crate::storage::models::{join_list, normalized_list};

/// One policy record from a vendor export, normalized for comparison.
///
/// Accepts both the display-keyed JSON export form (`ID`, `From`,
/// `Source Address`, ...) and the config-parser form (`id`, `srcintf`,
/// `srcaddr`, ...).
#[derive(Debug, Clone)]
pub struct IncomingPolicy {
    pub policy_id: String,
    pub name: String,
    pub uuid: Option<String>,
    pub action: String,
    pub status: String,
    pub src_intf: Vec<String>,
    pub dst_intf: Vec<String>,
    pub src_addr: Vec<String>,
    pub dst_addr: Vec<String>,
    pub service: Vec<String>,
    pub nat: String,
    pub bytes: i64,
    pub hit_count: i64,
    pub raw: Value,
}

fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = value.get(*key) {
            match s {
                Value::String(s) if !s.is_empty() => return Some(s.clone()),
                Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}

fn list_field(value: &Value, keys: &[&str]) -> Vec<String> {
    for key in keys {
        match value.get(*key) {
            Some(Value::Array(arr)) if !arr.is_empty() => {
                return arr
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect();
            }
            Some(Value::String(s)) if !s.is_empty() => {
                return s.split(',').map(|p| p.trim().to_string()).collect();
            }
            _ => {}
        }
    }
    Vec::new()
}

impl IncomingPolicy {
    /// Normalize one vendor record. Missing fields take the vendor's
    /// defaults (action DENY, status enable).
    pub fn from_value(record: &Value) -> Self {
        let mut src_intf = list_field(record, &["From", "srcintf"]);
        let mut dst_intf = list_field(record, &["To", "dstintf"]);

        // Interface-pair fallback: some exports collapse the interface
        // columns into one "a, b" display string.
        if src_intf.is_empty() && dst_intf.is_empty() {
            if let Some(pair) = str_field(record, &[raw_keys::INTERFACE_PAIR]) {
                if let Some((src, dst)) = pair.split_once(',') {
                    src_intf = vec![src.trim().to_string()];
                    dst_intf = vec![dst.trim().to_string()];
                }
            }
        }

        let nat = record
            .get(raw_keys::NAT)
            .or_else(|| record.get("nat"))
            .map(nat_status_label)
            .unwrap_or_else(|| "Disabled".to_string());

        let bytes = str_field(record, &[raw_keys::BYTES_DISPLAY, "bytes"])
            .map(|s| parse_bytes_str(&s))
            .unwrap_or(0);
        let hit_count = str_field(record, &[raw_keys::HIT_COUNT, "hit_count"])
            .map(|s| parse_hit_count(&s))
            .unwrap_or(0);

        Self {
            policy_id: str_field(record, &["ID", "id", "policy_id"])
                .unwrap_or_else(|| "0".to_string()),
            name: str_field(record, &["Name", "Policy", "name"]).unwrap_or_default(),
            uuid: str_field(record, &["uuid", "UUID"]),
            action: str_field(record, &["Action", "action"]).unwrap_or_else(|| "DENY".to_string()),
            status: str_field(record, &[raw_keys::STATUS, "status"])
                .unwrap_or_else(|| "enable".to_string()),
            src_intf,
            dst_intf,
            src_addr: list_field(record, &["Source Address", "Source", "srcaddr"]),
            dst_addr: list_field(record, &["Destination Address", "Destination", "dstaddr"]),
            service: list_field(record, &["Service", "service"]),
            nat,
            bytes,
            hit_count,
            raw: record.clone(),
        }
    }

    /// Materialize this record as the stored baseline form.
    pub fn into_record(self, device_id: &str, vdom: &str) -> PolicyRecord {
        let raw = match self.raw {
            Value::Object(map) => map.into_iter().collect(),
            _ => Default::default(),
        };
        PolicyRecord {
            device_id: device_id.to_string(),
            vdom: vdom.to_string(),
            policy_id: self.policy_id,
            uuid: self.uuid,
            name: self.name,
            action: self.action,
            status: self.status,
            src_intf: self.src_intf,
            dst_intf: self.dst_intf,
            src_addr: self.src_addr,
            dst_addr: self.dst_addr,
            service: self.service,
            nat: self.nat,
            bytes: self.bytes,
            hit_count: self.hit_count,
            raw,
        }
    }
}

/// One added policy in a diff report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffAdded {
    pub policy_id: String,
    pub name: String,
    pub new_data: Value,
}

/// One modified policy in a diff report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffModified {
    pub policy_id: String,
    pub name: String,
    pub changes: Vec<String>,
    pub new_data: Value,
}

/// One deleted policy in a diff report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffDeleted {
    pub policy_id: String,
    pub name: String,
    pub uuid: Option<String>,
}

/// Full diff report for one reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffReport {
    pub added: Vec<DiffAdded>,
    pub modified: Vec<DiffModified>,
    pub deleted: Vec<DiffDeleted>,
    pub unchanged_count: usize,
}

/// Diff report plus the history rows it implies. The host commits the
/// whole outcome in one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub report: DiffReport,
    pub history: Vec<HistoryEntry>,
}

/// The fixed field set compared during reconciliation, with list
/// fields reduced to sorted joined strings so ordering differences in
/// the export do not register as changes.
fn comparison_fields(p: &PolicyRecord) -> Vec<(&'static str, String)> {
    vec![
        ("Src Intf", normalized_list(&p.src_intf)),
        ("Dst Intf", normalized_list(&p.dst_intf)),
        ("Src Addr", normalized_list(&p.src_addr)),
        ("Dst Addr", normalized_list(&p.dst_addr)),
        ("Service", normalized_list(&p.service)),
        ("Action", p.action.clone()),
        ("NAT", p.nat.clone()),
        ("Name", p.name.clone()),
    ]
}

fn incoming_fields(p: &IncomingPolicy) -> Vec<(&'static str, String)> {
    vec![
        ("Src Intf", normalized_list(&p.src_intf)),
        ("Dst Intf", normalized_list(&p.dst_intf)),
        ("Src Addr", normalized_list(&p.src_addr)),
        ("Dst Addr", normalized_list(&p.dst_addr)),
        ("Service", normalized_list(&p.service)),
        ("Action", p.action.clone()),
        ("NAT", p.nat.clone()),
        ("Name", p.name.clone()),
    ]
}

/// Reconcile a (device, vdom) baseline against an incoming policy set.
///
/// Index the baseline by policy_id; unseen incoming ids are added,
/// seen ids are field-compared (modified or unchanged), and baseline
/// ids absent from the import are deleted. Each change produces one
/// history row.
pub fn reconcile(
    device_id: &str,
    vdom: &str,
    baseline: &[PolicyRecord],
    incoming: &[Value],
    import_session_id: Option<&str>,
    ctx: &LogContext,
) -> Result<ReconcileOutcome, CoreError> {
    let mut baseline_map: HashMap<&str, &PolicyRecord> = HashMap::new();
    for policy in baseline {
        if baseline_map.insert(policy.policy_id.as_str(), policy).is_some() {
            return Err(CoreError::ReconciliationConflict {
                device_id: device_id.to_string(),
                vdom: vdom.to_string(),
                policy_id: policy.policy_id.clone(),
            });
        }
    }

    let mut report = DiffReport::default();
    let mut history: Vec<HistoryEntry> = Vec::new();
    let mut processed: HashSet<String> = HashSet::new();

    for record in incoming {
        let inc = IncomingPolicy::from_value(record);
        if !processed.insert(inc.policy_id.clone()) {
            return Err(CoreError::ReconciliationConflict {
                device_id: device_id.to_string(),
                vdom: vdom.to_string(),
                policy_id: inc.policy_id,
            });
        }

        match baseline_map.get(inc.policy_id.as_str()) {
            Some(current) => {
                let old_fields = comparison_fields(current);
                let new_fields = incoming_fields(&inc);

                let changes: Vec<String> = old_fields
                    .iter()
                    .zip(new_fields.iter())
                    .filter(|((_, old), (_, new))| old != new)
                    .map(|((label, old), (_, new))| {
                        format!("{}: '{}' → '{}'", label, old, new)
                    })
                    .collect();

                if changes.is_empty() {
                    report.unchanged_count += 1;
                } else {
                    log::info!(
                        "{} POLICY_MODIFIED policy_id={} changes={}",
                        ctx,
                        inc.policy_id,
                        changes.len()
                    );
                    history.push(HistoryEntry {
                        device_id: device_id.to_string(),
                        vdom: vdom.to_string(),
                        policy_id: inc.policy_id.clone(),
                        policy_uuid: current.uuid.clone(),
                        change_type: ChangeType::Modify,
                        delta: json!({
                            "changes": changes,
                            "previous": serde_json::to_value(current).unwrap_or(Value::Null),
                        }),
                        snapshot: record.clone(),
                        import_session_id: import_session_id.map(|s| s.to_string()),
                    });
                    report.modified.push(DiffModified {
                        policy_id: inc.policy_id.clone(),
                        name: inc.name.clone(),
                        changes,
                        new_data: record.clone(),
                    });
                }
            }
            None => {
                log::info!("{} POLICY_ADDED policy_id={}", ctx, inc.policy_id);
                history.push(HistoryEntry {
                    device_id: device_id.to_string(),
                    vdom: vdom.to_string(),
                    policy_id: inc.policy_id.clone(),
                    policy_uuid: inc.uuid.clone(),
                    change_type: ChangeType::Create,
                    delta: json!({ "reason": "new_in_import" }),
                    snapshot: record.clone(),
                    import_session_id: import_session_id.map(|s| s.to_string()),
                });
                report.added.push(DiffAdded {
                    policy_id: inc.policy_id.clone(),
                    name: inc.name.clone(),
                    new_data: record.clone(),
                });
            }
        }
    }

    // Any baseline id the import did not mention is gone.
    for policy in baseline {
        if !processed.contains(&policy.policy_id) {
            log::info!("{} POLICY_DELETED policy_id={}", ctx, policy.policy_id);
            history.push(HistoryEntry {
                device_id: device_id.to_string(),
                vdom: vdom.to_string(),
                policy_id: policy.policy_id.clone(),
                policy_uuid: policy.uuid.clone(),
                change_type: ChangeType::Delete,
                delta: json!({ "reason": "missing_in_import" }),
                snapshot: serde_json::to_value(policy).unwrap_or(Value::Null),
                import_session_id: import_session_id.map(|s| s.to_string()),
            });
            report.deleted.push(DiffDeleted {
                policy_id: policy.policy_id.clone(),
                name: policy.name.clone(),
                uuid: policy.uuid.clone(),
            });
        }
    }

    log::info!(
        "{} RECONCILE_COMPLETE added={} modified={} deleted={} unchanged={}",
        ctx,
        report.added.len(),
        report.modified.len(),
        report.deleted.len(),
        report.unchanged_count
    );

    Ok(ReconcileOutcome { report, history })
}

/// The baseline that results from committing a reconciliation: the
/// incoming set, materialized. Mirrors what the host's transaction
/// leaves in the policies table.
pub fn apply_incoming(device_id: &str, vdom: &str, incoming: &[Value]) -> Vec<PolicyRecord> {
    incoming
        .iter()
        .map(|r| IncomingPolicy::from_value(r).into_record(device_id, vdom))
        .collect()
}

/// Joined-string view of an incoming list field, for the host's search
/// columns.
pub fn search_column(values: &[String]) -> String {
    join_list(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> LogContext {
        LogContext::new("test-import")
    }

    fn sample_incoming() -> Value {
        json!({
            "ID": "1",
            "Name": "lan-out",
            "From": ["port1"],
            "To": ["wan1"],
            "Source Address": ["all"],
            "Destination Address": ["all"],
            "Service": ["ALL"],
            "Action": "accept",
            "NAT": "enable"
        })
    }

    #[test]
    fn test_empty_baseline_all_added() {
        let outcome = reconcile("dev1", "root", &[], &[sample_incoming()], None, &ctx()).unwrap();
        assert_eq!(outcome.report.added.len(), 1);
        assert_eq!(outcome.report.added[0].policy_id, "1");
        assert!(outcome.report.modified.is_empty());
        assert!(outcome.report.deleted.is_empty());
        assert_eq!(outcome.history.len(), 1);
        assert_eq!(outcome.history[0].change_type, ChangeType::Create);
    }

    #[test]
    fn test_idempotent_second_application() {
        let incoming = vec![sample_incoming()];
        let outcome = reconcile("dev1", "root", &[], &incoming, None, &ctx()).unwrap();
        assert_eq!(outcome.report.added.len(), 1);

        let baseline = apply_incoming("dev1", "root", &incoming);
        let second = reconcile("dev1", "root", &baseline, &incoming, None, &ctx()).unwrap();
        assert!(second.report.added.is_empty());
        assert!(second.report.modified.is_empty());
        assert!(second.report.deleted.is_empty());
        assert_eq!(second.report.unchanged_count, 1);
        assert!(second.history.is_empty());
    }

    #[test]
    fn test_modification_produces_delta_and_history() {
        let baseline = apply_incoming("dev1", "root", &[sample_incoming()]);

        let mut changed = sample_incoming();
        changed["Service"] = json!(["HTTPS"]);
        let outcome = reconcile("dev1", "root", &baseline, &[changed], None, &ctx()).unwrap();

        assert_eq!(outcome.report.modified.len(), 1);
        let modified = &outcome.report.modified[0];
        assert_eq!(modified.changes, vec!["Service: 'ALL' → 'HTTPS'"]);

        assert_eq!(outcome.history.len(), 1);
        let entry = &outcome.history[0];
        assert_eq!(entry.change_type, ChangeType::Modify);
        // Pre-change state embedded in the delta for recovery.
        assert_eq!(entry.delta["previous"]["service"], json!(["ALL"]));
        // Snapshot reflects the state after the change.
        assert_eq!(entry.snapshot["Service"], json!(["HTTPS"]));
    }

    #[test]
    fn test_list_order_is_not_a_change() {
        let baseline = apply_incoming("dev1", "root", &[sample_incoming()]);
        let mut reordered = sample_incoming();
        reordered["Source Address"] = json!(["all"]);
        reordered["From"] = json!(["port1"]);
        let outcome = reconcile("dev1", "root", &baseline, &[reordered], None, &ctx()).unwrap();
        assert_eq!(outcome.report.unchanged_count, 1);

        let two_intf = json!({
            "ID": "2", "From": ["port2", "port1"], "To": ["wan1"],
            "Source Address": ["a", "b"], "Destination Address": ["all"],
            "Service": ["ALL"], "Action": "accept"
        });
        let baseline2 = apply_incoming("dev1", "root", &[two_intf]);
        let swapped = json!({
            "ID": "2", "From": ["port1", "port2"], "To": ["wan1"],
            "Source Address": ["b", "a"], "Destination Address": ["all"],
            "Service": ["ALL"], "Action": "accept"
        });
        let outcome = reconcile("dev1", "root", &baseline2, &[swapped], None, &ctx()).unwrap();
        assert_eq!(outcome.report.unchanged_count, 1);
        assert!(outcome.report.modified.is_empty());
    }

    #[test]
    fn test_deletion_records_last_snapshot() {
        let baseline = apply_incoming("dev1", "root", &[sample_incoming()]);
        let outcome = reconcile("dev1", "root", &baseline, &[], None, &ctx()).unwrap();
        assert_eq!(outcome.report.deleted.len(), 1);
        assert_eq!(outcome.report.deleted[0].policy_id, "1");
        let entry = &outcome.history[0];
        assert_eq!(entry.change_type, ChangeType::Delete);
        assert_eq!(entry.snapshot["policy_id"], json!("1"));
    }

    #[test]
    fn test_duplicate_incoming_id_is_a_conflict() {
        let result = reconcile(
            "dev1",
            "root",
            &[],
            &[sample_incoming(), sample_incoming()],
            None,
            &ctx(),
        );
        match result {
            Err(CoreError::ReconciliationConflict { policy_id, .. }) => {
                assert_eq!(policy_id, "1")
            }
            other => panic!("expected conflict, got {:?}", other.map(|o| o.report)),
        }
    }

    #[test]
    fn test_interface_pair_fallback() {
        let record = json!({
            "ID": "7",
            "Interface Pair": "port3, wan2",
            "Source Address": ["all"],
            "Destination Address": ["all"],
            "Service": ["ALL"],
            "Action": "accept"
        });
        let inc = IncomingPolicy::from_value(&record);
        assert_eq!(inc.src_intf, vec!["port3"]);
        assert_eq!(inc.dst_intf, vec!["wan2"]);
    }

    #[test]
    fn test_byte_and_hit_counters_from_display_strings() {
        let record = json!({
            "ID": "9",
            "Action": "accept",
            "Bytes": "1.5 GB",
            "Hit Count": "44.728.514"
        });
        let inc = IncomingPolicy::from_value(&record);
        assert_eq!(inc.bytes, 1610612736);
        assert_eq!(inc.hit_count, 44728514);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn arb_policy_value() -> impl Strategy<Value = Value> {
        (
            1u32..200,
            prop::collection::vec("[a-z]{2,8}", 0..3),
            prop::collection::vec("[a-z0-9.]{2,10}", 0..3),
            prop_oneof![Just("accept"), Just("deny")],
            any::<bool>(),
        )
            .prop_map(|(id, intfs, addrs, action, nat)| {
                json!({
                    "ID": id.to_string(),
                    "From": intfs,
                    "Source Address": addrs,
                    "Service": ["ALL"],
                    "Action": action,
                    "NAT": if nat { "enable" } else { "disable" }
                })
            })
    }

    proptest! {
        /// reconcile(apply(reconcile(B, I)), I) is always a no-op.
        #[test]
        fn reconcile_is_idempotent(records in prop::collection::vec(arb_policy_value(), 0..20)) {
            // Dedup ids: duplicate ids are a conflict by contract.
            let mut seen = std::collections::HashSet::new();
            let incoming: Vec<Value> = records
                .into_iter()
                .filter(|r| seen.insert(r["ID"].as_str().unwrap().to_string()))
                .collect();

            let ctx = LogContext::new("prop");
            reconcile("dev", "root", &[], &incoming, None, &ctx).unwrap();

            let baseline = apply_incoming("dev", "root", &incoming);
            let second = reconcile("dev", "root", &baseline, &incoming, None, &ctx).unwrap();

            prop_assert!(second.report.added.is_empty());
            prop_assert!(second.report.modified.is_empty());
            prop_assert!(second.report.deleted.is_empty());
            prop_assert_eq!(second.report.unchanged_count, incoming.len());
            prop_assert!(second.history.is_empty());
        }
    }
}
