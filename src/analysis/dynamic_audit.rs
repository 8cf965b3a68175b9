//! Traffic-correlated dynamic audit.
//!
//! Correlates stored policies with aggregated log flows: zombie-policy
//! detection, least-privilege policy synthesis and noisy-deny
//! detection. The analyzer consumes grouped aggregation rows produced
//! by the host's store (see `storage::queries`); it never sees the raw
//! log table.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;

use crate::analysis::policy_view::{has_wildcard, service_open};
use crate::analysis::static_audit::wrap_vdom_cli;
use crate::storage::models::{
    PolicyRecord, Recommendation, Severity, SuggestedPolicy,
};

/// Per-policy detail findings above the summarization threshold fold
/// into a single batch finding.
const ZOMBIE_DETAIL_LIMIT: usize = 10;
/// Generated batch remediation covers at most this many policies.
const ZOMBIE_BATCH_CAP: usize = 50;
/// Top observed flows considered per over-permissive policy.
const FLOWS_PER_POLICY: usize = 20;
/// Replacement rules generated per detailed finding.
const REPLACEMENT_RULES: usize = 5;
/// Noisy-deny findings emitted per run.
const NOISY_DENY_LIMIT: usize = 10;

/// Explicit audit parameters. The caller bounds the lookback window
/// and the log volume considered; there are no hidden constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicAuditParams {
    pub lookback_days: u32,
    pub max_log_rows: u64,
    pub min_deny_occurrences: u64,
    pub max_detailed_findings: usize,
}

impl Default for DynamicAuditParams {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            max_log_rows: 50_000,
            min_deny_occurrences: 100,
            max_detailed_findings: 20,
        }
    }
}

/// Hit count for one policy within the lookback window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyHits {
    pub policy_id: String,
    pub hits: u64,
}

/// One aggregated flow group: (source, destination, service/port),
/// with its occurrence count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowAggregate {
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub src_ip: Option<String>,
    #[serde(default)]
    pub dst_ip: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub dst_port: Option<i64>,
    #[serde(default)]
    pub src_intf: Option<String>,
    #[serde(default)]
    pub dst_intf: Option<String>,
    #[serde(default)]
    pub vdom: Option<String>,
    pub count: u64,
}

impl FlowAggregate {
    /// Display label for the flow's service: name, else TCP/port,
    /// else ALL.
    pub fn service_label(&self) -> String {
        match (&self.service, self.dst_port) {
            (Some(s), _) if !s.is_empty() && s != "Unknown" => s.clone(),
            (_, Some(port)) => format!("TCP/{}", port),
            _ => "ALL".to_string(),
        }
    }
}

/// Aggregated log inputs for one device's dynamic audit, produced by
/// the host executing the grouped queries from `storage::queries`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogAggregates {
    /// Distinct policy hit counts within the window.
    #[serde(default)]
    pub policy_hits: Vec<PolicyHits>,
    /// Accepted traffic grouped by (policy, src, dst, service/port).
    #[serde(default)]
    pub accepted_flows: Vec<FlowAggregate>,
    /// Denied traffic grouped by (src, dst, service/port), already
    /// filtered by the having-threshold.
    #[serde(default)]
    pub denied_flows: Vec<FlowAggregate>,
}

/// Run the full dynamic audit for one device.
pub fn analyze_device(
    device_id: &str,
    policies: &[PolicyRecord],
    aggregates: &LogAggregates,
    params: &DynamicAuditParams,
) -> Vec<Recommendation> {
    let mut findings = Vec::new();
    findings.extend(detect_zombies(device_id, policies, aggregates, params));
    findings.extend(analyze_least_privilege(device_id, policies, aggregates, params));
    findings.extend(analyze_noisy_denies(device_id, aggregates, params));
    log::info!(
        "DYNAMIC_AUDIT_COMPLETE device={} findings={}",
        device_id,
        findings.len()
    );
    findings
}

/// Enabled policies with zero matching log entries in the window.
///
/// Up to `ZOMBIE_DETAIL_LIMIT` candidates get one finding each; above
/// that a single summarized finding carries a batch script covering at
/// most `ZOMBIE_BATCH_CAP` policies, with the remainder noted in the
/// description. Keeps generated remediation bounded on large fleets.
pub fn detect_zombies(
    device_id: &str,
    policies: &[PolicyRecord],
    aggregates: &LogAggregates,
    params: &DynamicAuditParams,
) -> Vec<Recommendation> {
    let active_ids: HashSet<&str> = aggregates
        .policy_hits
        .iter()
        .filter(|h| h.hits > 0)
        .map(|h| h.policy_id.as_str())
        .collect();

    let zombies: Vec<&PolicyRecord> = policies
        .iter()
        .filter(|p| p.is_enabled() && !active_ids.contains(p.policy_id.as_str()))
        .collect();

    if zombies.is_empty() {
        return Vec::new();
    }

    log::info!(
        "ZOMBIE_SCAN device={} candidates={} window_days={}",
        device_id,
        zombies.len(),
        params.lookback_days
    );

    if zombies.len() <= ZOMBIE_DETAIL_LIMIT {
        return zombies
            .iter()
            .map(|p| {
                let mut rec = Recommendation::new(
                    device_id,
                    "optimization",
                    Severity::Low,
                    &format!("Zombie policy detected: {}", p.policy_id),
                );
                rec.description = format!(
                    "Policy {} (\"{}\") has registered no traffic in the last {} days.",
                    p.policy_id, p.name, params.lookback_days
                );
                rec.recommendation =
                    "Consider disabling or removing this policy if it is no longer needed."
                        .to_string();
                rec.related_policy_id = Some(p.policy_id.clone());
                rec.related_vdom = Some(p.vdom.clone());
                rec.affected_count = 1;
                rec.cli_remediation = Some(wrap_vdom_cli(
                    &format!(
                        "config firewall policy\n    edit {}\n    set status disable\n    set comments \"DISABLED - Unused for {} days\"\n    next\nend",
                        p.policy_id, params.lookback_days
                    ),
                    &p.vdom,
                ));
                rec
            })
            .collect();
    }

    let scripted = &zombies[..zombies.len().min(ZOMBIE_BATCH_CAP)];
    let mut script = String::from("config firewall policy\n");
    for p in scripted {
        script.push_str(&format!(
            "    edit {}\n    set status disable\n    set comments \"DISABLED - Unused for {} days\"\n    next\n",
            p.policy_id, params.lookback_days
        ));
    }
    script.push_str("end");

    let remainder = zombies.len().saturating_sub(ZOMBIE_BATCH_CAP);
    let mut description = format!(
        "{} enabled policies registered no traffic in the last {} days.",
        zombies.len(),
        params.lookback_days
    );
    if remainder > 0 {
        description.push_str(&format!(
            " The batch script covers the first {}; {} more require a follow-up run.",
            ZOMBIE_BATCH_CAP, remainder
        ));
    }

    let mut rec = Recommendation::new(
        device_id,
        "optimization",
        Severity::Low,
        &format!("Zombie policies detected: {} unused", zombies.len()),
    );
    rec.description = description;
    rec.recommendation =
        "Review the listed policies and disable those that are no longer needed.".to_string();
    rec.affected_count = zombies.len() as i64;
    rec.cli_remediation = Some(script);
    rec.evidence = json!({
        "policy_ids": zombies.iter().map(|p| p.policy_id.clone()).collect::<Vec<_>>(),
        "window_days": params.lookback_days,
    });
    vec![rec]
}

/// Least-privilege synthesis over enabled, wildcard-matching, accepting
/// policies: observed flows become narrow replacement rules.
pub fn analyze_least_privilege(
    device_id: &str,
    policies: &[PolicyRecord],
    aggregates: &LogAggregates,
    params: &DynamicAuditParams,
) -> Vec<Recommendation> {
    let mut findings = Vec::new();
    let mut detailed = 0usize;
    let mut overflow_ids: Vec<String> = Vec::new();

    for policy in policies {
        if !policy.is_enabled() || !policy.is_accept() {
            continue;
        }
        let open = service_open(&policy.service)
            || (has_wildcard(&policy.src_addr) && has_wildcard(&policy.dst_addr));
        if !open {
            continue;
        }

        let mut flows: Vec<&FlowAggregate> = aggregates
            .accepted_flows
            .iter()
            .filter(|f| f.policy_id.as_deref() == Some(policy.policy_id.as_str()))
            .collect();
        flows.sort_by(|a, b| b.count.cmp(&a.count));
        flows.truncate(FLOWS_PER_POLICY);

        if flows.is_empty() {
            let mut rec = Recommendation::new(
                device_id,
                "optimize_policy",
                Severity::Low,
                &format!("Unused open policy: {}", policy.policy_id),
            );
            rec.description = format!(
                "Policy {} (\"{}\") permits broad traffic but produced no logs in {} days.",
                policy.policy_id, policy.name, params.lookback_days
            );
            rec.recommendation =
                "Disable or remove the policy if it is not needed.".to_string();
            rec.related_policy_id = Some(policy.policy_id.clone());
            rec.related_vdom = Some(policy.vdom.clone());
            rec.affected_count = 1;
            rec.cli_remediation = Some(wrap_vdom_cli(
                &format!(
                    "config firewall policy\n    edit {}\n    set status disable\n    set comments \"Disabled by audit: unused open policy\"\n    next\nend",
                    policy.policy_id
                ),
                &policy.vdom,
            ));
            findings.push(rec);
            continue;
        }

        if detailed >= params.max_detailed_findings {
            overflow_ids.push(policy.policy_id.clone());
            continue;
        }
        detailed += 1;
        findings.push(synthesize_replacement(policy, &flows, params));
    }

    // Everything past the detail cap goes into one overflow finding so
    // a single run never emits unbounded remediation volume.
    if !overflow_ids.is_empty() {
        let mut rec = Recommendation::new(
            device_id,
            "optimize_policy",
            Severity::Critical,
            &format!(
                "Open policies exceeding audit detail cap: {}",
                overflow_ids.len()
            ),
        );
        rec.description = format!(
            "{} additional over-permissive policies matched live traffic but exceeded the \
             per-run detail limit of {}. Policy ids: {}.",
            overflow_ids.len(),
            params.max_detailed_findings,
            overflow_ids.join(", ")
        );
        rec.recommendation =
            "Triage these policies manually or re-run the audit scoped to them.".to_string();
        rec.affected_count = overflow_ids.len() as i64;
        rec.evidence = json!({ "policy_ids": overflow_ids });
        findings.push(rec);
    }

    findings
}

/// Build the detailed least-privilege finding for one policy: up to
/// `REPLACEMENT_RULES` narrow rules from the top flows, a directive to
/// disable the original, and the top flow as the structured
/// suggestion.
fn synthesize_replacement(
    policy: &PolicyRecord,
    flows: &[&FlowAggregate],
    params: &DynamicAuditParams,
) -> Recommendation {
    let mut cli = String::from("config firewall policy\n");
    for (idx, flow) in flows.iter().take(REPLACEMENT_RULES).enumerate() {
        let src = flow.src_ip.as_deref().unwrap_or("all");
        let dst = flow.dst_ip.as_deref().unwrap_or("all");
        let svc = flow.service_label();
        cli.push_str(&format!(
            "    edit 0\n        set name \"ZT_{pid}_Rule{n}\"\n        set srcintf \"{srcintf}\"\n        set dstintf \"{dstintf}\"\n        set srcaddr \"{src}/32\"\n        set dstaddr \"{dst}/32\"\n        set service \"{svc}\"\n        set schedule \"always\"\n        set action accept\n        set logtraffic all\n        set comments \"Extracted from Policy {pid}\"\n    next\n",
            pid = policy.policy_id,
            n = idx + 1,
            srcintf = flow
                .src_intf
                .as_deref()
                .or_else(|| policy.src_intf.first().map(|s| s.as_str()))
                .unwrap_or("any"),
            dstintf = flow
                .dst_intf
                .as_deref()
                .or_else(|| policy.dst_intf.first().map(|s| s.as_str()))
                .unwrap_or("any"),
            src = src,
            dst = dst,
            svc = svc,
        ));
    }
    cli.push_str(&format!(
        "    edit {}\n        set status disable\n        set comments \"Disabled: replaced by specific ZT rules\"\n    next\nend",
        policy.policy_id
    ));

    let top = flows[0];
    let summary: Vec<String> = flows
        .iter()
        .take(3)
        .map(|f| {
            format!(
                "{} -> {} ({})",
                f.src_ip.as_deref().unwrap_or("all"),
                f.dst_ip.as_deref().unwrap_or("all"),
                f.service_label()
            )
        })
        .collect();

    let mut rec = Recommendation::new(
        &policy.device_id,
        "optimize_policy",
        Severity::High,
        &format!("Restrict open policy: {}", policy.policy_id),
    );
    rec.description = format!(
        "Policy {} (\"{}\") is over-permissive; {} distinct flows observed in {} days.",
        policy.policy_id,
        policy.name,
        flows.len(),
        params.lookback_days
    );
    rec.recommendation = format!(
        "Replace policy {} with specific rules for the observed flows. Top flows: {}.",
        policy.policy_id,
        summary.join(", ")
    );
    rec.related_policy_id = Some(policy.policy_id.clone());
    rec.related_vdom = Some(policy.vdom.clone());
    rec.affected_count = flows.iter().map(|f| f.count as i64).sum();
    rec.cli_remediation = Some(wrap_vdom_cli(&cli, &policy.vdom));
    rec.suggested_policy = Some(SuggestedPolicy {
        src_addr: top.src_ip.clone().unwrap_or_else(|| "all".to_string()),
        dst_addr: top.dst_ip.clone().unwrap_or_else(|| "all".to_string()),
        src_intf: top.src_intf.clone(),
        dst_intf: top.dst_intf.clone(),
        service: top.service_label(),
        action: "ACCEPT".to_string(),
    });
    rec.evidence = json!({
        "flows": flows
            .iter()
            .map(|f| json!({
                "src_ip": f.src_ip,
                "dst_ip": f.dst_ip,
                "service": f.service_label(),
                "count": f.count,
            }))
            .collect::<Vec<_>>(),
    });
    rec
}

/// High-volume denied traffic patterns. Advisory only: blocked traffic
/// intent is unknown, so no remediation is generated.
pub fn analyze_noisy_denies(
    device_id: &str,
    aggregates: &LogAggregates,
    params: &DynamicAuditParams,
) -> Vec<Recommendation> {
    let mut groups: Vec<&FlowAggregate> = aggregates
        .denied_flows
        .iter()
        .filter(|f| f.count > params.min_deny_occurrences)
        .collect();
    groups.sort_by(|a, b| b.count.cmp(&a.count));
    groups.truncate(NOISY_DENY_LIMIT);

    groups
        .into_iter()
        .map(|flow| {
            let src = flow.src_ip.as_deref().unwrap_or("unknown");
            let dst = flow.dst_ip.as_deref().unwrap_or("unknown");
            let svc = flow.service_label();
            let mut rec = Recommendation::new(
                device_id,
                "traffic",
                Severity::Low,
                &format!("Frequent blocked traffic: {} -> {} ({})", src, dst, svc),
            );
            rec.description = format!(
                "{} blocks recorded from {} to {} on {} within {} days.",
                flow.count, src, dst, svc, params.lookback_days
            );
            rec.recommendation =
                "Verify whether this traffic is legitimate and needs an access policy, \
                 or whether it is an unauthorized access attempt."
                    .to_string();
            rec.related_vdom = flow.vdom.clone();
            rec.affected_count = flow.count as i64;
            rec.evidence = json!({
                "src_ip": flow.src_ip,
                "dst_ip": flow.dst_ip,
                "service": svc,
                "count": flow.count,
            });
            rec
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_policy(id: &str) -> PolicyRecord {
        PolicyRecord {
            device_id: "dev1".to_string(),
            vdom: "root".to_string(),
            policy_id: id.to_string(),
            name: format!("policy-{}", id),
            action: "accept".to_string(),
            status: "enable".to_string(),
            src_intf: vec!["port1".to_string()],
            dst_intf: vec!["wan1".to_string()],
            src_addr: vec!["all".to_string()],
            dst_addr: vec!["all".to_string()],
            service: vec!["ALL".to_string()],
            ..Default::default()
        }
    }

    fn narrow_policy(id: &str) -> PolicyRecord {
        let mut p = open_policy(id);
        p.src_addr = vec!["lan-net".to_string()];
        p.dst_addr = vec!["dc-net".to_string()];
        p.service = vec!["HTTPS".to_string()];
        p
    }

    fn hits(pairs: &[(&str, u64)]) -> Vec<PolicyHits> {
        pairs
            .iter()
            .map(|(id, hits)| PolicyHits {
                policy_id: id.to_string(),
                hits: *hits,
            })
            .collect()
    }

    fn flow(policy_id: &str, src: &str, dst: &str, svc: &str, count: u64) -> FlowAggregate {
        FlowAggregate {
            policy_id: Some(policy_id.to_string()),
            src_ip: Some(src.to_string()),
            dst_ip: Some(dst.to_string()),
            service: Some(svc.to_string()),
            count,
            ..Default::default()
        }
    }

    #[test]
    fn test_zombie_flagged_only_at_zero_hits() {
        let policies = vec![narrow_policy("1"), narrow_policy("2")];
        let aggregates = LogAggregates {
            policy_hits: hits(&[("1", 1)]),
            ..Default::default()
        };
        let findings =
            detect_zombies("dev1", &policies, &aggregates, &DynamicAuditParams::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].related_policy_id.as_deref(), Some("2"));
        assert_eq!(findings[0].severity, Severity::Low);
    }

    #[test]
    fn test_zombie_summarization_above_limit() {
        let policies: Vec<PolicyRecord> =
            (1..=60).map(|i| narrow_policy(&i.to_string())).collect();
        let aggregates = LogAggregates::default();
        let findings =
            detect_zombies("dev1", &policies, &aggregates, &DynamicAuditParams::default());

        assert_eq!(findings.len(), 1);
        let rec = &findings[0];
        assert_eq!(rec.affected_count, 60);
        let script = rec.cli_remediation.as_deref().unwrap();
        // Batch script covers the first 50 candidates only.
        assert_eq!(script.matches("set status disable").count(), 50);
        assert!(rec.description.contains("10 more"));
    }

    #[test]
    fn test_least_privilege_synthesis() {
        let policies = vec![open_policy("5")];
        let aggregates = LogAggregates {
            policy_hits: hits(&[("5", 100)]),
            accepted_flows: (0..8)
                .map(|i| flow("5", &format!("10.0.0.{}", i), "203.0.113.9", "HTTPS", 100 - i))
                .collect(),
            ..Default::default()
        };
        let findings = analyze_least_privilege(
            "dev1",
            &policies,
            &aggregates,
            &DynamicAuditParams::default(),
        );
        assert_eq!(findings.len(), 1);
        let rec = &findings[0];
        assert_eq!(rec.severity, Severity::High);
        let cli = rec.cli_remediation.as_deref().unwrap();
        // At most 5 replacement rules plus the disable directive.
        assert_eq!(cli.matches("edit 0").count(), 5);
        assert!(cli.contains("edit 5\n        set status disable"));
        let suggested = rec.suggested_policy.as_ref().unwrap();
        assert_eq!(suggested.src_addr, "10.0.0.0");
        assert_eq!(suggested.service, "HTTPS");
    }

    #[test]
    fn test_least_privilege_zero_flows_suggests_disable() {
        let policies = vec![open_policy("5")];
        let findings = analyze_least_privilege(
            "dev1",
            &policies,
            &LogAggregates::default(),
            &DynamicAuditParams::default(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Low);
        assert!(findings[0].title.contains("Unused open policy"));
    }

    #[test]
    fn test_least_privilege_overflow_finding() {
        let policies: Vec<PolicyRecord> =
            (1..=25).map(|i| open_policy(&i.to_string())).collect();
        let accepted_flows = (1..=25)
            .map(|i| flow(&i.to_string(), "10.0.0.1", "10.0.1.1", "SSH", 50))
            .collect();
        let aggregates = LogAggregates {
            accepted_flows,
            ..Default::default()
        };
        let findings = analyze_least_privilege(
            "dev1",
            &policies,
            &aggregates,
            &DynamicAuditParams::default(),
        );
        // 20 detailed findings + 1 overflow.
        assert_eq!(findings.len(), 21);
        let overflow = findings.last().unwrap();
        assert_eq!(overflow.severity, Severity::Critical);
        assert_eq!(overflow.affected_count, 5);
        assert!(overflow.description.contains("21, 22, 23, 24, 25"));
    }

    #[test]
    fn test_noisy_denies_threshold_and_limit() {
        let mut denied: Vec<FlowAggregate> = (0..15)
            .map(|i| {
                let mut f = flow("0", &format!("192.0.2.{}", i), "10.0.0.1", "SSH", 200 + i);
                f.policy_id = None;
                f
            })
            .collect();
        denied.push(FlowAggregate {
            src_ip: Some("192.0.2.200".to_string()),
            dst_ip: Some("10.0.0.1".to_string()),
            count: 50, // below threshold
            ..Default::default()
        });

        let aggregates = LogAggregates {
            denied_flows: denied,
            ..Default::default()
        };
        let findings =
            analyze_noisy_denies("dev1", &aggregates, &DynamicAuditParams::default());
        assert_eq!(findings.len(), 10);
        assert!(findings.iter().all(|f| f.severity == Severity::Low));
        assert!(findings.iter().all(|f| f.cli_remediation.is_none()));
        // Sorted by volume: the largest group first.
        assert_eq!(findings[0].affected_count, 214);
    }

    #[test]
    fn test_deny_port_label_without_service() {
        let f = FlowAggregate {
            dst_port: Some(8443),
            ..Default::default()
        };
        assert_eq!(f.service_label(), "TCP/8443");
        let g = FlowAggregate::default();
        assert_eq!(g.service_label(), "ALL");
    }
}
