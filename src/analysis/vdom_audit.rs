//! Cross-VDOM correlation audit.
//!
//! Device-wide analysis across VDOM boundaries: shadow policies
//! duplicated in multiple VDOMs, orphan interfaces no policy
//! references, and inter-VDOM link interfaces without (or with overly
//! permissive) access control.

use serde_json::json;
use std::collections::HashSet;

use crate::analysis::policy_view::has_wildcard;
use crate::diff::signature::{group_duplicates, GroupingOptions};
use crate::storage::models::{Interface, PolicyRecord, Recommendation, Severity, Vdom};

pub const CATEGORY: &str = "vdom_audit";

/// System interfaces that legitimately carry no policies.
const ORPHAN_ALLOWLIST: &[&str] = &["loopback", "mgmt", "ha", "ssl.root", "any"];

/// Orphan findings above this count collapse into one summary.
const ORPHAN_SUMMARY_THRESHOLD: usize = 5;

/// Name fragments that identify inter-VDOM link interfaces.
const LINK_NAME_PATTERNS: &[&str] = &["vdom", "npu", "vlink"];

/// Run the full VDOM correlation audit for one device.
pub fn analyze_device(
    device_id: &str,
    vdoms: &[Vdom],
    interfaces: &[Interface],
    policies: &[PolicyRecord],
) -> Vec<Recommendation> {
    let mut findings = Vec::new();
    findings.extend(detect_shadow_policies(device_id, policies));
    findings.extend(detect_orphan_interfaces(device_id, interfaces, policies));
    findings.extend(detect_vdom_leaks(device_id, vdoms, interfaces, policies));
    log::info!(
        "VDOM_AUDIT_COMPLETE device={} findings={}",
        device_id,
        findings.len()
    );
    findings
}

/// Policies with identical signatures present in two or more VDOMs.
/// Same-VDOM duplicates are the policy explorer's concern, not this
/// audit's.
pub fn detect_shadow_policies(device_id: &str, policies: &[PolicyRecord]) -> Vec<Recommendation> {
    let enabled: Vec<PolicyRecord> = policies
        .iter()
        .filter(|p| p.is_enabled())
        .cloned()
        .collect();

    let options = GroupingOptions {
        ignore_scope: true,
        include_nat: true,
    };

    group_duplicates(&enabled, &options)
        .into_iter()
        .filter(|group| group.vdoms().len() >= 2)
        .map(|group| {
            let vdoms = group.vdoms();
            let ids: Vec<String> = group.members.iter().map(|m| m.policy_id.clone()).collect();
            let mut rec = Recommendation::new(
                device_id,
                CATEGORY,
                Severity::High,
                &format!("Shadow policy across VDOMs: {}", ids.join(", ")),
            );
            rec.description = format!(
                "The same rule ({} -> {}, svc: {}) exists in {} VDOMs: {}.",
                group.signature.get(2).map(|s| s.as_str()).unwrap_or(""),
                group.signature.get(3).map(|s| s.as_str()).unwrap_or(""),
                group.signature.get(4).map(|s| s.as_str()).unwrap_or(""),
                vdoms.len(),
                vdoms.join(", ")
            );
            rec.recommendation =
                "Consolidate into a single policy or verify the duplication is intentional."
                    .to_string();
            rec.affected_count = group.members.len() as i64;
            rec.evidence = json!({
                "policy_ids": ids,
                "vdoms": vdoms,
                "signature": group.signature,
            });
            rec
        })
        .collect()
}

/// Interfaces never referenced as a source or destination interface by
/// any policy, excluding the system allow-list.
pub fn detect_orphan_interfaces(
    device_id: &str,
    interfaces: &[Interface],
    policies: &[PolicyRecord],
) -> Vec<Recommendation> {
    let mut used: HashSet<String> = HashSet::new();
    for policy in policies {
        for name in policy.src_intf.iter().chain(policy.dst_intf.iter()) {
            used.insert(name.to_lowercase().trim().to_string());
        }
    }

    let orphans: Vec<&Interface> = interfaces
        .iter()
        .filter(|intf| {
            let name = intf.name.to_lowercase();
            let name = name.trim();
            !name.is_empty()
                && !used.contains(name)
                && !ORPHAN_ALLOWLIST.contains(&name)
        })
        .collect();

    if orphans.is_empty() {
        return Vec::new();
    }

    if orphans.len() > ORPHAN_SUMMARY_THRESHOLD {
        let names: Vec<String> = orphans.iter().map(|i| i.name.clone()).collect();
        let preview = names
            .iter()
            .take(ORPHAN_SUMMARY_THRESHOLD)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let mut rec = Recommendation::new(
            device_id,
            CATEGORY,
            Severity::Medium,
            &format!("Multiple orphan interfaces ({})", orphans.len()),
        );
        rec.description = format!(
            "{} interfaces have no associated policies: {}... (+{} more)",
            orphans.len(),
            preview,
            orphans.len() - ORPHAN_SUMMARY_THRESHOLD
        );
        rec.recommendation =
            "Verify whether these interfaces are active. Remove them or create policies."
                .to_string();
        rec.affected_count = orphans.len() as i64;
        rec.evidence = json!({ "interfaces": names });
        return vec![rec];
    }

    orphans
        .iter()
        .map(|intf| {
            let mut rec = Recommendation::new(
                device_id,
                CATEGORY,
                Severity::Low,
                &format!("Orphan interface: {}", intf.name),
            );
            rec.description = format!(
                "Interface \"{}\" is not referenced by any policy.",
                intf.name
            );
            rec.recommendation =
                "Verify the interface is in use. Create a policy or remove it.".to_string();
            rec.related_vdom = if intf.vdom.is_empty() {
                None
            } else {
                Some(intf.vdom.clone())
            };
            rec.affected_count = 1;
            rec
        })
        .collect()
}

/// Inter-VDOM leak detection. Only meaningful with two or more VDOMs:
/// link interfaces without any controlling policy are a critical
/// finding; link policies that are wildcard on both address ends are
/// high.
pub fn detect_vdom_leaks(
    device_id: &str,
    vdoms: &[Vdom],
    interfaces: &[Interface],
    policies: &[PolicyRecord],
) -> Vec<Recommendation> {
    if vdoms.len() < 2 {
        return Vec::new();
    }

    let link_names: Vec<String> = interfaces
        .iter()
        .filter(|intf| {
            let name = intf.name.to_lowercase();
            LINK_NAME_PATTERNS.iter().any(|p| name.contains(p))
        })
        .map(|intf| intf.name.to_lowercase())
        .collect();

    if link_names.is_empty() {
        // Strictly separated VDOMs with no link interfaces are fine.
        return Vec::new();
    }

    let link_set: HashSet<&str> = link_names.iter().map(|s| s.as_str()).collect();
    let link_policies: Vec<&PolicyRecord> = policies
        .iter()
        .filter(|p| {
            p.src_intf
                .iter()
                .chain(p.dst_intf.iter())
                .any(|name| link_set.contains(name.to_lowercase().as_str()))
        })
        .collect();

    if link_policies.is_empty() {
        let mut rec = Recommendation::new(
            device_id,
            CATEGORY,
            Severity::Critical,
            "Possible inter-VDOM leak detected",
        );
        rec.description = format!(
            "VDOM link interfaces ({}) exist but no policies control them.",
            link_names.join(", ")
        );
        rec.recommendation =
            "Verify the inter-VDOM routing setup. Create explicit policies to control the traffic."
                .to_string();
        rec.affected_count = link_names.len() as i64;
        rec.evidence = json!({ "link_interfaces": link_names });
        return vec![rec];
    }

    link_policies
        .iter()
        .filter(|p| has_wildcard(&p.src_addr) && has_wildcard(&p.dst_addr))
        .map(|p| {
            let mut rec = Recommendation::new(
                device_id,
                CATEGORY,
                Severity::High,
                &format!("Permissive inter-VDOM policy: {}", p.policy_id),
            );
            rec.description = format!(
                "Policy {} permits ANY/ANY traffic between VDOMs.",
                p.policy_id
            );
            rec.recommendation =
                "Restrict inter-VDOM traffic to specific flows.".to_string();
            rec.related_policy_id = Some(p.policy_id.clone());
            rec.related_vdom = Some(p.vdom.clone());
            rec.affected_count = 1;
            rec
        })
        .collect()
}
