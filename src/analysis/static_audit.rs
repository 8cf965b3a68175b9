//! Static configuration audit.
//!
//! Rule-based checks over parsed policies alone, no traffic data:
//! wildcard/any-any detection at three severities. Pure function over
//! its inputs, no I/O.

use serde_json::json;

use crate::analysis::policy_view::{has_wildcard, service_open};
use crate::storage::models::{PolicyRecord, Recommendation, Severity};

pub const CATEGORY: &str = "security_audit";

/// Wrap a CLI block in the VDOM edit context it must run under.
/// Single-VDOM devices (scope "root") run the block as-is.
pub fn wrap_vdom_cli(cli: &str, vdom: &str) -> String {
    if vdom.is_empty() || vdom == "root" {
        return cli.to_string();
    }
    format!("config vdom\n    edit {}\n{}\nend", vdom, cli)
}

fn remediation_cli(policy: &PolicyRecord) -> String {
    let cli = format!(
        "config firewall policy\n    edit {}\n    set comments \"AUDIT: Detected as overly permissive\"\n    # Suggestion:\n    # set srcaddr \"specific-group\"\n    # set service \"HTTP\" \"HTTPS\"\n    next\nend",
        policy.policy_id
    );
    wrap_vdom_cli(&cli, &policy.vdom)
}

fn base_finding(policy: &PolicyRecord, severity: Severity, title: &str) -> Recommendation {
    let mut rec = Recommendation::new(&policy.device_id, CATEGORY, severity, title);
    rec.related_policy_id = Some(policy.policy_id.clone());
    rec.related_vdom = Some(policy.vdom.clone());
    rec.affected_count = 1;
    rec
}

/// Audit all policies of one device. Disabled policies are skipped
/// entirely; each enabled policy can produce a wildcard finding and,
/// independently, an interface-wildcard finding.
pub fn analyze_policies(policies: &[PolicyRecord]) -> Vec<Recommendation> {
    let mut findings = Vec::new();

    for policy in policies {
        if policy.policy_id.is_empty() || !policy.is_enabled() {
            continue;
        }

        let src_open = has_wildcard(&policy.src_addr);
        let dst_open = has_wildcard(&policy.dst_addr);
        let svc_open = service_open(&policy.service);
        let src_intf_open = has_wildcard(&policy.src_intf);
        let accept = policy.is_accept();

        if accept && src_open && dst_open && svc_open {
            let mut rec = base_finding(
                policy,
                Severity::Critical,
                &format!("Policy {} fully open (Any/Any/ALL)", policy.policy_id),
            );
            rec.description = format!(
                "Policy {} permits all traffic (source: all, destination: all, service: ALL).",
                policy.policy_id
            );
            rec.recommendation =
                "Restrict the source, destination and allowed services.".to_string();
            rec.cli_remediation = Some(remediation_cli(policy));
            rec.evidence = json!({
                "srcaddr": policy.src_addr,
                "dstaddr": policy.dst_addr,
                "service": policy.service,
            });
            log::info!(
                "STATIC_FINDING severity=critical policy_id={} vdom={}",
                policy.policy_id,
                policy.vdom
            );
            findings.push(rec);
        } else if accept && src_open && svc_open {
            let mut rec = base_finding(
                policy,
                Severity::High,
                &format!("Policy {} exposed (source ALL + service ALL)", policy.policy_id),
            );
            rec.description = format!(
                "Policy {} accepts traffic from any source address using any service.",
                policy.policy_id
            );
            rec.recommendation = "Restrict at least the allowed services.".to_string();
            rec.cli_remediation = Some(remediation_cli(policy));
            rec.evidence = json!({
                "srcaddr": policy.src_addr,
                "service": policy.service,
            });
            log::info!(
                "STATIC_FINDING severity=high policy_id={} vdom={}",
                policy.policy_id,
                policy.vdom
            );
            findings.push(rec);
        }

        // Interface-level wildcard reduces segmentation visibility on
        // its own; emitted in addition to the address findings.
        if src_intf_open && accept {
            let mut rec = base_finding(
                policy,
                Severity::Medium,
                &format!("Policy {} uses \"any\" source interface", policy.policy_id),
            );
            rec.description =
                "Wildcard interfaces bypass zone checks and reduce segmentation visibility."
                    .to_string();
            rec.recommendation = "Bind the policy to specific interfaces or zones.".to_string();
            rec.evidence = json!({ "srcintf": policy.src_intf });
            findings.push(rec);
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(id: &str, src: &[&str], dst: &[&str], svc: &[&str], action: &str) -> PolicyRecord {
        PolicyRecord {
            device_id: "dev1".to_string(),
            vdom: "root".to_string(),
            policy_id: id.to_string(),
            action: action.to_string(),
            status: "enable".to_string(),
            src_intf: vec!["port1".to_string()],
            dst_intf: vec!["wan1".to_string()],
            src_addr: src.iter().map(|s| s.to_string()).collect(),
            dst_addr: dst.iter().map(|s| s.to_string()).collect(),
            service: svc.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_fully_open_is_critical() {
        let findings = analyze_policies(&[policy("1", &["all"], &["all"], &["ALL"], "accept")]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].related_policy_id.as_deref(), Some("1"));
        assert!(findings[0].cli_remediation.is_some());
    }

    #[test]
    fn test_narrow_destination_downgrades_to_high() {
        let findings =
            analyze_policies(&[policy("1", &["all"], &["10.0.0.0/24"], &["ALL"], "accept")]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn test_closed_policy_is_clean() {
        let findings = analyze_policies(&[policy(
            "1",
            &["branch-net"],
            &["dc-net"],
            &["HTTPS"],
            "accept",
        )]);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_deny_policies_not_flagged() {
        let findings = analyze_policies(&[policy("1", &["all"], &["all"], &["ALL"], "deny")]);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_disabled_policies_skipped() {
        let mut p = policy("1", &["all"], &["all"], &["ALL"], "accept");
        p.status = "disable".to_string();
        assert!(analyze_policies(&[p]).is_empty());
    }

    #[test]
    fn test_interface_wildcard_is_additional() {
        let mut p = policy("1", &["all"], &["all"], &["ALL"], "accept");
        p.src_intf = vec!["any".to_string()];
        let findings = analyze_policies(&[p]);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[1].severity, Severity::Medium);
    }

    #[test]
    fn test_vdom_cli_wrapping() {
        let mut p = policy("8", &["all"], &["all"], &["ALL"], "accept");
        p.vdom = "dmz".to_string();
        let findings = analyze_policies(&[p]);
        let cli = findings[0].cli_remediation.as_deref().unwrap();
        assert!(cli.starts_with("config vdom\n    edit dmz\n"));
        assert!(cli.trim_end().ends_with("end"));
    }
}
