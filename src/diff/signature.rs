//! Policy signature grouping.
//!
//! Computes a composite content signature per policy and groups
//! policies that share one. With the VDOM in the signature this is the
//! same-VDOM duplicate detector; with `ignore_scope` it becomes the
//! VDOM analyzer's shadow-policy detector. Only groups with more than
//! one member are returned.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::storage::models::{normalized_list, PolicyRecord};

/// Grouping options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GroupingOptions {
    /// Exclude the VDOM from the signature (shadow-policy mode).
    pub ignore_scope: bool,
    /// Include the NAT flag in the signature.
    pub include_nat: bool,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self {
            ignore_scope: false,
            include_nat: true,
        }
    }
}

/// One member of a duplicate group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub policy_id: String,
    pub vdom: String,
    pub name: String,
}

/// A set of policies sharing one signature. Always has ≥ 2 members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub signature: Vec<String>,
    pub members: Vec<GroupMember>,
}

impl DuplicateGroup {
    /// Distinct VDOM names spanned by this group.
    pub fn vdoms(&self) -> Vec<String> {
        let mut vdoms: Vec<String> = self.members.iter().map(|m| m.vdom.clone()).collect();
        vdoms.sort();
        vdoms.dedup();
        vdoms
    }
}

/// Composite signature for one policy. The destination component
/// prefers the vendor display value embedded in the raw attribute map
/// over the stored list, falling back to the stored value.
fn signature_of(policy: &PolicyRecord, options: &GroupingOptions) -> Vec<String> {
    let mut sig = Vec::with_capacity(8);
    if !options.ignore_scope {
        sig.push(policy.vdom.to_lowercase().trim().to_string());
    }
    sig.push(normalized_list(&policy.src_intf).to_lowercase());
    sig.push(normalized_list(&policy.dst_intf).to_lowercase());
    sig.push(normalized_list(&policy.src_addr).to_lowercase());
    sig.push(policy.destination_display().to_lowercase().trim().to_string());
    sig.push(normalized_list(&policy.service).to_lowercase());
    sig.push(policy.action.to_lowercase().trim().to_string());
    if options.include_nat {
        sig.push(policy.nat.to_lowercase().trim().to_string());
    }
    sig
}

/// Group policies by content signature, returning only groups with
/// more than one member, ordered by signature for stable output.
pub fn group_duplicates(
    policies: &[PolicyRecord],
    options: &GroupingOptions,
) -> Vec<DuplicateGroup> {
    let mut groups: BTreeMap<Vec<String>, Vec<GroupMember>> = BTreeMap::new();

    for policy in policies {
        groups
            .entry(signature_of(policy, options))
            .or_default()
            .push(GroupMember {
                policy_id: policy.policy_id.clone(),
                vdom: policy.vdom.clone(),
                name: policy.name.clone(),
            });
    }

    groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(signature, members)| DuplicateGroup { signature, members })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(id: &str, vdom: &str, service: &str) -> PolicyRecord {
        PolicyRecord {
            device_id: "dev1".to_string(),
            vdom: vdom.to_string(),
            policy_id: id.to_string(),
            action: "accept".to_string(),
            status: "enable".to_string(),
            src_intf: vec!["port1".to_string()],
            dst_intf: vec!["wan1".to_string()],
            src_addr: vec!["all".to_string()],
            dst_addr: vec!["all".to_string()],
            service: vec![service.to_string()],
            nat: "Disabled".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_same_vdom_duplicates_grouped() {
        let policies = vec![
            policy("1", "root", "ALL"),
            policy("2", "root", "ALL"),
            policy("3", "root", "HTTPS"), // differs in service only
        ];
        let groups = group_duplicates(&policies, &GroupingOptions::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
        let ids: Vec<&str> = groups[0].members.iter().map(|m| m.policy_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_no_single_member_groups() {
        let policies = vec![policy("1", "root", "ALL"), policy("2", "root", "SSH")];
        let groups = group_duplicates(&policies, &GroupingOptions::default());
        assert!(groups.is_empty());
    }

    #[test]
    fn test_scope_separates_unless_ignored() {
        let policies = vec![policy("1", "root", "ALL"), policy("2", "dmz", "ALL")];

        let scoped = group_duplicates(&policies, &GroupingOptions::default());
        assert!(scoped.is_empty());

        let unscoped = group_duplicates(
            &policies,
            &GroupingOptions {
                ignore_scope: true,
                include_nat: true,
            },
        );
        assert_eq!(unscoped.len(), 1);
        assert_eq!(unscoped[0].vdoms(), vec!["dmz", "root"]);
    }

    #[test]
    fn test_nat_optionally_in_signature() {
        let mut a = policy("1", "root", "ALL");
        a.nat = "Enabled".to_string();
        let b = policy("2", "root", "ALL");

        let with_nat = group_duplicates(
            &[a.clone(), b.clone()],
            &GroupingOptions::default(),
        );
        assert!(with_nat.is_empty());

        let without_nat = group_duplicates(
            &[a, b],
            &GroupingOptions {
                ignore_scope: false,
                include_nat: false,
            },
        );
        assert_eq!(without_nat.len(), 1);
    }

    #[test]
    fn test_display_value_preferred_for_destination() {
        let mut a = policy("1", "root", "ALL");
        a.raw.insert(
            "Destination".to_string(),
            serde_json::json!("DMZ Servers"),
        );
        let mut b = policy("2", "root", "ALL");
        b.dst_addr = vec!["dmz servers".to_string()];

        // a's display value matches b's stored value case-insensitively.
        let groups = group_duplicates(&[a, b], &GroupingOptions::default());
        assert_eq!(groups.len(), 1);
    }
}
