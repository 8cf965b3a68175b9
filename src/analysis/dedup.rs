//! Recommendation dedup planning.
//!
//! Repeated analysis runs must not accumulate duplicate findings. The
//! planner compares a batch of new findings against the host's
//! currently-open recommendations on the natural key
//! (device_id, category, related_policy_id-or-title) and decides, per
//! finding: insert, skip as duplicate, or refresh the existing row's
//! affected_count. The host applies the plan in one transaction.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::storage::models::Recommendation;

/// Minimal view of an already-open recommendation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRecommendation {
    pub id: String,
    pub device_id: String,
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub related_policy_id: Option<String>,
    #[serde(default)]
    pub affected_count: i64,
}

/// The planner's decision for one incoming finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UpsertDecision {
    /// No open row with this key: insert as a new open finding.
    Insert { finding: Recommendation },
    /// An open row with this key exists and its count is current.
    SkipDuplicate { existing_id: String },
    /// An open row exists but the new observation changed the count.
    RefreshCount {
        existing_id: String,
        affected_count: i64,
    },
}

/// Dedup key: the related policy id binds tighter than the title, so a
/// retitled finding about the same policy still deduplicates.
fn key_of(device_id: &str, category: &str, related_policy_id: Option<&str>, title: &str) -> String {
    match related_policy_id {
        Some(pid) if !pid.is_empty() => format!("{}\u{1f}{}\u{1f}p:{}", device_id, category, pid),
        _ => format!("{}\u{1f}{}\u{1f}t:{}", device_id, category, title),
    }
}

/// Plan the upserts for one batch of findings.
///
/// Findings within the batch deduplicate against each other too: the
/// natural key must never produce two simultaneously-open rows, even
/// when two analyzers emit the same finding in one run.
pub fn plan_upserts(
    existing_open: &[OpenRecommendation],
    findings: &[Recommendation],
) -> Vec<UpsertDecision> {
    let mut open_by_key: HashMap<String, &OpenRecommendation> = HashMap::new();
    for rec in existing_open {
        let key = key_of(
            &rec.device_id,
            &rec.category,
            rec.related_policy_id.as_deref(),
            &rec.title,
        );
        open_by_key.entry(key).or_insert(rec);
    }

    let mut planned_keys: HashSet<String> = HashSet::new();
    let mut decisions = Vec::with_capacity(findings.len());

    for finding in findings {
        let key = key_of(
            &finding.device_id,
            &finding.category,
            finding.related_policy_id.as_deref(),
            &finding.title,
        );

        if let Some(existing) = open_by_key.get(&key) {
            if existing.affected_count != finding.affected_count {
                decisions.push(UpsertDecision::RefreshCount {
                    existing_id: existing.id.clone(),
                    affected_count: finding.affected_count,
                });
            } else {
                decisions.push(UpsertDecision::SkipDuplicate {
                    existing_id: existing.id.clone(),
                });
            }
            continue;
        }

        if !planned_keys.insert(key) {
            log::debug!(
                "DEDUP_INTRA_BATCH device={} category={} title={}",
                finding.device_id,
                finding.category,
                finding.title
            );
            continue;
        }
        decisions.push(UpsertDecision::Insert {
            finding: finding.clone(),
        });
    }

    decisions
}
