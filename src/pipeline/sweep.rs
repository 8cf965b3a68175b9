//! Multi-device audit sweep.
//!
//! Runs the static, dynamic and VDOM audits for each device with
//! per-device fault isolation: one device failing contributes zero
//! findings and is reported as failed, and the sweep continues. The
//! caller gets a per-device outcome list, never a single aggregate
//! boolean.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::analysis::dynamic_audit::{self, DynamicAuditParams, LogAggregates};
use crate::analysis::static_audit;
use crate::analysis::vdom_audit;
use crate::storage::models::{Interface, PolicyRecord, Recommendation, Vdom};

/// Everything one device's audit needs, pre-fetched by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceAuditInput {
    pub device_id: String,
    #[serde(default)]
    pub policies: Vec<PolicyRecord>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub vdoms: Vec<Vdom>,
    #[serde(default)]
    pub aggregates: LogAggregates,
}

/// Per-device outcome of one sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuditOutcome {
    pub device_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub findings: Vec<Recommendation>,
}

/// Audit one device: all three analyzers over a read-only view.
fn audit_device(input: &DeviceAuditInput, params: &DynamicAuditParams) -> Vec<Recommendation> {
    let mut findings = Vec::new();
    findings.extend(static_audit::analyze_policies(&input.policies));
    findings.extend(dynamic_audit::analyze_device(
        &input.device_id,
        &input.policies,
        &input.aggregates,
        params,
    ));
    findings.extend(vdom_audit::analyze_device(
        &input.device_id,
        &input.vdoms,
        &input.interfaces,
        &input.policies,
    ));
    findings
}

/// Run the audit sweep over a batch of devices.
///
/// Device analyses share no mutable state; a failure (including a
/// panic) is contained to its device and logged.
pub fn run_device_sweep(
    devices: &[DeviceAuditInput],
    params: &DynamicAuditParams,
) -> Vec<DeviceAuditOutcome> {
    let mut outcomes = Vec::with_capacity(devices.len());

    for input in devices {
        let result = catch_unwind(AssertUnwindSafe(|| audit_device(input, params)));
        let outcome = match result {
            Ok(findings) => {
                log::info!(
                    "SWEEP_DEVICE_OK device={} findings={}",
                    input.device_id,
                    findings.len()
                );
                DeviceAuditOutcome {
                    device_id: input.device_id.clone(),
                    success: true,
                    error: None,
                    findings,
                }
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "analyzer panicked".to_string());
                log::error!(
                    "SWEEP_DEVICE_FAILED device={} error={}",
                    input.device_id,
                    message
                );
                DeviceAuditOutcome {
                    device_id: input.device_id.clone(),
                    success: false,
                    error: Some(message),
                    findings: Vec::new(),
                }
            }
        };
        outcomes.push(outcome);
    }

    let failed = outcomes.iter().filter(|o| !o.success).count();
    log::info!(
        "SWEEP_COMPLETE devices={} failed={}",
        outcomes.len(),
        failed
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_policy(device_id: &str, id: &str) -> PolicyRecord {
        PolicyRecord {
            device_id: device_id.to_string(),
            vdom: "root".to_string(),
            policy_id: id.to_string(),
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

    #[test]
    fn test_sweep_reports_per_device() {
        let devices = vec![
            DeviceAuditInput {
                device_id: "dev1".to_string(),
                policies: vec![open_policy("dev1", "1")],
                ..Default::default()
            },
            DeviceAuditInput {
                device_id: "dev2".to_string(),
                ..Default::default()
            },
        ];
        let outcomes = run_device_sweep(&devices, &DynamicAuditParams::default());
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));
        // dev1's open policy produces findings; dev2 is clean.
        assert!(!outcomes[0].findings.is_empty());
        assert!(outcomes[1].findings.is_empty());
    }

    #[test]
    fn test_device_audit_combines_analyzers() {
        let input = DeviceAuditInput {
            device_id: "dev1".to_string(),
            policies: vec![open_policy("dev1", "1")],
            ..Default::default()
        };
        let findings = audit_device(&input, &DynamicAuditParams::default());
        // Static (fully open) + dynamic (zombie, unused open policy).
        let categories: Vec<&str> = findings.iter().map(|f| f.category.as_str()).collect();
        assert!(categories.contains(&"security_audit"));
        assert!(categories.contains(&"optimization"));
        assert!(categories.contains(&"optimize_policy"));
    }
}
