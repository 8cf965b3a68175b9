//! FWLens Core - High-performance firewall config/log analysis pipeline
//!
//! This crate provides the core parsing, diffing and analysis
//! functionality for FWLens, exposed to Python via PyO3. The
//! implementation prioritizes:
//!
//! 1. **Robust parsing** - Vendor exports never fail fatally; missing
//!    data degrades to absent fields
//! 2. **Logging** - Every decision point logged with full context
//! 3. **Bounded work** - Aggregation-driven analysis, capped outputs
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `config` - FortiGate configuration text parser
//! - `logparse` - Traffic log tokenizer and normalizer
//! - `diff` - Policy baseline reconciliation and signature grouping
//! - `analysis` - Static, dynamic and VDOM analyzers plus dedup
//! - `pipeline` - Ingestion orchestration and the device sweep
//! - `storage` - SQL query builders, models, capability probe
//! - `logging` - Structured logging with import context
//!
//! The Python host owns routing, persistence and transactions; this
//! core receives raw text and JSON-encoded record sets and returns
//! structured results.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use serde_json::Value;

pub mod analysis;
pub mod config;
pub mod diff;
pub mod error;
pub mod logging;
pub mod logparse;
pub mod pipeline;
pub mod storage;

use analysis::dedup::{plan_upserts, OpenRecommendation};
use analysis::dynamic_audit::{DynamicAuditParams, LogAggregates};
use analysis::policy_view::records_from_rows;
use analysis::{dynamic_audit, static_audit, vdom_audit};
use diff::engine::reconcile;
use diff::signature::{group_duplicates, GroupingOptions};
use error::CoreError;
use pipeline::context::ImportContext;
use pipeline::ingestion::ingest_log_batch;
use pipeline::registry::DeviceRegistry;
use pipeline::sweep::{run_device_sweep as sweep_devices, DeviceAuditInput};
use storage::capabilities::StoreCapabilities;
use storage::models::{DeviceRecord, Interface, Recommendation, Vdom};
use storage::queries;

/// Initialize the module-level logger
fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .try_init();
}

/// Convert a serde_json value into the equivalent Python object.
fn json_to_py(py: Python<'_>, value: &Value) -> PyResult<PyObject> {
    Ok(match value {
        Value::Null => py.None(),
        Value::Bool(b) => b.into_py(py),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into_py(py)
            } else {
                n.as_f64().unwrap_or(0.0).into_py(py)
            }
        }
        Value::String(s) => s.as_str().into_py(py),
        Value::Array(arr) => {
            let list = PyList::empty(py);
            for item in arr {
                list.append(json_to_py(py, item)?)?;
            }
            list.into()
        }
        Value::Object(map) => {
            let dict = PyDict::new(py);
            for (key, val) in map {
                dict.set_item(key, json_to_py(py, val)?)?;
            }
            dict.into()
        }
    })
}

/// Serialize any result type to a Python object via its JSON form.
fn to_py<T: serde::Serialize>(py: Python<'_>, value: &T) -> PyResult<PyObject> {
    let json = serde_json::to_value(value)
        .map_err(|e| PyValueError::new_err(format!("serialization failed: {}", e)))?;
    json_to_py(py, &json)
}

fn parse_json<T: serde::de::DeserializeOwned>(input: &str, what: &str) -> PyResult<T> {
    serde_json::from_str(input)
        .map_err(|e| PyValueError::new_err(format!("invalid {} JSON: {}", what, e)))
}

fn core_err(err: CoreError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// Registry of known devices for log-batch auto-detection.
///
/// Constructed once by the host at startup from device rows and passed
/// into `parse_log_batch`. An explicit dependency, not a module-level
/// singleton.
#[pyclass(name = "DeviceRegistry")]
pub struct PyDeviceRegistry {
    inner: DeviceRegistry,
}

#[pymethods]
impl PyDeviceRegistry {
    #[new]
    fn new() -> Self {
        init_logger();
        Self {
            inner: DeviceRegistry::new(),
        }
    }

    /// Load device rows: (device_id, serial, secondary_serial, hostname).
    fn load_devices(
        &self,
        rows: Vec<(String, Option<String>, Option<String>, Option<String>)>,
    ) {
        let records: Vec<DeviceRecord> = rows
            .into_iter()
            .map(|(device_id, serial, secondary_serial, hostname)| DeviceRecord {
                device_id,
                serial,
                secondary_serial,
                hostname,
            })
            .collect();
        self.inner.load_rows(records);
    }

    fn serial_count(&self) -> usize {
        self.inner.serial_count()
    }

    fn clear(&self) {
        self.inner.clear();
    }
}

/// Parse one raw configuration export.
///
/// Never raises for malformed content: anything unextractable becomes
/// None/empty in the returned dict. `serial` is None when the document
/// carries no serial at all, so the caller can prompt for one.
#[pyfunction]
fn parse_config(py: Python<'_>, content: String) -> PyResult<PyObject> {
    init_logger();
    let ctx = ImportContext::new(None);
    let parsed = config::parser::parse_config(&content, &ctx.log_context());
    to_py(py, &parsed)
}

/// Parse a full log export and normalize every entry.
///
/// The device is auto-detected from the `devid` field of the first
/// entries and resolved against the registry; an unresolvable batch
/// raises ValueError before any record is produced.
#[pyfunction]
#[pyo3(signature = (content, registry, filename=None))]
fn parse_log_batch(
    py: Python<'_>,
    content: String,
    registry: &PyDeviceRegistry,
    filename: Option<String>,
) -> PyResult<PyObject> {
    init_logger();
    let ctx = ImportContext::new(filename.as_deref());

    log::info!(
        "BATCH_RECEIVED import_id={} bytes={}",
        ctx.import_id,
        content.len()
    );

    let result = ingest_log_batch(&content, &registry.inner, &ctx).map_err(core_err)?;
    to_py(py, &result)
}

/// Reconcile a (device, vdom) policy baseline against an import.
///
/// Returns the diff report plus the history rows it implies. The host
/// must commit both in one transaction or neither.
#[pyfunction]
#[pyo3(signature = (device_id, vdom, baseline_json, incoming_json, import_session_id=None))]
fn reconcile_policies(
    py: Python<'_>,
    device_id: String,
    vdom: String,
    baseline_json: String,
    incoming_json: String,
    import_session_id: Option<String>,
) -> PyResult<PyObject> {
    init_logger();
    let baseline_rows: Vec<Value> = parse_json(&baseline_json, "baseline")?;
    let incoming: Vec<Value> = parse_json(&incoming_json, "incoming")?;

    let caps = StoreCapabilities::default();
    let baseline = records_from_rows(&baseline_rows, &caps);

    let ctx = ImportContext::new(None);
    let log_ctx = ctx.log_context().with_device(&device_id).with_scope(&vdom);

    let outcome = reconcile(
        &device_id,
        &vdom,
        &baseline,
        &incoming,
        import_session_id.as_deref(),
        &log_ctx,
    )
    .map_err(core_err)?;
    to_py(py, &outcome)
}

/// Group policies by content signature, returning groups of size >= 2.
///
/// With `ignore_scope` the VDOM is excluded from the signature, which
/// turns the same function into the shadow-policy detector.
#[pyfunction]
#[pyo3(signature = (policies_json, ignore_scope=false, include_nat=true))]
fn find_duplicate_policies(
    py: Python<'_>,
    policies_json: String,
    ignore_scope: bool,
    include_nat: bool,
) -> PyResult<PyObject> {
    init_logger();
    let rows: Vec<Value> = parse_json(&policies_json, "policies")?;
    let policies = records_from_rows(&rows, &StoreCapabilities::default());
    let groups = group_duplicates(
        &policies,
        &GroupingOptions {
            ignore_scope,
            include_nat,
        },
    );
    to_py(py, &groups)
}

/// Run the static audit over one device's policies.
#[pyfunction]
fn audit_static(py: Python<'_>, policies_json: String) -> PyResult<PyObject> {
    init_logger();
    let rows: Vec<Value> = parse_json(&policies_json, "policies")?;
    let policies = records_from_rows(&rows, &StoreCapabilities::default());
    let findings = static_audit::analyze_policies(&policies);
    to_py(py, &findings)
}

/// Run the dynamic audit over one device's policies and log
/// aggregates.
#[pyfunction]
#[pyo3(signature = (device_id, policies_json, aggregates_json, params_json=None))]
fn audit_dynamic(
    py: Python<'_>,
    device_id: String,
    policies_json: String,
    aggregates_json: String,
    params_json: Option<String>,
) -> PyResult<PyObject> {
    init_logger();
    let rows: Vec<Value> = parse_json(&policies_json, "policies")?;
    let policies = records_from_rows(&rows, &StoreCapabilities::default());
    let aggregates: LogAggregates = parse_json(&aggregates_json, "aggregates")?;
    let params: DynamicAuditParams = match params_json {
        Some(json) => parse_json(&json, "params")?,
        None => DynamicAuditParams::default(),
    };

    let findings = dynamic_audit::analyze_device(&device_id, &policies, &aggregates, &params);
    to_py(py, &findings)
}

/// Run the VDOM correlation audit over one device.
#[pyfunction]
fn audit_vdom(
    py: Python<'_>,
    device_id: String,
    vdoms_json: String,
    interfaces_json: String,
    policies_json: String,
) -> PyResult<PyObject> {
    init_logger();
    let vdoms: Vec<Vdom> = parse_json(&vdoms_json, "vdoms")?;
    let interfaces: Vec<Interface> = parse_json(&interfaces_json, "interfaces")?;
    let rows: Vec<Value> = parse_json(&policies_json, "policies")?;
    let policies = records_from_rows(&rows, &StoreCapabilities::default());

    let findings = vdom_audit::analyze_device(&device_id, &vdoms, &interfaces, &policies);
    to_py(py, &findings)
}

/// Run all three audits across a batch of devices with per-device
/// fault isolation. Returns one outcome per device, never a single
/// aggregate boolean.
#[pyfunction]
#[pyo3(signature = (devices_json, params_json=None))]
fn run_device_sweep(
    py: Python<'_>,
    devices_json: String,
    params_json: Option<String>,
) -> PyResult<PyObject> {
    init_logger();
    let devices: Vec<DeviceAuditInput> = parse_json(&devices_json, "devices")?;
    let params: DynamicAuditParams = match params_json {
        Some(json) => parse_json(&json, "params")?,
        None => DynamicAuditParams::default(),
    };

    let outcomes = sweep_devices(&devices, &params);
    to_py(py, &outcomes)
}

/// Plan the recommendation upserts for a batch of findings against the
/// currently-open rows. The host applies the plan in one transaction.
#[pyfunction]
fn plan_recommendation_upserts(
    py: Python<'_>,
    existing_open_json: String,
    findings_json: String,
) -> PyResult<PyObject> {
    init_logger();
    let existing: Vec<OpenRecommendation> = parse_json(&existing_open_json, "existing")?;
    let findings: Vec<Recommendation> = parse_json(&findings_json, "findings")?;
    let plan = plan_upserts(&existing, &findings);
    to_py(py, &plan)
}

/// Detect store capabilities from the host's table list. Called once
/// per session.
#[pyfunction]
fn detect_capabilities(py: Python<'_>, tables: Vec<String>) -> PyResult<PyObject> {
    init_logger();
    let caps = StoreCapabilities::detect(&tables);
    to_py(py, &caps)
}

/// INSERT statement for log_entries.
#[pyfunction]
fn get_log_insert_query() -> String {
    queries::build_log_entry_insert()
}

/// INSERT statement for policy_history.
#[pyfunction]
fn get_history_insert_query() -> &'static str {
    queries::build_history_insert()
}

/// INSERT statement for security_recommendations.
#[pyfunction]
fn get_recommendation_insert_query() -> &'static str {
    queries::build_recommendation_insert()
}

/// affected_count refresh for an existing recommendation.
#[pyfunction]
fn get_recommendation_refresh_query() -> &'static str {
    queries::build_recommendation_refresh()
}

/// INSERT statement for log_import_sessions.
#[pyfunction]
fn get_import_session_insert_query() -> &'static str {
    queries::build_import_session_insert()
}

/// Aggregation query for per-policy hit counts (zombie detection).
#[pyfunction]
fn build_policy_hits_query(device_id: String, cutoff: String) -> (String, Vec<String>) {
    queries::policy_hits_query(&device_id, &cutoff).build()
}

/// Aggregation query for one policy's accepted flows (least-privilege
/// synthesis).
#[pyfunction]
#[pyo3(signature = (device_id, cutoff, policy_id, limit=20))]
fn build_accepted_flows_query(
    device_id: String,
    cutoff: String,
    policy_id: i64,
    limit: u64,
) -> (String, Vec<String>) {
    queries::accepted_flows_query(&device_id, &cutoff, policy_id, limit).build()
}

/// Aggregation query for denied traffic groups over the threshold
/// (noisy-deny detection).
#[pyfunction]
#[pyo3(signature = (device_id, cutoff, min_occurrences=100, limit=10))]
fn build_denied_flows_query(
    device_id: String,
    cutoff: String,
    min_occurrences: u64,
    limit: u64,
) -> (String, Vec<String>) {
    queries::denied_flows_query(&device_id, &cutoff, min_occurrences, limit).build()
}

/// Python module definition
#[pymodule]
fn fwlens_core(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyDeviceRegistry>()?;
    m.add_function(wrap_pyfunction!(parse_config, m)?)?;
    m.add_function(wrap_pyfunction!(parse_log_batch, m)?)?;
    m.add_function(wrap_pyfunction!(reconcile_policies, m)?)?;
    m.add_function(wrap_pyfunction!(find_duplicate_policies, m)?)?;
    m.add_function(wrap_pyfunction!(audit_static, m)?)?;
    m.add_function(wrap_pyfunction!(audit_dynamic, m)?)?;
    m.add_function(wrap_pyfunction!(audit_vdom, m)?)?;
    m.add_function(wrap_pyfunction!(run_device_sweep, m)?)?;
    m.add_function(wrap_pyfunction!(plan_recommendation_upserts, m)?)?;
    m.add_function(wrap_pyfunction!(detect_capabilities, m)?)?;
    m.add_function(wrap_pyfunction!(get_log_insert_query, m)?)?;
    m.add_function(wrap_pyfunction!(get_history_insert_query, m)?)?;
    m.add_function(wrap_pyfunction!(get_recommendation_insert_query, m)?)?;
    m.add_function(wrap_pyfunction!(get_recommendation_refresh_query, m)?)?;
    m.add_function(wrap_pyfunction!(get_import_session_insert_query, m)?)?;
    m.add_function(wrap_pyfunction!(build_policy_hits_query, m)?)?;
    m.add_function(wrap_pyfunction!(build_accepted_flows_query, m)?)?;
    m.add_function(wrap_pyfunction!(build_denied_flows_query, m)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// End-to-end: import an open policy against an empty baseline,
    /// audit the resulting baseline, re-import the same set.
    #[test]
    fn test_import_audit_reimport_scenario() {
        let incoming = vec![json!({
            "id": "1",
            "vdom": "root",
            "action": "accept",
            "srcaddr": ["all"],
            "dstaddr": ["all"],
            "service": ["ALL"]
        })];

        let ctx = ImportContext::new(None);
        let log_ctx = ctx.log_context();

        // First import: one added policy.
        let outcome = reconcile("dev1", "root", &[], &incoming, None, &log_ctx).unwrap();
        assert_eq!(outcome.report.added.len(), 1);
        assert_eq!(outcome.report.added[0].policy_id, "1");

        // Static audit over the resulting baseline: one critical
        // finding referencing policy "1".
        let baseline = diff::engine::apply_incoming("dev1", "root", &incoming);
        let findings = static_audit::analyze_policies(&baseline);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, storage::models::Severity::Critical);
        assert_eq!(findings[0].related_policy_id.as_deref(), Some("1"));

        // Re-running the same import is a no-op.
        let second = reconcile("dev1", "root", &baseline, &incoming, None, &log_ctx).unwrap();
        assert!(second.report.added.is_empty());
        assert!(second.report.modified.is_empty());
        assert!(second.report.deleted.is_empty());
        assert_eq!(second.report.unchanged_count, 1);

        // The finding inserts once; a repeat run deduplicates.
        let plan = plan_upserts(&[], &findings);
        assert_eq!(plan.len(), 1);
        let open: Vec<OpenRecommendation> = findings
            .iter()
            .enumerate()
            .map(|(i, f)| OpenRecommendation {
                id: format!("r{}", i),
                device_id: f.device_id.clone(),
                category: f.category.clone(),
                title: f.title.clone(),
                related_policy_id: f.related_policy_id.clone(),
                affected_count: f.affected_count,
            })
            .collect();
        let replan = plan_upserts(&open, &findings);
        assert!(matches!(
            replan[0],
            analysis::dedup::UpsertDecision::SkipDuplicate { .. }
        ));
    }
}
