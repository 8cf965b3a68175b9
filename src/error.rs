//! Error types for the analysis core.
//!
//! Parse defects never surface here - parsers degrade missing data to
//! absent fields. These are the failures a caller must handle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Two records collided on (device, vdom, policy_id) during a
    /// reconciliation. Fatal to that one call; nothing is committed.
    #[error("reconciliation conflict on device={device_id} vdom={vdom} policy_id={policy_id}")]
    ReconciliationConflict {
        device_id: String,
        vdom: String,
        policy_id: String,
    },

    /// The whole import batch was rejected up front (e.g. the device
    /// serial could not be resolved from the log entries).
    #[error("import rejected: {reason}")]
    ImportRejected { reason: String },

    /// One device's analysis failed. Caught at the per-device sweep
    /// boundary; the batch continues with the next device.
    #[error("analyzer fault on device={device_id}: {message}")]
    AnalyzerFault { device_id: String, message: String },
}
