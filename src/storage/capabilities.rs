//! Store capability detection.
//!
//! Optional host tables are probed once per session from the host's
//! table listing and turned into typed flags. Components branch on the
//! flags instead of attempting operations and recovering from their
//! failures.

use serde::{Deserialize, Serialize};

/// Typed capabilities of the host's store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StoreCapabilities {
    /// Normalized object-mapping tables exist; policy list fields can
    /// be served as resolved name lists instead of joined text columns.
    pub object_mappings: bool,
    /// Append-only policy history table exists.
    pub policy_history: bool,
    /// Log entry table exists for aggregation queries.
    pub log_aggregation: bool,
}

const MAPPING_TABLES: &[&str] = &[
    "policy_interface_mappings",
    "policy_address_mappings",
    "policy_service_mappings",
];

impl StoreCapabilities {
    /// Detect capabilities from the host's available-table list.
    /// Performed once per session, never as failed-operation fallback.
    pub fn detect(available_tables: &[String]) -> Self {
        let has = |name: &str| available_tables.iter().any(|t| t == name);

        let caps = Self {
            object_mappings: MAPPING_TABLES.iter().all(|t| has(t)),
            policy_history: has("policy_history"),
            log_aggregation: has("log_entries"),
        };

        log::info!(
            "CAPABILITIES_DETECTED object_mappings={} policy_history={} log_aggregation={}",
            caps.object_mappings,
            caps.policy_history,
            caps.log_aggregation
        );
        caps
    }
}
