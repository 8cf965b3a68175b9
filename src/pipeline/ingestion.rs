//! Log batch ingestion pipeline.
//!
//! Coordinates the full log import workflow:
//! 1. Tokenize each export line into its raw key-value map
//! 2. Auto-detect the device from the first entries' devid
//! 3. Normalize every entry to the canonical record form
//! 4. Build the import-session summary statistics
//! 5. Report rejected lines with content hashes

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::logparse::normalize::normalize_entry;
use crate::logparse::tokenizer::parse_line;
use crate::pipeline::context::ImportContext;
use crate::pipeline::registry::DeviceRegistry;
use crate::storage::models::{
    DeviceRecord, ImportSession, ImportStats, LogRecord, TalkerStat,
};

/// Device auto-detection scans this many parsed entries, never the
/// whole file.
pub const DEVICE_DETECT_SCAN: usize = 10;

/// Summary lists are bounded regardless of batch size.
const TOP_TALKER_LIMIT: usize = 20;

/// One rejected input line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedLine {
    pub line_no: usize,
    pub reason: String,
    pub content_hash: String,
}

/// Result of ingesting one log export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatchResult {
    pub session: ImportSession,
    pub device: DeviceRecord,
    pub records: Vec<LogRecord>,
    pub rejected: Vec<RejectedLine>,
}

/// Compute the SHA-256 hex hash of a rejected line's content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Ingest a full log export for one device.
///
/// The device is resolved from the `devid` field of the first parsed
/// entries; an unresolvable batch is rejected up front so no records
/// are ever orphaned.
pub fn ingest_log_batch(
    content: &str,
    registry: &DeviceRegistry,
    ctx: &ImportContext,
) -> Result<LogBatchResult, CoreError> {
    let log_ctx = ctx.log_context();

    let mut entries: Vec<BTreeMap<String, String>> = Vec::new();
    let mut rejected: Vec<RejectedLine> = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(entry) => entries.push(entry),
            None => {
                rejected.push(RejectedLine {
                    line_no: idx + 1,
                    reason: "no field=value pairs recognized".to_string(),
                    content_hash: compute_hash(line),
                });
            }
        }
    }

    log::info!(
        "{} LOG_BATCH_PARSED entries={} rejected={}",
        log_ctx,
        entries.len(),
        rejected.len()
    );

    let device = detect_device(&entries, registry)?;
    let dev_ctx = log_ctx.with_device(&device.device_id);

    let mut records: Vec<LogRecord> = Vec::with_capacity(entries.len());
    for entry in &entries {
        let mut record = normalize_entry(entry);
        record.device_id = Some(device.device_id.clone());
        records.push(record);
    }

    let stats = calculate_stats(&records);

    let mut timestamps: Vec<&str> = records
        .iter()
        .filter_map(|r| r.timestamp.as_deref())
        .collect();
    timestamps.sort_unstable();

    let session = ImportSession {
        id: ctx.import_id.clone(),
        device_id: device.device_id.clone(),
        filename: ctx.filename.clone(),
        log_count: records.len() as u64,
        rejected_count: rejected.len() as u64,
        start_date: timestamps.first().map(|s| s.to_string()),
        end_date: timestamps.last().map(|s| s.to_string()),
        stats,
    };

    log::info!(
        "{} LOG_BATCH_COMPLETE records={} rejected={} range={:?}..{:?}",
        dev_ctx,
        session.log_count,
        session.rejected_count,
        session.start_date,
        session.end_date
    );

    Ok(LogBatchResult {
        session,
        device,
        records,
        rejected,
    })
}

/// Scan the first entries for the device serial and resolve it.
fn detect_device(
    entries: &[BTreeMap<String, String>],
    registry: &DeviceRegistry,
) -> Result<DeviceRecord, CoreError> {
    let devid = entries
        .iter()
        .take(DEVICE_DETECT_SCAN)
        .find_map(|e| e.get("devid").filter(|v| !v.is_empty()));

    let devid = match devid {
        Some(d) => d,
        None => {
            return Err(CoreError::ImportRejected {
                reason: format!(
                    "could not find a device serial (devid) in the first {} log entries",
                    DEVICE_DETECT_SCAN
                ),
            })
        }
    };

    registry.resolve_serial(devid).ok_or_else(|| {
        log::warn!("DEVICE_UNRESOLVED devid={}", devid);
        CoreError::ImportRejected {
            reason: format!(
                "device with serial \"{}\" is not registered; register the device first",
                devid
            ),
        }
    })
}

/// Single-pass summary statistics over the normalized records.
fn calculate_stats(records: &[LogRecord]) -> ImportStats {
    let mut stats = ImportStats::default();
    let mut talkers: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    let mut destinations: BTreeMap<String, (u64, u64)> = BTreeMap::new();

    for record in records {
        let action = record.action.clone().unwrap_or_else(|| "unknown".to_string());
        *stats.by_action.entry(action).or_default() += 1;

        let log_type = record
            .log_type
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        *stats.by_type.entry(log_type).or_default() += 1;

        if let Some(service) = &record.service {
            *stats.by_service.entry(service.clone()).or_default() += 1;
        }

        let vdom = record.vdom.clone().unwrap_or_else(|| "root".to_string());
        *stats.by_vdom.entry(vdom).or_default() += 1;

        if let Some(policy_id) = record.policy_id {
            *stats.by_policy.entry(policy_id.to_string()).or_default() += 1;
        }

        let bytes =
            (record.sent_bytes.unwrap_or(0) + record.rcvd_bytes.unwrap_or(0)).max(0) as u64;
        if let Some(src_ip) = &record.src_ip {
            let entry = talkers.entry(src_ip.clone()).or_default();
            entry.0 += 1;
            entry.1 += bytes;
        }
        if let Some(dst_ip) = &record.dst_ip {
            let entry = destinations.entry(dst_ip.clone()).or_default();
            entry.0 += 1;
            entry.1 += bytes;
        }
    }

    stats.top_talkers = top_by_bytes(talkers);
    stats.top_destinations = top_by_bytes(destinations);
    stats
}

fn top_by_bytes(map: BTreeMap<String, (u64, u64)>) -> Vec<TalkerStat> {
    let mut list: Vec<TalkerStat> = map
        .into_iter()
        .map(|(ip, (count, bytes))| TalkerStat { ip, count, bytes })
        .collect();
    list.sort_by(|a, b| b.bytes.cmp(&a.bytes));
    list.truncate(TOP_TALKER_LIMIT);
    list
}
