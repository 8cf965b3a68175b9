//! SQL query builders.
//!
//! Generates SQL for the host's store. Actual execution is handled by
//! Python (asyncpg): the host binds the returned parameter list and
//! owns the transaction.
//!
//! Aggregation queries are built from an explicit list of typed
//! predicates - the query shape is fixed up front, never grown by
//! mutating a query object at runtime.

/// Columns of the log_entries table, with parameter placeholders.
pub fn get_log_entry_columns() -> Vec<(&'static str, &'static str)> {
    vec![
        ("device_id", "$1"),
        ("import_session_id", "$2"),
        ("timestamp", "$3"),
        ("itime", "$4"),
        ("eventtime", "$5"),
        ("devid", "$6"),
        ("devname", "$7"),
        ("vdom", "$8"),
        ("log_id", "$9"),
        ("log_type", "$10"),
        ("subtype", "$11"),
        ("level", "$12"),
        ("src_intf", "$13"),
        ("src_intf_role", "$14"),
        ("src_ip", "$15"),
        ("src_port", "$16"),
        ("src_country", "$17"),
        ("src_city", "$18"),
        ("src_mac", "$19"),
        ("dst_intf", "$20"),
        ("dst_intf_role", "$21"),
        ("dst_ip", "$22"),
        ("dst_port", "$23"),
        ("dst_country", "$24"),
        ("dst_city", "$25"),
        ("policy_id", "$26"),
        ("policy_uuid", "$27"),
        ("policy_type", "$28"),
        ("action", "$29"),
        ("protocol", "$30"),
        ("service", "$31"),
        ("app", "$32"),
        ("app_cat", "$33"),
        ("sent_bytes", "$34"),
        ("rcvd_bytes", "$35"),
        ("sent_pkts", "$36"),
        ("rcvd_pkts", "$37"),
        ("duration", "$38"),
        ("session_id", "$39"),
        ("nat_type", "$40"),
        ("raw_data", "$41"),
    ]
}

/// Build the INSERT for log_entries.
pub fn build_log_entry_insert() -> String {
    let columns = get_log_entry_columns();
    let col_names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    let placeholders: Vec<&str> = columns.iter().map(|(_, ph)| *ph).collect();

    format!(
        "INSERT INTO log_entries ({}) VALUES ({})",
        col_names.join(", "),
        placeholders.join(", ")
    )
}

/// Build the INSERT for policy_history. Append-only: history rows are
/// never updated or deleted.
pub fn build_history_insert() -> &'static str {
    r#"
    INSERT INTO policy_history
        (device_id, vdom, policy_id, policy_uuid, change_type, delta,
         snapshot, import_session_id, change_date)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
    "#
}

/// Build the INSERT for security_recommendations.
pub fn build_recommendation_insert() -> &'static str {
    r#"
    INSERT INTO security_recommendations
        (device_id, category, severity, title, description, recommendation,
         related_policy_id, related_vdom, cli_remediation, suggested_policy,
         evidence, affected_count, status, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
    "#
}

/// Build the affected_count refresh for an existing open
/// recommendation.
pub fn build_recommendation_refresh() -> &'static str {
    "UPDATE security_recommendations SET affected_count = $2 WHERE id = $1"
}

/// Build the INSERT for log_import_sessions.
pub fn build_import_session_insert() -> &'static str {
    r#"
    INSERT INTO log_import_sessions
        (id, device_id, filename, log_count, rejected_count,
         start_date, end_date, stats, imported_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
    "#
}

/// One typed predicate of an aggregation query. The bound value
/// travels alongside the SQL in the builder's parameter list.
#[derive(Debug, Clone)]
pub enum LogPredicate {
    DeviceId(String),
    Vdom(String),
    /// Lower bound of the lookback window (inclusive).
    TimestampAfter(String),
    ActionIn(Vec<String>),
    PolicyId(i64),
    /// Fixed noise exclusion: broadcast/multicast destinations.
    ExcludeBroadcast,
}

/// A grouped aggregation over log_entries: count per group, optional
/// having-threshold, bounded output. This is the only query shape the
/// analyzers use - raw log rows never cross into the core.
#[derive(Debug, Clone)]
pub struct AggregationQuery {
    pub group_by: Vec<&'static str>,
    pub predicates: Vec<LogPredicate>,
    pub having_min_count: Option<u64>,
    pub limit: Option<u64>,
}

impl AggregationQuery {
    /// Render the query and its bound parameters.
    pub fn build(&self) -> (String, Vec<String>) {
        let mut params: Vec<String> = Vec::new();
        let mut conditions: Vec<String> = Vec::new();

        for predicate in &self.predicates {
            match predicate {
                LogPredicate::DeviceId(id) => {
                    params.push(id.clone());
                    conditions.push(format!("device_id = ${}", params.len()));
                }
                LogPredicate::Vdom(vdom) => {
                    params.push(vdom.clone());
                    conditions.push(format!("vdom = ${}", params.len()));
                }
                LogPredicate::TimestampAfter(cutoff) => {
                    params.push(cutoff.clone());
                    conditions.push(format!("timestamp >= ${}", params.len()));
                }
                LogPredicate::ActionIn(actions) => {
                    let placeholders: Vec<String> = actions
                        .iter()
                        .map(|a| {
                            params.push(a.clone());
                            format!("${}", params.len())
                        })
                        .collect();
                    conditions.push(format!("action IN ({})", placeholders.join(", ")));
                }
                LogPredicate::PolicyId(pid) => {
                    params.push(pid.to_string());
                    conditions.push(format!("policy_id = ${}", params.len()));
                }
                LogPredicate::ExcludeBroadcast => {
                    conditions.push(
                        "dst_ip <> '255.255.255.255' AND dst_ip NOT LIKE '224.%'".to_string(),
                    );
                }
            }
        }

        let group_cols = self.group_by.join(", ");
        let mut sql = format!(
            "SELECT {}, COUNT(id) AS count FROM log_entries",
            group_cols
        );
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(" GROUP BY {}", group_cols));
        if let Some(min) = self.having_min_count {
            sql.push_str(&format!(" HAVING COUNT(id) > {}", min));
        }
        sql.push_str(" ORDER BY count DESC");
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        (sql, params)
    }
}

/// Distinct hit counts per policy in the window - feeds zombie
/// detection with one grouped query regardless of policy count.
pub fn policy_hits_query(device_id: &str, cutoff: &str) -> AggregationQuery {
    AggregationQuery {
        group_by: vec!["policy_id"],
        predicates: vec![
            LogPredicate::DeviceId(device_id.to_string()),
            LogPredicate::TimestampAfter(cutoff.to_string()),
        ],
        having_min_count: None,
        limit: None,
    }
}

/// Accepted flows for one policy, grouped by endpoint/service - feeds
/// least-privilege synthesis.
pub fn accepted_flows_query(
    device_id: &str,
    cutoff: &str,
    policy_id: i64,
    limit: u64,
) -> AggregationQuery {
    AggregationQuery {
        group_by: vec!["src_ip", "dst_ip", "service", "dst_port"],
        predicates: vec![
            LogPredicate::DeviceId(device_id.to_string()),
            LogPredicate::TimestampAfter(cutoff.to_string()),
            LogPredicate::PolicyId(policy_id),
            LogPredicate::ActionIn(vec!["accept".to_string()]),
        ],
        having_min_count: None,
        limit: Some(limit),
    }
}

/// Denied traffic groups over the threshold - feeds noisy-deny
/// detection.
pub fn denied_flows_query(
    device_id: &str,
    cutoff: &str,
    min_occurrences: u64,
    limit: u64,
) -> AggregationQuery {
    AggregationQuery {
        group_by: vec!["src_ip", "dst_ip", "service", "dst_port", "vdom"],
        predicates: vec![
            LogPredicate::DeviceId(device_id.to_string()),
            LogPredicate::TimestampAfter(cutoff.to_string()),
            LogPredicate::ActionIn(vec![
                "deny".to_string(),
                "blocked".to_string(),
                "dropped".to_string(),
            ]),
            LogPredicate::ExcludeBroadcast,
        ],
        having_min_count: Some(min_occurrences),
        limit: Some(limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_insert() {
        let query = build_log_entry_insert();
        assert!(query.contains("INSERT INTO log_entries"));
        assert!(query.contains("policy_id"));
        assert!(query.contains("raw_data"));
    }

    #[test]
    fn test_column_count() {
        let columns = get_log_entry_columns();
        assert_eq!(columns.len(), 41);
        assert_eq!(columns.last().unwrap().1, "$41");
    }

    #[test]
    fn test_history_insert_is_append_only() {
        let query = build_history_insert();
        assert!(query.contains("INSERT INTO policy_history"));
        assert!(query.contains("change_type"));
        assert!(!query.to_uppercase().contains("UPDATE"));
    }

    #[test]
    fn test_policy_hits_query() {
        let (sql, params) = policy_hits_query("dev1", "2026-01-01T00:00:00").build();
        assert_eq!(
            sql,
            "SELECT policy_id, COUNT(id) AS count FROM log_entries \
             WHERE device_id = $1 AND timestamp >= $2 \
             GROUP BY policy_id ORDER BY count DESC"
        );
        assert_eq!(params, vec!["dev1", "2026-01-01T00:00:00"]);
    }

    #[test]
    fn test_denied_flows_query_threshold_and_limit() {
        let (sql, params) = denied_flows_query("dev1", "2026-01-01T00:00:00", 100, 10).build();
        assert!(sql.contains("action IN ($3, $4, $5)"));
        assert!(sql.contains("HAVING COUNT(id) > 100"));
        assert!(sql.contains("LIMIT 10"));
        assert!(sql.contains("dst_ip <> '255.255.255.255'"));
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_accepted_flows_query_scoped_to_policy() {
        let (sql, params) = accepted_flows_query("dev1", "2026-01-01T00:00:00", 42, 20).build();
        assert!(sql.contains("policy_id = $3"));
        assert!(sql.contains("action IN ($4)"));
        assert!(sql.contains("LIMIT 20"));
        assert_eq!(params[2], "42");
    }
}
