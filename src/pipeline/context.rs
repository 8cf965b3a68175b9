//! Pipeline context management.
//!
//! Provides the per-call import context used for session ids and
//! logging correlation.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::logging::structured::LogContext;

/// Context for one ingestion or audit call.
#[derive(Debug, Clone)]
pub struct ImportContext {
    pub import_id: String,
    pub started_at: DateTime<Utc>,
    pub filename: Option<String>,
}

impl ImportContext {
    pub fn new(filename: Option<&str>) -> Self {
        let import_id = format!("import-{}", &Uuid::new_v4().to_string()[..8]);
        Self {
            import_id,
            started_at: Utc::now(),
            filename: filename.map(|s| s.to_string()),
        }
    }

    pub fn log_context(&self) -> LogContext {
        LogContext::new(&self.import_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_ids_are_unique() {
        let a = ImportContext::new(None);
        let b = ImportContext::new(Some("export.log"));
        assert_ne!(a.import_id, b.import_id);
        assert!(a.import_id.starts_with("import-"));
        assert_eq!(b.filename.as_deref(), Some("export.log"));
    }
}
