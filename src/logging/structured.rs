//! Structured logging utilities.
//!
//! Provides context-aware logging with import_id, device_id and VDOM
//! scope included in every log message.

use std::fmt;

/// Logging context for one ingestion or audit call.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub import_id: String,
    pub device_id: Option<String>,
    pub scope: Option<String>,
}

impl LogContext {
    pub fn new(import_id: &str) -> Self {
        Self {
            import_id: import_id.to_string(),
            device_id: None,
            scope: None,
        }
    }

    pub fn with_device(&self, device_id: &str) -> Self {
        Self {
            import_id: self.import_id.clone(),
            device_id: Some(device_id.to_string()),
            scope: self.scope.clone(),
        }
    }

    pub fn with_scope(&self, scope: &str) -> Self {
        Self {
            import_id: self.import_id.clone(),
            device_id: self.device_id.clone(),
            scope: Some(scope.to_string()),
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[import={}]", self.import_id)?;
        if let Some(dev) = &self.device_id {
            write!(f, " [device={}]", dev)?;
        }
        if let Some(scope) = &self.scope {
            write!(f, " [vdom={}]", scope)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_display() {
        let ctx = LogContext::new("import-123");
        assert_eq!(format!("{}", ctx), "[import=import-123]");

        let ctx_dev = ctx.with_device("fg-01");
        assert_eq!(format!("{}", ctx_dev), "[import=import-123] [device=fg-01]");

        let ctx_scoped = ctx_dev.with_scope("root");
        assert_eq!(
            format!("{}", ctx_scoped),
            "[import=import-123] [device=fg-01] [vdom=root]"
        );
    }
}
