//! Structured logging with import context.
//!
//! Provides a display context that includes import_id, device_id and
//! VDOM scope in every log message for easy correlation.

pub mod structured;

pub use structured::*;
