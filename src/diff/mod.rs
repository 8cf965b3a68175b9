//! Policy diff module.
//!
//! Reconciles policy baselines against new imports with full audit
//! history, and groups policies by content signature for duplicate and
//! shadow detection.

pub mod engine;
pub mod signature;

pub use engine::*;
pub use signature::*;
