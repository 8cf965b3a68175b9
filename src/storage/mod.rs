//! Storage module.
//!
//! SQL query builders and database models.
//! Note: Actual database operations are handled by Python (asyncpg).
//! This module provides query building helpers, the record types that
//! cross the boundary, and the store capability probe.

pub mod capabilities;
pub mod models;
pub mod queries;

pub use capabilities::*;
pub use models::*;
pub use queries::*;
