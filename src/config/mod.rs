//! Configuration parsing module.
//!
//! Best-effort parsing of FortiGate-style configuration exports:
//! - Block/entry/token scanning with VDOM scope tracking
//! - Section parsers for system, HA, interfaces, objects and policies

pub mod parser;
pub mod scanner;

pub use parser::*;
pub use scanner::*;
