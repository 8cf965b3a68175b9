//! Traffic log parsing module.
//!
//! Two passes over FortiAnalyzer-style exports:
//! - Tokenizer: quoted `field=value` pairs per line, escaped-quote aware
//! - Normalizer: vendor fields onto the canonical LogRecord set with
//!   soft numeric/timestamp coercion

pub mod normalize;
pub mod tokenizer;

pub use normalize::*;
pub use tokenizer::*;
