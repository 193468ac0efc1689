//! Small shared helpers used across engine modules.

pub mod duration_serde;

pub use duration_serde::parse_duration;
