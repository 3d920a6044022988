//! Batch processing of report records.

pub mod analyze;
pub mod work;
