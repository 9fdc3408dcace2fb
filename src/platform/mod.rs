//! Platform capabilities.

pub mod hidden;
