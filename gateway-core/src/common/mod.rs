//! Small helpers shared across the dispatch engine modules.

pub mod duration_serde;
