//! CLI command implementations.

pub mod check_disk;
pub mod clean;
pub mod fallback;
pub mod initialize;
pub mod run;
