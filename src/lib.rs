// Public API - probing engines, statistics, and export functions
pub mod config;
pub mod export;
pub mod lookup;
pub mod ping;
pub mod probe;
pub mod stats;
pub mod trace;

// Internal implementation - not part of public API
pub(crate) mod cli;
