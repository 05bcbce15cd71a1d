//! Side-effecting adapters: filesystem, processes, oracle, and registry.

pub mod artifact_store;
pub mod attempt_log;
pub mod build;
pub mod config;
pub mod oracle;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod registry;
