pub mod aggregator;
pub mod cluster;
pub mod config;
pub mod discoverer;
mod error;
pub mod metrics;
pub mod reconciler;
pub mod registry;
mod runtime;
pub mod services;

#[cfg(test)]
mod testing;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use runtime::{CycleReport, Orchestrator, start_sync_loop};
