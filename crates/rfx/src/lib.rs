//! 🚰 refill — burn the collection down, page the system of record back in.
//!
//! Read a source in bounded pages, shape every record into a target entry, and bulk-load
//! the entries into a target collection that was cleared first. Rerun it as often as you
//! like: same source, same collection. 🦆

pub mod app_config;
pub mod common;
pub mod errors;
pub mod retry;
pub mod transforms;
pub mod verifier;

pub(crate) mod backends;
pub(crate) mod paginator;
pub(crate) mod progress;
pub(crate) mod supervisors;
pub(crate) mod writer;

use anyhow::Result;

use crate::app_config::AppConfig;
use crate::supervisors::Supervisor;

pub use crate::supervisors::{RunPhase, RunReport};

/// 🚀 One refill, INIT to DONE. Fatal errors carry a `FatalError` marker for the exit code.
pub async fn run(app_config: AppConfig) -> Result<RunReport> {
    Supervisor::new(app_config).run().await
}
