use anyhow::Result;
use async_trait::async_trait;

use crate::app_config::SourceConfig;
use crate::backends::{file, in_mem, postgres};
use crate::common::{Cursor, SourceRecord};

/// 🚰 A source that hands out one bounded, ordered page per call.
///
/// Implement this trait and you too can be the origin of someone else's cache problems.
///
/// # Contract 📜
/// - `fetch_page(page_size, cursor)` returns at most `page_size` records starting at `cursor`,
///   in a stable order (same key, same position, every call, all run long).
/// - Fewer than `page_size` records means the well is dry. The paginator takes it from there.
/// - An `Err` means the source stopped answering. That's fatal, not a short page.
/// - The borrow checker demands `&mut self` because sources have state. And feelings. Mostly state.
#[async_trait]
pub(crate) trait Source: std::fmt::Debug + Send {
    /// 📄 One round trip, one page.
    async fn fetch_page(&mut self, page_size: usize, cursor: Cursor) -> Result<Vec<SourceRecord>>;

    /// 🔢 How many records to expect, if the source knows. Feeds the progress bar, nothing else.
    fn expected_total(&self) -> Option<u64> {
        None
    }

    /// 🏷️ Human label for logs and the summary table.
    fn describe(&self) -> String;

    /// 🗑️ Let go of the connection. Called on every exit path. Always. Even the sad ones.
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 The many faces of a Source — a polymorphic casting call for record origins.
///
/// Each variant wraps a concrete source implementation. The enum itself dispatches
/// via `impl Source for SourceBackend`, so the supervisor never needs to know (or care)
/// whether it's reading from RAM, disk, or a PostgreSQL box that hasn't been rebooted since 2019.
///
/// Ancient proverb: "He who hardcodes the backend, refills only once."
#[derive(Debug)]
pub(crate) enum SourceBackend {
    InMemory(in_mem::InMemorySource),
    File(file::FileSource),
    Postgres(postgres::PostgresSource),
}

impl SourceBackend {
    /// 🏗️ Open whatever the config points at. Connection failures come back tagged
    /// `FatalError::Connectivity` from the concrete constructors.
    pub(crate) async fn from_config(config: &SourceConfig) -> Result<Self> {
        Ok(match config {
            SourceConfig::Postgres(pg) => {
                SourceBackend::Postgres(postgres::PostgresSource::new(pg.clone()).await?)
            }
            SourceConfig::File(f) => SourceBackend::File(file::FileSource::new(f.clone()).await?),
            SourceConfig::InMemory(m) => {
                SourceBackend::InMemory(in_mem::InMemorySource::from_config(m))
            }
        })
    }
}

#[async_trait]
impl Source for SourceBackend {
    async fn fetch_page(&mut self, page_size: usize, cursor: Cursor) -> Result<Vec<SourceRecord>> {
        match self {
            SourceBackend::InMemory(s) => s.fetch_page(page_size, cursor).await,
            SourceBackend::File(s) => s.fetch_page(page_size, cursor).await,
            SourceBackend::Postgres(s) => s.fetch_page(page_size, cursor).await,
        }
    }

    fn expected_total(&self) -> Option<u64> {
        match self {
            SourceBackend::InMemory(s) => s.expected_total(),
            SourceBackend::File(s) => s.expected_total(),
            SourceBackend::Postgres(s) => s.expected_total(),
        }
    }

    fn describe(&self) -> String {
        match self {
            SourceBackend::InMemory(s) => s.describe(),
            SourceBackend::File(s) => s.describe(),
            SourceBackend::Postgres(s) => s.describe(),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SourceBackend::InMemory(s) => s.close().await,
            SourceBackend::File(s) => s.close().await,
            SourceBackend::Postgres(s) => s.close().await,
        }
    }
}
