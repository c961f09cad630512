use anyhow::Result;
use async_trait::async_trait;

use crate::app_config::SinkConfig;
use crate::backends::{elasticsearch, in_mem, valkey};
use crate::common::{ItemOutcome, TargetEntry};

/// 🕳️ A sink that owns one named collection and knows how to replace it wholesale.
///
/// The yin to the source's yang. The drain at the bottom of the pipeline tub.
///
/// # Contract 📜
/// - Every method takes `&self`: the writer fires several chunks at the same sink
///   concurrently, so the sink is shared behind an `Arc` and must be `Sync`.
/// - `probe_ready` is ONE readiness check. The caller owns the retry loop.
/// - `clear` removes every entry in the collection and leaves it ready for writes.
/// - `write_batch` returns exactly one `ItemOutcome` per entry, in submission order.
///   A per-item rejection is an `ItemOutcome::Failed`, NOT an `Err`.
///   `Err` is reserved for "the whole call failed" (transport, timeout, refused).
/// - `close` MUST be called. Skipping `close` is a bug. It is also considered rude.
#[async_trait]
pub(crate) trait Sink: std::fmt::Debug + Send + Sync {
    /// 🏷️ hash key, index name, etc.
    fn collection(&self) -> &str;

    /// 🩺 "Are you up?" One ask, one answer.
    async fn probe_ready(&self) -> Result<()>;

    /// 🗑️ The replace precondition. Burn it down so we can build it back up.
    async fn clear(&self) -> Result<()>;

    /// 📡 Write one chunk, report one verdict per entry.
    async fn write_batch(&self, entries: &[TargetEntry]) -> Result<Vec<ItemOutcome>>;

    /// 🔄 Make everything written so far visible to reads. Most sinks are already there.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// 🔢 How many entries the collection holds right now.
    async fn count(&self) -> Result<u64>;

    /// 🔍 One representative read, rendered for a log line. `None` = collection is empty.
    async fn sample(&self) -> Result<Option<String>>;

    /// 🗑️ Flush, finalize, and release. Call this. Always. No exceptions. Not even on Fridays.
    async fn close(&self) -> Result<()>;
}

/// 🎭 The many faces of a Sink — a polymorphic casting call for collection replacers.
///
/// Mirrors `SourceBackend` on the other end of the pipeline. Whoever designed this
/// was clearly a fan of symmetry. Or they ran out of ideas. Hard to tell.
#[derive(Debug)]
pub(crate) enum SinkBackend {
    InMemory(in_mem::InMemorySink),
    Valkey(valkey::ValkeySink),
    Elasticsearch(elasticsearch::ElasticsearchSink),
}

impl SinkBackend {
    /// 🏗️ Connect to whatever the config points at. Unreachable → `FatalError::Connectivity`.
    pub(crate) async fn from_config(config: &SinkConfig) -> Result<Self> {
        Ok(match config {
            SinkConfig::Valkey(c) => SinkBackend::Valkey(valkey::ValkeySink::new(c.clone()).await?),
            SinkConfig::Elasticsearch(c) => {
                SinkBackend::Elasticsearch(elasticsearch::ElasticsearchSink::new(c.clone()).await?)
            }
            SinkConfig::InMemory(c) => SinkBackend::InMemory(in_mem::InMemorySink::from_config(c)),
        })
    }
}

#[async_trait]
impl Sink for SinkBackend {
    fn collection(&self) -> &str {
        match self {
            SinkBackend::InMemory(sink) => sink.collection(),
            SinkBackend::Valkey(sink) => sink.collection(),
            SinkBackend::Elasticsearch(sink) => sink.collection(),
        }
    }

    async fn probe_ready(&self) -> Result<()> {
        match self {
            SinkBackend::InMemory(sink) => sink.probe_ready().await,
            SinkBackend::Valkey(sink) => sink.probe_ready().await,
            SinkBackend::Elasticsearch(sink) => sink.probe_ready().await,
        }
    }

    async fn clear(&self) -> Result<()> {
        match self {
            SinkBackend::InMemory(sink) => sink.clear().await,
            SinkBackend::Valkey(sink) => sink.clear().await,
            SinkBackend::Elasticsearch(sink) => sink.clear().await,
        }
    }

    async fn write_batch(&self, entries: &[TargetEntry]) -> Result<Vec<ItemOutcome>> {
        match self {
            SinkBackend::InMemory(sink) => sink.write_batch(entries).await,
            SinkBackend::Valkey(sink) => sink.write_batch(entries).await,
            SinkBackend::Elasticsearch(sink) => sink.write_batch(entries).await,
        }
    }

    async fn refresh(&self) -> Result<()> {
        match self {
            SinkBackend::InMemory(sink) => sink.refresh().await,
            SinkBackend::Valkey(sink) => sink.refresh().await,
            SinkBackend::Elasticsearch(sink) => sink.refresh().await,
        }
    }

    async fn count(&self) -> Result<u64> {
        match self {
            SinkBackend::InMemory(sink) => sink.count().await,
            SinkBackend::Valkey(sink) => sink.count().await,
            SinkBackend::Elasticsearch(sink) => sink.count().await,
        }
    }

    async fn sample(&self) -> Result<Option<String>> {
        match self {
            SinkBackend::InMemory(sink) => sink.sample().await,
            SinkBackend::Valkey(sink) => sink.sample().await,
            SinkBackend::Elasticsearch(sink) => sink.sample().await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            SinkBackend::InMemory(sink) => sink.close().await,
            SinkBackend::Valkey(sink) => sink.close().await,
            SinkBackend::Elasticsearch(sink) => sink.close().await,
        }
    }
}
