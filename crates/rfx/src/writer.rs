//! 🧵 The batch writer — the part that actually touches the target after the clear.
//!
//! 🎬 *[a page arrives. ten thousand entries. the writer cuts it into chunks.]*
//! *[two workers grab chunks off a channel. they come back in whatever order they please.]*
//! *[the writer puts them back in order. every entry gets exactly one verdict.]*
//!
//! ## Shape 📐
//! ```text
//!   page entries ──split──▶ [chunk 0][chunk 1][chunk 2]...
//!                               │ async_channel (bounded)
//!                     ┌─────────┴─────────┐
//!                 SinkWorker 0 ...   SinkWorker N-1     (sink_parallelism)
//!                     └─────────┬─────────┘
//!                               │ async_channel (seq, outcomes)
//!   outcomes ◀──reassemble by seq── verify: nothing dropped, nothing doubled
//! ```
//!
//! ⚠️ Writes are only legal after `prepare()` succeeds. The clear is the replace
//! precondition; writing into the old collection would be a merge, not a refill.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::app_config::RuntimeConfig;
use crate::backends::{Sink, SinkBackend};
use crate::common::{ItemOutcome, TargetEntry};
use crate::errors::FatalError;
use crate::retry::RetryPolicy;

mod sink_worker;
use sink_worker::{Chunk, ChunkResult, SinkWorker};

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!" — Seinfeld, on Rust
pub(crate) trait Worker {
    /// 🚀 Start the worker. Returns a JoinHandle because we trust
    /// but verify. Mostly verify.
    fn start(self) -> JoinHandle<Result<()>>;
}

/// ⏱️🔁 How each chunk submission is bounded and retried.
#[derive(Debug, Clone)]
pub(crate) struct SubmitPolicy {
    pub(crate) timeout: Duration,
    pub(crate) retry: RetryPolicy,
}

#[derive(Debug)]
pub(crate) struct BatchWriter {
    sink: Arc<SinkBackend>,
    chunk_size: usize,
    parallelism: usize,
    submit: SubmitPolicy,
    prepared: bool,
}

impl BatchWriter {
    pub(crate) fn new(sink: Arc<SinkBackend>, runtime: &RuntimeConfig) -> Self {
        Self {
            sink,
            chunk_size: runtime.bulk_chunk_size.max(1),
            parallelism: runtime.sink_parallelism.max(1),
            submit: SubmitPolicy {
                timeout: Duration::from_secs(runtime.batch_timeout_secs),
                retry: runtime.write_retry.clone(),
            },
            prepared: false,
        }
    }

    /// 🗑️ Clear the target collection. Once per run; a second call is a no-op.
    ///
    /// Failure → `FatalError::ClearTarget`, and nothing gets written.
    pub(crate) async fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            debug!("🗑️ prepare() already ran for this run; not clearing twice");
            return Ok(());
        }
        let collection = self.sink.collection().to_string();
        self.sink
            .clear()
            .await
            .with_context(|| FatalError::ClearTarget(collection.clone()))?;
        self.prepared = true;
        info!("🗑️ Target collection '{collection}' cleared and ready for writes");
        Ok(())
    }

    /// 📡 Write one page worth of entries. One verdict per entry, in input order.
    ///
    /// A chunk that keeps timing out (or keeps losing its connection) through every retry
    /// ends the run with `FatalError::Connectivity`.
    pub(crate) async fn write_batch(&self, entries: Vec<TargetEntry>) -> Result<Vec<ItemOutcome>> {
        if !self.prepared {
            bail!("💀 write_batch called before prepare(). Refusing to merge into a collection we never cleared.");
        }
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let expected = entries.len();
        let chunks = split_into_chunks(entries, self.chunk_size);
        let chunk_count = chunks.len();
        let workers = self.parallelism.min(chunk_count);

        let (job_tx, job_rx) = async_channel::bounded::<Chunk>(workers);
        let (done_tx, done_rx) = async_channel::unbounded::<ChunkResult>();

        let handles: Vec<JoinHandle<Result<()>>> = (0..workers)
            .map(|id| {
                SinkWorker::new(
                    id,
                    job_rx.clone(),
                    done_tx.clone(),
                    self.sink.clone(),
                    self.submit.clone(),
                )
                .start()
            })
            .collect();
        drop(job_rx);
        drop(done_tx);

        for chunk in chunks {
            // -- 💀 every worker already quit, which means one of them has an error for us below
            if job_tx.send(chunk).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        for joined in futures::future::join_all(handles).await {
            joined.context("💀 a sink worker panicked. That's not a verdict, that's a crater.")??;
        }

        let mut slots: Vec<Option<Vec<ItemOutcome>>> = vec![None; chunk_count];
        while let Ok(result) = done_rx.try_recv() {
            let Some(slot) = slots.get_mut(result.seq) else {
                bail!("💀 a chunk came back with sequence {} out of {chunk_count}", result.seq);
            };
            if slot.is_some() {
                bail!("💀 chunk {} came back twice", result.seq);
            }
            *slot = Some(result.outcomes);
        }

        let mut outcomes = Vec::with_capacity(expected);
        for (seq, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(chunk_outcomes) => outcomes.extend(chunk_outcomes),
                None => bail!("💀 chunk {seq} never came back"),
            }
        }
        if outcomes.len() != expected {
            bail!(
                "💀 {} entries went in, {} verdicts came out",
                expected,
                outcomes.len()
            );
        }
        Ok(outcomes)
    }
}

fn split_into_chunks(entries: Vec<TargetEntry>, chunk_size: usize) -> Vec<Chunk> {
    let mut chunks = Vec::with_capacity(entries.len().div_ceil(chunk_size));
    let mut iter = entries.into_iter().peekable();
    let mut seq = 0;
    while iter.peek().is_some() {
        chunks.push(Chunk {
            seq,
            entries: iter.by_ref().take(chunk_size).collect(),
        });
        seq += 1;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::in_mem::InMemorySink;
    use std::sync::atomic::Ordering;

    fn kv(i: usize) -> TargetEntry {
        TargetEntry::KeyValue {
            key: format!("k{i:05}"),
            value: i.to_string(),
        }
    }

    fn runtime(chunk: usize, parallelism: usize) -> RuntimeConfig {
        RuntimeConfig {
            bulk_chunk_size: chunk,
            sink_parallelism: parallelism,
            batch_timeout_secs: 5,
            write_retry: RetryPolicy {
                max_attempts: 2,
                initial_interval_ms: 1,
                multiplier: 1.0,
                max_interval_ms: 1,
            },
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test]
    async fn the_one_where_outcomes_come_back_in_submission_order() -> Result<()> {
        let sink = InMemorySink::default()
            .rejecting(["k00007"])
            .with_write_delay(Duration::from_millis(5));
        let probe = sink.clone();
        let mut writer = BatchWriter::new(Arc::new(SinkBackend::InMemory(sink)), &runtime(3, 4));
        writer.prepare().await?;

        let outcomes = writer.write_batch((0..20).map(kv).collect()).await?;

        assert_eq!(outcomes.len(), 20);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.key(), format!("k{i:05}"));
        }
        assert!(!outcomes[7].is_success());
        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 19);

        let mut sizes = probe.chunk_sizes.lock().expect("sizes").clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![2, 3, 3, 3, 3, 3, 3]);
        assert!(probe.peak_in_flight.load(Ordering::SeqCst) <= 4);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_parallel_workers_actually_overlap() -> Result<()> {
        let sink = InMemorySink::default().with_write_delay(Duration::from_millis(30));
        let probe = sink.clone();
        let mut writer = BatchWriter::new(Arc::new(SinkBackend::InMemory(sink)), &runtime(1, 2));
        writer.prepare().await?;
        writer.write_batch((0..6).map(kv).collect()).await?;
        assert_eq!(probe.peak_in_flight.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_writing_before_clearing_is_refused() {
        let writer = BatchWriter::new(
            Arc::new(SinkBackend::InMemory(InMemorySink::default())),
            &runtime(10, 1),
        );
        assert!(writer.write_batch(vec![kv(1)]).await.is_err());
    }

    #[tokio::test]
    async fn the_one_where_prepare_only_clears_once() -> Result<()> {
        let sink = InMemorySink::default();
        let probe = sink.clone();
        let mut writer = BatchWriter::new(Arc::new(SinkBackend::InMemory(sink)), &runtime(10, 1));
        writer.prepare().await?;
        writer.write_batch(vec![kv(1)]).await?;
        writer.prepare().await?;
        assert_eq!(probe.clears.load(Ordering::SeqCst), 1);
        assert_eq!(probe.snapshot().await.len(), 1, "the second prepare must not wipe writes");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_clear_is_a_clear_target_error() {
        let mut writer = BatchWriter::new(
            Arc::new(SinkBackend::InMemory(InMemorySink::default().failing_clear())),
            &runtime(10, 1),
        );
        let err = writer.prepare().await.expect_err("clear must fail");
        assert_eq!(FatalError::classify(&err).map(FatalError::exit_code), Some(4));
    }

    #[tokio::test]
    async fn the_one_where_a_slow_target_exhausts_retries() {
        let sink = InMemorySink::default().with_write_delay(Duration::from_millis(200));
        let probe = sink.clone();
        let mut writer = BatchWriter::new(Arc::new(SinkBackend::InMemory(sink)), &runtime(10, 1));
        writer.submit.timeout = Duration::from_millis(20);
        writer.prepare().await.expect("clear works");

        let err = writer
            .write_batch(vec![kv(1)])
            .await
            .expect_err("every attempt times out");
        assert!(matches!(
            FatalError::classify(&err),
            Some(FatalError::Connectivity(_))
        ));
        assert_eq!(probe.write_calls.load(Ordering::SeqCst), 2, "one try + one retry");
    }

    #[tokio::test]
    async fn the_one_where_a_dropped_connection_recovers_on_retry() -> Result<()> {
        let sink = InMemorySink::default().flaky_for(1);
        let probe = sink.clone();
        let mut writer = BatchWriter::new(Arc::new(SinkBackend::InMemory(sink)), &runtime(10, 1));
        writer.prepare().await?;
        let outcomes = writer.write_batch(vec![kv(1), kv(2)]).await?;
        assert!(outcomes.iter().all(ItemOutcome::is_success));
        assert_eq!(probe.write_calls.load(Ordering::SeqCst), 2);
        assert_eq!(probe.snapshot().await.len(), 2);
        Ok(())
    }

    #[test]
    fn the_one_where_chunks_are_numbered_in_order() {
        let chunks = split_into_chunks((0..7).map(kv).collect(), 3);
        let sizes: Vec<(usize, usize)> = chunks.iter().map(|c| (c.seq, c.entries.len())).collect();
        assert_eq!(sizes, vec![(0, 3), (1, 3), (2, 1)]);
    }
}
