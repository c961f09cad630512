//! 🎬 *[a channel fills with chunks. somewhere, a sink waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 🗑️ The SinkWorker. Deeply unbothered by the chaos happening upstream.
//! It receives chunks. It writes chunks. It reports back with the chunk's sequence
//! number so the writer can put the verdicts back in order.
//!
//! 🦆 (the duck has no comment at this time)

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{SubmitPolicy, Worker};
use crate::backends::{Sink, SinkBackend};
use crate::common::{ItemOutcome, TargetEntry};
use crate::errors::FatalError;
use crate::retry::with_backoff;

/// 🧩 A slice of one page, tagged with its position.
#[derive(Debug)]
pub(crate) struct Chunk {
    pub(crate) seq: usize,
    pub(crate) entries: Vec<TargetEntry>,
}

/// 📬 One verdict per entry of chunk `seq`, in the chunk's order.
#[derive(Debug)]
pub(crate) struct ChunkResult {
    pub(crate) seq: usize,
    pub(crate) outcomes: Vec<ItemOutcome>,
}

/// 🗑️ The SinkWorker: takes chunks from a channel, throws them at the shared sink.
#[derive(Debug)]
pub(crate) struct SinkWorker {
    id: usize,
    rx: Receiver<Chunk>,
    tx: Sender<ChunkResult>,
    sink: Arc<SinkBackend>,
    submit: SubmitPolicy,
}

impl SinkWorker {
    /// 🏗️ You hand it a receiver (the chunk firehose), a sender (the verdict chute),
    /// and the sink. It does not judge. It does not negotiate.
    pub(crate) fn new(
        id: usize,
        rx: Receiver<Chunk>,
        tx: Sender<ChunkResult>,
        sink: Arc<SinkBackend>,
        submit: SubmitPolicy,
    ) -> Self {
        Self {
            id,
            rx,
            tx,
            sink,
            submit,
        }
    }

    /// 📡 One chunk, bounded by the timeout, retried per policy. Exhaustion is fatal.
    async fn submit_chunk(&self, chunk: &Chunk) -> Result<Vec<ItemOutcome>> {
        let sink = &self.sink;
        let entries = chunk.entries.as_slice();
        let timeout = self.submit.timeout;
        let what = format!(
            "chunk {} ({} entries) → '{}'",
            chunk.seq,
            entries.len(),
            sink.collection()
        );

        let outcomes = with_backoff(&self.submit.retry, &what, move |attempt| async move {
            match tokio::time::timeout(timeout, sink.write_batch(entries)).await {
                Ok(result) => result,
                Err(_) => bail!("⏱️ attempt {attempt} timed out after {timeout:?}"),
            }
        })
        .await
        .with_context(|| FatalError::Connectivity(format!("target '{}'", sink.collection())))?;

        if outcomes.len() != entries.len() {
            bail!(
                "💀 the sink returned {} verdicts for {} entries in chunk {}",
                outcomes.len(),
                entries.len(),
                chunk.seq
            );
        }
        Ok(outcomes)
    }
}

impl Worker for SinkWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("📥 SinkWorker {} started draining the chunk channel", self.id);
            loop {
                match self.rx.recv().await {
                    Ok(chunk) => {
                        debug!(
                            "🪣 SinkWorker {} took chunk {} ({} entries)",
                            self.id,
                            chunk.seq,
                            chunk.entries.len()
                        );
                        let outcomes = self.submit_chunk(&chunk).await?;
                        self.tx
                            .send(ChunkResult {
                                seq: chunk.seq,
                                outcomes,
                            })
                            .await
                            .context("💀 SinkWorker finished a chunk but nobody was listening")?;
                    }
                    Err(_) => {
                        // Channel is empty and closed
                        debug!("🏁 SinkWorker {}: channel closed. Shutting down.", self.id);
                        return Ok(());
                    }
                }
            }
        })
    }
}
