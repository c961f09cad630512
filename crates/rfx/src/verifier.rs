//! 🔍 Verifier — "did it all land?" asked politely, after the fact.
//!
//! Refresh (if the target needs it), count, compare with what we think we wrote, and
//! optionally peek at one entry. Nothing in here is allowed to fail the run: a count
//! that doesn't match is a warning in the summary, not an exit code. The data already
//! landed (or didn't). Yelling at it now changes nothing.

use tracing::{info, warn};

use crate::backends::Sink;

/// 🔍 Outcome of the one representative read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanityRead {
    /// 🙈 turned off in `[runtime]`
    Skipped,
    Found(String),
    /// 📭 the collection answered, and it had nothing to say
    Empty,
    Failed(String),
}

impl std::fmt::Display for SanityRead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SanityRead::Skipped => write!(f, "skipped"),
            SanityRead::Found(sample) => write!(f, "{sample}"),
            SanityRead::Empty => write!(f, "(collection is empty)"),
            SanityRead::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// 📋 What the target says it holds vs. what we think we wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// ✅ successful writes this run
    pub expected: u64,
    /// 🔢 `None` when the count itself could not be read
    pub observed: Option<u64>,
    pub sanity: SanityRead,
}

impl Verification {
    pub fn matched(&self) -> bool {
        self.observed == Some(self.expected)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Verifier {
    sanity_check: bool,
}

impl Verifier {
    pub(crate) fn new(sanity_check: bool) -> Self {
        Self { sanity_check }
    }

    pub(crate) async fn verify<S>(&self, sink: &S, expected: u64) -> Verification
    where
        S: Sink + ?Sized,
    {
        let collection = sink.collection();

        if let Err(err) = sink.refresh().await {
            // -- 🐢 the count below may lag. it's a warning, the count still gets a shot.
            warn!("⚠️ Could not refresh '{collection}' before counting: {err:#}");
        }

        let observed = match sink.count().await {
            Ok(count) => Some(count),
            Err(err) => {
                warn!("⚠️ Could not count entries in '{collection}': {err:#}");
                None
            }
        };

        match observed {
            Some(count) if count == expected => {
                info!("✅ '{collection}' holds {count} entries, exactly what we wrote")
            }
            Some(count) => warn!(
                "⚠️ '{collection}' holds {count} entries but we wrote {expected}. \
                 Someone else is writing, or something went missing."
            ),
            None => {}
        }

        let sanity = if self.sanity_check {
            match sink.sample().await {
                Ok(Some(sample)) => {
                    info!("🔍 Sample from '{collection}': {sample}");
                    SanityRead::Found(sample)
                }
                Ok(None) => {
                    warn!("📭 Sanity read on '{collection}' came back empty");
                    SanityRead::Empty
                }
                Err(err) => {
                    warn!("⚠️ Sanity read on '{collection}' failed: {err:#}");
                    SanityRead::Failed(format!("{err:#}"))
                }
            }
        } else {
            SanityRead::Skipped
        };

        Verification {
            expected,
            observed,
            sanity,
        }
    }
}
