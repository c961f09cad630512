use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::backends::Sink;
use crate::common::{ItemOutcome, TargetEntry};

/// 🧠 Config for the in-memory sink. Mostly a dry-run target: everything lands in RAM
/// and evaporates when the process exits.
#[derive(Debug, Deserialize, Clone)]
pub struct InMemorySinkConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    /// 🙅 keys the sink will refuse, one `ItemOutcome::Failed` each
    #[serde(default)]
    pub reject_keys: Vec<String>,
}

fn default_collection() -> String {
    "in-memory".to_string()
}

impl Default for InMemorySinkConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            reject_keys: Vec::new(),
        }
    }
}

/// 📦 A sink that never forgets. Unlike my dad, who forgot my soccer game in 1998.
///
/// 🔒 The store is an `Arc<Mutex<BTreeMap>>`: shared with the test that built it, one writer
/// at a time, sorted so assertions don't depend on hash order. Documents are stored
/// as their serialized JSON so both entry shapes fit in one map.
///
/// 🎭 Knobs for misbehaving on purpose live on the struct and are set with the
/// builder-ish methods below. Every one of them exists because a failure path needs a test.
#[derive(Debug, Clone)]
pub(crate) struct InMemorySink {
    collection: String,
    pub(crate) store: Arc<tokio::sync::Mutex<BTreeMap<String, String>>>,
    reject_keys: Arc<HashSet<String>>,
    unreachable: bool,
    fail_clear: bool,
    /// 💀 every `write_batch` call after this many successful calls returns `Err`
    fail_writes_after: Option<usize>,
    /// 🔁 the first N `write_batch` calls return `Err`, then it behaves
    flaky_writes: usize,
    write_delay: Option<Duration>,
    /// 🧮 pretend the collection holds this many more (or fewer) entries than it does
    count_skew: i64,
    pub(crate) clears: Arc<AtomicUsize>,
    pub(crate) write_calls: Arc<AtomicUsize>,
    /// 📏 sizes of every chunk received, in arrival order
    pub(crate) chunk_sizes: Arc<std::sync::Mutex<Vec<usize>>>,
    in_flight: Arc<AtomicUsize>,
    /// 🧵 the most chunks ever in flight at once
    pub(crate) peak_in_flight: Arc<AtomicUsize>,
    pub(crate) closed: Arc<AtomicBool>,
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::from_config(&InMemorySinkConfig::default())
    }
}

impl InMemorySink {
    pub(crate) fn from_config(config: &InMemorySinkConfig) -> Self {
        Self {
            collection: config.collection.clone(),
            store: Arc::new(tokio::sync::Mutex::new(BTreeMap::new())),
            reject_keys: Arc::new(config.reject_keys.iter().cloned().collect()),
            unreachable: false,
            fail_clear: false,
            fail_writes_after: None,
            flaky_writes: 0,
            write_delay: None,
            count_skew: 0,
            clears: Arc::new(AtomicUsize::new(0)),
            write_calls: Arc::new(AtomicUsize::new(0)),
            chunk_sizes: Arc::new(std::sync::Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub(crate) fn rejecting<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reject_keys = Arc::new(keys.into_iter().map(Into::into).collect());
        self
    }

    #[cfg(test)]
    pub(crate) fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    #[cfg(test)]
    pub(crate) fn failing_clear(mut self) -> Self {
        self.fail_clear = true;
        self
    }

    #[cfg(test)]
    pub(crate) fn failing_writes_after(mut self, calls: usize) -> Self {
        self.fail_writes_after = Some(calls);
        self
    }

    #[cfg(test)]
    pub(crate) fn flaky_for(mut self, calls: usize) -> Self {
        self.flaky_writes = calls;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_count_skew(mut self, skew: i64) -> Self {
        self.count_skew = skew;
        self
    }

    /// 🌱 Pre-populate, e.g. with stale entries from "the previous run".
    #[cfg(test)]
    pub(crate) async fn seed(&self, entries: &[(&str, &str)]) {
        let mut store = self.store.lock().await;
        for (k, v) in entries {
            store.insert((*k).to_string(), (*v).to_string());
        }
    }

    #[cfg(test)]
    pub(crate) async fn snapshot(&self) -> BTreeMap<String, String> {
        self.store.lock().await.clone()
    }
}

/// 🧵 Counts one write as in flight until dropped, including when a timeout cancels it mid-sleep.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Sink for InMemorySink {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn probe_ready(&self) -> Result<()> {
        if self.unreachable {
            bail!("💀 in-memory sink is pretending to be down. It's very convincing.");
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if self.fail_clear {
            bail!("💀 in-memory sink refused to clear '{}'", self.collection);
        }
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.store.lock().await.clear();
        Ok(())
    }

    async fn write_batch(&self, entries: &[TargetEntry]) -> Result<Vec<ItemOutcome>> {
        let call = self.write_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_writes_after
            && call >= limit
        {
            bail!("💀 in-memory sink dropped the connection on write #{}", call + 1);
        }
        if call < self.flaky_writes {
            bail!("💀 in-memory sink hiccupped on write #{}", call + 1);
        }

        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        if let Ok(mut sizes) = self.chunk_sizes.lock() {
            sizes.push(entries.len());
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        let mut outcomes = Vec::with_capacity(entries.len());
        {
            // 🔒 The Mutex is load-bearing. Do not remove. I know it looks optional. It isn't.
            let mut store = self.store.lock().await;
            for entry in entries {
                let key = entry.key().to_string();
                if self.reject_keys.contains(&key) {
                    outcomes.push(ItemOutcome::Failed {
                        key,
                        reason: "rejected by in-memory sink".to_string(),
                    });
                    continue;
                }
                let value = match entry {
                    TargetEntry::KeyValue { value, .. } => value.clone(),
                    TargetEntry::Document { fields, .. } => {
                        serde_json::Value::Object(fields.clone()).to_string()
                    }
                };
                store.insert(key.clone(), value);
                outcomes.push(ItemOutcome::Written { key });
            }
        }
        debug!("📦 in-memory sink stored a chunk of {}", entries.len());
        Ok(outcomes)
    }

    async fn count(&self) -> Result<u64> {
        let len = self.store.lock().await.len() as i64;
        Ok((len + self.count_skew).max(0) as u64)
    }

    async fn sample(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .lock()
            .await
            .iter()
            .next()
            .map(|(k, v)| format!("{k} → {v}")))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
