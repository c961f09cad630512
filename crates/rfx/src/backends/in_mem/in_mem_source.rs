use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::backends::Source;
use crate::common::{Cursor, SourceRecord};

/// 🧠 Records inlined straight into the config. Handy for smoke tests and dry runs.
///
/// ```toml
/// [source_config.InMemory]
/// records = [{ id = 1, title = "Concert" }]
/// ```
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InMemorySourceConfig {
    #[serde(default)]
    pub records: Vec<Value>,
}

/// 📦 A source that never forgets, because it never had to remember anything in the first place.
///
/// Clone-able: tests keep a handle, hand a clone to the pipeline, and peek at
/// `fetches`/`closed` afterwards. The Arcs mean everyone sees the same counters.
#[derive(Debug, Clone, Default)]
pub(crate) struct InMemorySource {
    records: Arc<Vec<SourceRecord>>,
    /// 💀 fail any fetch whose cursor is at or past this offset
    fail_from: Option<u64>,
    pub(crate) fetches: Arc<AtomicUsize>,
    pub(crate) closed: Arc<AtomicBool>,
}

impl InMemorySource {
    pub(crate) fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            records: Arc::new(records),
            ..Self::default()
        }
    }

    /// 🔧 From config: non-object values are dropped with a warning. They were never records.
    pub(crate) fn from_config(config: &InMemorySourceConfig) -> Self {
        let records: Vec<SourceRecord> = config
            .records
            .iter()
            .cloned()
            .filter_map(SourceRecord::from_value)
            .collect();
        let dropped = config.records.len() - records.len();
        if dropped > 0 {
            warn!("🙈 Ignored {dropped} inline source value(s) that were not JSON objects");
        }
        Self::new(records)
    }

    /// 💀 Simulate the source dying mid-run.
    #[cfg(test)]
    pub(crate) fn failing_from(mut self, offset: u64) -> Self {
        self.fail_from = Some(offset);
        self
    }
}

#[async_trait]
impl Source for InMemorySource {
    async fn fetch_page(&mut self, page_size: usize, cursor: Cursor) -> Result<Vec<SourceRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(fail_from) = self.fail_from
            && cursor.offset >= fail_from
        {
            bail!("💀 in-memory source went dark at offset {}", cursor.offset);
        }
        let start = (cursor.offset as usize).min(self.records.len());
        let end = start.saturating_add(page_size).min(self.records.len());
        Ok(self.records[start..end].to_vec())
    }

    fn expected_total(&self) -> Option<u64> {
        Some(self.records.len() as u64)
    }

    fn describe(&self) -> String {
        format!("in-memory ({} records)", self.records.len())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn the_one_where_pages_are_sliced_in_order() -> Result<()> {
        let records = (0..5)
            .map(|i| SourceRecord::from_value(json!({ "id": i })).expect("object"))
            .collect();
        let mut source = InMemorySource::new(records);

        let first = source.fetch_page(2, Cursor::START).await?;
        let last = source.fetch_page(2, Cursor { offset: 4 }).await?;
        let beyond = source.fetch_page(2, Cursor { offset: 10 }).await?;

        assert_eq!(first.len(), 2);
        assert_eq!(first[1].text("id").as_deref(), Some("1"));
        assert_eq!(last.len(), 1);
        assert!(beyond.is_empty());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[test]
    fn the_one_where_config_values_that_are_not_objects_get_dropped() {
        let source = InMemorySource::from_config(&InMemorySourceConfig {
            records: vec![json!({"id": 1}), json!("nope"), json!({"id": 2})],
        });
        assert_eq!(source.expected_total(), Some(2));
    }
}
