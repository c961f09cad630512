//! 📚 Paginator — one page at a time, strictly forward, until the source runs dry.
//!
//! 👣 Termination rule, the same one the cache loader always used:
//! - a full page (`len == page_size`) → there might be more, advance the cursor
//! - a short page (`len < page_size`) → that was the last one
//! - an empty page → done, nothing to process
//!
//! A source that hands back MORE than `page_size` broke its contract. That's fatal,
//! because every cursor after it would be a lie.

use anyhow::{Context, Result, bail};
use tracing::trace;

use crate::backends::Source;
use crate::common::{Cursor, Page, PageStep};
use crate::errors::FatalError;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Paginator {
    page_size: usize,
}

impl Paginator {
    pub(crate) fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    /// 📄 Fetch the page at `cursor` and say where the next one starts (if anywhere).
    ///
    /// A source error here is a connectivity failure: there is no partial-page recovery.
    pub(crate) async fn next_page<S>(&self, source: &mut S, cursor: Cursor) -> Result<PageStep>
    where
        S: Source + ?Sized,
    {
        let records = source
            .fetch_page(self.page_size, cursor)
            .await
            .with_context(|| FatalError::Connectivity(source.describe()))?;

        if records.len() > self.page_size {
            bail!(
                "💀 asked {} for at most {} records at offset {}, got {}. Cursors can't be trusted after that.",
                source.describe(),
                self.page_size,
                cursor.offset,
                records.len()
            );
        }

        let next = (records.len() == self.page_size).then(|| cursor.advance(records.len()));
        trace!(
            "📚 page at offset {} → {} record(s), next: {:?}",
            cursor.offset,
            records.len(),
            next
        );
        Ok(PageStep {
            page: Page { records, cursor },
            next,
        })
    }
}
