//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where caches go stale..."
//! 🎬 "One supervisor dared to burn it all down and rebuild it from scratch."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor drives one refill, start to finish:
//!
//! ```text
//!   INIT ──▶ CLEARING ──▶ LOADING ──▶ VERIFYING ──▶ DONE
//!     └──────────┴────────────┴────────────┴──────▶ FAILED
//! ```
//!
//! - INIT: validate the config (before ANY side effect), open the source, open the target,
//!   wait for the target to say it's ready.
//! - CLEARING: the replace precondition. Exactly once.
//! - LOADING: page → transform → write → tally. The next page is not requested until the
//!   previous write came back. One page in flight, always.
//! - VERIFYING: count, compare, peek. Warnings only.
//!
//! Whatever happens, the source and the target get closed before we return. Even on the
//! sad path. ESPECIALLY on the sad path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use tracing::{debug, error, info, warn};

use crate::app_config::AppConfig;
use crate::backends::{Sink, SinkBackend, Source, SourceBackend};
use crate::common::{Cursor, ItemOutcome, RunCounters};
use crate::errors::FatalError;
use crate::paginator::Paginator;
use crate::progress::{ProgressCadence, ProgressMetrics, format_duration, format_number};
use crate::retry::with_backoff;
use crate::transforms::{RecordTransformer, Transform, Transformed};
use crate::verifier::{Verification, Verifier};
use crate::writer::BatchWriter;

/// 🚦 Where a run is. Forward only, and FAILED is reachable from anywhere that isn't over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Clearing,
    Loading,
    Verifying,
    Done,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }

    fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        match next {
            Failed => !self.is_terminal(),
            _ => matches!(
                (self, next),
                (Init, Clearing) | (Clearing, Loading) | (Loading, Verifying) | (Verifying, Done)
            ),
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunPhase::Init => "INIT",
            RunPhase::Clearing => "CLEARING",
            RunPhase::Loading => "LOADING",
            RunPhase::Verifying => "VERIFYING",
            RunPhase::Done => "DONE",
            RunPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// 🧭 Holds the current phase and refuses to skip ahead. Every hop is logged.
#[derive(Debug)]
struct PhaseTracker {
    phase: RunPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        info!("🚦 Phase → {}", RunPhase::Init);
        Self {
            phase: RunPhase::Init,
        }
    }

    fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            bail!("💀 illegal phase transition {} → {next}", self.phase);
        }
        info!("🚦 Phase {} → {next}", self.phase);
        self.phase = next;
        Ok(())
    }

    /// 💀 Always legal from a live phase; a no-op once the run is over.
    fn fail(&mut self) {
        if !self.phase.is_terminal() {
            error!("🚦 Phase {} → {}", self.phase, RunPhase::Failed);
            self.phase = RunPhase::Failed;
        }
    }
}

/// 📋 Everything the CLI needs for the end-of-run summary.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub counters: RunCounters,
    pub elapsed: Duration,
    pub verification: Verification,
    pub collection: String,
    pub source: String,
    pub transform: &'static str,
}

impl RunReport {
    /// 🚀 entries with a verdict per second, over the whole run
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.counters.processed() as f64 / secs
        } else {
            0.0
        }
    }

    /// 🍽️ The summary table. One glance, one verdict.
    pub fn render(&self) -> String {
        let c = &self.counters;
        let v = &self.verification;
        let observed = match v.observed {
            Some(count) if v.matched() => format!("{} ✅", format_number(count)),
            Some(count) => format!("{} ⚠️ mismatch", format_number(count)),
            None => "unknown ⚠️".to_string(),
        };

        let rows: Vec<(&str, String)> = vec![
            ("Source", self.source.clone()),
            ("Target", self.collection.clone()),
            ("Transform", self.transform.to_string()),
            ("Pages", format_number(c.pages)),
            ("Attempted", format_number(c.attempted)),
            ("Succeeded", format_number(c.succeeded)),
            ("Failed", format_number(c.failed)),
            ("Skipped", format_number(c.skipped)),
            ("Elapsed", format_duration(self.elapsed)),
            ("Throughput", format!("{} entries/s", format_number(self.throughput() as u64))),
            ("Expected count", format_number(v.expected)),
            ("Observed count", observed),
            ("Sanity read", v.sanity.to_string()),
        ];

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["refill summary", ""]);
        for (label, value) in rows {
            table.add_row(vec![
                Cell::new(label),
                Cell::new(value).set_alignment(CellAlignment::Right),
            ]);
        }
        table.to_string()
    }
}

/// 📦 The Supervisor: part middle manager, part helicopter parent, fully accountable.
#[derive(Debug)]
pub(crate) struct Supervisor {
    app_config: AppConfig,
}

impl Supervisor {
    pub(crate) fn new(app_config: AppConfig) -> Self {
        Self { app_config }
    }

    /// 🚀 One full refill. Config is checked before anything is opened.
    pub(crate) async fn run(&self) -> Result<RunReport> {
        let mut phase = PhaseTracker::new();

        if let Err(err) = self.app_config.validate() {
            phase.fail();
            return Err(err).context("💀 INIT: configuration rejected before touching anything");
        }

        let mut source = match SourceBackend::from_config(&self.app_config.source_config).await {
            Ok(source) => source,
            Err(err) => {
                phase.fail();
                return Err(err.context("💀 INIT: could not open the source"));
            }
        };

        let sink = match SinkBackend::from_config(&self.app_config.sink_config).await {
            Ok(sink) => sink,
            Err(err) => {
                // -- 🧹 the source is already open. it doesn't get to leak just because the target is sulking.
                if let Err(close_err) = source.close().await {
                    warn!("⚠️ Closing the source after a failed INIT also failed: {close_err:#}");
                }
                phase.fail();
                return Err(err.context("💀 INIT: could not open the target"));
            }
        };

        self.run_with(phase, source, sink).await
    }

    /// 🔁 The run, given already-opened backends. Both are closed before this returns.
    async fn run_with(
        &self,
        mut phase: PhaseTracker,
        mut source: SourceBackend,
        sink: SinkBackend,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let sink = Arc::new(sink);
        let transformer = RecordTransformer::from_config(&self.app_config.transform_config());
        let source_label = source.describe();
        let collection = sink.collection().to_string();
        info!(
            "🚀 Refilling '{collection}' from {source_label} with the {} transform",
            transformer.name()
        );

        let result = self
            .drive(&mut phase, &mut source, &sink, &transformer)
            .await;

        if let Err(err) = source.close().await {
            warn!("⚠️ Could not close the source cleanly: {err:#}");
        }
        if let Err(err) = sink.close().await {
            warn!("⚠️ Could not close the target cleanly: {err:#}");
        }

        match result {
            Ok((counters, verification)) => {
                phase.advance(RunPhase::Done)?;
                let report = RunReport {
                    counters,
                    elapsed: started.elapsed(),
                    verification,
                    collection,
                    source: source_label,
                    transform: transformer.name(),
                };
                info!(
                    "🏁 Refill of '{}' done: {} succeeded, {} failed, {} skipped in {}",
                    report.collection,
                    report.counters.succeeded,
                    report.counters.failed,
                    report.counters.skipped,
                    format_duration(report.elapsed)
                );
                Ok(report)
            }
            Err(err) => {
                phase.fail();
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        phase: &mut PhaseTracker,
        source: &mut SourceBackend,
        sink: &Arc<SinkBackend>,
        transformer: &RecordTransformer,
    ) -> Result<(RunCounters, Verification)> {
        let runtime = &self.app_config.runtime;
        let target: &SinkBackend = sink.as_ref();
        let collection = target.collection().to_string();

        // 🩺 INIT, last step: is anybody home?
        with_backoff(
            &runtime.readiness,
            &format!("target '{collection}' to become ready"),
            move |_| target.probe_ready(),
        )
        .await
        .with_context(|| FatalError::Connectivity(format!("target '{collection}' (never became ready)")))?;

        phase.advance(RunPhase::Clearing)?;
        let mut writer = BatchWriter::new(sink.clone(), runtime);
        writer.prepare().await?;

        phase.advance(RunPhase::Loading)?;
        let paginator = Paginator::new(runtime.page_size);
        let mut counters = RunCounters::default();
        let mut progress = ProgressMetrics::new(
            source.describe(),
            source.expected_total(),
            runtime.show_progress_bar,
        );
        let mut cadence = ProgressCadence::new(runtime.progress_every);
        let mut cursor = Some(Cursor::START);

        while let Some(at) = cursor {
            let step = paginator.next_page(source, at).await?;
            if step.page.is_empty() {
                debug!("📭 offset {} came back empty; the source is dry", at.offset);
                break;
            }
            counters.pages += 1;

            let mut entries = Vec::with_capacity(step.page.len());
            for record in &step.page.records {
                match transformer.transform(record) {
                    Ok(Transformed::Entry(entry)) => entries.push(entry),
                    Ok(Transformed::Skip(reason)) => {
                        counters.skipped += 1;
                        debug!("🙈 Skipped: {reason}");
                    }
                    Err(err) => {
                        counters.attempted += 1;
                        counters.failed += 1;
                        warn!("⚠️ {err}");
                    }
                }
            }
            counters.attempted += entries.len() as u64;

            let outcomes = writer.write_batch(entries).await.with_context(|| {
                format!("💀 LOADING: writing the page at offset {} failed", at.offset)
            })?;
            for outcome in &outcomes {
                if let ItemOutcome::Failed { key, reason } = outcome {
                    warn!("⚠️ '{collection}' rejected '{key}': {reason}");
                }
                counters.record_outcome(outcome);
            }

            progress.update(step.page.len() as u64);
            if cadence.due(counters.processed()) {
                info!(
                    "📊 {} processed ({} ok, {} failed, {} skipped) across {} page(s)",
                    format_number(counters.processed()),
                    format_number(counters.succeeded),
                    format_number(counters.failed),
                    format_number(counters.skipped),
                    counters.pages
                );
            }
            debug!(
                "📚 page {} at offset {}: {} record(s), {} verdict(s)",
                counters.pages,
                at.offset,
                step.page.len(),
                outcomes.len()
            );
            cursor = step.next;
        }
        progress.finish();

        phase.advance(RunPhase::Verifying)?;
        let verification = Verifier::new(runtime.sanity_check)
            .verify(target, counters.succeeded)
            .await;

        Ok((counters, verification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{
        InMemorySinkConfig, InMemorySourceConfig, RuntimeConfig, SinkConfig, SourceConfig,
        ValkeySinkConfig,
    };
    use crate::backends::in_mem::{InMemorySink, InMemorySource};
    use crate::common::SourceRecord;
    use crate::retry::RetryPolicy;
    use crate::transforms::{CredentialKey, CredentialKeyConfig, TransformConfig};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn impatient() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_interval_ms: 1,
            multiplier: 1.0,
            max_interval_ms: 1,
        }
    }

    fn config(page_size: usize, transform: Option<TransformConfig>) -> AppConfig {
        AppConfig {
            source_config: SourceConfig::InMemory(InMemorySourceConfig::default()),
            sink_config: SinkConfig::InMemory(InMemorySinkConfig::default()),
            transform,
            runtime: RuntimeConfig {
                page_size,
                bulk_chunk_size: 1_000,
                write_retry: impatient(),
                readiness: impatient(),
                show_progress_bar: false,
                ..RuntimeConfig::default()
            },
        }
    }

    fn credentials() -> Option<TransformConfig> {
        Some(TransformConfig::CredentialKey(CredentialKeyConfig::default()))
    }

    fn user(i: usize) -> SourceRecord {
        SourceRecord::from_value(json!({
            "user_id": i,
            "email": format!("user{i}@example.com"),
            "password_hash": format!("$2b$12$hash{i}"),
        }))
        .expect("object")
    }

    fn users(n: usize) -> InMemorySource {
        InMemorySource::new((0..n).map(user).collect())
    }

    async fn refill(
        config: AppConfig,
        source: &InMemorySource,
        sink: &InMemorySink,
    ) -> Result<RunReport> {
        Supervisor::new(config)
            .run_with(
                PhaseTracker::new(),
                SourceBackend::InMemory(source.clone()),
                SinkBackend::InMemory(sink.clone()),
            )
            .await
    }

    #[tokio::test]
    async fn the_one_where_running_twice_lands_the_same_collection() -> Result<()> {
        let sink = InMemorySink::default();
        sink.seed(&[("stale-key", "user who left in 2019")]).await;

        let first = refill(config(7, credentials()), &users(20), &sink).await?;
        let after_first = sink.snapshot().await;
        let second = refill(config(7, credentials()), &users(20), &sink).await?;

        assert!(!after_first.contains_key("stale-key"), "replace means replace");
        assert_eq!(after_first.len(), 20);
        assert_eq!(sink.snapshot().await, after_first);
        assert_eq!(first.counters, second.counters);
        assert_eq!(sink.clears.load(Ordering::SeqCst), 2, "one clear per run");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_25k_records_all_make_it_in_three_pages() -> Result<()> {
        let source = users(25_000);
        let sink = InMemorySink::default();
        let report = refill(config(10_000, credentials()), &source, &sink).await?;

        assert_eq!(report.counters.pages, 3);
        assert_eq!(report.counters.attempted, 25_000);
        assert_eq!(report.counters.succeeded, 25_000);
        assert_eq!(report.counters.failed, 0);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        assert!(report.verification.matched());
        assert_eq!(sink.snapshot().await.len(), 25_000);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_bad_records_fail_alone() -> Result<()> {
        let mut records: Vec<SourceRecord> = (0..10).map(user).collect();
        // -- 🙈 empty hash → skipped; no email → transform failure
        records[2] = SourceRecord::from_value(
            json!({"user_id": 2, "email": "two@example.com", "password_hash": ""}),
        )
        .expect("object");
        records[5] =
            SourceRecord::from_value(json!({"user_id": 5, "password_hash": "h"})).expect("object");

        let rejected = match CredentialKey::new(CredentialKeyConfig::default()).transform(&user(7))
        {
            Ok(Transformed::Entry(entry)) => entry.key().to_string(),
            other => panic!("💀 expected an entry, got {other:?}"),
        };
        let sink = InMemorySink::default().rejecting([rejected.clone()]);
        let report = refill(
            config(4, credentials()),
            &InMemorySource::new(records),
            &sink,
        )
        .await?;

        let c = report.counters;
        assert_eq!(c.skipped, 1);
        assert_eq!(c.failed, 2);
        assert_eq!(c.succeeded, 7);
        assert_eq!(c.attempted, 9);
        let stored = sink.snapshot().await;
        assert_eq!(stored.len(), 7);
        assert!(!stored.contains_key(&rejected));
        assert!(report.verification.matched());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_odd_date_is_still_a_success() -> Result<()> {
        let source = InMemorySource::new(vec![
            SourceRecord::from_value(json!({"id": 1, "datetime_start": "2024-05-01 19:00:00"}))
                .expect("object"),
            SourceRecord::from_value(json!({"id": 2, "datetime_start": "sometime in May"}))
                .expect("object"),
        ]);
        let sink = InMemorySink::default();
        let report = refill(config(10, None), &source, &sink).await?;

        assert_eq!(report.transform, "search-document");
        assert_eq!(report.counters.succeeded, 2);
        assert_eq!(report.counters.failed, 0);
        let stored = sink.snapshot().await;
        assert!(stored["1"].contains("2024-05-01T19:00:00Z"));
        assert!(stored["2"].contains("sometime in May"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_dead_source_aborts_and_everything_gets_closed() {
        let source = users(30).failing_from(10);
        let sink = InMemorySink::default();
        let err = refill(config(10, credentials()), &source, &sink)
            .await
            .expect_err("the second page never arrives");

        assert!(matches!(
            FatalError::classify(&err),
            Some(FatalError::Connectivity(_))
        ));
        assert!(source.closed.load(Ordering::SeqCst));
        assert!(sink.closed.load(Ordering::SeqCst));
        assert_eq!(sink.snapshot().await.len(), 10, "the first page landed, then the lights went out");
    }

    #[tokio::test]
    async fn the_one_where_the_target_drops_mid_load() {
        let source = users(30);
        let sink = InMemorySink::default().failing_writes_after(1);
        let err = refill(config(10, credentials()), &source, &sink)
            .await
            .expect_err("writes stop working after the first chunk");

        assert_eq!(FatalError::classify(&err).map(FatalError::exit_code), Some(3));
        assert!(source.closed.load(Ordering::SeqCst));
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn the_one_where_nobody_is_home_and_nothing_gets_cleared() {
        let source = users(5);
        let sink = InMemorySink::default().unreachable();
        sink.seed(&[("precious", "do not delete")]).await;
        let err = refill(config(10, credentials()), &source, &sink)
            .await
            .expect_err("readiness never comes");

        assert!(matches!(
            FatalError::classify(&err),
            Some(FatalError::Connectivity(_))
        ));
        assert_eq!(sink.clears.load(Ordering::SeqCst), 0);
        assert!(sink.snapshot().await.contains_key("precious"));
        assert!(source.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn the_one_where_a_failed_clear_writes_nothing() {
        let sink = InMemorySink::default().failing_clear();
        let err = refill(config(10, credentials()), &users(5), &sink)
            .await
            .expect_err("clear fails");
        assert_eq!(FatalError::classify(&err).map(FatalError::exit_code), Some(4));
        assert_eq!(sink.write_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn the_one_where_bad_config_is_caught_before_connecting() {
        let mut bad = config(0, credentials());
        // -- 📡 nothing listens on port 1. if validation ran second, this would be a connectivity error.
        bad.sink_config = SinkConfig::Valkey(ValkeySinkConfig {
            port: 1,
            connect_timeout_secs: 1,
            ..ValkeySinkConfig::default()
        });
        let err = Supervisor::new(bad).run().await.expect_err("page_size = 0");
        assert_eq!(FatalError::classify(&err).map(FatalError::exit_code), Some(2));
    }

    #[tokio::test]
    async fn the_one_where_a_count_mismatch_is_only_a_warning() -> Result<()> {
        let sink = InMemorySink::default().with_count_skew(-3);
        let report = refill(config(10, credentials()), &users(12), &sink).await?;
        assert!(!report.verification.matched());
        assert_eq!(report.verification.observed, Some(9));
        assert!(report.render().contains("mismatch"));
        Ok(())
    }

    #[test]
    fn the_one_where_phases_only_move_forward() {
        let mut tracker = PhaseTracker::new();
        assert!(tracker.advance(RunPhase::Loading).is_err(), "no skipping the clear");
        assert!(tracker.advance(RunPhase::Clearing).is_ok());
        tracker.fail();
        assert_eq!(tracker.phase, RunPhase::Failed);
        assert!(tracker.advance(RunPhase::Loading).is_err());
        assert!(!RunPhase::Done.can_advance_to(RunPhase::Failed));
    }

    #[test]
    fn the_one_where_the_summary_has_all_the_numbers() {
        let report = RunReport {
            counters: RunCounters {
                pages: 3,
                attempted: 25_000,
                succeeded: 24_999,
                failed: 1,
                skipped: 0,
            },
            elapsed: Duration::from_secs(10),
            verification: Verification {
                expected: 24_999,
                observed: Some(24_999),
                sanity: crate::verifier::SanityRead::Skipped,
            },
            collection: "users:auth".into(),
            source: "postgres".into(),
            transform: "credential-key",
        };
        assert_eq!(report.throughput() as u64, 2_500);
        let table = report.render();
        assert!(table.contains("24,999"));
        assert!(table.contains("users:auth"));
        assert!(table.contains("2,500 entries/s"));
    }
}
