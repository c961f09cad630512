//! 📊 progress.rs — "Are we there yet?" — every refill, every time, forever.
//!
//! 🚀 Two audiences. The human at the terminal gets an indicatif bar with a comfy-table
//! strapped to it. The log aggregator gets an `info!` snapshot every `progress_every`
//! processed entries, because log aggregators can't see progress bars. We've asked.
//!
//! ⚠️ Watching this progress bar will not make it go faster. Science says no.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

/// 🔢 Formats a number with commas. "1000000 entries" → "1,000,000 entries". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS if the refill took long enough to call your mom.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 📣 "Every N processed entries, say something." Fires when the running total crosses a
/// multiple of `every`, so a page of 10,000 with `every = 2,500` still only says it once.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProgressCadence {
    every: u64,
    last_bucket: u64,
}

impl ProgressCadence {
    pub(crate) fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            last_bucket: 0,
        }
    }

    /// 🔔 true when `processed` crossed into a new multiple since the last call
    pub(crate) fn due(&mut self, processed: u64) -> bool {
        let bucket = processed / self.every;
        if bucket > self.last_bucket {
            self.last_bucket = bucket;
            true
        } else {
            false
        }
    }
}

/// 📊 The bar, the counters behind it, and a 5-second sliding window for the rate.
///
/// # Ancient Proverb
/// "He who refills a cache without a progress bar, refills alone and in darkness."
pub(crate) struct ProgressMetrics {
    source_name: String,
    /// 📏 records we expect to process. 0 = no idea (hello, PostgreSQL without a count)
    expected_total: u64,
    processed: u64,
    progress_bar: ProgressBar,
    /// 🔄 (timestamp, processed) samples for the rate window
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressMetrics")
            .field("source_name", &self.source_name)
            .field("expected_total", &self.expected_total)
            .field("processed", &self.processed)
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 `visible = false` gets a hidden bar: same bookkeeping, no terminal theatrics.
    pub(crate) fn new(source_name: String, expected_total: Option<u64>, visible: bool) -> Self {
        let expected_total = expected_total.unwrap_or(0);
        let progress_bar = if visible {
            ProgressBar::new(expected_total)
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}]")
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style);

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0));

        Self {
            source_name,
            expected_total,
            processed: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 Feed it the per-page delta. Recomputes the rate and redraws.
    pub(crate) fn update(&mut self, processed_delta: u64) {
        self.processed += processed_delta;
        let rate = self.entries_per_sec();
        self.render(rate);
        self.progress_bar.set_position(self.processed);
    }

    /// ✅ Ring the bell. We made it. (Or the source ran dry. Same energy.)
    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    fn entries_per_sec(&mut self) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.processed));

        match self.rate_samples.front() {
            Some(&(oldest_time, oldest)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 {
                    self.processed.saturating_sub(oldest) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn render(&self, entries_per_sec: f64) {
        let percent = if self.expected_total > 0 {
            (self.processed as f64 / self.expected_total as f64) * 100.0
        } else {
            0.0
        };

        let elapsed = self.start_time.elapsed();
        let remaining = if percent > 0.0 {
            // 🔮 linear extrapolation: assumes the future looks like the past
            let total_estimated = elapsed.as_secs_f64() / (percent / 100.0);
            let remaining_secs = total_estimated - elapsed.as_secs_f64();
            if remaining_secs > 0.0 {
                format_duration(Duration::from_secs_f64(remaining_secs))
            } else {
                "--:--".to_string()
            }
        } else {
            "--:--".to_string()
        };

        let total = if self.expected_total > 0 {
            format_number(self.expected_total)
        } else {
            "?".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Entries/s", format_number(entries_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} / {} Entries", format_number(self.processed), total))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{remaining} remaining ({percent:.2}%)"))
                .set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("source: {}\n{}", self.source_name, table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(25_000), "25,000");
        assert_eq!(format_number(1_000_000), "1,000,000");
    }

    #[test]
    fn the_one_where_long_runs_grow_an_hours_column() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_the_cadence_fires_once_per_multiple() {
        let mut cadence = ProgressCadence::new(10_000);
        assert!(!cadence.due(9_999));
        assert!(cadence.due(10_000));
        assert!(!cadence.due(15_000));
        // -- 🦘 one big page can jump two multiples; that's still one log line
        assert!(cadence.due(30_000));
        assert!(!cadence.due(30_001));
    }

    #[test]
    fn the_one_where_a_hidden_bar_still_counts() {
        let mut metrics = ProgressMetrics::new("in-memory".into(), Some(10), false);
        metrics.update(4);
        metrics.update(6);
        metrics.finish();
        assert_eq!(metrics.processed, 10);
    }
}
