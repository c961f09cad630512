//! 📦 Common data structures — the building blocks of refill
//!
//! 🎬 COLD OPEN — INT. CACHE CLUSTER — 3:47 AM
//!
//! The cache is stale. Everyone knows it. Nobody says it. A user logs in with a
//! password they changed last Tuesday and the cache, loyal to a fault, says "nope."
//! Somebody has to refill it. From scratch. All of it.
//!
//! ✅ These are the structs that ride along: a `SourceRecord` leaves the system of
//! record, becomes a `TargetEntry`, gets an `ItemOutcome`, and lands in `RunCounters`.
//! They don't ask questions. They carry the data. 🦆

use serde::Serialize;
use serde_json::{Map, Value};

/// 📄 One record as read from the source — an ordered bag of named fields.
///
/// Backed by a `serde_json::Map` because both sources we speak (PostgreSQL rows via
/// `to_jsonb`, and JSON exports) already think in JSON. Read-only. Lives for one page.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SourceRecord {
    pub fields: Map<String, Value>,
}

impl SourceRecord {
    /// 🏗️ Wrap a field map.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// 🔧 Build a record from any JSON value. Objects only — anything else is not a record,
    /// it's a cry for help, and the caller gets `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// 🔤 Field rendered as text, the way the loaders always did it: strings as-is, numbers
    /// and bools via `to_string`, `null`/absent/objects/arrays → `None`.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// 🏷️ A best-effort label for log lines. "unknown" if the record has no idea who it is.
    pub fn identity(&self, field: &str) -> String {
        self.text(field).unwrap_or_else(|| "unknown".to_string())
    }
}

/// 🔖 Resume position in the source. Offset-based, because `LIMIT/OFFSET` is what the
/// system of record understands and what the static export can fake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Cursor {
    pub offset: u64,
}

impl Cursor {
    /// 🏁 The beginning. Every run starts here. No cursor survives between runs.
    pub const START: Cursor = Cursor { offset: 0 };

    pub fn advance(self, by: usize) -> Cursor {
        Cursor {
            offset: self.offset + by as u64,
        }
    }
}

/// 📚 A bounded slice of the source, fetched in one round trip.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<SourceRecord>,
    /// 🔖 where this page started
    pub cursor: Cursor,
}

impl Page {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// 👣 What the paginator hands back: the page, and where to go next (or `None` — the well is dry).
#[derive(Debug, Clone)]
pub struct PageStep {
    pub page: Page,
    pub next: Option<Cursor>,
}

/// 🎯 The transformed unit written to the target.
///
/// Two shapes, because the two targets have two very different ideas of what "a row" is:
/// a key/value cache wants a (derived key, opaque value) pair, a search index wants a
/// (document id, field map) pair. Either way, the key/id is a pure function of the
/// record's identity fields, so a rerun writes the exact same thing. Idempotent. Boring. Good.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TargetEntry {
    KeyValue { key: String, value: String },
    Document { id: String, fields: Map<String, Value> },
}

impl TargetEntry {
    /// 🔑 The lookup key (key/value) or document id (search).
    pub fn key(&self) -> &str {
        match self {
            TargetEntry::KeyValue { key, .. } => key,
            TargetEntry::Document { id, .. } => id,
        }
    }
}

/// ✅/💀 Per-entry result, returned by the target in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Written { key: String },
    /// 💀 The target looked at this one entry and said no. Counted, logged, not fatal.
    Failed { key: String, reason: String },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Written { .. })
    }

    pub fn key(&self) -> &str {
        match self {
            ItemOutcome::Written { key } | ItemOutcome::Failed { key, .. } => key,
        }
    }
}

/// 📊 Process-local run state. Only the supervisor touches these. Fresh every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    /// 📚 non-empty pages processed
    pub pages: u64,
    /// 📤 entries handed to the writer plus records that failed to transform
    pub attempted: u64,
    pub succeeded: u64,
    /// 💀 transform failures + per-item write failures
    pub failed: u64,
    /// 🙈 records the transformer deliberately passed on (not failures)
    pub skipped: u64,
}

impl RunCounters {
    /// 🔢 entries with a final verdict, success or otherwise
    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// 🧮 fold one writer verdict into the tally
    pub(crate) fn record_outcome(&mut self, outcome: &ItemOutcome) {
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> SourceRecord {
        SourceRecord::from_value(value).expect("💀 test record must be an object")
    }

    #[test]
    fn the_one_where_text_renders_numbers_and_bools_as_plain_strings() {
        let r = record(json!({"user_id": 42, "email": "a@b.c", "active": true, "gone": null}));
        assert_eq!(r.text("user_id").as_deref(), Some("42"));
        assert_eq!(r.text("email").as_deref(), Some("a@b.c"));
        assert_eq!(r.text("active").as_deref(), Some("true"));
        assert_eq!(r.text("gone"), None);
        assert_eq!(r.text("never_existed"), None);
        assert_eq!(r.identity("never_existed"), "unknown");
    }

    #[test]
    fn the_one_where_arrays_are_not_records() {
        assert!(SourceRecord::from_value(json!([1, 2, 3])).is_none());
        assert!(SourceRecord::from_value(json!("just a string")).is_none());
    }

    #[test]
    fn the_one_where_cursor_only_moves_forward() {
        let c = Cursor::START.advance(10_000).advance(10_000);
        assert_eq!(c.offset, 20_000);
        assert!(c > Cursor::START);
    }

    #[test]
    fn the_one_where_counters_tally_outcomes() {
        let mut counters = RunCounters::default();
        counters.record_outcome(&ItemOutcome::Written { key: "a".into() });
        counters.record_outcome(&ItemOutcome::Failed {
            key: "b".into(),
            reason: "mapper_parsing_exception".into(),
        });
        assert_eq!(counters.succeeded, 1);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.processed(), 2);
    }
}
