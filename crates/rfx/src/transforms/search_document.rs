//! ⏰ SearchDocument — an export record, cleaned up enough to be indexed.
//!
//! Four timestamp formats walk into a bar. One walks out:
//! `2024-05-01 19:00:00`, `2024-05-01T19:00:00` and `2024-05-01T19:00:00Z` all leave as
//! `2024-05-01T19:00:00Z`. Anything else is left alone with a warning (the index mapping
//! also accepts epoch millis and we're not about to guess).
//!
//! `created_at` / `updated_at` get stamped with "now" only when they're absent or falsy.
//! The clock is injectable, so tests don't have to race the wall clock.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::common::{SourceRecord, TargetEntry};
use crate::errors::TransformError;
use crate::transforms::{Transform, Transformed};

/// ⏰ Where "now" comes from.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SearchDocumentConfig {
    /// 🆔 becomes the document `_id` (rendered as text)
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// 📅 string fields to normalize
    #[serde(default = "default_date_fields")]
    pub date_fields: Vec<String>,
    /// 📜 tried in order, first full match wins
    #[serde(default = "default_accepted_formats")]
    pub accepted_formats: Vec<String>,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// 🕰️ filled with "now" when absent or falsy
    #[serde(default = "default_stamp_fields")]
    pub stamp_fields: Vec<String>,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_date_fields() -> Vec<String> {
    vec!["datetime_start".to_string()]
}

fn default_accepted_formats() -> Vec<String> {
    vec![
        "%Y-%m-%d %H:%M:%S".to_string(),
        "%Y-%m-%dT%H:%M:%S".to_string(),
        "%Y-%m-%dT%H:%M:%SZ".to_string(),
    ]
}

fn default_output_format() -> String {
    "%Y-%m-%dT%H:%M:%SZ".to_string()
}

fn default_stamp_fields() -> Vec<String> {
    vec!["created_at".to_string(), "updated_at".to_string()]
}

impl Default for SearchDocumentConfig {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
            date_fields: default_date_fields(),
            accepted_formats: default_accepted_formats(),
            output_format: default_output_format(),
            stamp_fields: default_stamp_fields(),
        }
    }
}

#[derive(Clone)]
pub struct SearchDocument {
    config: SearchDocumentConfig,
    clock: Clock,
}

// -- 🎭 manual Debug because `dyn Fn` has no opinions about formatting and won't derive.
impl std::fmt::Debug for SearchDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchDocument")
            .field("config", &self.config)
            .finish()
    }
}

impl SearchDocument {
    pub fn new(config: SearchDocumentConfig) -> Self {
        Self::with_clock(config, Arc::new(Utc::now))
    }

    pub fn with_clock(config: SearchDocumentConfig, clock: Clock) -> Self {
        Self { config, clock }
    }

    /// 📅 First accepted format that consumes the whole string wins.
    fn normalize(&self, raw: &str) -> Option<String> {
        self.config.accepted_formats.iter().find_map(|fmt| {
            NaiveDateTime::parse_from_str(raw, fmt)
                .ok()
                .map(|dt| dt.format(&self.config.output_format).to_string())
        })
    }
}

/// 🤷 "absent, or present but not worth keeping": null, "", false, 0, [] and {}.
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
    }
}

impl Transform for SearchDocument {
    fn transform(&self, record: &SourceRecord) -> Result<Transformed, TransformError> {
        let c = &self.config;
        let id = record
            .text(&c.id_field)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TransformError::new("unknown", format!("missing '{}'", c.id_field)))?;

        let mut fields = record.fields.clone();

        for name in &c.date_fields {
            let Some(Value::String(raw)) = fields.get(name) else {
                continue;
            };
            match self.normalize(raw) {
                Some(normalized) => {
                    fields.insert(name.clone(), Value::String(normalized));
                }
                None => warn!(
                    "⏰ Document '{id}': '{name}' = '{raw}' matches none of the accepted formats; left as-is"
                ),
            }
        }

        if c.stamp_fields.iter().any(|f| is_blank(fields.get(f))) {
            let now = (self.clock)().format(&c.output_format).to_string();
            for name in &c.stamp_fields {
                if is_blank(fields.get(name)) {
                    fields.insert(name.clone(), Value::String(now.clone()));
                }
            }
        }

        Ok(Transformed::Entry(TargetEntry::Document { id, fields }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn frozen() -> SearchDocument {
        let noon = Utc
            .with_ymd_and_hms(2025, 1, 15, 12, 0, 0)
            .single()
            .expect("💀 a valid instant");
        SearchDocument::with_clock(SearchDocumentConfig::default(), Arc::new(move || noon))
    }

    fn fields_of(out: Result<Transformed, TransformError>) -> serde_json::Map<String, Value> {
        match out {
            Ok(Transformed::Entry(TargetEntry::Document { fields, .. })) => fields,
            other => panic!("💀 expected a document, got {other:?}"),
        }
    }

    fn run(value: Value) -> Result<Transformed, TransformError> {
        frozen().transform(&SourceRecord::from_value(value).expect("object"))
    }

    #[test]
    fn the_one_where_all_three_formats_converge() {
        for raw in [
            "2024-05-01 19:30:00",
            "2024-05-01T19:30:00",
            "2024-05-01T19:30:00Z",
        ] {
            let fields = fields_of(run(json!({"id": 1, "datetime_start": raw})));
            assert_eq!(fields["datetime_start"], json!("2024-05-01T19:30:00Z"), "input {raw}");
        }
    }

    #[test]
    fn the_one_where_an_unparseable_date_is_left_alone() {
        let fields = fields_of(run(json!({"id": 1, "datetime_start": "next Tuesday-ish"})));
        assert_eq!(fields["datetime_start"], json!("next Tuesday-ish"));

        let fields = fields_of(run(json!({"id": 1, "datetime_start": 1714590000000_i64})));
        assert_eq!(fields["datetime_start"], json!(1714590000000_i64));
    }

    #[test]
    fn the_one_where_missing_stamps_get_the_frozen_now() {
        let fields = fields_of(run(json!({"id": 1, "created_at": "", "updated_at": null})));
        assert_eq!(fields["created_at"], json!("2025-01-15T12:00:00Z"));
        assert_eq!(fields["updated_at"], json!("2025-01-15T12:00:00Z"));
    }

    #[test]
    fn the_one_where_existing_stamps_are_respected() {
        let fields = fields_of(run(json!({
            "id": 1,
            "created_at": "2023-03-03T03:03:03Z",
            "updated_at": "2023-04-04T04:04:04Z"
        })));
        assert_eq!(fields["created_at"], json!("2023-03-03T03:03:03Z"));
        assert_eq!(fields["updated_at"], json!("2023-04-04T04:04:04Z"));
    }

    #[test]
    fn the_one_where_the_id_becomes_text_and_nothing_else_is_lost() {
        let out = run(json!({"id": 42, "title": "Щелкунчик", "total_seats": 300}));
        let Ok(Transformed::Entry(TargetEntry::Document { id, fields })) = &out else {
            panic!("💀 expected a document, got {out:?}");
        };
        assert_eq!(id, "42");
        assert_eq!(fields["title"], json!("Щелкунчик"));
        assert_eq!(fields["total_seats"], json!(300));
        assert_eq!(fields["id"], json!(42));
    }

    #[test]
    fn the_one_where_same_input_same_clock_same_output() {
        let record = json!({"id": 1, "datetime_start": "2024-05-01 19:30:00"});
        assert_eq!(run(record.clone()), run(record));
    }

    #[test]
    fn the_one_where_no_id_means_no_document() {
        let err = run(json!({"title": "anonymous"})).expect_err("id is required");
        assert!(err.reason.contains("'id'"));
    }
}
