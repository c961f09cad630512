use std::io::Read;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::backends::Source;
use crate::common::{Cursor, SourceRecord};
use crate::errors::FatalError;

// -- 📂 FileSourceConfig — "It's just a file", said no sysadmin ever before the disk filled up.
// -- Lives here, close to the FileSource that actually uses it.
#[derive(Debug, Deserialize, Clone)]
pub struct FileSourceConfig {
    pub file_name: String,
    #[serde(default)]
    pub format: ExportFormat,
    /// 🫁 `None` → sniff the `.gz` extension
    #[serde(default)]
    pub compression: Option<Compression>,
    /// 🚦 records missing any of these (absent, null or empty string) are left behind at load
    #[serde(default)]
    pub require_fields: Vec<String>,
}

/// 📜 How the export is laid out on disk.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// one big `[ {...}, {...} ]`
    #[default]
    JsonArray,
    /// one object per line
    Ndjson,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Gzip,
}

/// 📂 FileSource — the export, decoded up front, served in pages.
///
/// Think of it like a very diligent intern who photocopied the whole binder on day one
/// and now hands you ten thousand pages at a time, in order, without complaint.
#[derive(Debug)]
pub(crate) struct FileSource {
    config: FileSourceConfig,
    records: Vec<SourceRecord>,
}

impl FileSource {
    /// 🚀 Read, (maybe) decompress, parse, filter. All before the first page is asked for.
    ///
    /// Missing file → `FatalError::Connectivity` (the source is unreachable, in file form).
    /// Malformed JSON array → plain fatal error. Malformed NDJSON lines → skipped with a warning.
    pub(crate) async fn new(config: FileSourceConfig) -> Result<Self> {
        let raw = tokio::fs::read(&config.file_name).await.with_context(|| {
            FatalError::Connectivity(format!("source file '{}'", config.file_name))
        })?;

        let bytes = if config.is_gzip() {
            decompress(&raw)
                .with_context(|| format!("💀 '{}' claims to be gzip. It lied.", config.file_name))?
        } else {
            raw
        };

        let values = match config.format {
            ExportFormat::JsonArray => parse_json_array(&bytes).with_context(|| {
                format!(
                    "💀 Failed to parse '{}' as a JSON array. Is it NDJSON wearing a disguise?",
                    config.file_name
                )
            })?,
            ExportFormat::Ndjson => parse_ndjson(&bytes),
        };

        let total = values.len();
        let mut not_objects = 0usize;
        let mut incomplete = 0usize;
        let records: Vec<SourceRecord> = values
            .into_iter()
            .filter_map(|value| {
                let Some(record) = SourceRecord::from_value(value) else {
                    not_objects += 1;
                    return None;
                };
                if config.require_fields.iter().all(|f| has_value(&record, f)) {
                    Some(record)
                } else {
                    incomplete += 1;
                    None
                }
            })
            .collect();

        if not_objects > 0 {
            warn!("🙈 {not_objects} value(s) in '{}' were not JSON objects and were ignored", config.file_name);
        }
        if incomplete > 0 {
            info!(
                "🚦 {incomplete} record(s) in '{}' lacked one of {:?} and were left behind",
                config.file_name, config.require_fields
            );
        }
        info!(
            "📂 Loaded {} of {total} record(s) from '{}'",
            records.len(),
            config.file_name
        );

        Ok(Self { config, records })
    }
}

impl FileSourceConfig {
    fn is_gzip(&self) -> bool {
        match self.compression {
            Some(Compression::Gzip) => true,
            Some(Compression::None) => false,
            None => self.file_name.ends_with(".gz"),
        }
    }
}

fn decompress(raw: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(raw);
    let mut out = Vec::with_capacity(raw.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn parse_json_array(bytes: &[u8]) -> Result<Vec<Value>> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Array(values) => Ok(values),
        other => bail!(
            "expected a top-level JSON array, found {}",
            match other {
                Value::Object(_) => "an object",
                Value::Null => "null",
                _ => "a scalar",
            }
        ),
    }
}

/// 🔍 Newline-split with memchr, because we can. Blank lines are fine. Garbage lines are warned about.
fn parse_ndjson(bytes: &[u8]) -> Vec<Value> {
    let mut values = Vec::new();
    let mut start = 0usize;
    let mut line_no = 0usize;
    let ends = memchr::memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
    for end in ends {
        line_no += 1;
        let line = bytes[start..end].trim_ascii();
        start = (end + 1).min(bytes.len());
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(value) => values.push(value),
            Err(err) => warn!("🙈 Skipping NDJSON line {line_no}: {err}"),
        }
    }
    values
}

fn has_value(record: &SourceRecord, field: &str) -> bool {
    match record.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

#[async_trait]
impl Source for FileSource {
    async fn fetch_page(&mut self, page_size: usize, cursor: Cursor) -> Result<Vec<SourceRecord>> {
        let start = (cursor.offset as usize).min(self.records.len());
        let end = start.saturating_add(page_size).min(self.records.len());
        Ok(self.records[start..end].to_vec())
    }

    fn expected_total(&self) -> Option<u64> {
        Some(self.records.len() as u64)
    }

    fn describe(&self) -> String {
        format!("file '{}'", self.config.file_name)
    }

    async fn close(&mut self) -> Result<()> {
        // -- 🗑️ the file handle died the moment `read` returned. we're just tidying the memory.
        self.records = Vec::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression as GzLevel, write::GzEncoder};
    use std::io::Write;

    fn config(path: &std::path::Path, format: ExportFormat) -> FileSourceConfig {
        FileSourceConfig {
            file_name: path.to_string_lossy().into_owned(),
            format,
            compression: None,
            require_fields: Vec::new(),
        }
    }

    fn temp_with(suffix: &str, bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("💀 temp file");
        file.write_all(bytes).expect("💀 write temp file");
        file
    }

    #[tokio::test]
    async fn the_one_where_a_json_array_is_paged_by_offset() -> Result<()> {
        let file = temp_with(
            ".json",
            br#"[{"id": 1}, {"id": 2}, {"id": 3}, "not a record"]"#,
        );
        let mut source = FileSource::new(config(file.path(), ExportFormat::JsonArray)).await?;

        assert_eq!(source.expected_total(), Some(3));
        let page = source.fetch_page(2, Cursor::START).await?;
        assert_eq!(page.len(), 2);
        let rest = source.fetch_page(2, Cursor { offset: 2 }).await?;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].text("id").as_deref(), Some("3"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_ndjson_survives_blank_and_broken_lines() -> Result<()> {
        let file = temp_with(
            ".ndjson",
            b"{\"id\": 1}\n\n{oops this is not json}\n{\"id\": 2}\r\n{\"id\": 3}",
        );
        let source = FileSource::new(config(file.path(), ExportFormat::Ndjson)).await?;
        assert_eq!(source.expected_total(), Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_gz_is_sniffed_from_the_name() -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
        encoder.write_all(br#"[{"id": "a"}, {"id": "b"}]"#)?;
        let file = temp_with(".json.gz", &encoder.finish()?);

        let source = FileSource::new(config(file.path(), ExportFormat::JsonArray)).await?;
        assert_eq!(source.expected_total(), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_incomplete_records_stay_home() -> Result<()> {
        let file = temp_with(
            ".json",
            br#"[
                {"user_id": 1, "email": "a@x.io", "password_hash": "h1"},
                {"user_id": 2, "email": "b@x.io", "password_hash": ""},
                {"user_id": 3, "email": "c@x.io", "password_hash": null},
                {"user_id": 4, "email": "d@x.io"}
            ]"#,
        );
        let mut cfg = config(file.path(), ExportFormat::JsonArray);
        cfg.require_fields = vec!["password_hash".into()];

        let source = FileSource::new(cfg).await?;
        assert_eq!(source.expected_total(), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_file_is_simply_not_there() {
        let err = FileSource::new(FileSourceConfig {
            file_name: "/definitely/not/here/events.json".into(),
            format: ExportFormat::JsonArray,
            compression: None,
            require_fields: Vec::new(),
        })
        .await
        .expect_err("missing file must fail");
        assert!(matches!(
            FatalError::classify(&err),
            Some(FatalError::Connectivity(_))
        ));
    }

    #[tokio::test]
    async fn the_one_where_an_object_is_not_an_array() {
        let file = temp_with(".json", br#"{"id": 1}"#);
        let err = FileSource::new(config(file.path(), ExportFormat::JsonArray))
            .await
            .expect_err("top-level object must be rejected");
        assert!(format!("{err:#}").contains("JSON array"));
    }
}
