//! 🔄 Transforms — one record in, one entry out (or a polite "no thanks").
//!
//! 🎬 COLD OPEN — INT. CUSTOMS DESK — 2:47 AM
//!
//! A row from the `users` table arrives. It wants to be a cache entry. Customs checks
//! its papers: email? present. password hash? present. user id? present. Stamp.
//! Next. An event from the export arrives with a date in three possible formats.
//! Customs sighs, tries all three, and stamps it in the fourth.
//!
//! Every transform here is a pure function of the record (plus the clock, for the
//! timestamp fill-ins). Same record in → same key out, every run. That's what makes a
//! full refill safe to repeat. 🦆
//!
//! ## Contract 📜
//! - `Ok(Transformed::Entry(_))` — write this
//! - `Ok(Transformed::Skip(_))` — deliberately not written, counted as skipped
//! - `Err(TransformError)` — malformed record, counted as failed, run continues

use serde::Deserialize;

use crate::common::{SourceRecord, TargetEntry};
use crate::errors::TransformError;

pub mod credential_key;
pub mod search_document;

pub use credential_key::{CredentialKey, CredentialKeyConfig};
pub use search_document::{Clock, SearchDocument, SearchDocumentConfig};

/// 🎯 What a transform decided to do with one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    Entry(TargetEntry),
    /// 🙈 not an error, just not for us. The reason is for debug logs.
    Skip(String),
}

/// 🔄 Shape one source record into one target entry.
pub trait Transform {
    fn transform(&self, record: &SourceRecord) -> Result<Transformed, TransformError>;
}

/// 🎛️ Which transform to run. Externally tagged: `[transform.CredentialKey]`.
#[derive(Debug, Deserialize, Clone)]
pub enum TransformConfig {
    #[serde(alias = "credentialkey")]
    CredentialKey(CredentialKeyConfig),
    #[serde(alias = "searchdocument")]
    SearchDocument(SearchDocumentConfig),
}

/// 🎭 The many faces of a Transform. Enum dispatch, same as the backends.
#[derive(Debug, Clone)]
pub enum RecordTransformer {
    CredentialKey(CredentialKey),
    SearchDocument(SearchDocument),
}

impl RecordTransformer {
    pub fn from_config(config: &TransformConfig) -> Self {
        match config {
            TransformConfig::CredentialKey(c) => {
                RecordTransformer::CredentialKey(CredentialKey::new(c.clone()))
            }
            TransformConfig::SearchDocument(c) => {
                RecordTransformer::SearchDocument(SearchDocument::new(c.clone()))
            }
        }
    }

    /// 🏷️ For log lines and the summary table.
    pub fn name(&self) -> &'static str {
        match self {
            RecordTransformer::CredentialKey(_) => "credential-key",
            RecordTransformer::SearchDocument(_) => "search-document",
        }
    }
}

impl Transform for RecordTransformer {
    fn transform(&self, record: &SourceRecord) -> Result<Transformed, TransformError> {
        match self {
            RecordTransformer::CredentialKey(t) => t.transform(record),
            RecordTransformer::SearchDocument(t) => t.transform(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_the_enum_dispatches_to_the_right_transform() {
        let record = SourceRecord::from_value(json!({
            "user_id": 7, "email": "a@b.c", "password_hash": "h", "id": 9
        }))
        .expect("object");

        let creds = RecordTransformer::from_config(&TransformConfig::CredentialKey(
            CredentialKeyConfig::default(),
        ));
        let docs = RecordTransformer::from_config(&TransformConfig::SearchDocument(
            SearchDocumentConfig::default(),
        ));

        assert!(matches!(
            creds.transform(&record),
            Ok(Transformed::Entry(TargetEntry::KeyValue { .. }))
        ));
        assert!(matches!(
            docs.transform(&record),
            Ok(Transformed::Entry(TargetEntry::Document { .. }))
        ));
        assert_eq!(creds.name(), "credential-key");
    }
}
