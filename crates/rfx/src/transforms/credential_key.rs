//! 🔐 CredentialKey — `base64(email:password_hash)` → `user_id`.
//!
//! The auth cache answers "does this email + hash belong to someone, and who?" with one
//! HGET. The key is the credential pair, base64'd (STANDARD alphabet, padded) so any byte
//! in either half survives as a hash field name. The value is the user id as text.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::common::{SourceRecord, TargetEntry};
use crate::errors::TransformError;
use crate::transforms::{Transform, Transformed};

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CredentialKeyConfig {
    /// 📧 first half of the key
    #[serde(default = "default_identity_field")]
    pub identity_field: String,
    /// 🔒 second half of the key. Empty → skipped, there's nothing to authenticate.
    #[serde(default = "default_secret_field")]
    pub secret_field: String,
    /// 🔢 becomes the hash value
    #[serde(default = "default_value_field")]
    pub value_field: String,
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_identity_field() -> String {
    "email".to_string()
}

fn default_secret_field() -> String {
    "password_hash".to_string()
}

fn default_value_field() -> String {
    "user_id".to_string()
}

fn default_separator() -> String {
    ":".to_string()
}

impl Default for CredentialKeyConfig {
    fn default() -> Self {
        Self {
            identity_field: default_identity_field(),
            secret_field: default_secret_field(),
            value_field: default_value_field(),
            separator: default_separator(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialKey {
    config: CredentialKeyConfig,
}

impl CredentialKey {
    pub fn new(config: CredentialKeyConfig) -> Self {
        Self { config }
    }
}

impl Transform for CredentialKey {
    fn transform(&self, record: &SourceRecord) -> Result<Transformed, TransformError> {
        let c = &self.config;
        let who = record.identity(&c.value_field);
        let missing = |field: &str| TransformError::new(who.clone(), format!("missing '{field}'"));

        let identity = record
            .text(&c.identity_field)
            .ok_or_else(|| missing(&c.identity_field))?;
        let secret = record
            .text(&c.secret_field)
            .ok_or_else(|| missing(&c.secret_field))?;
        if secret.is_empty() {
            return Ok(Transformed::Skip(format!(
                "record '{who}' has an empty '{}'",
                c.secret_field
            )));
        }
        let value = record
            .text(&c.value_field)
            .ok_or_else(|| missing(&c.value_field))?;

        let key = STANDARD.encode(format!("{identity}{}{secret}", c.separator));
        Ok(Transformed::Entry(TargetEntry::KeyValue { key, value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> SourceRecord {
        SourceRecord::from_value(value).expect("💀 test record must be an object")
    }

    fn transform(value: serde_json::Value) -> Result<Transformed, TransformError> {
        CredentialKey::new(CredentialKeyConfig::default()).transform(&record(value))
    }

    #[test]
    fn the_one_where_the_key_matches_what_the_api_computes() {
        let out = transform(json!({
            "user_id": 42, "email": "alice@example.com", "password_hash": "$2b$12$abc"
        }));
        assert_eq!(
            out,
            Ok(Transformed::Entry(TargetEntry::KeyValue {
                key: "YWxpY2VAZXhhbXBsZS5jb206JDJiJDEyJGFiYw==".into(),
                value: "42".into(),
            }))
        );
    }

    #[test]
    fn the_one_where_utf8_emails_survive_the_trip() {
        let out = transform(json!({
            "user_id": "u-1", "email": "ёлка@пример.рф", "password_hash": "hash"
        }));
        let Ok(Transformed::Entry(entry)) = &out else {
            panic!("💀 expected an entry, got {out:?}");
        };
        assert_eq!(entry.key(), "0ZHQu9C60LBA0L/RgNC40LzQtdGALtGA0YQ6aGFzaA==");
    }

    #[test]
    fn the_one_where_the_same_row_always_gets_the_same_key() {
        let row = json!({"user_id": 1, "email": "x@y.z", "password_hash": "p"});
        assert_eq!(transform(row.clone()), transform(row));
    }

    #[test]
    fn the_one_where_an_empty_hash_is_skipped_not_failed() {
        let out = transform(json!({"user_id": 1, "email": "x@y.z", "password_hash": ""}));
        assert!(matches!(out, Ok(Transformed::Skip(_))));
    }

    #[test]
    fn the_one_where_a_missing_email_is_a_transform_error() {
        let err = transform(json!({"user_id": 5, "password_hash": "p"}))
            .expect_err("no email, no key");
        assert_eq!(err.record, "5");
        assert!(err.reason.contains("email"));

        let err = transform(json!({"user_id": 5, "email": null, "password_hash": "p"}))
            .expect_err("null email is still no email");
        assert!(err.reason.contains("email"));
    }
}
