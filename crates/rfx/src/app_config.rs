//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 📐 Shape of a run:
//! ```toml
//! [runtime]
//! page_size = 10000
//!
//! [source_config.Postgres]
//! host = "db.internal"
//! database = "bulbul"
//!
//! [sink_config.Valkey]
//! hash_key = "users:auth"
//! ```
//! `[transform.*]` is optional — left out, the sink picks the transform it can actually store.

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub use crate::backends::elasticsearch::ElasticsearchSinkConfig;
pub use crate::backends::file::{Compression, ExportFormat, FileSourceConfig};
pub use crate::backends::in_mem::{InMemorySinkConfig, InMemorySourceConfig};
pub use crate::backends::postgres::PostgresSourceConfig;
pub use crate::backends::valkey::ValkeySinkConfig;
use crate::errors::FatalError;
use crate::retry::RetryPolicy;
pub use crate::transforms::{CredentialKeyConfig, SearchDocumentConfig, TransformConfig};

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🚰 Where the records come from.
    pub source_config: SourceConfig,
    /// 🕳️ Where they end up (after we burn down whatever was there before).
    pub sink_config: SinkConfig,
    /// 🔄 How a record becomes an entry. Optional — the sink has opinions.
    #[serde(default)]
    pub transform: Option<TransformConfig>,
    #[serde(default, alias = "supervisor_config")]
    pub runtime: RuntimeConfig,
}

/// 🚰 The many faces of a source config. Externally tagged: `[source_config.Postgres]`.
///
/// The lowercase aliases are for env vars: figment lowercases every key it reads from
/// `RFX_*`, so `RFX_SOURCE_CONFIG__POSTGRES__HOST` arrives as `postgres`.
#[derive(Debug, Deserialize, Clone)]
pub enum SourceConfig {
    #[serde(alias = "postgres")]
    Postgres(PostgresSourceConfig),
    #[serde(alias = "file")]
    File(FileSourceConfig),
    #[serde(alias = "inmemory")]
    InMemory(InMemorySourceConfig),
}

/// 🕳️ The many faces of a sink config. Externally tagged: `[sink_config.Elasticsearch]`.
#[derive(Debug, Deserialize, Clone)]
pub enum SinkConfig {
    #[serde(alias = "valkey")]
    Valkey(ValkeySinkConfig),
    #[serde(alias = "elasticsearch")]
    Elasticsearch(ElasticsearchSinkConfig),
    #[serde(alias = "inmemory")]
    InMemory(InMemorySinkConfig),
}

impl SinkConfig {
    /// 🏷️ The collection this run replaces: hash key, index name, or the in-memory label.
    pub fn collection_name(&self) -> &str {
        match self {
            SinkConfig::Valkey(c) => &c.hash_key,
            SinkConfig::Elasticsearch(c) => &c.index,
            SinkConfig::InMemory(c) => &c.collection,
        }
    }

    /// ✏️ Point the run at a different collection (the CLI's `--collection`).
    pub fn set_collection_name(&mut self, name: String) {
        match self {
            SinkConfig::Valkey(c) => c.hash_key = name,
            SinkConfig::Elasticsearch(c) => c.index = name,
            SinkConfig::InMemory(c) => c.collection = name,
        }
    }
}

/// ⚙️ The runtime knobs. How big the pages, how many workers, how chatty the progress.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// 📚 records per source page (and per writer batch)
    #[serde(default = "default_page_size", alias = "batch_size")]
    pub page_size: usize,
    /// 🧩 entries per bulk call; a page is split into chunks of this size
    #[serde(default = "default_bulk_chunk_size", alias = "chunk_size")]
    pub bulk_chunk_size: usize,
    /// 🧵 concurrent bulk calls per page
    #[serde(default = "default_sink_parallelism", alias = "thread_count")]
    pub sink_parallelism: usize,
    /// 📣 log a counters snapshot every N processed entries
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
    /// ⏱️ per-chunk write timeout
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
    /// 🔁 what to do when a chunk times out or the transport hiccups
    #[serde(default)]
    pub write_retry: RetryPolicy,
    /// 🐢 how long to wait for the target to become ready during INIT
    #[serde(default = "RetryPolicy::readiness")]
    pub readiness: RetryPolicy,
    /// 🔍 run one representative read against the target after loading
    #[serde(default = "default_true")]
    pub sanity_check: bool,
    #[serde(default = "default_true")]
    pub show_progress_bar: bool,
}

// 📚 10,000 — the page size the cache loader always used. It survived. It earned tenure.
fn default_page_size() -> usize {
    10_000
}

// 🧩 1,000 per bulk call — the events loader's chunk size
fn default_bulk_chunk_size() -> usize {
    1_000
}

// 🧵 two workers, like the events loader's thread_count=2. a duo. a buddy cop movie.
fn default_sink_parallelism() -> usize {
    2
}

fn default_progress_every() -> u64 {
    10_000
}

fn default_batch_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            bulk_chunk_size: default_bulk_chunk_size(),
            sink_parallelism: default_sink_parallelism(),
            progress_every: default_progress_every(),
            batch_timeout_secs: default_batch_timeout_secs(),
            write_retry: RetryPolicy::default(),
            readiness: RetryPolicy::readiness(),
            sanity_check: true,
            show_progress_bar: true,
        }
    }
}

impl AppConfig {
    /// 🔄 The transform this run will use: the explicit one, or the sink's natural partner.
    pub fn transform_config(&self) -> TransformConfig {
        if let Some(explicit) = &self.transform {
            return explicit.clone();
        }
        match self.sink_config {
            SinkConfig::Valkey(_) => TransformConfig::CredentialKey(CredentialKeyConfig::default()),
            SinkConfig::Elasticsearch(_) | SinkConfig::InMemory(_) => {
                TransformConfig::SearchDocument(SearchDocumentConfig::default())
            }
        }
    }

    /// 🚦 INIT-time validation. Everything here fails before a single side effect.
    pub fn validate(&self) -> Result<(), FatalError> {
        let rt = &self.runtime;
        let reject = |msg: String| Err(FatalError::Configuration(msg));

        if rt.page_size == 0 {
            return reject("runtime.page_size must be greater than 0".into());
        }
        if rt.bulk_chunk_size == 0 {
            return reject("runtime.bulk_chunk_size must be greater than 0".into());
        }
        if rt.sink_parallelism == 0 {
            return reject("runtime.sink_parallelism must be at least 1".into());
        }
        if rt.progress_every == 0 {
            return reject("runtime.progress_every must be greater than 0".into());
        }
        if rt.batch_timeout_secs == 0 {
            return reject("runtime.batch_timeout_secs must be greater than 0".into());
        }
        if self.sink_config.collection_name().trim().is_empty() {
            return reject("the target collection name (hash_key / index) is missing".into());
        }

        match &self.source_config {
            SourceConfig::Postgres(pg) => pg.validate().map_err(FatalError::Configuration)?,
            SourceConfig::File(file) if file.file_name.trim().is_empty() => {
                return reject("source_config.File.file_name is missing".into());
            }
            _ => {}
        }

        // 🤝 a key/value cache can't hold documents and a search index has no use for
        // base64 credential keys. The in-memory sink takes anything. It has no standards.
        match (&self.sink_config, self.transform_config()) {
            (SinkConfig::Valkey(_), TransformConfig::SearchDocument(_)) => reject(
                "the Valkey sink stores key/value pairs; use the CredentialKey transform".into(),
            ),
            (SinkConfig::Elasticsearch(_), TransformConfig::CredentialKey(_)) => reject(
                "the Elasticsearch sink stores documents; use the SearchDocument transform".into(),
            ),
            _ => Ok(()),
        }
    }
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`RFX_*`, nested with `__`, e.g.
/// `RFX_RUNTIME__PAGE_SIZE=500`) with an optional TOML file. TOML wins on conflicts.
/// No file → env only. No assumptions. No pizza defaults.
///
/// 💀 Unparseable config comes back tagged as a configuration error, so the CLI exits 2.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("RFX_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (RFX_*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (RFX_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config
        .extract::<AppConfig>()
        .context(context_msg)
        .context(FatalError::Configuration(
            "configuration could not be loaded".into(),
        ))
}
