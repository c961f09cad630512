use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError};
use serde::Deserialize;
use tracing::{debug, info};

use crate::backends::Sink;
use crate::common::{ItemOutcome, TargetEntry};
use crate::errors::FatalError;

/// 🗝️ Where the cache lives and which hash we're about to obliterate.
#[derive(Debug, Deserialize, Clone)]
pub struct ValkeySinkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 🔒 empty string counts as "no password", same as unset
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
    /// 🏷️ the one hash this run replaces
    #[serde(default = "default_hash_key")]
    pub hash_key: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_hash_key() -> String {
    "users:auth".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for ValkeySinkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            db: 0,
            hash_key: default_hash_key(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ValkeySinkConfig {
    fn address(&self) -> String {
        format!("valkey at {}:{}/{}", self.host, self.port, self.db)
    }
}

/// 🗝️ A multiplexed connection to Valkey. Cloning the connection is cheap and is how
/// several chunks get to pipeline through one socket at the same time.
pub(crate) struct ValkeySink {
    config: ValkeySinkConfig,
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for ValkeySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🔒 password omitted. MultiplexedConnection omitted because it has nothing to say.
        f.debug_struct("ValkeySink")
            .field("address", &self.config.address())
            .field("hash_key", &self.config.hash_key)
            .finish()
    }
}

/// 📡 Did the socket fail (retry-worthy, batch-level), or did the server say no (per item)?
fn is_transport(err: &RedisError) -> bool {
    err.is_io_error() || err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal()
}

/// 🚦 Sort an HSET result: `Ok(None)` written, `Ok(Some(reason))` the server said no
/// (every pair fails, nothing was written), `Err` the socket gave out and the writer retries.
fn rejection_of(written: Result<(), RedisError>) -> Result<Option<String>, RedisError> {
    match written {
        Ok(()) => Ok(None),
        Err(e) if is_transport(&e) => Err(e),
        Err(e) => Ok(Some(e.to_string())),
    }
}

/// 📋 One verdict per entry, in input order. Documents never fit in a hash field.
fn verdicts(entries: &[TargetEntry], rejection: Option<&str>) -> Vec<ItemOutcome> {
    entries
        .iter()
        .map(|entry| match (entry, rejection) {
            (TargetEntry::Document { id, .. }, _) => ItemOutcome::Failed {
                key: id.clone(),
                reason: "a Valkey hash stores key/value pairs, not documents".to_string(),
            },
            (TargetEntry::KeyValue { key, .. }, Some(reason)) => ItemOutcome::Failed {
                key: key.clone(),
                reason: reason.to_string(),
            },
            (TargetEntry::KeyValue { key, .. }, None) => ItemOutcome::Written { key: key.clone() },
        })
        .collect()
}

impl ValkeySink {
    /// 🚀 Connect and PING. If Valkey doesn't PONG, we don't proceed.
    pub(crate) async fn new(config: ValkeySinkConfig) -> Result<Self> {
        let info = redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: redis::RedisConnectionInfo {
                db: config.db,
                password: config.password.clone().filter(|p| !p.is_empty()),
                ..Default::default()
            },
        };
        let client = redis::Client::open(info)
            .with_context(|| FatalError::Configuration(format!("bad connection info for {}", config.address())))?;

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let connection = match tokio::time::timeout(timeout, client.get_multiplexed_async_connection()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(e).with_context(|| FatalError::Connectivity(config.address())),
            Err(_) => {
                return Err(anyhow::anyhow!("⏱️ no answer within {timeout:?}"))
                    .with_context(|| FatalError::Connectivity(config.address()));
            }
        };

        let sink = Self { config, connection };
        sink.probe_ready()
            .await
            .with_context(|| FatalError::Connectivity(sink.config.address()))?;
        info!("🗝️ Connected to {}", sink.config.address());
        Ok(sink)
    }
}

#[async_trait]
impl Sink for ValkeySink {
    fn collection(&self) -> &str {
        &self.config.hash_key
    }

    async fn probe_ready(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("💀 Valkey did not answer PING")?;
        if pong != "PONG" {
            bail!("💀 Valkey answered PING with '{pong}'. That's not the password.");
        }
        Ok(())
    }

    /// 🗑️ DEL the whole hash. Gone. Reduced to atoms.
    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn
            .del(&self.config.hash_key)
            .await
            .with_context(|| format!("💀 DEL {} failed", self.config.hash_key))?;
        info!(
            "🗑️ Cleared existing hash '{}' ({} key removed)",
            self.config.hash_key, removed
        );
        Ok(())
    }

    /// 📡 One HSET carrying every field in the chunk.
    ///
    /// Document entries can't live in a hash field, so each one fails on its own.
    /// If the server rejects the HSET (WRONGTYPE, OOM...) every pair in it fails together:
    /// HSET is atomic, nothing was written. A transport failure is an `Err` for the writer to retry.
    async fn write_batch(&self, entries: &[TargetEntry]) -> Result<Vec<ItemOutcome>> {
        let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(entries.len());
        for entry in entries {
            if let TargetEntry::KeyValue { key, value } = entry {
                pairs.push((key.as_str(), value.as_str()));
            }
        }

        let rejection = if pairs.is_empty() {
            None
        } else {
            let mut conn = self.connection.clone();
            let written: Result<(), RedisError> =
                conn.hset_multiple(&self.config.hash_key, &pairs[..]).await;
            rejection_of(written).with_context(|| {
                format!(
                    "💀 HSET of {} field(s) into '{}' lost the connection",
                    pairs.len(),
                    self.config.hash_key
                )
            })?
        };

        debug!(
            "📡 HSET {} field(s) into '{}'",
            pairs.len(),
            self.config.hash_key
        );

        Ok(verdicts(entries, rejection.as_deref()))
    }

    async fn count(&self) -> Result<u64> {
        let mut conn = self.connection.clone();
        let fields: u64 = conn
            .hlen(&self.config.hash_key)
            .await
            .with_context(|| format!("💀 HLEN {} failed", self.config.hash_key))?;
        Ok(fields)
    }

    /// 🔍 HRANDFIELD + HGET: one random credential, to prove the hash is actually readable.
    async fn sample(&self) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let field: Option<String> = redis::cmd("HRANDFIELD")
            .arg(&self.config.hash_key)
            .query_async(&mut conn)
            .await
            .context("💀 HRANDFIELD failed")?;
        let Some(field) = field else {
            return Ok(None);
        };
        let value: Option<String> = conn
            .hget(&self.config.hash_key, &field)
            .await
            .context("💀 HGET failed")?;
        Ok(Some(format!(
            "{field} → {}",
            value.unwrap_or_else(|| "(vanished)".to_string())
        )))
    }

    async fn close(&self) -> Result<()> {
        // -- 🗑️ the multiplexed connection closes when the last clone drops. nothing to flush.
        debug!("🗑️ Valkey sink closing for {}", self.config.address());
        Ok(())
    }
}
