use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, trace};

use crate::backends::Sink;
use crate::common::{ItemOutcome, TargetEntry};
use crate::errors::FatalError;

/// 🏗️ The built-in index definition: one shard, no replicas, Russian analyzer on the
/// free-text fields, explicit date formats. Swap it with `index_definition_file`.
const DEFAULT_INDEX_DEFINITION: &str = include_str!("../../../resources/events_index.json");

// 🚰 ElasticsearchSinkConfig — "What's the DEAL with index names?" — Jerry Seinfeld, if he were a DevOps engineer.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchSinkConfig {
    /// 📡 Where to send the documents. Scheme + host + port. Yes, all of it.
    #[serde(default = "default_url")]
    pub url: String,
    /// 🔒 Username. The bouncer at the club. Except the club is a database.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key — the velvet rope variant of authentication. Wins over basic auth.
    #[serde(default)]
    pub api_key: Option<String>,
    /// 📦 The index this run drops and rebuilds.
    #[serde(default = "default_index")]
    pub index: String,
    /// 📜 JSON file with `settings` + `mappings`. None → the built-in events definition.
    #[serde(default)]
    pub index_definition_file: Option<String>,
    /// ⏱️ per-request timeout. Bulk requests can be meaty and we're not monsters.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_index() -> String {
    "events".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// 📬 The parts of a `_bulk` response we actually read.
#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

/// 💀 `{"type": "mapper_parsing_exception", "reason": "..."}` → one readable line.
fn describe_item_error(error: &Value) -> String {
    let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
    match error.get("reason").and_then(Value::as_str) {
        Some(reason) => format!("{kind}: {reason}"),
        None => kind.to_string(),
    }
}

/// 📡 The sink side of the Elasticsearch backend — drop, create, bulk, count.
///
/// Internally holds:
/// - `client`: the HTTP muscle 💪, reused across requests (and across concurrent chunks)
/// - `config`: auth, URL, index
/// - `index_definition`: the settings/mappings body PUT on every clear
#[derive(Debug)]
pub(crate) struct ElasticsearchSink {
    client: reqwest::Client,
    config: ElasticsearchSinkConfig,
    index_definition: Value,
}

impl ElasticsearchSink {
    /// 🚀 Stand up a new `ElasticsearchSink`, fully wired and ready to rebuild an index.
    ///
    /// 1. Loads the index definition (file or built-in). Bad JSON → configuration error.
    /// 2. Builds the `reqwest::Client` (10s connect, `request_timeout_secs` per request).
    /// 3. Pings the cluster root. No answer → `FatalError::Connectivity`, before any damage is done.
    pub(crate) async fn new(config: ElasticsearchSinkConfig) -> Result<Self> {
        let index_definition = load_index_definition(config.index_definition_file.as_deref())?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. The architect shrugged.")?;

        let sink = Self {
            client,
            config,
            index_definition,
        };

        // -- 📡 Connectivity ping — "Hello? Is this thing on?" — a developer, gesturing at a cluster.
        let response = sink
            .authorize(sink.client.get(sink.url("")))
            .send()
            .await
            .with_context(|| FatalError::Connectivity(format!("elasticsearch at {}", sink.config.url)))?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "💀 GET / answered {} — wrong credentials, or not an Elasticsearch",
                response.status()
            ))
            .with_context(|| FatalError::Connectivity(format!("elasticsearch at {}", sink.config.url)));
        }
        info!("✓ Connected to Elasticsearch at {}", sink.config.url);
        Ok(sink)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    /// 🔒 Auth priority: API key wins over basic auth. This is not a democracy.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    /// 📦 Send, insist on 2xx, hand back the body bytes.
    async fn send_expecting_success(&self, request: RequestBuilder, what: &str) -> Result<Vec<u8>> {
        let response = self
            .authorize(request)
            .send()
            .await
            .with_context(|| format!("💀 {what}: the request never made it to Elasticsearch"))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("💀 {what}: the response body wandered off mid-read"))?;
        if !status.is_success() {
            bail!(
                "💀 {what}: Elasticsearch said {status}. The body of the response read: '{}'",
                String::from_utf8_lossy(&body)
            );
        }
        Ok(body.to_vec())
    }

    /// 📜 Pair each document with its `index` action line. Key/value entries have no business here.
    fn render_bulk_body(&self, documents: &[(&str, &serde_json::Map<String, Value>)]) -> Result<String> {
        let mut body = String::new();
        for (id, fields) in documents {
            let action = json!({ "index": { "_index": self.config.index, "_id": id } });
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(fields)?);
            body.push('\n');
        }
        Ok(body)
    }
}

fn load_index_definition(path: Option<&str>) -> Result<Value> {
    let (raw, origin) = match path {
        Some(path) => (
            std::fs::read_to_string(path).with_context(|| {
                FatalError::Configuration(format!("index definition file '{path}' is unreadable"))
            })?,
            path.to_string(),
        ),
        None => (DEFAULT_INDEX_DEFINITION.to_string(), "built-in events definition".to_string()),
    };
    let definition: Value = serde_json::from_str(&raw).with_context(|| {
        FatalError::Configuration(format!("index definition ({origin}) is not valid JSON"))
    })?;
    if !definition.is_object() {
        return Err(anyhow::anyhow!("expected a JSON object with settings/mappings")).with_context(
            || FatalError::Configuration(format!("index definition ({origin}) has the wrong shape")),
        );
    }
    Ok(definition)
}

#[async_trait]
impl Sink for ElasticsearchSink {
    fn collection(&self) -> &str {
        &self.config.index
    }

    /// 🩺 `_cluster/health?wait_for_status=yellow` — yellow or green means go.
    async fn probe_ready(&self) -> Result<()> {
        let body = self
            .send_expecting_success(
                self.client
                    .get(self.url("_cluster/health?wait_for_status=yellow&timeout=10s")),
                "cluster health",
            )
            .await?;
        let health: Value = serde_json::from_slice(&body).context("💀 cluster health was not JSON")?;
        match health.get("status").and_then(Value::as_str) {
            Some(status @ ("yellow" | "green")) => {
                info!("✓ Elasticsearch cluster is {status}");
                Ok(())
            }
            Some(other) => bail!("cluster status is {other}"),
            None => bail!("cluster health had no status field"),
        }
    }

    /// 🗑️ HEAD → DELETE (if it exists) → PUT with the index definition.
    async fn clear(&self) -> Result<()> {
        let index = &self.config.index;
        let exists = self
            .authorize(self.client.head(self.url(index)))
            .send()
            .await
            .with_context(|| format!("💀 HEAD /{index}: got ghosted"))?
            .status();

        match exists {
            StatusCode::NOT_FOUND => debug!("📭 index '{index}' does not exist yet, nothing to delete"),
            s if s.is_success() => {
                info!("🗑️ Deleting existing index: {index}");
                self.send_expecting_success(self.client.delete(self.url(index)), "delete index")
                    .await?;
            }
            other => bail!("💀 HEAD /{index} answered {other}"),
        }

        info!("🏗️ Creating index: {index}");
        self.send_expecting_success(
            self.client
                .put(self.url(index))
                .header("Content-Type", "application/json")
                .body(serde_json::to_string(&self.index_definition)?),
            "create index",
        )
        .await?;
        Ok(())
    }

    /// 📡 POST one chunk to `_bulk`, then read back a verdict per document.
    ///
    /// ⚠️ Content-Type: application/x-ndjson — not application/json. VERY important.
    /// A non-2xx on the bulk call itself is a batch-level `Err` (retry territory).
    /// A 2xx with `errors: true` is per-item failures, which is just Tuesday.
    async fn write_batch(&self, entries: &[TargetEntry]) -> Result<Vec<ItemOutcome>> {
        let documents: Vec<(&str, &serde_json::Map<String, Value>)> = entries
            .iter()
            .filter_map(|e| match e {
                TargetEntry::Document { id, fields } => Some((id.as_str(), fields)),
                TargetEntry::KeyValue { .. } => None,
            })
            .collect();

        let mut verdicts = if documents.is_empty() {
            Vec::new().into_iter()
        } else {
            let body = self.render_bulk_body(&documents)?;
            trace!("📡 Sending {} bytes to /_bulk", body.len());
            let raw = self
                .send_expecting_success(
                    self.client
                        .post(self.url("_bulk"))
                        .header("Content-Type", "application/x-ndjson")
                        .body(body),
                    "bulk request",
                )
                .await?;
            let response: BulkResponse =
                serde_json::from_slice(&raw).context("💀 the _bulk response was not the JSON we were promised")?;
            if response.items.len() != documents.len() {
                bail!(
                    "💀 sent {} documents to _bulk but got {} verdicts back",
                    documents.len(),
                    response.items.len()
                );
            }
            if response.errors {
                debug!("⚠️ _bulk reported per-item errors for this chunk");
            }
            response.items.into_iter()
        };

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = entry.key().to_string();
            if matches!(entry, TargetEntry::KeyValue { .. }) {
                outcomes.push(ItemOutcome::Failed {
                    key,
                    reason: "an Elasticsearch index stores documents, not key/value pairs".to_string(),
                });
                continue;
            }
            let item = verdicts
                .next()
                .and_then(|by_action| by_action.into_values().next());
            outcomes.push(match item {
                Some(item) if (200..300).contains(&item.status) && item.error.is_none() => {
                    ItemOutcome::Written { key }
                }
                Some(item) => ItemOutcome::Failed {
                    key,
                    reason: item
                        .error
                        .as_ref()
                        .map(describe_item_error)
                        .unwrap_or_else(|| format!("status {}", item.status)),
                },
                None => ItemOutcome::Failed {
                    key,
                    reason: "no verdict in the _bulk response".to_string(),
                },
            });
        }
        Ok(outcomes)
    }

    async fn refresh(&self) -> Result<()> {
        let path = format!("{}/_refresh", self.config.index);
        self.send_expecting_success(self.client.post(self.url(&path)), "refresh index")
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let path = format!("{}/_count", self.config.index);
        let body = self
            .send_expecting_success(self.client.get(self.url(&path)), "count")
            .await?;
        let counted: Value = serde_json::from_slice(&body).context("💀 _count was not JSON")?;
        counted
            .get("count")
            .and_then(Value::as_u64)
            .context("💀 _count response had no count. Counting is hard.")
    }

    /// 🔍 match_all, size 1. Show the title if there is one, the id if there isn't.
    async fn sample(&self) -> Result<Option<String>> {
        let path = format!("{}/_search", self.config.index);
        let query = json!({ "query": { "match_all": {} }, "size": 1 });
        let body = self
            .send_expecting_success(
                self.client
                    .post(self.url(&path))
                    .header("Content-Type", "application/json")
                    .body(query.to_string()),
                "search test",
            )
            .await?;
        let result: Value = serde_json::from_slice(&body).context("💀 _search was not JSON")?;
        let Some(hit) = result.pointer("/hits/hits/0") else {
            return Ok(None);
        };
        let id = hit.get("_id").and_then(Value::as_str).unwrap_or("?");
        let title = hit
            .pointer("/_source/title")
            .and_then(Value::as_str)
            .unwrap_or("N/A");
        Ok(Some(format!("{id}: {title}")))
    }

    /// 🗑️ Nothing to flush — we don't buffer. The connection pool says goodbye on drop. 🦆
    async fn close(&self) -> Result<()> {
        debug!("🗑️ Elasticsearch sink closing — no buffer to flush, just vibes to release");
        Ok(())
    }
}
