use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Statement};
use tracing::{debug, info, warn};

use crate::backends::Source;
use crate::common::{Cursor, SourceRecord};
use crate::errors::FatalError;

/// 🐘 Where the rows live and which ones count.
///
/// The defaults describe the auth cache's home turf: active users with a non-empty
/// password hash, ordered by `user_id`.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSourceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_username")]
    pub username: String,
    /// 🔒 empty string counts as "no password", same as unset
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 📋 may be schema-qualified, e.g. `public.users`
    #[serde(default = "default_table")]
    pub table: String,
    /// 🔢 the stable ordering key. Pagination by offset is only sane if this is unique.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// 📋 empty → every column
    #[serde(default = "default_columns")]
    pub columns: Vec<String>,
    /// 🚦 raw SQL predicate, trusted as-is. It comes from the operator's config, not from users.
    /// Set it to `""` to read the whole table.
    #[serde(default = "default_filter")]
    pub filter: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "bulbul".to_string()
}

fn default_username() -> String {
    "postgres".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_table() -> String {
    "users".to_string()
}

fn default_id_column() -> String {
    "user_id".to_string()
}

fn default_columns() -> Vec<String> {
    vec![
        "user_id".to_string(),
        "email".to_string(),
        "password_hash".to_string(),
    ]
}

fn default_filter() -> Option<String> {
    Some("is_active = true AND password_hash IS NOT NULL AND password_hash != ''".to_string())
}

impl PostgresSourceConfig {
    /// 🚦 Identifier hygiene. These get spliced into SQL, so they get to be boring:
    /// letters, digits, underscores. Tables may carry one schema prefix.
    pub(crate) fn validate(&self) -> Result<(), String> {
        let table_ok = {
            let parts: Vec<&str> = self.table.split('.').collect();
            parts.len() <= 2 && parts.iter().all(|p| is_identifier(p))
        };
        if !table_ok {
            return Err(format!("'{}' is not a valid table name", self.table));
        }
        if !is_identifier(&self.id_column) {
            return Err(format!("'{}' is not a valid id column", self.id_column));
        }
        if let Some(bad) = self.columns.iter().find(|c| !is_identifier(c)) {
            return Err(format!("'{bad}' is not a valid column name"));
        }
        if !self.columns.is_empty() && !self.columns.contains(&self.id_column) {
            return Err(format!(
                "columns must include the id column '{}' so pages can be ordered",
                self.id_column
            ));
        }
        Ok(())
    }

    /// 📜 `to_jsonb` turns each row into one JSON object, so the page comes back already
    /// shaped like a `SourceRecord` and column types are postgres' problem, not ours.
    pub(crate) fn page_query(&self) -> String {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };
        let filter = match self.filter.as_deref().map(str::trim) {
            Some(f) if !f.is_empty() => format!(" WHERE {f}"),
            _ => String::new(),
        };
        format!(
            "SELECT to_jsonb(page) FROM (SELECT {columns} FROM {table}{filter} \
             ORDER BY {id} LIMIT $1 OFFSET $2) AS page ORDER BY page.{id}",
            table = self.table,
            id = self.id_column,
        )
    }

    pub(crate) fn count_query(&self) -> String {
        match self.filter.as_deref().map(str::trim) {
            Some(f) if !f.is_empty() => format!("SELECT count(*) FROM {} WHERE {f}", self.table),
            _ => format!("SELECT count(*) FROM {}", self.table),
        }
    }

    fn address(&self) -> String {
        format!("postgres at {}:{}/{}", self.host, self.port, self.database)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 🐘 A connected, prepared, ready-to-page PostgreSQL source.
///
/// The connection future runs on its own task (tokio-postgres splits the client from
/// the socket driver). `close` aborts that task, which is the whole teardown.
pub(crate) struct PostgresSource {
    config: PostgresSourceConfig,
    client: Client,
    page_statement: Statement,
    connection_task: JoinHandle<()>,
    expected_total: Option<u64>,
}

impl std::fmt::Debug for PostgresSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🔒 the password stays out of Debug output. Logs are forever.
        f.debug_struct("PostgresSource")
            .field("address", &self.config.address())
            .field("table", &self.config.table)
            .field("expected_total", &self.expected_total)
            .finish()
    }
}

impl PostgresSource {
    /// 🚀 Connect, prepare the page query, and take a best-effort head count.
    pub(crate) async fn new(config: PostgresSourceConfig) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.username)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
            pg.password(password);
        }

        let (client, connection) = pg
            .connect(NoTls)
            .await
            .with_context(|| FatalError::Connectivity(config.address()))?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("🐘 PostgreSQL connection error: {e}");
            }
        });

        let query = config.page_query();
        debug!("📜 page query: {query}");
        let page_statement = match client.prepare(&query).await {
            Ok(statement) => statement,
            Err(e) => {
                connection_task.abort();
                return Err(e).with_context(|| {
                    FatalError::Configuration(format!(
                        "postgres rejected the page query for table '{}'",
                        config.table
                    ))
                });
            }
        };

        let expected_total = match client.query_one(&config.count_query(), &[]).await {
            Ok(row) => row.try_get::<_, i64>(0).ok().map(|n| n.max(0) as u64),
            Err(e) => {
                warn!("🤷 Could not count rows up front ({e}). Progress will be vibes-based.");
                None
            }
        };

        info!(
            "🐘 Connected to {} — {} row(s) match on '{}'",
            config.address(),
            expected_total.map_or("unknown".to_string(), |n| n.to_string()),
            config.table
        );

        Ok(Self {
            config,
            client,
            page_statement,
            connection_task,
            expected_total,
        })
    }
}

#[async_trait]
impl Source for PostgresSource {
    async fn fetch_page(&mut self, page_size: usize, cursor: Cursor) -> Result<Vec<SourceRecord>> {
        let limit = page_size as i64;
        let offset = cursor.offset as i64;
        let rows = self
            .client
            .query(&self.page_statement, &[&limit, &offset])
            .await
            .with_context(|| {
                format!(
                    "💀 Page fetch at offset {offset} from '{}' failed. The elephant forgot.",
                    self.config.table
                )
            })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let value: Value = row
                .try_get(0)
                .context("💀 to_jsonb came back as something that isn't JSON. Impressive.")?;
            if let Some(record) = SourceRecord::from_value(value) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn expected_total(&self) -> Option<u64> {
        self.expected_total
    }

    fn describe(&self) -> String {
        format!("{} (table {})", self.config.address(), self.config.table)
    }

    async fn close(&mut self) -> Result<()> {
        self.connection_task.abort();
        debug!("🗑️ PostgreSQL connection task aborted for {}", self.config.address());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> PostgresSourceConfig {
        serde_json::from_str("{}").expect("💀 defaults should deserialize from nothing")
    }

    #[test]
    fn the_one_where_the_default_query_matches_the_auth_loader() {
        let query = defaults().page_query();
        assert_eq!(
            query,
            "SELECT to_jsonb(page) FROM (SELECT user_id, email, password_hash FROM users \
             WHERE is_active = true AND password_hash IS NOT NULL AND password_hash != '' \
             ORDER BY user_id LIMIT $1 OFFSET $2) AS page ORDER BY page.user_id"
        );
        assert!(defaults().validate().is_ok());
    }

    #[test]
    fn the_one_where_no_filter_means_no_where() {
        let mut config = defaults();
        config.filter = None;
        config.columns = Vec::new();
        assert!(config.page_query().starts_with("SELECT to_jsonb(page) FROM (SELECT * FROM users ORDER BY"));
        assert_eq!(config.count_query(), "SELECT count(*) FROM users");
    }

    #[test]
    fn the_one_where_bobby_tables_is_turned_away() {
        let mut config = defaults();
        config.table = "users; DROP TABLE users".into();
        assert!(config.validate().is_err());

        let mut config = defaults();
        config.id_column = "1user".into();
        assert!(config.validate().is_err());

        let mut config = defaults();
        config.table = "public.users".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn the_one_where_the_id_column_must_be_selected() {
        let mut config = defaults();
        config.columns = vec!["email".into(), "password_hash".into()];
        let err = config.validate().expect_err("ordering needs the id column");
        assert!(err.contains("user_id"));
    }
}
