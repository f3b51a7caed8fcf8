//! # Persistence Gateway
//!
//! Narrow interface to the row-oriented data store (a PostgREST-compatible
//! REST API in production). Everything is keyed by table name and flat
//! key/value rows; no cross-table joins, no multi-statement transactions.
//!
//! Writes are best-effort: callers log and drop failures, they never retry.

use crate::error::RelayError;
use async_trait::async_trait;
use eyre::eyre;
use md5::{
    Digest,
    Md5,
};
use reqwest::header::{
    HeaderMap,
    HeaderValue,
    AUTHORIZATION,
};
use url::Url;

/// A flat key/value row, as the data store's REST API consumes it.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Equality filters applied to update/select operations, `(column, value)`.
pub type Filters = Vec<(String, String)>;

/// Table names this system writes to.
pub mod tables {
    pub const SERVERS: &str = "server_ingest_srs_servers";
    pub const CONNECTIONS: &str = "server_ingest_client_connections";
    pub const CHANNELS: &str = "channels_channel";
    pub const SERVER_METRICS: &str = "iblups_server_metrics";
    pub const STREAM_METRICS: &str = "iblups_stream_metrics";
    pub const SYSTEM_EVENTS: &str = "iblups_system_events";
    pub const DIAGNOSTICS: &str = "iblups_server_diagnostics";
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync + 'static {
    /// Append a row.
    async fn insert(&self, table: &str, row: Row) -> Result<(), RelayError>;

    /// Patch all rows matching the filters with the given columns.
    async fn update(&self, table: &str, row: Row, filters: Filters) -> Result<(), RelayError>;

    /// Insert, or overwrite the row sharing the comma-separated conflict
    /// columns. This is what makes per-minute metric rows idempotent.
    async fn upsert(&self, table: &str, row: Row, conflict_keys: &str) -> Result<(), RelayError>;

    /// Fetch a single column from rows matching the filters.
    async fn select(&self, table: &str, column: &str, filters: Filters) -> Result<Vec<String>, RelayError>;
}

/// Turn a `serde_json::json!` object literal into a [`Row`].
pub fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

/// Stable, non-reversible file name component for a channel's thumbnail.
/// Hashing the channel id means republishing never changes the cover URL.
pub fn persistent_hash(id: &str) -> String {
    let digest = Md5::digest(id.as_bytes());
    format!("{digest:x}")
}

/// [`PersistenceGateway`] backed by the Supabase REST API.
pub struct SupabaseGateway {
    http: reqwest::Client,
    base_url: Url,
    headers: HeaderMap,
}

impl SupabaseGateway {
    pub fn new(http: reqwest::Client, base_url: Url, api_key: &str) -> Result<Self, RelayError> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| RelayError::Persistence(eyre!("invalid api key: {e}")))?;
        bearer.set_sensitive(true);
        let mut apikey = HeaderValue::from_str(api_key)
            .map_err(|e| RelayError::Persistence(eyre!("invalid api key: {e}")))?;
        apikey.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("apikey", apikey);

        Ok(Self {
            http,
            base_url,
            headers,
        })
    }

    fn table_url(&self, table: &str, filters: &[(String, String)]) -> Result<Url, RelayError> {
        let mut url = self
            .base_url
            .join(&format!("rest/v1/{table}"))
            .map_err(|e| RelayError::Persistence(e.into()))?;
        for (column, value) in filters {
            url.query_pairs_mut().append_pair(column, &format!("eq.{value}"));
        }
        Ok(url)
    }
}

#[async_trait]
impl PersistenceGateway for SupabaseGateway {
    async fn insert(&self, table: &str, row: Row) -> Result<(), RelayError> {
        let url = self.table_url(table, &[])?;
        self.http
            .post(url)
            .headers(self.headers.clone())
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| RelayError::Persistence(e.into()))?;
        Ok(())
    }

    async fn update(&self, table: &str, row: Row, filters: Filters) -> Result<(), RelayError> {
        let url = self.table_url(table, &filters)?;
        self.http
            .patch(url)
            .headers(self.headers.clone())
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| RelayError::Persistence(e.into()))?;
        Ok(())
    }

    async fn upsert(&self, table: &str, row: Row, conflict_keys: &str) -> Result<(), RelayError> {
        let mut url = self.table_url(table, &[])?;
        url.query_pairs_mut().append_pair("on_conflict", conflict_keys);
        self.http
            .post(url)
            .headers(self.headers.clone())
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| RelayError::Persistence(e.into()))?;
        Ok(())
    }

    async fn select(&self, table: &str, column: &str, filters: Filters) -> Result<Vec<String>, RelayError> {
        let mut url = self.table_url(table, &filters)?;
        url.query_pairs_mut().append_pair("select", column);

        let rows: Vec<Row> = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| RelayError::Persistence(e.into()))?
            .json()
            .await
            .map_err(|e| RelayError::Persistence(e.into()))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match row.get(column) {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
                None => None,
            })
            .collect())
    }
}
