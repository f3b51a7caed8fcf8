//! # Session Tracker
//!
//! Correlates SRS `on_play` / `on_stop` callbacks into duration-bearing
//! session rows. SRS omits the client id on some protocols, so closing a
//! session falls back to a composite-key match when no id is available.
//!
//! The in-memory map is process-local and lost on restart; rows persisted
//! without a matching in-memory entry close with a duration of zero.

use crate::{
    callback::SrsCallback,
    gateway::{
        row,
        tables,
        Filters,
        PersistenceGateway,
        Row,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};

pub struct SessionTracker {
    gateway: Arc<dyn PersistenceGateway>,
    server_id: String,
    server_ip: String,
    /// Open sessions by client id. Guarded lookup-and-mutate only; never
    /// held across a gateway write.
    active: Mutex<HashMap<String, DateTime<Utc>>>,
}

/// Serialize a timestamp exactly as it lands in a persisted row, so filter
/// values compare equal to what was inserted.
fn timestamp_value(ts: DateTime<Utc>) -> String {
    match json!(ts) {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

impl SessionTracker {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, server_id: String, server_ip: String) -> Self {
        Self {
            gateway,
            server_id,
            server_ip,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Open a session for a play callback.
    pub async fn record_play(&self, cb: SrsCallback) {
        self.record_play_at(cb, Utc::now()).await;
    }

    /// Close the session matching a stop callback.
    pub async fn record_stop(&self, cb: SrsCallback) {
        self.record_stop_at(cb, Utc::now()).await;
    }

    pub(crate) async fn record_play_at(&self, cb: SrsCallback, connected_at: DateTime<Utc>) {
        let session: Row = row(json!({
            "server_id": self.server_id,
            "server_ip": self.server_ip,
            "client_id": cb.client_id,
            "client_ip": cb.ip,
            "client_type": "play",
            "stream_id": cb.stream_id,
            "stream_name": cb.stream,
            "app": cb.app,
            "connected_at": connected_at,
        }));

        if let Err(e) = self.gateway.insert(tables::CONNECTIONS, session).await {
            warn!(stream = %cb.stream, "failed to persist play session: {e}");
            return;
        }

        if !cb.client_id.is_empty() {
            // A repeated play for the same id overwrites the stale entry;
            // the previous session already ended or was abandoned.
            self.active
                .lock()
                .unwrap()
                .insert(cb.client_id.clone(), connected_at);
        }
    }

    pub(crate) async fn record_stop_at(&self, cb: SrsCallback, disconnected_at: DateTime<Utc>) {
        // Lookup and removal form one critical section so a concurrent play
        // for the same id is neither lost nor double-counted.
        let connected_at = if cb.client_id.is_empty() {
            None
        } else {
            self.active.lock().unwrap().remove(&cb.client_id)
        };

        let duration_seconds = connected_at
            .map(|connected| (disconnected_at - connected).num_seconds().max(0))
            .unwrap_or(0);

        let update: Row = row(json!({
            "disconnected_at": disconnected_at,
            "duration_seconds": duration_seconds,
        }));

        let mut filters: Filters = vec![
            ("server_id".to_string(), self.server_id.clone()),
            ("app".to_string(), cb.app.clone()),
            ("stream_name".to_string(), cb.stream.clone()),
            ("client_ip".to_string(), cb.ip.clone()),
            ("client_type".to_string(), "play".to_string()),
        ];

        if !cb.client_id.is_empty() {
            filters.push(("client_id".to_string(), cb.client_id.clone()));
        } else if let Some(connected) = connected_at {
            filters.push(("connected_at".to_string(), timestamp_value(connected)));
        }

        if let Err(e) = self.gateway.update(tables::CONNECTIONS, update, filters).await {
            warn!(stream = %cb.stream, "failed to close session: {e}");
        }
    }

    #[cfg(test)]
    fn open_sessions(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}
