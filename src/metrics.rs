//! # Metrics Aggregator
//!
//! Periodic, best-effort snapshot of control-plane health. Every 30 seconds
//! one cycle fetches the stream list, resource usage and client list,
//! persists a per-minute server metric row (idempotent on
//! `(server_id, minute_bucket)`), appends per-stream time-series rows,
//! refreshes the server heartbeat and raises threshold alerts.
//!
//! The stream-list fetch is the cycle's only hard dependency: when it fails
//! the cycle aborts and writes nothing, not even a heartbeat. Everything
//! else degrades to zeros or absence.

use crate::{
    error::RelayError,
    gateway::{
        row,
        tables,
        PersistenceGateway,
    },
    srs::{
        ControlPlane,
        ResourceUsage,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use serde_json::{
    json,
    Value,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::time::{
    interval,
    MissedTickBehavior,
};

/// How often a cycle runs.
const COLLECTION_PERIOD: Duration = Duration::from_secs(30);

/// CPU percentage above which a `high_cpu` event is appended. The alert
/// fires on every cycle the condition holds; there is no suppression window.
const HIGH_CPU_THRESHOLD: f64 = 80.0;

pub struct MetricsAggregator {
    control_plane: Arc<dyn ControlPlane>,
    gateway: Arc<dyn PersistenceGateway>,
    server_id: String,
    server_ip: String,
}

/// Truncate to the containing minute, the natural idempotency key for
/// per-minute metric rows.
fn minute_bucket(now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = now.timestamp() - now.timestamp().rem_euclid(60);
    DateTime::from_timestamp(secs, 0).unwrap_or(now)
}

impl MetricsAggregator {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        gateway: Arc<dyn PersistenceGateway>,
        server_id: String,
        server_ip: String,
    ) -> Self {
        Self {
            control_plane,
            gateway,
            server_id,
            server_ip,
        }
    }

    /// Upsert this server's registry row. Called once at startup, before
    /// the first cycle runs.
    pub async fn register_server(&self) -> Result<(), RelayError> {
        let server = row(json!({
            "server_id": self.server_id,
            "server_ip": self.server_ip,
            "server_name": format!("SRS Server {}", self.server_id),
            "is_active": true,
        }));
        self.gateway.upsert(tables::SERVERS, server, "server_id").await
    }

    /// Run cycles forever. Each tick awaits its cycle inline; a cycle that
    /// overruns the period makes the timer skip the missed tick instead of
    /// queueing overlapping cycles.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(COLLECTION_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(server_id = %self.server_id, "metrics aggregator started (every {:?})", COLLECTION_PERIOD);

        loop {
            ticker.tick().await;
            if let Err(e) = self.cycle().await {
                warn!("metrics cycle aborted: {e}");
            }
        }
    }

    async fn cycle(&self) -> Result<(), RelayError> {
        self.cycle_at(Utc::now()).await
    }

    /// One aggregation cycle. Only the stream-list fetch propagates an
    /// error; every later step logs and continues.
    pub(crate) async fn cycle_at(&self, now: DateTime<Utc>) -> Result<(), RelayError> {
        let streams = self.control_plane.streams().await?;

        let usage = self.resource_usage().await;
        let diagnostics = self.auxiliary_diagnostics().await;

        let (mut publishers, mut players, mut total_connections) = (0i64, 0i64, 0i64);
        match self.control_plane.clients().await {
            Ok(clients) => {
                for client in &clients {
                    total_connections += 1;
                    if client.is_publisher() {
                        publishers += 1;
                    } else {
                        players += 1;
                    }
                }
            }
            Err(e) => warn!("client list unavailable this cycle: {e}"),
        }

        let bucket = minute_bucket(now);
        let server_metric = row(json!({
            "server_id": self.server_id,
            "server_ip": self.server_ip,
            "cpu_percent": usage.percent,
            "memory_mb": usage.memory_mb(),
            "total_streams": streams.len(),
            "total_connections": total_connections,
            "publishers": publishers,
            "players": players,
            "minute_bucket": bucket,
        }));
        if let Err(e) = self
            .gateway
            .upsert(tables::SERVER_METRICS, server_metric, "server_id,minute_bucket")
            .await
        {
            warn!("failed to persist server metrics: {e}");
        }

        self.heartbeat(now).await;

        for stream in &streams {
            let stream_metric = row(json!({
                "server_id": self.server_id,
                "server_ip": self.server_ip,
                "stream_id": stream.id,
                "stream_name": stream.name,
                "app": stream.app,
                "clients": stream.clients,
                "recv_kbps": stream.kbps.recv_kbps,
                "send_kbps": stream.kbps.send_kbps,
                "is_publishing": stream.publish.active,
                "video_codec": stream.video_codec(),
                "resolution": stream.resolution(),
            }));
            if let Err(e) = self.gateway.insert(tables::STREAM_METRICS, stream_metric).await {
                warn!(stream = %stream.name, "failed to persist stream metrics: {e}");
            }
        }

        if usage.percent > HIGH_CPU_THRESHOLD {
            let alert = row(json!({
                "server_id": self.server_id,
                "server_ip": self.server_ip,
                "event_type": "high_cpu",
                "severity": "warning",
                "message": format!("High CPU on {}: {:.1}%", self.server_id, usage.percent),
                "metadata": {
                    "server_id": self.server_id,
                    "cpu": usage.percent,
                },
            }));
            if let Err(e) = self.gateway.insert(tables::SYSTEM_EVENTS, alert).await {
                warn!("failed to persist high_cpu event: {e}");
            }
        }

        if !diagnostics.is_empty() {
            let record = row(json!({
                "server_id": self.server_id,
                "server_ip": self.server_ip,
                "collected_at": now,
                "payload": diagnostics,
            }));
            if let Err(e) = self.gateway.insert(tables::DIAGNOSTICS, record).await {
                warn!("failed to persist diagnostics: {e}");
            }
        }

        info!(
            server_id = %self.server_id,
            cpu = usage.percent,
            memory_mb = usage.memory_mb(),
            streams = streams.len(),
            connections = total_connections,
            "metrics cycle complete"
        );
        Ok(())
    }

    /// Primary rusage fetch with a summary fallback when it fails or
    /// reports all zeros.
    async fn resource_usage(&self) -> ResourceUsage {
        let usage = match self.control_plane.rusage().await {
            Ok(usage) => usage,
            Err(e) => {
                warn!("rusage unavailable: {e}");
                ResourceUsage::default()
            }
        };
        if !usage.is_empty() {
            return usage;
        }

        match self.control_plane.summary().await {
            Ok(summary) => ResourceUsage {
                percent: summary
                    .pointer("/self/cpu_percent")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
                mem_kbyte: summary
                    .pointer("/self/mem_kbyte")
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
            },
            Err(e) => {
                warn!("summary fallback unavailable: {e}");
                usage
            }
        }
    }

    /// Best-effort fetch of the four auxiliary diagnostic payloads. Each
    /// failure drops that source from the blob and never aborts the cycle.
    async fn auxiliary_diagnostics(&self) -> serde_json::Map<String, Value> {
        let fetches = [
            ("proc_stats", self.control_plane.proc_stats().await),
            ("system_stats", self.control_plane.system_stats().await),
            ("meminfo", self.control_plane.meminfo().await),
            ("summary", self.control_plane.summary().await),
        ];

        let mut diagnostics = serde_json::Map::new();
        for (key, result) in fetches {
            match result {
                Ok(payload) => {
                    diagnostics.insert(key.to_string(), payload);
                }
                Err(e) => warn!(source = key, "diagnostic payload skipped: {e}"),
            }
        }
        diagnostics
    }

    /// Refresh this server's last-seen timestamp, independent of whether
    /// the metric writes above succeeded.
    async fn heartbeat(&self, now: DateTime<Utc>) {
        let update = row(json!({
            "server_ip": self.server_ip,
            "last_seen": now,
        }));
        let filters = vec![("server_id".to_string(), self.server_id.clone())];
        if let Err(e) = self.gateway.update(tables::SERVERS, update, filters).await {
            warn!("failed to refresh heartbeat: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        gateway::testing::RecordingGateway,
        srs::{
            testing::FakeControlPlane,
            SrsClientEntry,
            SrsStream,
        },
    };
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn healthy(cpu: f64, mem_kbyte: i64) -> FakeControlPlane {
        let fake = FakeControlPlane::default();
        *fake.streams.lock().unwrap() = Ok(vec![SrsStream {
            id: "vid-1".to_string(),
            name: "abc".to_string(),
            app: "live".to_string(),
            clients: 3,
            ..Default::default()
        }]);
        *fake.clients.lock().unwrap() = Ok(vec![
            SrsClientEntry {
                client_type: "fmle-publish".to_string(),
                ..Default::default()
            },
            SrsClientEntry {
                client_type: "rtmp-play".to_string(),
                ..Default::default()
            },
            SrsClientEntry {
                client_type: "rtmp-play".to_string(),
                ..Default::default()
            },
        ]);
        *fake.rusage.lock().unwrap() = Ok(ResourceUsage {
            percent: cpu,
            mem_kbyte,
        });
        *fake.summary.lock().unwrap() = Ok(json!({ "self": { "cpu_percent": 1.0, "mem_kbyte": 2048 } }));
        *fake.aux.lock().unwrap() = Ok(json!({ "ok": true }));
        fake
    }

    fn aggregator(
        control_plane: Arc<FakeControlPlane>,
        gateway: Arc<RecordingGateway>,
    ) -> MetricsAggregator {
        MetricsAggregator::new(control_plane, gateway, "srs-01".to_string(), "203.0.113.7".to_string())
    }

    #[test]
    fn minute_bucket_truncates_to_the_minute() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 7, 31).unwrap();
        assert_eq!(minute_bucket(now), Utc.with_ymd_and_hms(2025, 6, 1, 12, 7, 0).unwrap());
    }

    #[tokio::test]
    async fn two_cycles_in_one_minute_converge_to_one_server_metric_row() {
        let cp = Arc::new(healthy(10.0, 4096));
        let gateway = Arc::new(RecordingGateway::default());
        let agg = aggregator(cp.clone(), gateway.clone());

        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 7, 2).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 7, 32).unwrap();

        agg.cycle_at(t0).await.unwrap();
        *cp.rusage.lock().unwrap() = Ok(ResourceUsage {
            percent: 42.0,
            mem_kbyte: 8192,
        });
        agg.cycle_at(t1).await.unwrap();

        let rows = gateway.rows(tables::SERVER_METRICS);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["cpu_percent"], 42.0);
        assert_eq!(rows[0]["memory_mb"], 8);
        assert_eq!(rows[0]["publishers"], 1);
        assert_eq!(rows[0]["players"], 2);

        // Stream metrics stay append-only across the same two cycles.
        assert_eq!(gateway.rows(tables::STREAM_METRICS).len(), 2);
    }

    #[tokio::test]
    async fn sustained_high_cpu_fires_one_alert_per_cycle() {
        let cp = Arc::new(healthy(85.2, 4096));
        let gateway = Arc::new(RecordingGateway::default());
        let agg = aggregator(cp, gateway.clone());

        agg.cycle_at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()).await.unwrap();
        agg.cycle_at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 30).unwrap()).await.unwrap();

        let events = gateway.rows(tables::SYSTEM_EVENTS);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event_type"], "high_cpu");
        assert_eq!(events[0]["severity"], "warning");
    }

    #[tokio::test]
    async fn stream_list_failure_aborts_the_cycle_without_writes() {
        let cp = Arc::new(healthy(10.0, 4096));
        *cp.streams.lock().unwrap() = Err("connection refused".to_string());
        let gateway = Arc::new(RecordingGateway::default());
        let agg = aggregator(cp, gateway.clone());

        let result = agg.cycle_at(Utc::now()).await;
        assert!(result.is_err());
        assert!(gateway.rows(tables::SERVER_METRICS).is_empty());
        assert!(gateway.rows(tables::STREAM_METRICS).is_empty());
        // Not even the heartbeat runs.
        assert!(gateway.rows(tables::SERVERS).is_empty());
    }

    #[tokio::test]
    async fn empty_rusage_falls_back_to_summary_fields() {
        let cp = Arc::new(healthy(0.0, 0));
        *cp.summary.lock().unwrap() = Ok(json!({ "self": { "cpu_percent": 33.5, "mem_kbyte": 10240 } }));
        let gateway = Arc::new(RecordingGateway::default());
        let agg = aggregator(cp, gateway.clone());

        agg.cycle_at(Utc::now()).await.unwrap();

        let rows = gateway.rows(tables::SERVER_METRICS);
        assert_eq!(rows[0]["cpu_percent"], 33.5);
        assert_eq!(rows[0]["memory_mb"], 10);
    }

    #[tokio::test]
    async fn rejected_auxiliary_payloads_stay_out_of_the_diagnostics_blob() {
        let cp = Arc::new(healthy(10.0, 4096));
        // All three aux endpoints share this slot; make them fail the way
        // a misrouted index response does.
        *cp.aux.lock().unwrap() = Err("answered with an index/navigation payload".to_string());
        let gateway = Arc::new(RecordingGateway::default());
        let agg = aggregator(cp, gateway.clone());

        agg.cycle_at(Utc::now()).await.unwrap();

        let records = gateway.rows(tables::DIAGNOSTICS);
        assert_eq!(records.len(), 1);
        let payload = records[0]["payload"].as_object().unwrap();
        // Only the summary survived.
        assert_eq!(payload.len(), 1);
        assert!(payload.contains_key("summary"));
    }

    #[tokio::test]
    async fn heartbeat_refreshes_the_registered_server_row() {
        let cp = Arc::new(healthy(10.0, 4096));
        let gateway = Arc::new(RecordingGateway::default());
        let agg = aggregator(cp, gateway.clone());

        agg.register_server().await.unwrap();
        agg.cycle_at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()).await.unwrap();

        let servers = gateway.rows(tables::SERVERS);
        assert_eq!(servers.len(), 1);
        assert!(servers[0].contains_key("last_seen"));
        assert_eq!(servers[0]["is_active"], true);
    }
}
