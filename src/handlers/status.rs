use crate::{
    error::RelayError,
    router::AppState,
};
use axum::{
    extract::State,
    Json,
};
use chrono::Utc;
use serde::Serialize;

/// Version string reported to dashboards, matching the SRS build behind
/// this relay.
const SRS_VERSION: &str = "6.0.184";

#[derive(Debug, Serialize)]
pub struct StreamInfo {
    pub id: String,
    pub name: String,
    pub app: String,
    pub clients: i64,
    pub recv_kbps: i64,
    pub send_kbps: i64,
    pub is_publishing: bool,
    pub video_codec: String,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Serialize)]
pub struct ServerStats {
    pub uptime: i64,
    pub connections: i64,
    pub total_streams: usize,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ResourceStats {
    pub cpu: f64,
    pub memory: i64,
}

#[derive(Debug, Serialize)]
pub struct SrsStats {
    pub server: ServerStats,
    pub streams: Vec<StreamInfo>,
    pub resources: ResourceStats,
}

/// `GET /api/v1/stats`: streams plus resource usage, reshaped for the
/// dashboard.
pub async fn stats(State(state): State<AppState>) -> Result<Json<SrsStats>, RelayError> {
    let streams = state.control_plane.streams().await?;
    let usage = state.control_plane.rusage().await.unwrap_or_else(|e| {
        warn!("rusage unavailable for stats: {e}");
        Default::default()
    });

    let mut total_connections = 0;
    let infos: Vec<StreamInfo> = streams
        .iter()
        .map(|s| {
            total_connections += s.clients;
            let (width, height) = s
                .video
                .as_ref()
                .map(|v| (v.width, v.height))
                .unwrap_or((0, 0));
            StreamInfo {
                id: s.id.clone(),
                name: s.name.clone(),
                app: s.app.clone(),
                clients: s.clients,
                recv_kbps: s.kbps.recv_kbps,
                send_kbps: s.kbps.send_kbps,
                is_publishing: s.publish.active,
                video_codec: s.video_codec(),
                width,
                height,
            }
        })
        .collect();

    Ok(Json(SrsStats {
        server: ServerStats {
            uptime: Utc::now().timestamp(),
            connections: total_connections,
            total_streams: infos.len(),
            version: SRS_VERSION,
        },
        streams: infos,
        resources: ResourceStats {
            cpu: usage.percent,
            memory: usage.memory_mb(),
        },
    }))
}

#[derive(Debug, Serialize)]
pub struct ClientInfo {
    pub id: String,
    pub ip: String,
    #[serde(rename = "type")]
    pub client_type: String,
    pub stream: String,
    pub app: String,
    pub alive: i64,
    pub send_bytes: i64,
    pub recv_bytes: i64,
}

#[derive(Debug, Serialize)]
pub struct ClientsResponse {
    pub total: usize,
    pub clients: Vec<ClientInfo>,
}

/// `GET /api/v1/clients`: currently connected clients.
pub async fn clients(State(state): State<AppState>) -> Result<Json<ClientsResponse>, RelayError> {
    let clients: Vec<ClientInfo> = state
        .control_plane
        .clients()
        .await?
        .into_iter()
        .map(|c| ClientInfo {
            id: c.id,
            ip: c.ip,
            client_type: c.client_type,
            stream: c.stream,
            app: c.app,
            alive: c.alive,
            send_bytes: c.send_bytes,
            recv_bytes: c.recv_bytes,
        })
        .collect();

    Ok(Json(ClientsResponse {
        total: clients.len(),
        clients,
    }))
}

#[derive(Debug, Serialize)]
pub struct PerformanceStats {
    pub cpu: f64,
    pub memory: i64,
    pub connections: i64,
}

/// `GET /api/v1/performance`: cpu/memory plus total stream connections,
/// each side best-effort.
pub async fn performance(State(state): State<AppState>) -> Json<PerformanceStats> {
    let usage = state.control_plane.rusage().await.unwrap_or_else(|e| {
        warn!("rusage unavailable for performance: {e}");
        Default::default()
    });
    let connections = match state.control_plane.streams().await {
        Ok(streams) => streams.iter().map(|s| s.clients).sum(),
        Err(e) => {
            warn!("stream list unavailable for performance: {e}");
            0
        }
    };

    Json(PerformanceStats {
        cpu: usage.percent,
        memory: usage.memory_mb(),
        connections,
    })
}

#[derive(Debug, Serialize)]
pub struct ServerSummary {
    pub version: &'static str,
    pub pid: i64,
    pub uptime: i64,
    pub publishers: i64,
    pub players: i64,
    pub total_clients: i64,
}

/// `GET /api/v1/summary`: connection counts split by role.
pub async fn summary(State(state): State<AppState>) -> Json<ServerSummary> {
    let (mut publishers, mut players, mut total_clients) = (0i64, 0i64, 0i64);
    match state.control_plane.clients().await {
        Ok(clients) => {
            for client in &clients {
                total_clients += 1;
                if client.is_publisher() {
                    publishers += 1;
                } else {
                    players += 1;
                }
            }
        }
        Err(e) => warn!("client list unavailable for summary: {e}"),
    }

    Json(ServerSummary {
        version: SRS_VERSION,
        pid: 1,
        uptime: Utc::now().timestamp(),
        publishers,
        players,
        total_clients,
    })
}
