use crate::{
    callback::{
        CallbackAction,
        SrsCallback,
        ACCEPT,
        REJECT,
    },
    gateway::{
        persistent_hash,
        row,
        tables,
    },
    router::AppState,
};
use axum::extract::State;
use chrono::Utc;
use serde_json::json;

/// `on_publish` webhook. Acknowledges immediately; channel lookup, the
/// channel's online flip and the thumbnail start all run in the background.
pub async fn publish(State(state): State<AppState>, body: String) -> &'static str {
    let cb = match serde_json::from_str::<SrsCallback>(&body) {
        Ok(cb) => cb,
        Err(e) => {
            warn!("rejecting malformed publish callback: {e}");
            return REJECT;
        }
    };

    info!(app = %cb.app, stream = %cb.stream, "publish detected");
    state.dispatcher.dispatch("publish", process_publish(state.clone(), cb));
    ACCEPT
}

async fn process_publish(state: AppState, cb: SrsCallback) {
    let filters = vec![("stream_id".to_string(), cb.stream.clone())];
    let ids = match state.gateway.select(tables::CHANNELS, "id", filters).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(stream = %cb.stream, "channel lookup failed: {e}");
            return;
        }
    };
    let Some(channel_id) = ids.first() else {
        warn!(stream = %cb.stream, "no channel registered for stream");
        return;
    };

    let file_name = format!("{}.jpg", persistent_hash(channel_id));
    let online = row(json!({
        "is_on_live": true,
        "last_status": "online",
        "cover": file_name,
        "modified": Utc::now().to_rfc3339(),
    }));
    let filters = vec![("id".to_string(), channel_id.clone())];
    if let Err(e) = state.gateway.update(tables::CHANNELS, online, filters).await {
        warn!(%channel_id, "failed to mark channel online: {e}");
    }

    // SRS resolves the frame read by virtual host; fall back to our own IP
    // when the callback omitted one.
    let vhost = if cb.vhost.is_empty() {
        state.config.server_ip.clone()
    } else {
        cb.vhost.clone()
    };
    let source_url = state.config.rtmp_url(&cb.app, &cb.stream, &vhost);
    let output_path = state.config.thumbnail_path(&file_name);
    state
        .thumbnails
        .start_capture(&cb.stream, &cb.app, &file_name, source_url, output_path);
}

/// `on_unpublish` webhook.
pub async fn unpublish(State(state): State<AppState>, body: String) -> &'static str {
    let cb = match serde_json::from_str::<SrsCallback>(&body) {
        Ok(cb) => cb,
        Err(e) => {
            warn!("rejecting malformed unpublish callback: {e}");
            return REJECT;
        }
    };

    info!(stream = %cb.stream, "unpublish detected");
    state.dispatcher.dispatch("unpublish", process_unpublish(state.clone(), cb));
    ACCEPT
}

async fn process_unpublish(state: AppState, cb: SrsCallback) {
    state.thumbnails.stop_capture(&cb.stream);

    let offline = row(json!({
        "is_on_live": false,
        "modified": Utc::now().to_rfc3339(),
    }));
    let filters = vec![("stream_id".to_string(), cb.stream.clone())];
    if let Err(e) = state.gateway.update(tables::CHANNELS, offline, filters).await {
        warn!(stream = %cb.stream, "failed to mark channel offline: {e}");
    }
}

/// `on_play` / `on_stop` webhook, feeding the session tracker. Unknown
/// actions are acknowledged and ignored.
pub async fn sessions(State(state): State<AppState>, body: String) -> &'static str {
    let cb = match serde_json::from_str::<SrsCallback>(&body) {
        Ok(cb) => cb,
        Err(e) => {
            warn!("rejecting malformed session callback: {e}");
            return REJECT;
        }
    };

    match cb.action {
        CallbackAction::OnPlay => {
            let sessions = state.sessions.clone();
            state.dispatcher.dispatch("session-play", async move {
                sessions.record_play(cb).await;
            });
        }
        CallbackAction::OnStop => {
            let sessions = state.sessions.clone();
            state.dispatcher.dispatch("session-stop", async move {
                sessions.record_stop(cb).await;
            });
        }
        other => {
            warn!(action = ?other, "unsupported action on sessions hook");
        }
    }
    ACCEPT
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dispatch::Dispatcher,
        gateway::{
            testing::RecordingGateway,
            PersistenceGateway,
        },
        sessions::SessionTracker,
        srs::testing::FakeControlPlane,
        thumbnails::ThumbnailManager,
    };
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use srs_relay_config::Config;
    use std::{
        sync::Arc,
        time::Duration,
    };

    fn test_state() -> (AppState, Arc<RecordingGateway>) {
        let config = Config::parse_from([
            "srs-relay",
            "--server-id",
            "srs-01",
            "--server-ip",
            "203.0.113.7",
            "--supabase-url",
            "https://data.example.com",
            "--supabase-key",
            "secret",
        ]);
        let gateway = Arc::new(RecordingGateway::default());
        let state = AppState {
            config,
            control_plane: Arc::new(FakeControlPlane::default()),
            gateway: gateway.clone(),
            sessions: Arc::new(SessionTracker::new(
                gateway.clone(),
                "srs-01".to_string(),
                "203.0.113.7".to_string(),
            )),
            thumbnails: Arc::new(ThumbnailManager::new()),
            dispatcher: Dispatcher::new(16, 2, Duration::from_secs(5)),
        };
        (state, gateway)
    }

    async fn wait_for_rows(gateway: &RecordingGateway, table: &str) -> Vec<crate::gateway::Row> {
        for _ in 0..100 {
            let rows = gateway.rows(table);
            if !rows.is_empty() {
                return rows;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        gateway.rows(table)
    }

    #[tokio::test]
    async fn malformed_bodies_are_rejected_without_background_work() {
        let (state, gateway) = test_state();
        assert_eq!(publish(State(state.clone()), "not json".to_string()).await, REJECT);
        assert_eq!(unpublish(State(state.clone()), "{".to_string()).await, REJECT);
        assert_eq!(sessions(State(state), String::new()).await, REJECT);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gateway.rows(tables::CONNECTIONS).is_empty());
        assert!(gateway.rows(tables::CHANNELS).is_empty());
    }

    #[tokio::test]
    async fn play_callback_is_acknowledged_and_persisted_in_background() {
        let (state, gateway) = test_state();
        let body = r#"{"action":"on_play","app":"live","stream":"abc","client_id":"c-1","ip":"10.0.0.5"}"#;

        assert_eq!(sessions(State(state), body.to_string()).await, ACCEPT);

        let rows = wait_for_rows(&gateway, tables::CONNECTIONS).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["client_id"], "c-1");
        assert_eq!(rows[0]["client_type"], "play");
    }

    #[tokio::test]
    async fn unknown_session_action_is_acknowledged_without_work() {
        let (state, gateway) = test_state();
        let body = r#"{"action":"on_dvr","app":"live","stream":"abc"}"#;
        assert_eq!(sessions(State(state), body.to_string()).await, ACCEPT);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gateway.rows(tables::CONNECTIONS).is_empty());
    }

    #[tokio::test]
    async fn publish_marks_channel_online_and_starts_capture() {
        let (state, gateway) = test_state();
        gateway.seed_select(tables::CHANNELS, vec!["chan-9".to_string()]);
        // Seed the stored channel row so the background update has a target.
        gateway
            .insert(tables::CHANNELS, row(json!({ "id": "chan-9", "is_on_live": false })))
            .await
            .unwrap();

        let body = r#"{"action":"on_publish","app":"live","stream":"abc","vhost":"cdn.example.com"}"#;
        assert_eq!(publish(State(state.clone()), body.to_string()).await, ACCEPT);

        for _ in 0..100 {
            if state.thumbnails.is_capturing("abc") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(state.thumbnails.is_capturing("abc"));

        let channels = gateway.rows(tables::CHANNELS);
        assert_eq!(channels[0]["is_on_live"], true);
        assert_eq!(channels[0]["last_status"], "online");
        assert_eq!(
            channels[0]["cover"],
            format!("{}.jpg", persistent_hash("chan-9")).as_str()
        );
    }

    #[tokio::test]
    async fn unpublish_stops_capture_and_marks_channel_offline() {
        let (state, gateway) = test_state();
        gateway
            .insert(tables::CHANNELS, row(json!({ "stream_id": "abc", "is_on_live": true })))
            .await
            .unwrap();
        state.thumbnails.start_capture(
            "abc",
            "live",
            "x.jpg",
            "rtmp://srs:1935/live/abc?vhost=v".to_string(),
            state.config.thumbnail_path("x.jpg"),
        );

        let body = r#"{"action":"on_unpublish","app":"live","stream":"abc"}"#;
        assert_eq!(unpublish(State(state.clone()), body.to_string()).await, ACCEPT);

        for _ in 0..100 {
            if !state.thumbnails.is_capturing("abc") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!state.thumbnails.is_capturing("abc"));
        let channels = gateway.rows(tables::CHANNELS);
        assert_eq!(channels[0]["is_on_live"], false);
    }
}
