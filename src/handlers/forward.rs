use crate::{
    callback::SrsCallback,
    router::AppState,
};
use axum::{
    extract::State,
    Json,
};
use serde_json::{
    json,
    Value,
};

/// `on_forward` webhook. SRS expects `code: 0` plus the list of RTMP urls
/// to push the stream to; an empty list means no forwarding. Any non-zero
/// code makes SRS drop the publish, so only malformed bodies get one.
pub async fn forward(State(state): State<AppState>, body: String) -> Json<Value> {
    let cb = match serde_json::from_str::<SrsCallback>(&body) {
        Ok(cb) => cb,
        Err(e) => {
            warn!("rejecting malformed forward callback: {e}");
            return Json(json!({ "code": 1 }));
        }
    };

    let urls: Vec<String> = match &state.config.forward_target_url {
        Some(target) => {
            let url = format!("{}/{}/{}", target.trim_end_matches('/'), cb.app, cb.stream);
            info!(stream = %cb.stream, %url, "forwarding stream");
            vec![url]
        }
        None => Vec::new(),
    };

    Json(json!({ "code": 0, "data": { "urls": urls } }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dispatch::Dispatcher,
        gateway::testing::RecordingGateway,
        sessions::SessionTracker,
        srs::testing::FakeControlPlane,
        thumbnails::ThumbnailManager,
    };
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use srs_relay_config::Config;
    use std::sync::Arc;

    fn state_with_target(target: Option<&str>) -> AppState {
        let mut args = vec![
            "srs-relay",
            "--server-id",
            "srs-01",
            "--server-ip",
            "203.0.113.7",
            "--supabase-url",
            "https://data.example.com",
            "--supabase-key",
            "secret",
        ];
        if let Some(target) = target {
            args.push("--forward-target-url");
            args.push(target);
        }
        let config = Config::parse_from(args);
        let gateway = Arc::new(RecordingGateway::default());
        AppState {
            config,
            control_plane: Arc::new(FakeControlPlane::default()),
            gateway: gateway.clone(),
            sessions: Arc::new(SessionTracker::new(
                gateway,
                "srs-01".to_string(),
                "203.0.113.7".to_string(),
            )),
            thumbnails: Arc::new(ThumbnailManager::new()),
            dispatcher: Dispatcher::default(),
        }
    }

    #[tokio::test]
    async fn no_target_configured_answers_with_empty_url_list() {
        let state = state_with_target(None);
        let body = r#"{"action":"on_forward","app":"live","stream":"abc"}"#;
        let Json(resp) = forward(State(state), body.to_string()).await;
        assert_eq!(resp, serde_json::json!({ "code": 0, "data": { "urls": [] } }));
    }

    #[tokio::test]
    async fn target_configured_answers_with_push_url() {
        let state = state_with_target(Some("rtmp://edge.example.com/relay"));
        let body = r#"{"action":"on_forward","app":"live","stream":"abc"}"#;
        let Json(resp) = forward(State(state), body.to_string()).await;
        assert_eq!(
            resp,
            serde_json::json!({
                "code": 0,
                "data": { "urls": ["rtmp://edge.example.com/relay/live/abc"] }
            })
        );
    }

    #[tokio::test]
    async fn malformed_body_answers_with_error_code() {
        let state = state_with_target(None);
        let Json(resp) = forward(State(state), "not json".to_string()).await;
        assert_eq!(resp, serde_json::json!({ "code": 1 }));
    }
}
