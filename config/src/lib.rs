//! # Configuration Module
//!
//! Startup configuration for the relay backend. Everything is read once from
//! CLI flags or their environment-variable equivalents and then passed around
//! by value; nothing here is reloaded at runtime.
//!
//! ## Configuration Fields
//!
//! - **Server identity**: `server_id` and `server_ip`, stamped onto every
//!   persisted row so multiple relay instances can share one data store
//! - **Control plane**: base URLs for the SRS HTTP API and RTMP ingest
//! - **Persistence**: base URL and API key for the row-store REST API
//! - **Forwarding**: optional target URL answered on `/api/v1/forward`
//! - **Thumbnails**: directory the capture process writes frames into

use clap::Parser;
use eyre::Result;
use std::{
    net::SocketAddr,
    path::PathBuf,
};
use url::Url;

#[derive(Parser, Debug, Clone)]
#[command(name = "srs-relay")]
#[command(about = "SRS webhook relay, session tracking and metrics aggregation")]
#[command(version)]
pub struct Config {
    /// Address the webhook/status HTTP server listens on.
    #[arg(long, env = "SRS_RELAY_LISTEN_ADDRESS", default_value = "0.0.0.0:3000")]
    pub listen_address: SocketAddr,

    /// Identity of this relay instance, stamped onto every persisted row.
    #[arg(long, env = "SRS_RELAY_SERVER_ID")]
    pub server_id: String,

    /// Public IP of this relay instance.
    #[arg(long, env = "SRS_RELAY_SERVER_IP")]
    pub server_ip: String,

    /// Base URL of the SRS HTTP status API.
    #[arg(long, env = "SRS_API_URL", default_value = "http://srs:1985")]
    pub srs_api_url: Url,

    /// Base URL used to read frames back out of SRS over RTMP.
    #[arg(long, env = "SRS_RTMP_URL", default_value = "rtmp://srs:1935")]
    pub srs_rtmp_url: String,

    /// Base URL of the persistence REST API (PostgREST-compatible).
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Url,

    /// API key for the persistence REST API.
    #[arg(long, env = "SUPABASE_KEY")]
    pub supabase_key: String,

    /// Target base URL for the stream-forwarding responder. When unset,
    /// `/api/v1/forward` answers with an empty URL list.
    #[arg(long, env = "TARGET_FORWARD_URL")]
    pub forward_target_url: Option<String>,

    /// Directory thumbnails are written into.
    #[arg(long, env = "SRS_RELAY_THUMBNAIL_DIR", default_value = "/app/thumbnails")]
    pub thumbnail_dir: PathBuf,
}

impl Config {
    /// SRS status API endpoint, e.g. `api_endpoint("streams/")`.
    pub fn api_endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.srs_api_url.join("/api/v1/")?.join(path)?)
    }

    /// RTMP playback URL for a published stream, vhost-qualified so SRS
    /// resolves the right virtual host when reading the frame back.
    pub fn rtmp_url(&self, app: &str, stream: &str, vhost: &str) -> String {
        format!("{}/{}/{}?vhost={}", self.srs_rtmp_url.trim_end_matches('/'), app, stream, vhost)
    }

    /// Path a stream's thumbnail is written to.
    pub fn thumbnail_path(&self, file_name: &str) -> PathBuf {
        self.thumbnail_dir.join(file_name)
    }
}
