//! # Control-Plane Client
//!
//! Read-only queries against the SRS HTTP status API. Every endpoint returns
//! JSON; shapes vary between SRS builds, so optional sub-objects (e.g. the
//! per-stream `video` block) are tolerated as `Option` fields.
//!
//! Auxiliary diagnostic endpoints are decoded through [`DataPayload`], which
//! makes the misrouted index/navigation response a first-class error instead
//! of silently treating it as data.

use crate::error::RelayError;
use async_trait::async_trait;
use eyre::eyre;
use serde::Deserialize;
use serde_json::Value;
use srs_relay_config::Config;

/// Client types SRS reports for active publish connections. Everything else
/// counts as a player.
const PUBLISH_CLIENT_TYPES: [&str; 2] = ["fmle-publish", "flash-publish"];

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Kbps {
    #[serde(default, rename = "recv_30s")]
    pub recv_kbps: i64,
    #[serde(default, rename = "send_30s")]
    pub send_kbps: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PublishStatus {
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoSpec {
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

/// One live stream as reported by `GET /api/v1/streams/`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SrsStream {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub clients: i64,
    #[serde(default)]
    pub kbps: Kbps,
    #[serde(default)]
    pub publish: PublishStatus,
    pub video: Option<VideoSpec>,
}

impl SrsStream {
    /// `WIDTHxHEIGHT`, or empty when SRS has not probed the video yet.
    pub fn resolution(&self) -> String {
        match &self.video {
            Some(video) => format!("{}x{}", video.width, video.height),
            None => String::new(),
        }
    }

    pub fn video_codec(&self) -> String {
        self.video.as_ref().map(|v| v.codec.clone()).unwrap_or_default()
    }
}

/// One connection as reported by `GET /api/v1/clients/`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SrsClientEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default, rename = "type")]
    pub client_type: String,
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub alive: i64,
    #[serde(default)]
    pub send_bytes: i64,
    #[serde(default)]
    pub recv_bytes: i64,
}

impl SrsClientEntry {
    pub fn is_publisher(&self) -> bool {
        PUBLISH_CLIENT_TYPES.contains(&self.client_type.as_str())
    }
}

/// Process resource usage from `GET /api/v1/rusages/`.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct ResourceUsage {
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub mem_kbyte: i64,
}

impl ResourceUsage {
    pub fn memory_mb(&self) -> i64 {
        self.mem_kbyte / 1024
    }

    /// SRS occasionally answers with an all-zero rusage right after startup;
    /// callers fall back to the summary endpoint in that case.
    pub fn is_empty(&self) -> bool {
        self.percent == 0.0 && self.mem_kbyte == 0
    }
}

#[derive(Deserialize)]
struct StreamList {
    #[serde(default)]
    streams: Vec<SrsStream>,
}

#[derive(Deserialize)]
struct ClientList {
    #[serde(default)]
    clients: Vec<SrsClientEntry>,
}

/// Decoded shape of a `data`-wrapped API payload. A top-level `urls` key
/// marks the server's index/navigation response: the request was misrouted
/// and the body is not data, even though it decodes fine.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DataPayload {
    Index {
        #[allow(dead_code)]
        urls: Value,
    },
    Data {
        data: Value,
    },
    Other(Value),
}

/// Unwrap the `data` envelope of an API payload, rejecting index responses
/// and payloads missing the envelope.
pub fn unwrap_data(endpoint: &str, value: Value) -> Result<Value, RelayError> {
    match serde_json::from_value::<DataPayload>(value) {
        Ok(DataPayload::Index { .. }) => Err(RelayError::UpstreamFetch(eyre!(
            "{endpoint} answered with an index/navigation payload"
        ))),
        Ok(DataPayload::Data { data }) => Ok(data),
        Ok(DataPayload::Other(_)) => Err(RelayError::UpstreamFetch(eyre!(
            "{endpoint} payload lacks the expected `data` wrapper"
        ))),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    async fn streams(&self) -> Result<Vec<SrsStream>, RelayError>;
    async fn clients(&self) -> Result<Vec<SrsClientEntry>, RelayError>;
    async fn rusage(&self) -> Result<ResourceUsage, RelayError>;
    async fn summary(&self) -> Result<Value, RelayError>;
    async fn proc_stats(&self) -> Result<Value, RelayError>;
    async fn system_stats(&self) -> Result<Value, RelayError>;
    async fn meminfo(&self) -> Result<Value, RelayError>;
}

/// [`ControlPlane`] backed by the SRS HTTP status API.
pub struct SrsApiClient {
    http: reqwest::Client,
    config: Config,
}

impl SrsApiClient {
    pub fn new(http: reqwest::Client, config: Config) -> Self {
        Self { http, config }
    }

    async fn fetch(&self, path: &str) -> Result<Value, RelayError> {
        let url = self
            .config
            .api_endpoint(path)
            .map_err(RelayError::UpstreamFetch)?;
        self.http
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| RelayError::UpstreamFetch(e.into()))?
            .json()
            .await
            .map_err(|e| RelayError::UpstreamFetch(e.into()))
    }

    async fn fetch_data(&self, path: &str) -> Result<Value, RelayError> {
        let value = self.fetch(path).await?;
        unwrap_data(path, value)
    }
}

#[async_trait]
impl ControlPlane for SrsApiClient {
    async fn streams(&self) -> Result<Vec<SrsStream>, RelayError> {
        let value = self.fetch("streams/").await?;
        let list: StreamList = serde_json::from_value(value)?;
        Ok(list.streams)
    }

    async fn clients(&self) -> Result<Vec<SrsClientEntry>, RelayError> {
        let value = self.fetch("clients/").await?;
        let list: ClientList = serde_json::from_value(value)?;
        Ok(list.clients)
    }

    async fn rusage(&self) -> Result<ResourceUsage, RelayError> {
        let data = self.fetch_data("rusages/").await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn summary(&self) -> Result<Value, RelayError> {
        self.fetch_data("summaries/").await
    }

    async fn proc_stats(&self) -> Result<Value, RelayError> {
        self.fetch_data("self_proc_stats/").await
    }

    async fn system_stats(&self) -> Result<Value, RelayError> {
        self.fetch_data("system_proc_stats/").await
    }

    async fn meminfo(&self) -> Result<Value, RelayError> {
        self.fetch_data("meminfos/").await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable control plane for tests: each endpoint answers from a
    //! slot that tests overwrite to simulate failures or changing values.

    use super::*;
    use std::sync::Mutex;

    pub struct FakeControlPlane {
        pub streams: Mutex<Result<Vec<SrsStream>, String>>,
        pub clients: Mutex<Result<Vec<SrsClientEntry>, String>>,
        pub rusage: Mutex<Result<ResourceUsage, String>>,
        pub summary: Mutex<Result<Value, String>>,
        /// Shared by the three remaining auxiliary endpoints.
        pub aux: Mutex<Result<Value, String>>,
    }

    impl Default for FakeControlPlane {
        fn default() -> Self {
            Self {
                streams: Mutex::new(Ok(Vec::new())),
                clients: Mutex::new(Ok(Vec::new())),
                rusage: Mutex::new(Ok(ResourceUsage::default())),
                summary: Mutex::new(Ok(Value::Null)),
                aux: Mutex::new(Ok(Value::Null)),
            }
        }
    }

    fn clone_result<T: Clone>(slot: &Mutex<Result<T, String>>) -> Result<T, RelayError> {
        slot.lock()
            .unwrap()
            .clone()
            .map_err(|msg| RelayError::UpstreamFetch(eyre!(msg)))
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        async fn streams(&self) -> Result<Vec<SrsStream>, RelayError> {
            clone_result(&self.streams)
        }
        async fn clients(&self) -> Result<Vec<SrsClientEntry>, RelayError> {
            clone_result(&self.clients)
        }
        async fn rusage(&self) -> Result<ResourceUsage, RelayError> {
            clone_result(&self.rusage)
        }
        async fn summary(&self) -> Result<Value, RelayError> {
            clone_result(&self.summary)
        }
        async fn proc_stats(&self) -> Result<Value, RelayError> {
            clone_result(&self.aux)
        }
        async fn system_stats(&self) -> Result<Value, RelayError> {
            clone_result(&self.aux)
        }
        async fn meminfo(&self) -> Result<Value, RelayError> {
            clone_result(&self.aux)
        }
    }
}
