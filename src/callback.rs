use serde::Deserialize;

/// Lifecycle actions SRS reports on its HTTP callback hooks. Anything we do
/// not recognize decodes as `Unknown` and is acknowledged without work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackAction {
    OnPublish,
    OnUnpublish,
    OnPlay,
    OnStop,
    #[serde(other)]
    Unknown,
}

/// Body of an SRS lifecycle webhook. SRS omits fields depending on the hook
/// and protocol in play, so everything except the action defaults to empty.
#[derive(Debug, Clone, Deserialize)]
pub struct SrsCallback {
    pub action: CallbackAction,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub vhost: String,
    #[serde(default)]
    pub stream_id: String,
    #[serde(default)]
    pub param: String,
}

/// Plain-text acknowledgement tokens SRS expects on its webhooks.
pub const ACCEPT: &str = "0";
pub const REJECT: &str = "1";
