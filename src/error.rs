use axum::{
    http::StatusCode,
    response::{
        IntoResponse,
        Response,
    },
};

/// Failure taxonomy for the relay core. Nothing here is fatal to the
/// process; every variant is caught at the operation boundary, logged, and
/// the surrounding loop or schedule continues.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("control-plane fetch failed: {0}")]
    UpstreamFetch(eyre::Report),
    #[error("persistence write failed: {0}")]
    Persistence(eyre::Report),
    #[error("frame capture failed: {0}")]
    CaptureProcess(eyre::Report),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_GATEWAY,
            axum::Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
