//! # Thumbnail Capture Manager
//!
//! One recurring low-rate frame capture per actively published stream.
//! `start_capture` registers the stream's cancellation handle *before* the
//! warm-up sleep, so a stop issued while the source is still stabilizing
//! reliably prevents the schedule from ever running. Captures for one
//! stream run sequentially on that stream's task; they cannot overlap.
//!
//! The task map is process-local: captures do not survive a restart and are
//! re-established by the next publish callback.

use crate::error::RelayError;
use eyre::eyre;
use std::{
    collections::HashMap,
    future::Future,
    path::{
        Path,
        PathBuf,
    },
    process::Stdio,
    sync::Mutex,
    time::Duration,
};
use tokio::{
    process::Command,
    time::sleep,
};
use tokio_util::sync::{
    CancellationToken,
    DropGuard,
};

/// Delay before the first capture, giving the upstream source time to
/// stabilize after publish.
const WARMUP_DELAY: Duration = Duration::from_secs(5);

/// Interval between recurring captures.
const RECAPTURE_PERIOD: Duration = Duration::from_secs(120);

pub struct ThumbnailManager {
    /// Live capture tasks by stream id. Dropping a guard (removal or
    /// replacement) cancels the associated task.
    tasks: Mutex<HashMap<String, DropGuard>>,
    warmup: Duration,
    period: Duration,
}

impl Default for ThumbnailManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ThumbnailManager {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            warmup: WARMUP_DELAY,
            period: RECAPTURE_PERIOD,
        }
    }

    #[cfg(test)]
    fn with_intervals(warmup: Duration, period: Duration) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            warmup,
            period,
        }
    }

    /// Begin recurring captures for a stream. A second start for the same
    /// stream replaces the first: the old guard drops and cancels its task.
    pub fn start_capture(
        &self,
        stream_id: &str,
        app: &str,
        file_name: &str,
        source_url: String,
        output_path: PathBuf,
    ) {
        info!(stream_id, app, file_name, "starting thumbnail capture");
        let file_name = file_name.to_string();
        self.spawn_capture_loop(stream_id, move || {
            let source_url = source_url.clone();
            let output_path = output_path.clone();
            let file_name = file_name.clone();
            async move {
                match capture_frame(&source_url, &output_path).await {
                    Ok(()) => info!(%file_name, "thumbnail updated"),
                    Err(e) => warn!(%file_name, "thumbnail capture failed: {e}"),
                }
            }
        });
    }

    /// Cancel a stream's recurring schedule. No-op when the stream has no
    /// live task.
    pub fn stop_capture(&self, stream_id: &str) {
        if self.tasks.lock().unwrap().remove(stream_id).is_some() {
            info!(stream_id, "stopped thumbnail capture");
        }
    }

    pub fn is_capturing(&self, stream_id: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(stream_id)
    }

    /// The handle is registered under the mutex before any waiting begins;
    /// a stop racing the warm-up delay cancels the task before its first
    /// capture.
    fn spawn_capture_loop<C, Fut>(&self, stream_id: &str, mut capture: C)
    where
        C: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();
        self.tasks
            .lock()
            .unwrap()
            .insert(stream_id.to_string(), token.clone().drop_guard());

        let warmup = self.warmup;
        let period = self.period;
        let stream_id = stream_id.to_string();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {},

                _ = async {
                    sleep(warmup).await;
                    capture().await;
                    loop {
                        sleep(period).await;
                        capture().await;
                    }
                } => {},
            }
            debug!(%stream_id, "capture task finished");
        });
    }
}

/// Extract a single frame from the source into `output_path`. Some sources
/// terminate the read ungracefully after the frame is already written, so a
/// non-zero exit still counts as success when the output file exists.
pub async fn capture_frame(source_url: &str, output_path: &Path) -> Result<(), RelayError> {
    // Cancelling the capture task drops this future mid-await; the kill
    // flag makes that drop also reap the child instead of orphaning an
    // ffmpeg stuck on a source that just went offline.
    let status = Command::new("ffmpeg")
        .args(["-y", "-i", source_url, "-vframes", "1", "-q:v", "2"])
        .arg(output_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| RelayError::CaptureProcess(e.into()))?;

    if status.success() || tokio::fs::metadata(output_path).await.is_ok() {
        Ok(())
    } else {
        Err(RelayError::CaptureProcess(eyre!("ffmpeg exited with {status}")))
    }
}
