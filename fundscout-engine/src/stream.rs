//! Progress stream client
//!
//! Long-running remote jobs report progress over a per-job SSE subscription
//! at `GET {base_url}/progress/{job_id}`. The client consumes frames in
//! arrival order and resolves when a terminal status arrives.
//!
//! Lifecycle per job: connecting → open → receiving* → closed. If the stream
//! closes while the job is still logically running, the client reconnects
//! after a delay that doubles per consecutive disruption up to a ceiling,
//! retried indefinitely until a terminal frame is observed. There is no
//! subscription timeout; liveness relies on the retry loop. Cancellation is
//! the only way out without a terminal frame.
//!
//! Malformed frames are logged and dropped without terminating the
//! subscription. Retries do not spam the notification sink: only the first
//! disruption of a subscription is surfaced.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use fundscout_common::events::{EngineEvent, EventBus, Severity};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Remote job status carried on every progress frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// One progress frame pushed by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressFrame {
    pub status: JobStatus,
    #[serde(default)]
    pub results: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress_percentage: Option<f64>,
}

impl ProgressFrame {
    /// Result count carried by a completed frame
    pub fn result_count(&self) -> u64 {
        self.results
            .as_ref()
            .map(crate::gateway::extract_result_count)
            .unwrap_or(0)
    }
}

/// One connection attempt's worth of raw frame payloads
///
/// The source yields decoded `data:` payload strings; JSON parsing and
/// malformed-frame policy live in the client.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn connect(&self, job_id: &str) -> EngineResult<BoxStream<'static, String>>;
}

/// Reconnect pacing for a subscription
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(15_000),
        }
    }
}

/// Per-job progress subscription client
pub struct ProgressStreamClient {
    source: Arc<dyn FrameSource>,
    config: StreamConfig,
    event_bus: EventBus,
}

impl ProgressStreamClient {
    pub fn new(source: Arc<dyn FrameSource>, config: StreamConfig, event_bus: EventBus) -> Self {
        Self {
            source,
            config,
            event_bus,
        }
    }

    /// Consume frames for one job until a terminal status arrives
    ///
    /// Returns the first terminal frame; any later duplicate terminal frames
    /// are never read, so the owning runner's terminal path fires exactly
    /// once. Returns `Err(Subscription)` only when cancelled.
    pub async fn await_terminal(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<ProgressFrame> {
        let mut delay = self.config.initial_delay;
        let mut disruption_notified = false;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Subscription(format!(
                    "subscription for job {job_id} cancelled"
                )));
            }

            match self.source.connect(job_id).await {
                Ok(mut frames) => {
                    tracing::debug!(job_id = %job_id, "Progress subscription open");
                    // Successful connect resets the backoff ladder
                    delay = self.config.initial_delay;

                    loop {
                        let payload = tokio::select! {
                            _ = cancel.cancelled() => {
                                return Err(EngineError::Subscription(format!(
                                    "subscription for job {job_id} cancelled"
                                )));
                            }
                            payload = frames.next() => payload,
                        };

                        let Some(payload) = payload else {
                            break; // stream closed without a terminal frame
                        };

                        let frame: ProgressFrame = match serde_json::from_str(&payload) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(
                                    job_id = %job_id,
                                    error = %e,
                                    payload = %payload,
                                    "Dropping malformed progress frame"
                                );
                                continue;
                            }
                        };

                        self.event_bus.emit_lossy(EngineEvent::JobProgress {
                            job_id: job_id.to_string(),
                            status: frame.status.as_str().to_string(),
                            progress_percentage: frame.progress_percentage,
                            timestamp: Utc::now(),
                        });

                        if frame.status.is_terminal() {
                            tracing::debug!(
                                job_id = %job_id,
                                status = frame.status.as_str(),
                                "Terminal progress frame received"
                            );
                            return Ok(frame);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Progress subscription connect failed");
                }
            }

            // Unexpected close while the job is still logically running
            if !disruption_notified {
                disruption_notified = true;
                self.event_bus.emit_lossy(EngineEvent::Notification {
                    message: format!("Progress stream for job {job_id} interrupted, retrying"),
                    severity: Severity::Warning,
                    timestamp: Utc::now(),
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(EngineError::Subscription(format!(
                        "subscription for job {job_id} cancelled"
                    )));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.config.max_delay);
        }
    }
}

/// SSE frame source over HTTP
pub struct HttpFrameSource {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpFrameSource {
    pub fn new(base_url: impl Into<String>) -> EngineResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("FundScout/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Subscription(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    async fn connect(&self, job_id: &str) -> EngineResult<BoxStream<'static, String>> {
        let url = format!("{}/progress/{}", self.base_url, job_id);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Subscription(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Subscription(format!("{url}: HTTP {status}")));
        }

        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::debug!(error = %e, "Progress stream transport ended");
                        break;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    if let Some(payload) = decode_sse_line(&line) {
                        yield payload;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

/// Decode one SSE line, returning the data payload if present
///
/// Comment lines (heartbeats), event-name lines, and blank separators carry
/// no payload.
fn decode_sse_line(line: &str) -> Option<String> {
    let line = line.trim_end_matches(['\n', '\r']);
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.is_empty() {
        None
    } else {
        Some(payload.to_string())
    }
}

/// One scripted connection attempt
#[derive(Debug, Clone)]
pub enum ScriptedSegment {
    /// Connection succeeds and yields these payloads, then closes
    Frames(Vec<String>),
    /// Connection attempt fails outright
    ConnectError(String),
}

/// Scripted frame source for tests and demo mode
///
/// Each `connect` consumes the next segment; segment boundaries model
/// disconnects. When the script runs out, connections yield empty streams.
pub struct ScriptedFrameSource {
    segments: Mutex<VecDeque<ScriptedSegment>>,
}

impl ScriptedFrameSource {
    pub fn new(segments: Vec<ScriptedSegment>) -> Self {
        Self {
            segments: Mutex::new(segments.into()),
        }
    }
}

#[async_trait]
impl FrameSource for ScriptedFrameSource {
    async fn connect(&self, _job_id: &str) -> EngineResult<BoxStream<'static, String>> {
        let segment = self.segments.lock().await.pop_front();

        match segment {
            Some(ScriptedSegment::Frames(payloads)) => {
                Ok(futures::stream::iter(payloads).boxed())
            }
            Some(ScriptedSegment::ConnectError(message)) => {
                Err(EngineError::Subscription(message))
            }
            None => Ok(futures::stream::iter(Vec::<String>::new()).boxed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> StreamConfig {
        StreamConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn frame(status: &str) -> String {
        format!("{{\"status\":\"{status}\"}}")
    }

    #[test]
    fn decode_sse_line_extracts_payload() {
        assert_eq!(
            decode_sse_line("data: {\"status\":\"running\"}\n"),
            Some("{\"status\":\"running\"}".to_string())
        );
        assert_eq!(decode_sse_line(": heartbeat\n"), None);
        assert_eq!(decode_sse_line("event: JobProgress\n"), None);
        assert_eq!(decode_sse_line("\n"), None);
    }

    #[tokio::test]
    async fn terminal_frame_resolves_subscription() {
        let source = Arc::new(ScriptedFrameSource::new(vec![ScriptedSegment::Frames(
            vec![frame("queued"), frame("running"), frame("completed")],
        )]));
        let client = ProgressStreamClient::new(source, fast_config(), EventBus::new(16));

        let terminal = client
            .await_terminal("job-1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(terminal.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn reconnects_after_disconnect_until_terminal() {
        let source = Arc::new(ScriptedFrameSource::new(vec![
            ScriptedSegment::Frames(vec![frame("running")]),
            ScriptedSegment::ConnectError("connection refused".to_string()),
            ScriptedSegment::Frames(vec![frame("completed")]),
        ]));
        let client = ProgressStreamClient::new(source, fast_config(), EventBus::new(16));

        let terminal = client
            .await_terminal("job-2", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(terminal.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_not_fatal() {
        let source = Arc::new(ScriptedFrameSource::new(vec![ScriptedSegment::Frames(
            vec![
                "not json at all".to_string(),
                "{\"status\":\"warp\"}".to_string(),
                frame("failed"),
            ],
        )]));
        let client = ProgressStreamClient::new(source, fast_config(), EventBus::new(16));

        let terminal = client
            .await_terminal("job-3", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(terminal.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn only_first_terminal_frame_is_delivered() {
        let source = Arc::new(ScriptedFrameSource::new(vec![ScriptedSegment::Frames(
            vec![
                "{\"status\":\"completed\",\"results\":{\"result_count\":7}}".to_string(),
                frame("completed"),
                frame("failed"),
            ],
        )]));
        let client = ProgressStreamClient::new(source, fast_config(), EventBus::new(16));

        let terminal = client
            .await_terminal("job-4", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(terminal.status, JobStatus::Completed);
        assert_eq!(terminal.result_count(), 7);
    }

    #[tokio::test]
    async fn cancellation_ends_retry_loop() {
        let source = Arc::new(ScriptedFrameSource::new(vec![]));
        let client = ProgressStreamClient::new(source, fast_config(), EventBus::new(16));

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });

        let result = client.await_terminal("job-5", &cancel).await;
        assert!(matches!(result, Err(EngineError::Subscription(_))));
    }

    #[tokio::test]
    async fn first_disruption_notifies_once() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();

        let source = Arc::new(ScriptedFrameSource::new(vec![
            ScriptedSegment::Frames(vec![frame("running")]),
            ScriptedSegment::Frames(vec![frame("running")]),
            ScriptedSegment::Frames(vec![frame("completed")]),
        ]));
        let client = ProgressStreamClient::new(source, fast_config(), bus);

        client
            .await_terminal("job-6", &CancellationToken::new())
            .await
            .unwrap();

        let mut notifications = 0;
        while let Ok(event) = rx.try_recv() {
            if event.event_type() == "Notification" {
                notifications += 1;
            }
        }
        // Two disruptions occurred but only the first is user-visible
        assert_eq!(notifications, 1);
    }
}
