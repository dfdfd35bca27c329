//! Remote job gateway client
//!
//! Every remote processor is invoked through the same contract:
//! `POST {base_url}/{resource}` with JSON parameters. A 2xx response is
//! either a synchronous result (`success`, `data`, `execution_time_ms`,
//! `cost`) or a job handle (`workflow_id` or `task_id`) that requires a
//! progress subscription to resolve.
//!
//! The `JobGateway` trait is the injection seam: `HttpJobGateway` for
//! production, `SimulatedGateway` for tests and demo mode. Placeholder data
//! never lives inline in the production path.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default minimum interval between gateway invocations
const DEFAULT_MIN_INTERVAL_MS: u64 = 250;

const USER_AGENT: &str = concat!("FundScout/", env!("CARGO_PKG_VERSION"));

/// One invocation of a named remote processor
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Resource path under the gateway base URL, e.g. `discovery/federal`
    pub resource: String,
    /// JSON parameters posted as the request body
    pub params: Value,
}

impl Invocation {
    pub fn new(resource: impl Into<String>, params: Value) -> Self {
        Self {
            resource: resource.into(),
            params,
        }
    }
}

/// Synchronous processor result
#[derive(Debug, Clone, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub cost: Option<f64>,
}

/// Handle for an asynchronous job; resolves via a progress subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
}

/// Gateway response: immediate result or job handle
#[derive(Debug, Clone)]
pub enum GatewayResponse {
    Completed(SyncResult),
    Job(JobHandle),
}

/// Raw wire shape before classification
#[derive(Debug, Deserialize)]
struct RawResponse {
    success: Option<bool>,
    #[serde(default)]
    data: Value,
    execution_time_ms: Option<u64>,
    cost: Option<f64>,
    workflow_id: Option<String>,
    task_id: Option<String>,
    error: Option<String>,
}

impl RawResponse {
    fn classify(self, resource: &str) -> EngineResult<GatewayResponse> {
        if let Some(job_id) = self.workflow_id.or(self.task_id) {
            return Ok(GatewayResponse::Job(JobHandle { job_id }));
        }

        match self.success {
            Some(true) => Ok(GatewayResponse::Completed(SyncResult {
                success: true,
                data: self.data,
                execution_time_ms: self.execution_time_ms,
                cost: self.cost,
            })),
            Some(false) => Err(EngineError::RemoteInvocation(format!(
                "{resource}: {}",
                self.error.unwrap_or_else(|| "processor reported failure".to_string())
            ))),
            None => Err(EngineError::RemoteInvocation(format!(
                "{resource}: response carried neither a result nor a job id"
            ))),
        }
    }
}

/// Extract a result count from a synchronous result payload
///
/// Processors report either an explicit `result_count` or a `results` array.
pub fn extract_result_count(data: &Value) -> u64 {
    if let Some(count) = data.get("result_count").and_then(Value::as_u64) {
        return count;
    }
    if let Some(results) = data.get("results").and_then(Value::as_array) {
        return results.len() as u64;
    }
    0
}

/// Named remote processor invoker
#[async_trait]
pub trait JobGateway: Send + Sync {
    async fn invoke(&self, invocation: &Invocation) -> EngineResult<GatewayResponse>;
}

/// Rate limiter enforcing a minimum interval between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with the rate limit
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// HTTP gateway client
pub struct HttpJobGateway {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: RateLimiter,
}

impl HttpJobGateway {
    pub fn new(base_url: impl Into<String>) -> EngineResult<Self> {
        Self::with_min_interval(base_url, DEFAULT_MIN_INTERVAL_MS)
    }

    pub fn with_min_interval(
        base_url: impl Into<String>,
        min_interval_ms: u64,
    ) -> EngineResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::RemoteInvocation(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::new(min_interval_ms),
        })
    }
}

#[async_trait]
impl JobGateway for HttpJobGateway {
    async fn invoke(&self, invocation: &Invocation) -> EngineResult<GatewayResponse> {
        self.rate_limiter.wait().await;

        let url = format!("{}/{}", self.base_url, invocation.resource);
        tracing::debug!(resource = %invocation.resource, url = %url, "Invoking remote processor");

        let response = self
            .http_client
            .post(&url)
            .json(&invocation.params)
            .send()
            .await
            .map_err(|e| {
                EngineError::RemoteInvocation(format!("{}: {e}", invocation.resource))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::RemoteInvocation(format!(
                "{}: HTTP {status} {body}",
                invocation.resource
            )));
        }

        let raw: RawResponse = response.json().await.map_err(|e| {
            EngineError::RemoteInvocation(format!("{}: invalid response: {e}", invocation.resource))
        })?;

        raw.classify(&invocation.resource)
    }
}

/// Scripted response for the simulated gateway
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Synchronous success carrying a result count
    Complete { result_count: u64 },
    /// Synchronous failure
    Fail { message: String },
    /// Asynchronous job handle; the test wires a matching frame source
    Job { job_id: String },
}

/// Simulated gateway for tests and demo mode
///
/// Responses are scripted per resource and consumed in order; when a
/// resource's script is exhausted the fallback response repeats.
pub struct SimulatedGateway {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fallback: Scripted,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Scripted::Complete { result_count: 0 },
        }
    }

    pub fn with_fallback(fallback: Scripted) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
        }
    }

    /// Queue a scripted response for a resource
    pub async fn script(&self, resource: &str, response: Scripted) {
        self.scripts
            .lock()
            .await
            .entry(resource.to_string())
            .or_default()
            .push_back(response);
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobGateway for SimulatedGateway {
    async fn invoke(&self, invocation: &Invocation) -> EngineResult<GatewayResponse> {
        let scripted = {
            let mut scripts = self.scripts.lock().await;
            scripts
                .get_mut(&invocation.resource)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| self.fallback.clone())
        };

        match scripted {
            Scripted::Complete { result_count } => Ok(GatewayResponse::Completed(SyncResult {
                success: true,
                data: serde_json::json!({ "result_count": result_count }),
                execution_time_ms: Some(1),
                cost: Some(0.0),
            })),
            Scripted::Fail { message } => Err(EngineError::RemoteInvocation(format!(
                "{}: {message}",
                invocation.resource
            ))),
            Scripted::Job { job_id } => Ok(GatewayResponse::Job(JobHandle { job_id })),
        }
    }
}
