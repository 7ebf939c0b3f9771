//! HTTP transport with per-operation client routing.
//!
//! Long polls hold a connection open for up to 60 seconds, heartbeats must
//! return fast, and everything else is a normal request/response call. One
//! shared client with one timeout cannot serve all three, so the transport
//! keeps three `reqwest` clients and picks one by operation name.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Operation names as they appear in the `X-Amz-Target` header.
pub mod ops {
    pub const POLL_FOR_DECISION_TASK: &str = "PollForDecisionTask";
    pub const RESPOND_DECISION_TASK_COMPLETED: &str = "RespondDecisionTaskCompleted";
    pub const POLL_FOR_ACTIVITY_TASK: &str = "PollForActivityTask";
    pub const RESPOND_ACTIVITY_TASK_COMPLETED: &str = "RespondActivityTaskCompleted";
    pub const RESPOND_ACTIVITY_TASK_FAILED: &str = "RespondActivityTaskFailed";
    pub const RESPOND_ACTIVITY_TASK_CANCELED: &str = "RespondActivityTaskCanceled";
    pub const RECORD_ACTIVITY_TASK_HEARTBEAT: &str = "RecordActivityTaskHeartbeat";
    pub const SIGNAL_WORKFLOW_EXECUTION: &str = "SignalWorkflowExecution";
    pub const START_WORKFLOW_EXECUTION: &str = "StartWorkflowExecution";
    pub const GET_WORKFLOW_EXECUTION_HISTORY: &str = "GetWorkflowExecutionHistory";
    pub const LIST_OPEN_WORKFLOW_EXECUTIONS: &str = "ListOpenWorkflowExecutions";
    pub const LIST_CLOSED_WORKFLOW_EXECUTIONS: &str = "ListClosedWorkflowExecutions";
    pub const DESCRIBE_WORKFLOW_EXECUTION: &str = "DescribeWorkflowExecution";
}

/// Configuration for [`SwfTransport`].
#[derive(Debug, Clone)]
pub struct SwfTransportConfig {
    /// Service endpoint, e.g. `https://swf.us-east-1.amazonaws.com`.
    pub endpoint: String,
    /// Prefix for the `X-Amz-Target` header.
    pub target_prefix: String,
    /// Timeout for ordinary request/response operations.
    pub request_timeout: Duration,
    /// Timeout for the long-poll operations; must exceed the service's
    /// 60-second poll window.
    pub poll_timeout: Duration,
    /// Timeout for heartbeat calls.
    pub heartbeat_timeout: Duration,
}

impl Default for SwfTransportConfig {
    fn default() -> Self {
        SwfTransportConfig {
            endpoint: "https://swf.us-east-1.amazonaws.com".to_string(),
            target_prefix: "SimpleWorkflowService".to_string(),
            request_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(70),
            heartbeat_timeout: Duration::from_secs(10),
        }
    }
}

impl SwfTransportConfig {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        SwfTransportConfig {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientKind {
    Default,
    Polling,
    Heartbeat,
}

pub(crate) fn client_kind(operation: &str) -> ClientKind {
    match operation {
        ops::POLL_FOR_DECISION_TASK | ops::POLL_FOR_ACTIVITY_TASK => ClientKind::Polling,
        ops::RECORD_ACTIVITY_TASK_HEARTBEAT => ClientKind::Heartbeat,
        _ => ClientKind::Default,
    }
}

/// Transport shim that posts `X-Amz-Target`-dispatched JSON bodies and routes
/// each operation to the client with the right timeout profile.
#[derive(Debug, Clone)]
pub struct SwfTransport {
    config: SwfTransportConfig,
    default_client: reqwest::Client,
    polling_client: reqwest::Client,
    heartbeat_client: reqwest::Client,
}

impl SwfTransport {
    pub fn new(config: SwfTransportConfig) -> CoreResult<Self> {
        let build = |timeout: Duration| {
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| CoreError::InvalidConfiguration(format!("http client: {}", e)))
        };
        Ok(SwfTransport {
            default_client: build(config.request_timeout)?,
            polling_client: build(config.poll_timeout)?,
            heartbeat_client: build(config.heartbeat_timeout)?,
            config,
        })
    }

    fn client_for(&self, operation: &str) -> &reqwest::Client {
        match client_kind(operation) {
            ClientKind::Polling => &self.polling_client,
            ClientKind::Heartbeat => &self.heartbeat_client,
            ClientKind::Default => &self.default_client,
        }
    }

    /// Call an operation and decode its JSON response.
    pub async fn call<I, O>(&self, operation: &str, input: &I) -> CoreResult<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let body = self.send(operation, input).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Call an operation whose response body carries nothing of interest.
    pub async fn call_unit<I>(&self, operation: &str, input: &I) -> CoreResult<()>
    where
        I: Serialize + ?Sized,
    {
        self.send(operation, input).await.map(|_| ())
    }

    async fn send<I>(&self, operation: &str, input: &I) -> CoreResult<String>
    where
        I: Serialize + ?Sized,
    {
        debug!(operation, endpoint = %self.config.endpoint, "sending service request");
        let response = self
            .client_for(operation)
            .post(&self.config.endpoint)
            .header(
                "x-amz-target",
                format!("{}.{}", self.config.target_prefix, operation),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/x-amz-json-1.0")
            .json(input)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(|e| CoreError::Network {
            message: format!("reading response body: {}", e),
            retryable: true,
        })?;

        if !status.is_success() {
            let (code, message) = parse_service_error(status.as_u16(), &body);
            return Err(CoreError::Service { code, message });
        }
        Ok(body)
    }
}

/// Map a send failure to the error taxonomy.
///
/// Redirect handling in the URL layer reports some responses as errors whose
/// message begins with the HTTP status (a 301 without a Location header, for
/// one). Those carry a real status, so they become service errors with that
/// code instead of I/O failures. Everything else is a retryable network error.
fn classify_send_error(err: reqwest::Error) -> CoreError {
    if err.is_redirect() {
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        while let Some(e) = source {
            if let Some(code) = leading_status_code(&e.to_string()) {
                return CoreError::Service {
                    code: code.to_string(),
                    message: "status synthesized from redirect error".to_string(),
                };
            }
            source = e.source();
        }
    }
    CoreError::Network {
        message: err.to_string(),
        retryable: true,
    }
}

fn leading_status_code(message: &str) -> Option<u16> {
    let digits: String = message.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let code: u16 = digits.parse().ok()?;
    (100..=599).contains(&code).then_some(code)
}

fn parse_service_error(status: u16, body: &str) -> (String, String) {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let code = value
            .get("__type")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| status.to_string());
        let message = value
            .get("message")
            .or_else(|| value.get("Message"))
            .and_then(|v| v.as_str())
            .unwrap_or(body)
            .to_string();
        (code, message)
    } else {
        (status.to_string(), body.to_string())
    }
}
