use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::types::{CaptureResult, HeartbeatMessage, Payload, TaskRequest};

/// Messages sent back to the process that asked for the task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action")]
pub enum OutboundMessage {
    #[serde(rename = "relayPlanResponse")]
    PlanResponse {
        payload: Value,
        #[serde(rename = "isHeartbeat")]
        is_heartbeat: bool,
    },
    #[serde(rename = "relayAnalyticsResult")]
    AnalyticsResult { data: AnalyticsData },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl OutboundMessage {
    pub fn heartbeat(heartbeat: &HeartbeatMessage) -> Self {
        OutboundMessage::PlanResponse {
            payload: serde_json::to_value(heartbeat).unwrap_or(Value::Null),
            is_heartbeat: true,
        }
    }

    pub fn retrying(category: &str, message: String) -> Self {
        OutboundMessage::AnalyticsResult {
            data: AnalyticsData {
                category: Some(category.to_string()),
                status: Some("retrying".to_string()),
                message: Some(message),
                timestamp: now_millis(),
                ..Default::default()
            },
        }
    }

    /// Final message for a task. Plan tasks always answer on
    /// `relayPlanResponse`, analytics tasks on `relayAnalyticsResult`.
    pub fn terminal(request: &TaskRequest, prompt: Option<&str>, result: &CaptureResult) -> Self {
        if request.is_plan {
            let payload = match &result.payload {
                Payload::Structured(value) => value.clone(),
                Payload::Text(text) => Value::String(text.clone()),
            };
            return OutboundMessage::PlanResponse {
                payload,
                is_heartbeat: false,
            };
        }

        let category = Some(request.category_label().to_string());
        let data = match (&result.error, result.success) {
            (Some(error), false) => AnalyticsData {
                category,
                error: Some(error.clone()),
                timestamp: now_millis(),
                ..Default::default()
            },
            _ => AnalyticsData {
                category,
                question: prompt.map(str::to_string),
                response: Some(match &result.payload {
                    Payload::Text(text) => text.clone(),
                    Payload::Structured(value) => value.to_string(),
                }),
                timestamp: now_millis(),
                ..Default::default()
            },
        };
        OutboundMessage::AnalyticsResult { data }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, OutboundMessage::PlanResponse { is_heartbeat: true, .. })
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            OutboundMessage::PlanResponse { is_heartbeat, .. } => !is_heartbeat,
            OutboundMessage::AnalyticsResult { data } => data.status.is_none(),
        }
    }
}

/// Where outbound messages go. `Ok` means the receiver acknowledged.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()>;
}

/// Longest a heartbeat may hold up the task before it is dropped.
const HEARTBEAT_DEADLINE: Duration = Duration::from_secs(2);

/// Per-request limit for callback POSTs.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

/// Front for a [`Relay`] that applies the delivery policy. Every message goes
/// out in call order. Heartbeat failures are ignored; terminal results are
/// logged but never retried.
#[derive(Clone)]
pub struct RelayChannel {
    sink: Arc<dyn Relay>,
}

impl RelayChannel {
    pub fn new(sink: Arc<dyn Relay>) -> Self {
        Self { sink }
    }

    pub async fn heartbeat(&self, heartbeat: HeartbeatMessage) {
        let message = OutboundMessage::heartbeat(&heartbeat);
        match tokio::time::timeout(HEARTBEAT_DEADLINE, self.sink.deliver(&message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "heartbeat dropped"),
            Err(_) => debug!("heartbeat timed out"),
        }
    }

    /// Non-terminal status update (retry notices).
    pub async fn status(&self, message: OutboundMessage) {
        if let Err(e) = self.sink.deliver(&message).await {
            warn!(error = %e, "status update not delivered");
        }
    }

    /// Deliver the single terminal message of a task. Returns whether it was acknowledged.
    pub async fn finish(&self, message: OutboundMessage) -> bool {
        match self.sink.deliver(&message).await {
            Ok(()) => {
                info!("terminal result acknowledged");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to deliver terminal result");
                false
            }
        }
    }
}

/// POSTs each message as JSON to a callback URL.
pub struct WebhookRelay {
    client: reqwest::Client,
    url: String,
}

impl WebhookRelay {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(WEBHOOK_TIMEOUT)
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Relay for WebhookRelay {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        let response = self.client.post(&self.url).json(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("callback {} answered {}", self.url, status);
        }
        Ok(())
    }
}
