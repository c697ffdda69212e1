use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::store::KeyValueStore;
use crate::types::TaskRequest;

pub const PERFORM_ANALYTICS_ASK: &str = "performAnalyticsAsk";
pub const GENERATE_PLAN: &str = "ASK_STUDIO_GENERATE_PLAN";

/// A bare prompt left for the agent; always a plan task.
pub const PENDING_PROMPT_KEY: &str = "pendingAskStudioPrompt";
/// A full request (or a bare prompt string) left for the agent.
pub const PENDING_REQUEST_KEY: &str = "pendingAnalyticsRequest";

/// Task message from the invoking process.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub payload: Option<TaskPayload>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub direct_prompt: Option<String>,
    #[serde(default)]
    pub is_plan: Option<bool>,
}

/// Task fields as the caller sent them. Unlike [`TaskRequest`], an absent
/// plan flag is distinguishable from `false`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub custom_query: Option<String>,
    #[serde(default)]
    pub direct_prompt: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub is_plan: Option<bool>,
}

impl InboundMessage {
    fn names(&self, action: &str) -> bool {
        self.action.as_deref() == Some(action) || self.kind.as_deref() == Some(action)
    }

    pub fn is_task(&self) -> bool {
        self.names(PERFORM_ANALYTICS_ASK) || self.names(GENERATE_PLAN)
    }

    /// Fold the top-level prompt and plan flag into the payload. Payload
    /// fields win; message fields and the action only fill what is missing.
    pub fn into_request(self) -> TaskRequest {
        let wants_plan = self.names(GENERATE_PLAN);
        let payload = self.payload.unwrap_or_default();
        let loose_prompt = [&self.prompt, &self.direct_prompt, &payload.direct_prompt, &payload.prompt]
            .into_iter()
            .find_map(|p| p.as_deref().filter(|p| !p.trim().is_empty()))
            .map(str::to_string);

        TaskRequest {
            category: payload.category,
            custom_query: payload.custom_query,
            direct_prompt: payload
                .direct_prompt
                .filter(|p| !p.trim().is_empty())
                .or(loose_prompt),
            is_plan: payload.is_plan.or(self.is_plan).unwrap_or(wants_plan),
        }
    }
}

fn request_from_value(value: Value) -> Option<TaskRequest> {
    match value {
        Value::String(prompt) if !prompt.trim().is_empty() => Some(TaskRequest::direct(prompt, true)),
        Value::Object(_) => match serde_json::from_value(value) {
            Ok(request) => Some(request),
            Err(e) => {
                warn!(error = %e, "ignoring malformed pending request");
                None
            }
        },
        _ => None,
    }
}

/// Remove and return the task stored under `key`, if any.
fn take(store: &dyn KeyValueStore, key: &str) -> Option<TaskRequest> {
    let value = match store.get(key) {
        Ok(value) => value?,
        Err(e) => {
            warn!(key, error = %e, "could not read pending task");
            return None;
        }
    };
    if let Err(e) = store.remove(key) {
        warn!(key, error = %e, "could not clear pending task");
    }
    let request = if key == PENDING_PROMPT_KEY {
        value
            .as_str()
            .filter(|p| !p.trim().is_empty())
            .map(|p| TaskRequest::direct(p, true))
    } else {
        request_from_value(value)
    };
    if request.is_some() {
        info!(key, "picked up pending task");
    }
    request
}

/// First pending task, prompt key before request key.
pub fn take_pending(store: &dyn KeyValueStore) -> Option<TaskRequest> {
    take(store, PENDING_PROMPT_KEY).or_else(|| take(store, PENDING_REQUEST_KEY))
}

/// Every pending task, for the startup scan.
pub fn take_all_pending(store: &dyn KeyValueStore) -> Vec<TaskRequest> {
    [PENDING_PROMPT_KEY, PENDING_REQUEST_KEY]
        .into_iter()
        .filter_map(|key| take(store, key))
        .collect()
}

/// The request a message asks for, falling back to a stored pending task when
/// the message carries no usable prompt. `None` for messages that are not tasks.
pub fn resolve(message: InboundMessage, store: &dyn KeyValueStore) -> Option<TaskRequest> {
    if !message.is_task() {
        return None;
    }
    let request = message.into_request();
    if request.resolve_prompt().is_some() {
        return Some(request);
    }
    warn!("no prompt in message, checking pending tasks");
    Some(take_pending(store).unwrap_or(request))
}
