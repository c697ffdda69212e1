use serde::{Deserialize, Serialize};

use crate::prompts;

/// Label used for tasks that carry no category.
pub const DIRECT_QUERY: &str = "Direct Query";

/// A single question for Ask Studio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_prompt: Option<String>,
    #[serde(default)]
    pub is_plan: bool,
}

impl TaskRequest {
    pub fn direct(prompt: impl Into<String>, is_plan: bool) -> Self {
        Self {
            direct_prompt: Some(prompt.into()),
            is_plan,
            ..Default::default()
        }
    }

    /// directPrompt > customQuery > category table. Blank strings count as absent.
    pub fn resolve_prompt(&self) -> Option<String> {
        non_blank(&self.direct_prompt)
            .or_else(|| non_blank(&self.custom_query))
            .map(str::to_string)
            .or_else(|| {
                self.category
                    .as_deref()
                    .and_then(prompts::lookup)
                    .map(str::to_string)
            })
    }

    pub fn kind(&self) -> TaskKind {
        if self.is_plan {
            TaskKind::Plan
        } else {
            TaskKind::Analytics
        }
    }

    pub fn category_label(&self) -> &str {
        non_blank(&self.category).unwrap_or(DIRECT_QUERY)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Structured plan generation vs. free-form analytics question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Plan,
    Analytics,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Plan => "plan",
            TaskKind::Analytics => "analytics",
        }
    }
}

/// Rate-limit retry bookkeeping that survives restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub count: u32,
    /// Unix milliseconds.
    pub last_attempt: i64,
}

/// What the watcher saw on one tick, judged for capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseCandidate {
    pub text: String,
    pub stable_repeats: u32,
    pub has_structured_markers: bool,
    pub looks_like_template: bool,
    pub looks_like_echo_of_prompt: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Structured(serde_json::Value),
    Text(String),
}

/// The unit handed to the relay at the end of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult {
    pub success: bool,
    pub payload: Payload,
    pub error: Option<String>,
}

impl CaptureResult {
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            payload: Payload::Structured(serde_json::json!({
                "error": error,
                "success": false,
            })),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Started,
    Generating,
}

/// Informative progress notice. Never changes task state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub status: HeartbeatStatus,
    pub message: String,
    pub progress: u64,
}

impl HeartbeatMessage {
    pub fn started() -> Self {
        Self {
            status: HeartbeatStatus::Started,
            message: "Ask Studio task received, initializing...".to_string(),
            progress: 0,
        }
    }

    pub fn generating(progress: u64) -> Self {
        Self {
            status: HeartbeatStatus::Generating,
            message: "Ask Studio is generating your strategy...".to_string(),
            progress,
        }
    }
}
