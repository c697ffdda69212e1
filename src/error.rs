use thiserror::Error;

/// Classified outcomes that end a task without a captured answer.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Activation control or entry surface absent after bounded lookups.
    #[error("{0} not found")]
    ElementNotFound(String),

    /// The host declared throttling. Retried by the `RetryController`.
    #[error("Ask Studio rate-limited: {0}")]
    RateLimited(String),

    #[error("Ask Studio rate-limited. Max retries ({0}) reached.")]
    RetriesExhausted(u32),

    /// The host kept cancelling its own answer past the in-place retry budget.
    #[error("Ask Studio cancelled its response {0} times")]
    Cancelled(u32),

    #[error("Ask Studio timed out waiting for AI response.")]
    Timeout,

    /// Any other failure the host reported in the transcript.
    #[error("Ask Studio error: {0}")]
    HostError(String),

    #[error("no prompt could be resolved for the task")]
    MissingPrompt,

    #[error("page driver failure: {0:#}")]
    Page(#[from] anyhow::Error),
}

impl AgentError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::RateLimited(_))
    }

    /// Short machine-readable kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::ElementNotFound(_) => "element_not_found",
            AgentError::RateLimited(_) => "rate_limited",
            AgentError::RetriesExhausted(_) => "rate_limited",
            AgentError::Cancelled(_) => "cancelled",
            AgentError::Timeout => "timeout",
            AgentError::HostError(_) => "host_error",
            AgentError::MissingPrompt => "missing_prompt",
            AgentError::Page(_) => "page",
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
