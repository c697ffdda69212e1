//! Task orchestration: one question in, exactly one terminal relay out.

use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::activator::DialogActivator;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::extractor::extract;
use crate::inbound::{self, InboundMessage};
use crate::injector::PromptInjector;
use crate::locator::Surface;
use crate::relay::{OutboundMessage, RelayChannel};
use crate::retry::{RetryController, RetryDecision};
use crate::store::KeyValueStore;
use crate::types::{CaptureResult, HeartbeatMessage, TaskRequest};
use crate::watcher::{CaptureRoute, ResponseWatcher, classify_failure};

/// Everything a task needs, passed explicitly. Tasks run one at a time.
pub struct AgentSession {
    surface: Arc<dyn Surface>,
    store: Arc<dyn KeyValueStore>,
    relay: RelayChannel,
    config: AgentConfig,
}

impl AgentSession {
    pub fn new(
        surface: Arc<dyn Surface>,
        store: Arc<dyn KeyValueStore>,
        relay: RelayChannel,
        config: AgentConfig,
    ) -> Self {
        Self {
            surface,
            store,
            relay,
            config,
        }
    }

    /// Run a task message. `None` when the message is not a task.
    pub async fn handle_message(&self, message: InboundMessage) -> Option<CaptureResult> {
        let request = inbound::resolve(message, self.store.as_ref())?;
        Some(self.perform_task(request).await)
    }

    /// Tasks left in the store by an earlier process, run after the page settles.
    pub async fn run_pending(&self) -> usize {
        sleep(self.config.startup_delay).await;
        let pending = inbound::take_all_pending(self.store.as_ref());
        let count = pending.len();
        for request in pending {
            self.perform_task(request).await;
        }
        count
    }

    pub async fn perform_task(&self, request: TaskRequest) -> CaptureResult {
        let kind = request.kind();
        info!(kind = kind.as_str(), category = request.category_label(), "Ask Studio task received");
        self.relay.heartbeat(HeartbeatMessage::started()).await;

        let Some(prompt) = request.resolve_prompt() else {
            error!("no prompt provided");
            let result = CaptureResult::failure(AgentError::MissingPrompt.to_string());
            return self.conclude(&request, None, result).await;
        };
        info!(chars = prompt.chars().count(), "prompt resolved");

        let policy = &self.config.retry;
        let retry = RetryController::new(self.store.as_ref(), kind, policy);

        let result = loop {
            match self.attempt(&prompt).await {
                Ok((text, route)) => {
                    retry.clear();
                    if route == CaptureRoute::Partial {
                        warn!("returning partial response after timeout");
                    }
                    break extract(&text, request.is_plan);
                }
                Err(e) if e.is_retryable() => match retry.on_rate_limited() {
                    RetryDecision::Retry { attempt, delay } => {
                        let secs = delay.as_secs();
                        warn!(attempt, max = policy.max_retries, delay_secs = secs, error = %e, "rate limited, backing off");
                        let message = format!(
                            "Ask Studio rate-limited. Retrying in {secs}s ({attempt}/{})...",
                            policy.max_retries
                        );
                        self.relay
                            .status(OutboundMessage::retrying(request.category_label(), message))
                            .await;

                        sleep(delay).await;
                        self.activator().close().await;
                        info!(attempt, "retrying now");
                    }
                    RetryDecision::Exhausted => {
                        error!("max retries reached, giving up");
                        break CaptureResult::failure(
                            AgentError::RetriesExhausted(policy.max_retries).to_string(),
                        );
                    }
                },
                Err(e @ AgentError::Timeout) => {
                    error!("timed out waiting for response");
                    break CaptureResult::failure(e.to_string());
                }
                Err(e) => {
                    error!(kind = e.kind(), error = %e, "task failed");
                    retry.clear();
                    break CaptureResult::failure(e.to_string());
                }
            }
        };

        self.conclude(&request, Some(&prompt), result).await
    }

    fn activator(&self) -> DialogActivator<'_> {
        DialogActivator::new(self.surface.as_ref(), &self.config)
    }

    async fn attempt(&self, prompt: &str) -> AgentResult<(String, CaptureRoute)> {
        let surface = self.surface.as_ref();
        let activator = self.activator();
        let injector = PromptInjector::new(surface, &self.config);

        let found = activator.open().await?;
        let transcript = activator.transcript_text().await;
        if let Some(failure) = classify_failure(&transcript) {
            warn!(?failure, "Ask Studio shows an error before sending");
            return Err(failure.into());
        }

        let input = activator.wait_for_input(found).await?;
        injector.inject(&input, prompt).await?;
        injector.send(&input).await?;

        let watcher = ResponseWatcher::new(surface, &self.config.watch, &self.relay, &injector);
        Ok(watcher.watch(prompt, &transcript).await?)
    }

    async fn conclude(&self, request: &TaskRequest, prompt: Option<&str>, result: CaptureResult) -> CaptureResult {
        if result.success {
            info!("task complete");
        }
        self.relay
            .finish(OutboundMessage::terminal(request, prompt, &result))
            .await;
        result
    }
}
