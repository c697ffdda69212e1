//! Response capture.
//!
//! Ask Studio gives no completion signal, so the answer is judged from its
//! evolving text alone. Each tick the driver takes an [`Observation`] of the
//! dialog and feeds it to [`classify`], a pure transition function that decides
//! whether the answer is still being produced, has failed, was cancelled by the
//! host, or has settled into something worth returning.

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::error::AgentError;
use crate::extractor::last_anchored_object;
use crate::injector::PromptInjector;
use crate::locator::{ElementRef, ScopeRef, Surface, query_all_deep};
use crate::relay::RelayChannel;
use crate::types::{HeartbeatMessage, ResponseCandidate};

const RATE_LIMIT_PHRASES: &[&str] = &["temporarily paused", "rate limit", "try again later"];
const HOST_ERROR_PHRASES: &[&str] = &["Couldn't create", "couldn't create"];
/// Matched against lowercased dialog text.
const CANCEL_PHRASES: &[&str] = &[
    "canceled this response",
    "cancelled this response",
    "you canceled",
    "you cancelled",
];
const IN_PROGRESS_MARKERS: &[&str] = &["Thinking", "Generating", "Working on it", "Wait a moment"];
const TEMPLATE_TOKENS: &[&str] = &["YYYY", r#""algorithmStage": "string""#];

const CODE_JSON: &str = "code.language-json";
const CODE_ANY: &str = "code";
pub(crate) const MESSAGE_BUBBLE: &str =
    "ytcp-creator-chat-message, .ytcp-creator-chat-message, ytcp-omnisearch-message";

/// Raw text read from the page on one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    /// Best answer candidate: a JSON code block, else the last chat bubble.
    pub text: String,
    /// Everything the dialog shows, including earlier turns and banners.
    pub dialog_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchFailure {
    RateLimited(String),
    HostError(String),
    Cancelled(u32),
    Timeout,
}

impl From<WatchFailure> for AgentError {
    fn from(failure: WatchFailure) -> Self {
        match failure {
            WatchFailure::RateLimited(detail) => AgentError::RateLimited(detail),
            WatchFailure::HostError(detail) => AgentError::HostError(detail),
            WatchFailure::Cancelled(count) => AgentError::Cancelled(count),
            WatchFailure::Timeout => AgentError::Timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRoute {
    Stable,
    /// Pulled straight out of the dialog text around the last anchor key.
    DirectExtraction,
    /// Best eligible text seen before the tick budget ran out.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Captured { text: String, route: CaptureRoute },
    Failed(WatchFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Heartbeat(u64),
    Resubmit,
    Finish(Verdict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Generating,
    Stabilizing,
    /// Host cancelled; a resubmit is scheduled.
    Retrying,
    Captured,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct WatchState {
    /// Ticks since send. Never refunded.
    pub tick: u64,
    /// Ticks charged against the budget. Cancellations refund some.
    pub elapsed: i64,
    pub phase: Phase,
    pub stable_repeats: u32,
    pub cancellations: u32,
    pub candidate: ResponseCandidate,
    prompt_prefix: String,
    last_len: usize,
    best_partial: Option<String>,
    cancel_marks: usize,
    resubmit_due: Option<u64>,
}

impl WatchState {
    /// `baseline` is the dialog text before sending; cancellation notices
    /// already in it belong to earlier turns and are ignored.
    pub fn new(prompt: &str, baseline: &str, config: &WatchConfig) -> Self {
        Self {
            tick: 0,
            elapsed: 0,
            phase: Phase::Generating,
            stable_repeats: 0,
            cancellations: 0,
            candidate: ResponseCandidate::default(),
            prompt_prefix: prompt.chars().take(config.echo_prefix_chars).collect(),
            last_len: 0,
            best_partial: None,
            cancel_marks: count_cancel_marks(baseline),
            resubmit_due: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Captured | Phase::Failed | Phase::TimedOut)
    }
}

/// Failure the dialog text announces, if any.
pub fn classify_failure(dialog_text: &str) -> Option<WatchFailure> {
    if dialog_text.contains("temporarily paused") {
        return Some(WatchFailure::RateLimited(
            "Ask Studio feature temporarily paused. Please try again later.".to_string(),
        ));
    }
    let excerpt = || dialog_text.chars().take(100).collect::<String>();
    if RATE_LIMIT_PHRASES.iter().any(|p| dialog_text.contains(p)) {
        return Some(WatchFailure::RateLimited(excerpt()));
    }
    if HOST_ERROR_PHRASES.iter().any(|p| dialog_text.contains(p)) {
        return Some(WatchFailure::HostError(excerpt()));
    }
    None
}

fn count_cancel_marks(dialog_text: &str) -> usize {
    let lower = dialog_text.to_lowercase();
    CANCEL_PHRASES.iter().map(|p| lower.matches(p).count()).sum()
}

pub fn looks_like_template(text: &str) -> bool {
    TEMPLATE_TOKENS.iter().any(|t| text.contains(t))
}

fn has_markers(text: &str, config: &WatchConfig) -> bool {
    config.anchor_keys.iter().any(|k| text.contains(k.as_str()))
}

impl ResponseCandidate {
    pub fn assess(text: &str, prompt_prefix: &str, stable_repeats: u32, config: &WatchConfig) -> Self {
        Self {
            text: text.to_string(),
            stable_repeats,
            has_structured_markers: has_markers(text, config),
            looks_like_template: looks_like_template(text),
            looks_like_echo_of_prompt: !prompt_prefix.is_empty() && text.contains(prompt_prefix),
        }
    }

    /// Markers override the echo guard: the transcript usually repeats the
    /// prompt next to the real answer.
    pub fn is_eligible(&self, config: &WatchConfig) -> bool {
        !self.text.is_empty()
            && (self.has_structured_markers || self.text.chars().count() > config.min_capture_len)
            && !self.looks_like_template
            && (!self.looks_like_echo_of_prompt || self.has_structured_markers)
    }
}

fn finish(mut state: WatchState, mut effects: Vec<Effect>, phase: Phase, verdict: Verdict) -> (WatchState, Vec<Effect>) {
    state.phase = phase;
    effects.push(Effect::Finish(verdict));
    (state, effects)
}

/// One tick of the capture state machine.
pub fn classify(mut state: WatchState, obs: &Observation, config: &WatchConfig) -> (WatchState, Vec<Effect>) {
    let mut effects = Vec::new();
    if state.is_finished() {
        return (state, effects);
    }

    state.tick += 1;
    state.elapsed += 1;
    let tick = state.tick;

    if tick % config.heartbeat_every == 0 {
        effects.push(Effect::Heartbeat(tick));
    }
    if state.resubmit_due.is_some_and(|due| tick >= due) {
        state.resubmit_due = None;
        state.phase = Phase::Generating;
        effects.push(Effect::Resubmit);
    }

    if tick > config.error_grace_ticks {
        if let Some(failure) = classify_failure(&obs.dialog_text) {
            return finish(state, effects, Phase::Failed, Verdict::Failed(failure));
        }
    }

    let marks = count_cancel_marks(&obs.dialog_text);
    if marks > state.cancel_marks {
        state.cancel_marks = marks;
        let remaining = config.max_ticks - state.elapsed;
        if state.resubmit_due.is_some() {
            debug!(tick, "cancellation while resubmit pending");
        } else if remaining > config.cancel_headroom_ticks {
            if state.cancellations >= config.max_cancellations {
                let count = state.cancellations;
                return finish(state, effects, Phase::Failed, Verdict::Failed(WatchFailure::Cancelled(count)));
            }
            state.cancellations += 1;
            state.stable_repeats = 0;
            state.last_len = 0;
            state.best_partial = None;
            state.elapsed -= config.cancel_refund_ticks;
            state.resubmit_due = Some(tick + config.resubmit_delay_ticks);
            state.phase = Phase::Retrying;
            return (state, effects);
        } else {
            debug!(tick, remaining, "cancellation too close to the deadline to retry");
        }
    }

    let generating = IN_PROGRESS_MARKERS.iter().any(|m| obs.text.contains(m));
    if generating {
        state.stable_repeats = 0;
        state.phase = Phase::Generating;
    } else if state.resubmit_due.is_none() {
        let candidate = ResponseCandidate::assess(&obs.text, &state.prompt_prefix, state.stable_repeats, config);

        if candidate.is_eligible(config) {
            let len = candidate.text.chars().count();
            if len == state.last_len {
                state.stable_repeats += 1;
            } else {
                state.stable_repeats = 0;
                state.last_len = len;
            }
            state.best_partial = Some(candidate.text.clone());
            state.phase = Phase::Stabilizing;

            let required = if candidate.has_structured_markers {
                config.stable_ticks_structured
            } else {
                config.stable_ticks_prose
            };
            if state.stable_repeats >= required {
                let text = candidate.text.clone();
                state.candidate = ResponseCandidate { stable_repeats: state.stable_repeats, ..candidate };
                return finish(state, effects, Phase::Captured, Verdict::Captured { text, route: CaptureRoute::Stable });
            }
        } else {
            state.stable_repeats = 0;
        }

        let markers = candidate.has_structured_markers;
        state.candidate = ResponseCandidate { stable_repeats: state.stable_repeats, ..candidate };

        if tick > config.direct_extraction_after && !markers {
            if let Some(block) = last_anchored_object(&obs.dialog_text, &config.anchor_keys) {
                if block.chars().count() > config.direct_min_len && !looks_like_template(block) {
                    let text = block.to_string();
                    return finish(
                        state,
                        effects,
                        Phase::Captured,
                        Verdict::Captured { text, route: CaptureRoute::DirectExtraction },
                    );
                }
            }
        }
    }

    if state.elapsed >= config.max_ticks {
        let partial = state
            .best_partial
            .take()
            .filter(|text| text.chars().count() > config.partial_min_len);
        let verdict = match partial {
            Some(text) => Verdict::Captured { text, route: CaptureRoute::Partial },
            None => Verdict::Failed(WatchFailure::Timeout),
        };
        return finish(state, effects, Phase::TimedOut, verdict);
    }

    (state, effects)
}

/// Polls the dialog once per tick until [`classify`] reaches a verdict.
pub struct ResponseWatcher<'a> {
    surface: &'a dyn Surface,
    config: &'a WatchConfig,
    relay: &'a RelayChannel,
    injector: &'a PromptInjector<'a>,
}

impl<'a> ResponseWatcher<'a> {
    pub fn new(
        surface: &'a dyn Surface,
        config: &'a WatchConfig,
        relay: &'a RelayChannel,
        injector: &'a PromptInjector<'a>,
    ) -> Self {
        Self {
            surface,
            config,
            relay,
            injector,
        }
    }

    pub async fn watch(&self, prompt: &str, baseline: &str) -> Result<(String, CaptureRoute), WatchFailure> {
        let mut state = WatchState::new(prompt, baseline, self.config);
        let mut ticker = interval_at(Instant::now() + self.config.tick, self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("waiting for response");
        loop {
            ticker.tick().await;
            let obs = self.observe().await;
            let (next, effects) = classify(state, &obs, self.config);
            state = next;

            if state.tick % self.config.progress_log_every == 0 {
                let c = &state.candidate;
                debug!(
                    tick = state.tick,
                    elapsed = state.elapsed,
                    len = c.text.chars().count(),
                    has_json = c.has_structured_markers,
                    is_prompt = c.looks_like_echo_of_prompt,
                    is_template = c.looks_like_template,
                    stable = state.stable_repeats,
                    phase = ?state.phase,
                    "watch progress"
                );
            }

            for effect in effects {
                match effect {
                    Effect::Heartbeat(progress) => {
                        self.relay.heartbeat(HeartbeatMessage::generating(progress)).await;
                    }
                    Effect::Resubmit => {
                        info!(cancellations = state.cancellations, "retrying after cancelled response");
                        self.injector.resubmit().await;
                    }
                    Effect::Finish(Verdict::Captured { text, route }) => {
                        info!(tick = state.tick, ?route, len = text.chars().count(), "response captured");
                        return Ok((text, route));
                    }
                    Effect::Finish(Verdict::Failed(failure)) => {
                        warn!(tick = state.tick, ?failure, "watch ended without an answer");
                        return Err(failure);
                    }
                }
            }
        }
    }

    async fn observe(&self) -> Observation {
        let root = self.surface.root();
        let code = find_code(&root, self.config).await;
        let messages = query_all_deep(&root, MESSAGE_BUBBLE).await.unwrap_or_else(|e| {
            debug!(error = %e, "message lookup failed");
            Vec::new()
        });
        let last = messages.last();

        let text = code
            .as_ref()
            .or(last)
            .map(|el| el.info().text.clone())
            .unwrap_or_default();

        let dialog_text = match last {
            Some(message) => message.dialog_text().await.ok().flatten(),
            None => None,
        };
        let dialog_text = match dialog_text {
            Some(text) => text,
            None => self.surface.body_text().await.unwrap_or_default(),
        };

        Observation { text, dialog_text }
    }
}

async fn find_code(root: &ScopeRef, config: &WatchConfig) -> Option<ElementRef> {
    if let Ok(found) = query_all_deep(root, CODE_JSON).await {
        if let Some(code) = found.into_iter().next() {
            return Some(code);
        }
    }
    query_all_deep(root, CODE_ANY)
        .await
        .ok()?
        .into_iter()
        .find(|code| has_markers(&code.info().text, config))
}
