use std::time::Duration;

/// Anchor keys whose presence marks a structured (JSON) answer.
pub const ANCHOR_KEYS: &[&str] = &["\"algorithmStage\"", "\"schedule\""];

/// Tunables for the response watcher. Counts are in ticks.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub tick: Duration,
    pub max_ticks: i64,
    /// Error phrases are ignored until this many ticks have passed since send.
    pub error_grace_ticks: u64,
    /// A cancellation is only retried when more than this many ticks remain.
    pub cancel_headroom_ticks: i64,
    pub cancel_refund_ticks: i64,
    pub resubmit_delay_ticks: u64,
    pub max_cancellations: u32,
    pub heartbeat_every: u64,
    pub min_capture_len: usize,
    pub stable_ticks_structured: u32,
    pub stable_ticks_prose: u32,
    pub direct_extraction_after: u64,
    pub direct_min_len: usize,
    pub partial_min_len: usize,
    pub echo_prefix_chars: usize,
    pub progress_log_every: u64,
    pub anchor_keys: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            max_ticks: 600,
            error_grace_ticks: 5,
            cancel_headroom_ticks: 30,
            cancel_refund_ticks: 30,
            resubmit_delay_ticks: 3,
            max_cancellations: 5,
            heartbeat_every: 3,
            min_capture_len: 200,
            stable_ticks_structured: 2,
            stable_ticks_prose: 3,
            direct_extraction_after: 10,
            direct_min_len: 200,
            partial_min_len: 50,
            echo_prefix_chars: 100,
            progress_log_every: 5,
            anchor_keys: ANCHOR_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Backoff for host-declared rate limiting.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// `base * 2^count`: 30s, 60s, 120s with the defaults.
    pub fn delay_for(&self, count: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(count)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub activation_attempts: u32,
    pub activation_interval: Duration,
    /// Wait after clicking the activation control for the dialog to render.
    pub settle_delay: Duration,
    pub post_open_pause: Duration,
    pub input_attempts: u32,
    /// Zero-based input lookup attempt on which the activation control is clicked again.
    pub input_reactivate_at: u32,
    pub injection_pause: Duration,
    pub close_delay: Duration,
    pub startup_delay: Duration,
    pub retry: RetryPolicy,
    pub watch: WatchConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            activation_attempts: 10,
            activation_interval: Duration::from_secs(2),
            settle_delay: Duration::from_secs(5),
            post_open_pause: Duration::from_secs(1),
            input_attempts: 8,
            input_reactivate_at: 3,
            injection_pause: Duration::from_secs(1),
            close_delay: Duration::from_secs(2),
            startup_delay: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            watch: WatchConfig::default(),
        }
    }
}
