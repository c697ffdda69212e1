use std::time::Duration;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::store::{self, KeyValueStore};
use crate::types::{RetryState, TaskKind};

pub const RETRY_KEY: &str = "askStudio_retryCount";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then run the task again. `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    Exhausted,
}

/// Exponential backoff for rate limiting, with the counter kept in the store
/// so it survives a restart of the agent.
pub struct RetryController<'a> {
    store: &'a dyn KeyValueStore,
    key: String,
    policy: &'a RetryPolicy,
}

impl<'a> RetryController<'a> {
    pub fn new(store: &'a dyn KeyValueStore, kind: TaskKind, policy: &'a RetryPolicy) -> Self {
        Self {
            store,
            key: Self::key_for(kind),
            policy,
        }
    }

    pub fn key_for(kind: TaskKind) -> String {
        format!("{RETRY_KEY}:{}", kind.as_str())
    }

    pub fn state(&self) -> RetryState {
        match store::load::<RetryState>(self.store, &self.key) {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(key = %self.key, error = %e, "could not read retry state");
                RetryState::default()
            }
        }
    }

    pub fn on_rate_limited(&self) -> RetryDecision {
        let current = self.state();
        if current.count >= self.policy.max_retries {
            info!(count = current.count, "rate-limit retries exhausted");
            self.clear();
            return RetryDecision::Exhausted;
        }

        let delay = self.policy.delay_for(current.count);
        let next = RetryState {
            count: current.count + 1,
            last_attempt: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = store::save(self.store, &self.key, &next) {
            warn!(key = %self.key, error = %e, "could not persist retry state");
        }

        RetryDecision::Retry {
            attempt: next.count,
            delay,
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            warn!(key = %self.key, error = %e, "could not clear retry state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn three_backoffs_then_exhaustion() {
        let store = MemoryStore::new();
        let policy = RetryPolicy::default();
        let retry = RetryController::new(&store, TaskKind::Plan, &policy);

        let delays: Vec<RetryDecision> = (0..4).map(|_| retry.on_rate_limited()).collect();
        assert_eq!(
            delays,
            vec![
                RetryDecision::Retry { attempt: 1, delay: Duration::from_secs(30) },
                RetryDecision::Retry { attempt: 2, delay: Duration::from_secs(60) },
                RetryDecision::Retry { attempt: 3, delay: Duration::from_secs(120) },
                RetryDecision::Exhausted,
            ]
        );
        assert_eq!(store.get(&RetryController::key_for(TaskKind::Plan)).unwrap(), None);
    }

    #[test]
    fn counters_are_scoped_per_task_kind() {
        let store = MemoryStore::new();
        let policy = RetryPolicy::default();
        RetryController::new(&store, TaskKind::Plan, &policy).on_rate_limited();

        let analytics = RetryController::new(&store, TaskKind::Analytics, &policy);
        assert_eq!(analytics.state().count, 0);
        assert_eq!(RetryController::new(&store, TaskKind::Plan, &policy).state().count, 1);
    }

    #[test]
    fn persisted_count_resumes_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let policy = RetryPolicy::default();

        let first = crate::store::JsonFileStore::new(&path);
        RetryController::new(&first, TaskKind::Analytics, &policy).on_rate_limited();

        let restarted = crate::store::JsonFileStore::new(&path);
        let decision = RetryController::new(&restarted, TaskKind::Analytics, &policy).on_rate_limited();
        assert_eq!(
            decision,
            RetryDecision::Retry { attempt: 2, delay: Duration::from_secs(60) }
        );
    }
}
