//! Drives the Ask Studio assistant embedded in YouTube Studio: opens its
//! dialog, types a question, waits for the answer to settle and relays it back.

pub mod activator;
pub mod agent;
pub mod config;
pub mod error;
pub mod extractor;
pub mod inbound;
pub mod injector;
pub mod locator;
pub mod prompts;
pub mod relay;
pub mod retry;
pub mod store;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use agent::AgentSession;
pub use config::{AgentConfig, RetryPolicy, WatchConfig};
pub use error::{AgentError, AgentResult};
pub use relay::{OutboundMessage, Relay, RelayChannel, WebhookRelay};
pub use store::{JsonFileStore, KeyValueStore};
pub use types::{CaptureResult, TaskRequest};
