mod dom;
mod face;
mod hands;

use anyhow::{Result, anyhow};
use ask_studio_agent::{AgentConfig, AgentSession, JsonFileStore, Relay, RelayChannel, WebhookRelay};
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Answers questions by driving Ask Studio in a signed-in YouTube Studio tab.
#[derive(Parser, Debug)]
#[command(name = "ask-studio-agent", version)]
struct Cli {
    /// First port tried for the task server.
    #[arg(long, env = "AGENT_PORT", default_value_t = 3000)]
    port: u16,

    /// DevTools endpoint of a running Chrome to attach to.
    #[arg(long, env = "CHROME_DEBUG_URL", default_value = "http://127.0.0.1:9222")]
    debug_url: String,

    #[arg(long, env = "CHROME_HEADLESS")]
    headless: bool,

    #[arg(long, env = "STUDIO_URL", default_value = "https://studio.youtube.com")]
    studio_url: String,

    /// Chrome profile used when launching instead of attaching.
    #[arg(long, env = "CHROME_PROFILE_DIR")]
    profile_dir: Option<PathBuf>,

    #[arg(long, env = "AGENT_STORE_PATH")]
    store_path: Option<PathBuf>,

    /// POST results here instead of streaming them on /events.
    #[arg(long, env = "AGENT_CALLBACK_URL")]
    callback_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ask_studio_agent=debug")),
        )
        .init();

    info!("starting Ask Studio agent");

    // Server first so callers can queue tasks while Chrome starts.
    let (mut task_rx, event_tx) = face::start_server(cli.port).await?;

    let settings = hands::LaunchSettings {
        debug_url: cli.debug_url,
        headless: cli.headless,
        profile_dir: cli.profile_dir,
        studio_url: cli.studio_url,
    };
    let session = tokio::task::spawn_blocking(move || hands::BrowserSession::launch(&settings))
        .await
        .map_err(|e| anyhow!("Browser launch panicked: {e}"))??;

    let relay: Arc<dyn Relay> = match cli.callback_url {
        Some(url) => {
            info!(%url, "relaying results to callback");
            Arc::new(WebhookRelay::new(url))
        }
        None => Arc::new(face::SseRelay::new(event_tx)),
    };

    let store = JsonFileStore::new(cli.store_path.unwrap_or_else(JsonFileStore::default_path));
    info!(path = %store.path().display(), "state store");

    let agent = AgentSession::new(
        Arc::new(dom::ChromeSurface::new(session.tab.clone())),
        Arc::new(store),
        RelayChannel::new(relay),
        AgentConfig::default(),
    );

    let pending = agent.run_pending().await;
    if pending > 0 {
        info!(pending, "pending tasks finished");
    }

    info!("waiting for tasks");
    while let Some(message) = task_rx.recv().await {
        if agent.handle_message(message).await.is_none() {
            warn!("ignored message that is not a task");
        }
    }

    Ok(())
}
