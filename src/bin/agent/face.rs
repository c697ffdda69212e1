use anyhow::{Result, anyhow};
use ask_studio_agent::inbound::InboundMessage;
use ask_studio_agent::{OutboundMessage, Relay};
use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub task_tx: mpsc::Sender<InboundMessage>,
    pub event_tx: broadcast::Sender<OutboundMessage>,
}

/// Publishes outbound messages to every `/events` subscriber.
pub struct SseRelay {
    tx: broadcast::Sender<OutboundMessage>,
}

impl SseRelay {
    pub fn new(tx: broadcast::Sender<OutboundMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Relay for SseRelay {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        self.tx
            .send(message.clone())
            .map(|_| ())
            .map_err(|_| anyhow!("no event subscribers connected"))
    }
}

/// Start the task server on `port`, falling back through the next nine ports.
/// Returns the inbound task queue and the outbound event sender.
pub async fn start_server(
    port: u16,
) -> Result<(mpsc::Receiver<InboundMessage>, broadcast::Sender<OutboundMessage>)> {
    let (task_tx, task_rx) = mpsc::channel::<InboundMessage>(16);
    let (event_tx, _) = broadcast::channel::<OutboundMessage>(64);

    let state = Arc::new(AppState {
        task_tx,
        event_tx: event_tx.clone(),
    });

    let app = Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route("/task", post(task_handler))
        .route("/events", get(sse_handler))
        .with_state(state);

    let mut bound = None;
    for p in port..port.saturating_add(10) {
        match tokio::net::TcpListener::bind(format!("127.0.0.1:{p}")).await {
            Ok(l) => {
                bound = Some((l, p));
                break;
            }
            Err(e) => warn!(port = p, error = %e, "port unavailable"),
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!("could not bind to any port {port}-{}. Stop the old agent first.", port + 9)
    })?;

    info!("task server listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "task server stopped");
        }
    });

    Ok((task_rx, event_tx))
}

/// Queue the message and acknowledge right away; the result arrives later
/// as an outbound message.
async fn task_handler(
    State(state): State<Arc<AppState>>,
    Json(message): Json<InboundMessage>,
) -> Json<Value> {
    info!(action = ?message.action.as_deref().or(message.kind.as_deref()), "POST /task");
    if let Err(e) = state.task_tx.send(message).await {
        error!(error = %e, "task queue closed");
    }
    Json(json!({"received": true}))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(message) => match serde_json::to_string(&message) {
            Ok(data) => Some(Ok::<_, Infallible>(Event::default().data(data))),
            Err(e) => {
                warn!(error = %e, "could not encode event");
                None
            }
        },
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
