use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use a2ui_protocol::{SessionEvent, SessionId};
use a2ui_rpc::{AgentClient, StreamTransport, ToolClient};
use a2ui_session::{ChannelSink, Publisher, SessionRegistry};
use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod flows;
mod surfaces;

use crate::flows::{Backends, Flow, FlowRunner};

/// Frames buffered between a publisher and its HTTP response body.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Parser)]
#[command(name = "a2ui-orchestrator")]
#[command(about = "Streams A2UI surfaces to the browser and drives tool and agent flows")]
struct Cli {
    #[arg(long, env = "ORCH_LISTEN", default_value = "127.0.0.1:10002")]
    listen: SocketAddr,
    /// Overrides the port of `--listen`.
    #[arg(long, env = "ORCH_PORT")]
    port: Option<u16>,
    #[arg(long, env = "MCP_SSE_URL", default_value = "http://127.0.0.1:8000/sse")]
    mcp_sse_url: String,
    #[arg(long, env = "MCP_TRANSPORT", default_value_t = StreamTransport::Direct)]
    mcp_transport: StreamTransport,
    #[arg(long, env = "A2A_TOESLAGEN_URL", default_value = "http://localhost:8010/")]
    toeslagen_url: String,
    #[arg(long, env = "A2A_BEZWAAR_URL", default_value = "http://localhost:8020/")]
    bezwaar_url: String,
    #[arg(long, env = "A2A_GENUI_URL", default_value = "http://localhost:8030/")]
    genui_url: String,
    #[arg(long, env = "TOOL_TIMEOUT_MS", default_value_t = 8_000)]
    tool_timeout_ms: u64,
    #[arg(long, env = "AGENT_TIMEOUT_MS", default_value_t = 20_000)]
    agent_timeout_ms: u64,
    #[arg(long, env = "PUBLISH_TICK_MS", default_value_t = 1_000)]
    publish_tick_ms: u64,
}

impl Cli {
    fn listen_addr(&self) -> SocketAddr {
        let mut addr = self.listen;
        if let Some(port) = self.port {
            addr.set_port(port);
        }
        addr
    }

    fn backends(&self) -> Result<Backends> {
        Ok(Backends {
            tools: ToolClient::new(&self.mcp_sse_url)?.with_transport(self.mcp_transport),
            toeslagen: AgentClient::new(&self.toeslagen_url)?,
            bezwaar: AgentClient::new(&self.bezwaar_url)?,
            genui: AgentClient::new(&self.genui_url)?,
            tool_timeout: Duration::from_millis(self.tool_timeout_ms),
            agent_timeout: Duration::from_millis(self.agent_timeout_ms),
        })
    }
}

#[derive(Clone)]
struct AppState {
    registry: SessionRegistry,
    publisher: Publisher,
    flows: FlowRunner,
    shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientEvent {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let registry = SessionRegistry::new();
    let state = AppState {
        publisher: Publisher::new(registry.clone())
            .with_tick(Duration::from_millis(cli.publish_tick_ms)),
        flows: FlowRunner::new(registry.clone(), cli.backends()?),
        registry,
        shutdown: CancellationToken::new(),
    };
    let shutdown = state.shutdown.clone();

    let app = router(state);

    let listen = cli.listen_addr();
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(
        listen = %listen,
        mcp = %cli.mcp_sse_url,
        transport = %cli.mcp_transport,
        "a2ui-orchestrator listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open event streams never finish on their own.
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(events))
        .route("/api/client-event", post(client_event))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Opens a fresh session and streams its events until the client goes away.
async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session = state.registry.create();
    let (sink, frames) = ChannelSink::channel(EVENT_BUFFER);

    let publisher = state.publisher.clone();
    let cancel = state.shutdown.child_token();
    let published = session.clone();
    tokio::spawn(async move {
        if let Err(error) = publisher.run(published, sink, cancel).await {
            warn!(%error, "publisher refused session");
        }
    });

    let home = surfaces::home();
    if let Err(error) = state.registry.open_surface(
        session.id(),
        home.surface_id(),
        home.title,
        home.initial_model(),
    ) {
        warn!(session_id = %session.id(), %error, "home surface not opened");
    }

    let stream = ReceiverStream::new(frames).map(|event| Ok(as_sse_event(&event)));
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn client_event(
    State(state): State<AppState>,
    Json(event): Json<ClientEvent>,
) -> ApiResult<Json<Value>> {
    let session_id = event
        .session_id
        .filter(|id| !id.is_empty())
        .map(SessionId::from_string)
        .ok_or_else(|| ApiError::bad_request("Missing sessionId"))?;
    if !state.registry.contains(&session_id) {
        return Err(ApiError::not_found("Unknown session"));
    }

    let name = event.name.unwrap_or_default();
    let payload = match event.payload {
        Value::Null => json!({}),
        payload => payload,
    };

    if name == "nav/open" {
        let target = surfaces::lookup(payload["surfaceId"].as_str());
        // A session disposed since the check above is not the caller's error.
        if let Err(error) = state.registry.open_surface(
            &session_id,
            target.surface_id(),
            target.title,
            target.initial_model(),
        ) {
            warn!(session_id = %session_id, surface_id = target.id, %error, "surface not opened");
        }
        return Ok(Json(json!({ "ok": true })));
    }

    match Flow::from_event(&name) {
        Some(flow) => {
            state.flows.spawn(flow, session_id, payload);
            Ok(Json(json!({ "ok": true })))
        }
        None => Ok(Json(json!({ "ok": true, "ignored": true }))),
    }
}

fn as_sse_event(event: &SessionEvent) -> Event {
    let payload = event
        .to_json()
        .unwrap_or_else(|error| json!({ "error": error.to_string() }).to_string());
    Event::default().data(payload)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
