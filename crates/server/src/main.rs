//! Tessera Server
//!
//! CLI entry point. `tessera run` executes one goal and prints the summary;
//! `tessera serve` exposes runs and their progress events over HTTP.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tessera_core::config::{EndpointConfig, OrchestratorConfig};
use tessera_core::persistence::{DurableClient, HttpRemoteApi};
use tessera_core::state::{RunDb, RunStatus, RunStatusStore, SqliteRunStatusStore};
use tessera_core::agent::HttpAgentRunner;
use tessera_core::swarm::{new_run_id, BroadcastSink, Orchestrator, RunRequest, TracingSink};
use tessera_core::tools::{HttpQueryBackend, SearxngSearch, ToolSet};
use tokio::net::TcpListener;
use utoipa::{OpenApi, ToSchema};

/// Rows returned by the query backend before truncation
const MAX_QUERY_ROWS: usize = 500;
/// Agent steps before a run gives up on a task
const MAX_AGENT_STEPS: usize = 24;

#[derive(Parser, Clone)]
#[command(author, version, about = "Tessera - phased agent analysis runner")]
struct Args {
    /// Path to the orchestrator config
    #[arg(long, global = true, default_value = tessera_core::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run one goal to completion and print its summary
    Run {
        goal: String,
    },
}

struct AppState {
    orchestrator: Arc<Orchestrator>,
    events: BroadcastSink,
    store: Arc<SqliteRunStatusStore>,
}

type SharedState = Arc<AppState>;

// === API Types ===

#[derive(Deserialize, ToSchema)]
struct StartRunRequest {
    goal: String,
}

#[derive(Serialize, ToSchema)]
struct StartRunResponse {
    run_id: String,
    status: String,
}

#[derive(Serialize, ToSchema)]
struct RunRecordResponse {
    run_id: String,
    status: String,
    #[schema(value_type = Object)]
    outputs: serde_json::Value,
    updated_at: String,
}

#[derive(Serialize, ToSchema)]
struct ApiResponse {
    success: bool,
    message: String,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tessera API",
        version = "0.1.0",
        description = "Start analysis runs and follow their progress"
    ),
    paths(start_run, get_run),
    components(schemas(StartRunRequest, StartRunResponse, RunRecordResponse, ApiResponse)),
    tags((name = "runs", description = "Run management"))
)]
struct ApiDoc;

// === API Handlers ===

/// Start a run in the background
#[utoipa::path(
    post,
    path = "/api/v1/runs",
    tag = "runs",
    request_body = StartRunRequest,
    responses(
        (status = 202, description = "Run accepted", body = StartRunResponse)
    )
)]
async fn start_run(
    State(state): State<SharedState>,
    Json(req): Json<StartRunRequest>,
) -> Response {
    let run_id = new_run_id();

    if let Err(e) = state
        .store
        .mark(&run_id, RunStatus::Running, &serde_json::json!({ "goal": req.goal }))
        .await
    {
        tracing::warn!(run_id = %run_id, error = %e, "Failed to record run start");
    }

    let orchestrator = Arc::clone(&state.orchestrator);
    let request = RunRequest::new(req.goal).with_run_id(run_id.clone());
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run(request).await {
            tracing::error!(error = %format!("{:#}", e), "Background run failed");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            run_id,
            status: RunStatus::Running.as_str().to_string(),
        }),
    )
        .into_response()
}

/// Current status record of a run
#[utoipa::path(
    get,
    path = "/api/v1/runs/{id}",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    responses(
        (status = 200, description = "Run record", body = RunRecordResponse),
        (status = 404, description = "Unknown run", body = ApiResponse)
    )
)]
async fn get_run(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    match state.store.load(&id) {
        Ok(Some(record)) => Json(RunRecordResponse {
            run_id: record.run_id,
            status: record.status.as_str().to_string(),
            outputs: record.outputs,
            updated_at: record.updated_at.to_rfc3339(),
        })
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse {
                success: false,
                message: format!("Run {} not found", id),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse {
                success: false,
                message: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// SSE stream of progress events, with a heartbeat every 15 seconds
async fn stream_events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match tokio::time::timeout(Duration::from_secs(15), rx.recv()).await {
                Ok(Ok(event)) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().event(event.kind()).data(json)), rx));
                }
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "SSE client lagging, events dropped");
                    continue;
                }
                Ok(Err(_)) => return None,
                Err(_) => return Some((Ok(Event::default().comment("heartbeat")), rx)),
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn serve_openapi() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// === Wiring ===

fn build_orchestrator(
    config: OrchestratorConfig,
    endpoints: &EndpointConfig,
) -> anyhow::Result<Orchestrator> {
    let agent = HttpAgentRunner::new(
        endpoints.agent_url.clone(),
        endpoints.agent_token.clone(),
        MAX_AGENT_STEPS,
    )?;

    let mut tools = ToolSet::new();
    if let Some(url) = &endpoints.query_url {
        tools = tools.with_query(Arc::new(HttpQueryBackend::new(
            url.clone(),
            endpoints.query_token.clone(),
            MAX_QUERY_ROWS,
        )?));
    }
    tools = tools.with_search(Arc::new(SearxngSearch::new(endpoints.searxng_url.as_deref())?));

    let remote = HttpRemoteApi::new(
        endpoints.remote_url.clone(),
        endpoints.remote_token.clone(),
        Duration::from_secs(config.persistence.request_timeout_secs),
    )?;
    let client = DurableClient::new(Arc::new(remote), config.persistence.max_concurrent)
        .with_retry_policy(config.persistence.retry_policy());

    Ok(Orchestrator::new(config, Arc::new(agent), tools, client).with_sink(Arc::new(TracingSink)))
}

async fn run_once(config: OrchestratorConfig, goal: String) -> anyhow::Result<()> {
    let endpoints = EndpointConfig::from_env()?;
    let store = Arc::new(SqliteRunStatusStore::new(Arc::new(RunDb::open()?)));
    let orchestrator = build_orchestrator(config, &endpoints)?.with_status_store(store);

    let summary = orchestrator.run(RunRequest::new(goal)).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_server(config: OrchestratorConfig, port: u16) -> anyhow::Result<()> {
    let endpoints = EndpointConfig::from_env()?;
    let store = Arc::new(SqliteRunStatusStore::new(Arc::new(RunDb::open()?)));
    let events = BroadcastSink::new(256);

    let orchestrator = build_orchestrator(config, &endpoints)?
        .with_sink(Arc::new(events.clone()))
        .with_status_store(store.clone());

    let state: SharedState = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        events,
        store,
    });

    let run_routes = Router::new()
        .route("/", post(start_run))
        .route("/:id", get(get_run));

    let app = Router::new()
        .nest("/api/v1/runs", run_routes)
        .route("/api/v1/events", get(stream_events))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, "Tessera server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tessera_core=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = OrchestratorConfig::load_from(&args.config)?;

    match args.command {
        Some(CliCommand::Run { goal }) => run_once(config, goal).await,
        Some(CliCommand::Serve { port }) => run_server(config, port).await,
        None => run_server(config, 8080).await,
    }
}
