use crate::agent::Agent;
use crate::memory::SessionStore;
use crate::model::ModelProvider;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};
use utoipa::{OpenApi, ToSchema};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub(crate) struct ServerState<P: ModelProvider> {
    agent: Arc<Agent<P>>,
    sessions: Arc<SessionStore>,
}

#[derive(OpenApi)]
#[openapi(
    paths(generate_handler, tools_handler, health_handler),
    components(schemas(
        GenerateRequest,
        GenerateResponse,
        ErrorResponse,
        ToolListResponse,
        ToolInfo,
        HealthResponse
    )),
    tags(
        (name = "agent", description = "Conversational agent turns"),
        (name = "tools", description = "Registered tools and their backing servers"),
        (name = "meta", description = "Service health")
    )
)]
struct ApiDoc;

pub async fn serve<P>(
    agent: Arc<Agent<P>>,
    sessions: Arc<SessionStore>,
    addr: SocketAddr,
) -> Result<(), ServerError>
where
    P: ModelProvider + 'static,
{
    info!(%addr, "Binding REST server");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let state = Arc::new(ServerState { agent, sessions });
    let app = Router::new()
        .route("/generate", post(generate_handler::<P>))
        .route("/tools", get(tools_handler::<P>))
        .route("/health", get(health_handler::<P>))
        .route("/api-doc/openapi.json", get(openapi_handler))
        .layer(cors)
        .with_state(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!(%addr, "REST server ready to accept connections");

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(ServerError::Serve)
}

#[derive(Debug, Deserialize, ToSchema)]
struct GenerateRequest {
    prompt: String,
    session_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    ok: bool,
}

#[utoipa::path(
    post,
    path = "/generate",
    tag = "agent",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Turn processed", body = GenerateResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 502, description = "Model or tool server unreachable", body = ErrorResponse)
    )
)]
async fn generate_handler<P: ModelProvider>(
    State(state): State<Arc<ServerState<P>>>,
    Json(payload): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, (StatusCode, Json<ErrorResponse>)> {
    info!(
        session = payload.session_id.as_deref(),
        "Received /generate request"
    );

    if payload.prompt.trim().is_empty() {
        error!("Rejecting /generate request due to empty prompt");
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "prompt cannot be empty".to_string(),
            }),
        ));
    }

    let memory = state.sessions.memory(payload.session_id.as_deref()).await;
    match state.agent.run(&payload.prompt, &memory).await {
        Ok(response) => {
            info!("Agent turn completed successfully");
            Ok(Json(GenerateResponse { response }))
        }
        Err(err) => {
            error!(%err, "Agent turn failed");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: err.user_message(),
                }),
            ))
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
struct ToolInfo {
    name: String,
    description: String,
    server: String,
}

#[utoipa::path(
    get,
    path = "/tools",
    tag = "tools",
    responses((status = 200, description = "Registered tools", body = ToolListResponse))
)]
async fn tools_handler<P: ModelProvider>(
    State(state): State<Arc<ServerState<P>>>,
) -> Json<ToolListResponse> {
    let definitions = state.agent.registry().definitions();
    debug!(tool_count = definitions.len(), "Serving /tools request");
    let tools = definitions
        .iter()
        .map(|definition| ToolInfo {
            name: definition.name.to_string(),
            description: definition.description.to_string(),
            server: definition.server.to_string(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "meta",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
async fn health_handler<P: ModelProvider>(
    State(_state): State<Arc<ServerState<P>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
