//! HTTP façade: `/v1/optimize`, `/v1/chat`, `/v1/health`, `/v1/metrics`.
//! Thin on purpose — every decision that affects optimization behavior
//! lives in `promptopt::pipeline`, not here.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use promptopt::cache::InMemoryResultCache;
use promptopt::canonicalize::{Message, RagDoc, ToolOutput};
use promptopt::compressor::{CompressorService, ExtractiveCompressor, LearnedCompressor};
use promptopt::config::{ConfigOverlay, Settings};
use promptopt::dashboard::{fetch_best_effort, emit_best_effort, DashboardClient, HttpDashboardClient, OptimizationEvent};
use promptopt::embedding::{EmbeddingService, OllamaEmbedder};
use promptopt::inference::{AnthropicProvider, InferenceProvider, OllamaProvider, OpenAiProvider};
use promptopt::observability::Metrics;
use promptopt::pipeline::{OptimizeRequest, OptimizeResult, Pipeline};
use promptopt::types::InferenceRequest;
use promptopt::vector_store::{InMemoryVectorStore, VectorStore};

#[cfg(feature = "qdrant")]
use promptopt::vector_store::qdrant::QdrantVectorStore;

/// Overrides `BIND_ADDR` when set; every other setting comes from the
/// environment via `Settings::load()`.
#[derive(Parser, Debug)]
#[command(name = "promptopt-server", about = "Prompt optimization middleware server")]
struct Cli {
    #[arg(long)]
    bind_addr: Option<String>,
}

struct AppState {
    pipeline: Pipeline,
    settings: Settings,
    dashboard: Option<Arc<dyn DashboardClient>>,
    metrics: Arc<Metrics>,
    vector_store_configured: bool,
}

#[derive(Debug, Deserialize)]
struct OptimizeRequestBody {
    messages: Vec<Message>,
    model: String,
    max_tokens: Option<u32>,
    tenant_id: Option<String>,
    project_id: Option<String>,
    tools: Option<Value>,
    #[serde(default)]
    rag_context: Vec<RagDoc>,
    #[serde(default)]
    tool_outputs: Vec<ToolOutput>,
    user_prefs_overrides: Option<Value>,
}

impl From<OptimizeRequestBody> for OptimizeRequest {
    fn from(body: OptimizeRequestBody) -> Self {
        let user_prefs_overrides = body.user_prefs_overrides.and_then(|v| match v {
            Value::Object(map) => Some(ConfigOverlay(map)),
            _ => None,
        });
        Self {
            messages: body.messages,
            model: body.model,
            max_tokens: body.max_tokens,
            tenant_id: body.tenant_id,
            project_id: body.project_id,
            tools: body.tools,
            rag_context: body.rag_context,
            tool_outputs: body.tool_outputs,
            user_prefs_overrides,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequestBody {
    #[serde(flatten)]
    optimize: OptimizeRequestBody,
    provider: String,
    /// Accepted for API compatibility; the shared `InferenceProvider` trait
    /// has no sampling-parameter surface to forward it to.
    #[allow(dead_code)]
    temperature: Option<f32>,
    max_completion_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: String,
}

enum ApiError {
    InvalidInput(String),
    Unauthorized(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ApiErrorBody { error: message })).into_response()
    }
}

/// `X-API-Key` check: a configured shared key always passes; if the
/// dashboard is enabled, a key that doesn't match the shared key is
/// validated against it instead (reject on timeout or failure).
async fn auth_middleware(State(state): State<Arc<AppState>>, headers: HeaderMap, request: Request, next: Next) -> Result<Response, ApiError> {
    let key = headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing X-API-Key header".to_string()))?;

    if key == state.settings.middleware_api_key {
        return Ok(next.run(request).await);
    }

    if let Some(dashboard) = &state.dashboard {
        let valid = tokio::time::timeout(Duration::from_secs(3), dashboard.validate_user_key(key)).await;
        match valid {
            Ok(Ok(true)) => return Ok(next.run(request).await),
            Ok(Ok(false)) => return Err(ApiError::Unauthorized("invalid API key".to_string())),
            Ok(Err(err)) => {
                warn!("dashboard key validation failed: {err}");
                return Err(ApiError::Unauthorized("key validation unavailable".to_string()));
            }
            Err(_) => {
                warn!("dashboard key validation timed out");
                return Err(ApiError::Unauthorized("key validation timed out".to_string()));
            }
        }
    }

    Err(ApiError::Unauthorized("invalid API key".to_string()))
}

async fn optimize_handler(State(state): State<Arc<AppState>>, Json(body): Json<OptimizeRequestBody>) -> Result<Json<OptimizeResult>, ApiError> {
    if body.messages.is_empty() {
        return Err(ApiError::InvalidInput("messages must not be empty".to_string()));
    }

    let request: OptimizeRequest = body.into();
    let dashboard_overlay = match (&state.dashboard, &request.tenant_id) {
        (Some(client), Some(tenant_id)) => fetch_best_effort(client.as_ref(), tenant_id).await,
        _ => None,
    };

    let result = state.pipeline.run(request.clone(), dashboard_overlay.as_ref(), "optimize").await;

    if let Some(client) = &state.dashboard {
        emit_best_effort(
            client.as_ref(),
            OptimizationEvent {
                tenant_id: request.tenant_id.clone(),
                project_id: request.project_id.clone(),
                endpoint: "optimize".to_string(),
                model: request.model.clone(),
                tokens_before: result.stats.tokens_before,
                tokens_after: result.stats.tokens_after,
                cache_hit: result.stats.cache_hit,
                route: result.stats.route.clone(),
            },
        )
        .await;
    }

    Ok(Json(result))
}

fn provider_for(name: &str, settings: &Settings) -> Result<Box<dyn InferenceProvider>, ApiError> {
    match name {
        "anthropic" => {
            let key = settings
                .anthropic_api_key
                .clone()
                .ok_or_else(|| ApiError::InvalidInput("anthropic provider not configured".to_string()))?;
            Ok(Box::new(AnthropicProvider::new(key)))
        }
        "openai" => {
            let key = settings
                .openai_api_key
                .clone()
                .ok_or_else(|| ApiError::InvalidInput("openai provider not configured".to_string()))?;
            Ok(Box::new(OpenAiProvider::new("https://api.openai.com").with_api_key(key)))
        }
        "ollama" => Ok(Box::new(OllamaProvider::new())),
        other => Err(ApiError::InvalidInput(format!("unknown provider: {other}"))),
    }
}

async fn chat_handler(State(state): State<Arc<AppState>>, Json(body): Json<ChatRequestBody>) -> Result<Json<Value>, ApiError> {
    if body.optimize.messages.is_empty() {
        return Err(ApiError::InvalidInput("messages must not be empty".to_string()));
    }

    let provider = provider_for(&body.provider, &state.settings)?;
    let model = body.optimize.model.clone();
    let max_tokens = body.max_completion_tokens.unwrap_or(1024);

    let request: OptimizeRequest = body.optimize.into();
    let dashboard_overlay = match (&state.dashboard, &request.tenant_id) {
        (Some(client), Some(tenant_id)) => fetch_best_effort(client.as_ref(), tenant_id).await,
        _ => None,
    };

    let result = state.pipeline.run(request.clone(), dashboard_overlay.as_ref(), "chat").await;

    let inference_messages: Vec<Value> = result
        .optimized_messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
        .collect();
    let system = result.optimized_messages.iter().find(|m| m.role == "system").map(|m| m.content.clone());

    let inference_request = InferenceRequest {
        model,
        max_tokens,
        system,
        tools: Vec::new(),
        messages: inference_messages,
        thinking: None,
    };

    let response = provider
        .infer(inference_request)
        .await
        .map_err(|err| ApiError::Internal(format!("provider error: {err}")))?;

    if let Some(client) = &state.dashboard {
        emit_best_effort(
            client.as_ref(),
            OptimizationEvent {
                tenant_id: request.tenant_id.clone(),
                project_id: request.project_id.clone(),
                endpoint: "chat".to_string(),
                model: request.model.clone(),
                tokens_before: result.stats.tokens_before,
                tokens_after: result.stats.tokens_after,
                cache_hit: result.stats.cache_hit,
                route: result.stats.route.clone(),
            },
        )
        .await;
    }

    Ok(Json(serde_json::json!({
        "stop_reason": format!("{:?}", response.stop_reason),
        "content": response.content.iter().filter_map(|c| match c {
            promptopt::types::ContentBlock::Text(t) => Some(t.clone()),
            _ => None,
        }).collect::<Vec<_>>(),
        "usage": {"input_tokens": response.usage.input_tokens, "output_tokens": response.usage.output_tokens},
        "optimizer": {"stats": result.stats, "trace_id": result.debug.trace_id},
    })))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    cache: &'static str,
    vector_store: &'static str,
    dashboard: &'static str,
    semantic_enabled: bool,
    compression_enabled: bool,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        cache: "configured",
        vector_store: if state.vector_store_configured { "configured" } else { "disabled" },
        dashboard: if state.dashboard.is_some() { "configured" } else { "disabled" },
        semantic_enabled: state.settings.base_config.semantic.enabled,
        compression_enabled: state.settings.base_config.compression.enabled,
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.export(),
    )
}

fn build_embedding_service(settings: &Settings) -> Arc<EmbeddingService> {
    let model = settings.base_config.semantic.embedding_model.clone();
    let dim = settings.base_config.semantic.embedding_dim;
    let ollama_url = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());
    Arc::new(EmbeddingService::new(move || {
        Box::new(OllamaEmbedder::new(&ollama_url, &model, dim)) as Box<dyn promptopt::embedding::EmbeddingProvider>
    }))
}

async fn build_vector_store(settings: &Settings) -> Option<Arc<dyn VectorStore>> {
    if !settings.base_config.semantic.enabled {
        return None;
    }
    match &settings.base_config.semantic.vector_store_url {
        #[cfg(feature = "qdrant")]
        Some(url) => match QdrantVectorStore::new(url, "promptopt_blocks", settings.base_config.semantic.embedding_dim).await {
            Ok(store) => {
                if settings.run_migrations_on_startup {
                    if let Err(err) = store.run_migrations().await {
                        warn!("qdrant migration step failed, continuing with existing schema: {err}");
                    }
                }
                Some(Arc::new(store) as Arc<dyn VectorStore>)
            }
            Err(err) => {
                warn!("failed to connect to qdrant, falling back to in-memory vector store: {err}");
                Some(Arc::new(InMemoryVectorStore::new()) as Arc<dyn VectorStore>)
            }
        },
        #[cfg(not(feature = "qdrant"))]
        Some(_) => Some(Arc::new(InMemoryVectorStore::new()) as Arc<dyn VectorStore>),
        None => Some(Arc::new(InMemoryVectorStore::new()) as Arc<dyn VectorStore>),
    }
}

fn build_compressor(settings: &Settings) -> Option<Arc<CompressorService>> {
    if !settings.base_config.compression.enabled {
        return None;
    }
    let threshold = settings.base_config.compression.faithfulness_threshold;
    let backend: Box<dyn promptopt::compressor::CompressionBackend> = if let Some(key) = &settings.anthropic_api_key {
        Box::new(LearnedCompressor::new(Box::new(AnthropicProvider::new(key.clone())), "claude-haiku-4-5"))
    } else if let Some(key) = &settings.openai_api_key {
        Box::new(LearnedCompressor::new(
            Box::new(OpenAiProvider::new("https://api.openai.com").with_api_key(key.clone())),
            "gpt-4o-mini",
        ))
    } else {
        Box::new(ExtractiveCompressor)
    };
    Some(Arc::new(CompressorService::new(backend, threshold)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(settings.log_level.clone()))
        .init();

    let embedding = build_embedding_service(&settings);
    let vector_store = build_vector_store(&settings).await;
    let vector_store_configured = vector_store.is_some();
    let compressor = build_compressor(&settings);
    let cache = Box::new(InMemoryResultCache::with_ttl(10_000, Duration::from_secs(settings.cache_ttl_secs)));
    let metrics = Arc::new(Metrics::new());

    let dashboard: Option<Arc<dyn DashboardClient>> = if settings.dashboard_enabled {
        settings
            .dashboard_base_url
            .as_ref()
            .map(|url| Arc::new(HttpDashboardClient::new(url.clone(), settings.dashboard_api_key().to_string())) as Arc<dyn DashboardClient>)
    } else {
        None
    };

    let pipeline = Pipeline::new(
        settings.base_config.clone(),
        embedding,
        vector_store,
        compressor,
        cache,
        Duration::from_secs(settings.cache_ttl_secs),
        metrics.clone(),
    );

    let state = Arc::new(AppState { pipeline, settings, dashboard, metrics, vector_store_configured });

    let protected = Router::new()
        .route("/v1/optimize", post(optimize_handler))
        .route("/v1/chat", post(chat_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let app = Router::new()
        .route("/v1/health", get(health_handler))
        .route("/v1/metrics", get(metrics_handler))
        .merge(protected)
        .with_state(state);

    let addr = cli.bind_addr.or_else(|| std::env::var("BIND_ADDR").ok()).unwrap_or_else(|| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "promptopt-server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
