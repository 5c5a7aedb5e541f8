use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use gateway_core::auth::{HandshakeInfo, StaticTokenAuthenticator};
use gateway_core::dispatch::GenerationDispatcher;
use gateway_core::fileparser::PlainTextFileParser;
use gateway_core::model::LLMModel;
use gateway_core::store::{ConversationStore, RoomDirectory};
use gateway_core::tokenizer::Tokenizer;
use gateway_core::vector::{Embedder, VectorStore};
use gateway_local::{HfTokenizer, LoadedModel, LocalDispatcher};
use gateway_remote::{RemoteDispatcher, RemoteEmbedder, TiktokenTokenizer};
use gateway_store::{InMemoryConversationStore, RedisConversationStore, SqliteRoomDirectory};
use gateway_vector::{InMemoryVectorStore, QdrantVectorStore};
use serde::Deserialize;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gateway_service::commands;
use gateway_service::config::{GatewayConfig, ModelConfig};
use gateway_service::connection::handle_websocket_connection;
use gateway_service::state::ServerState;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the service to; overrides the config file's `[server].addr`.
    #[arg(long)]
    addr: Option<String>,
    /// Path to the gateway's TOML configuration file.
    #[arg(long, default_value = "gateway.toml")]
    config: PathBuf,
}

#[derive(Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gateway_service=info,tower_http=info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let args = Args::parse();
    let config = GatewayConfig::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?;
    let addr = args.addr.unwrap_or_else(|| config.server.addr.clone());

    tracing::info!(addr = %addr, config = %args.config.display(), models = config.models.len(), "starting gateway");

    let state = build_state(&config).await?;

    let app = Router::new()
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let handshake = HandshakeInfo {
        bearer_token: query.token,
    };

    match state.authenticator.authenticate(&handshake).await {
        Ok(user_id) => ws.on_upgrade(move |socket| handle_websocket_connection(socket, state, user_id)),
        Err(e) => {
            tracing::warn!(error = %e, "rejected websocket upgrade");
            (axum::http::StatusCode::UNAUTHORIZED, "unauthorized").into_response()
        }
    }
}

async fn build_state(config: &GatewayConfig) -> Result<ServerState> {
    let store: Arc<dyn ConversationStore> = match config.store.backend.as_deref() {
        Some("redis") => {
            let url = config.store.redis_url.as_deref().context("store.redis_url is required for the redis backend")?;
            Arc::new(RedisConversationStore::connect(url).await?)
        }
        _ => Arc::new(InMemoryConversationStore::new()),
    };

    let rooms: Arc<dyn RoomDirectory> = match config.store.sqlite_url.as_deref() {
        Some(url) => Arc::new(SqliteRoomDirectory::connect(url).await?),
        None => Arc::new(SqliteRoomDirectory::connect("sqlite::memory:").await?),
    };

    let embedder: Arc<dyn Embedder> = Arc::new(RemoteEmbedder::new(
        config.vector.embeddings_api_url.clone().unwrap_or_default(),
        config
            .vector
            .embeddings_api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_default(),
        config.vector.embeddings_model.clone().unwrap_or_else(|| "text-embedding-3-small".to_string()),
    ));

    let vector_store: Arc<dyn VectorStore> = match config.vector.backend.as_deref() {
        Some("qdrant") => {
            let url = config.vector.qdrant_url.as_deref().context("vector.qdrant_url is required for the qdrant backend")?;
            Arc::new(QdrantVectorStore::new(url, embedder)?)
        }
        _ => Arc::new(InMemoryVectorStore::new(embedder)),
    };

    let mut models = HashMap::new();
    let mut dispatchers: HashMap<String, Arc<dyn GenerationDispatcher>> = HashMap::new();
    let mut tokenizers: HashMap<String, Arc<dyn Tokenizer>> = HashMap::new();

    for model_cfg in &config.models {
        let llm_model = model_cfg.to_llm_model();
        match model_cfg {
            ModelConfig::Remote { api_key_env, .. } => {
                let api_key = std::env::var(api_key_env).unwrap_or_default();
                let tokenizer: Arc<dyn Tokenizer> = Arc::new(TiktokenTokenizer::cl100k_base());
                let dispatcher: Arc<dyn GenerationDispatcher> =
                    Arc::new(RemoteDispatcher::new(store.clone(), tokenizer.clone(), api_key));
                tokenizers.insert(model_cfg.name().to_string(), tokenizer);
                dispatchers.insert(model_cfg.name().to_string(), dispatcher);
            }
            ModelConfig::Local { model_path, .. } => {
                let loaded = LoadedModel::load(model_path)
                    .with_context(|| format!("loading local model '{}' from {}", model_cfg.name(), model_path))?;
                let tokenizer: Arc<dyn Tokenizer> = match model_cfg.tokenizer_path() {
                    Some(path) => Arc::new(HfTokenizer::from_file(path)?),
                    None => Arc::new(HfTokenizer::from_file(model_path)?),
                };
                let dispatcher: Arc<dyn GenerationDispatcher> = Arc::new(LocalDispatcher::new(
                    Arc::new(loaded),
                    store.clone(),
                    tokenizer.clone(),
                    model_cfg.max_workers().max(1),
                ));
                tokenizers.insert(model_cfg.name().to_string(), tokenizer);
                dispatchers.insert(model_cfg.name().to_string(), dispatcher);
            }
        }
        models.insert(model_cfg.name().to_string(), llm_model);
    }

    let models = Arc::new(models);
    let commands = Arc::new(commands::build_registry(store.clone(), vector_store.clone(), models.clone()));

    Ok(ServerState {
        store,
        rooms,
        vector_store,
        file_parser: Arc::new(PlainTextFileParser),
        authenticator: Arc::new(StaticTokenAuthenticator),
        commands,
        models,
        dispatchers: Arc::new(dispatchers),
        tokenizers: Arc::new(tokenizers),
        cancel_flags: Arc::new(Mutex::new(HashMap::new())),
    })
}
