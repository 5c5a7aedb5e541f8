//! End-to-end coverage of the WebSocket connection pump, driven over a
//! real socket against an in-process axum server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use gateway_core::auth::{HandshakeInfo, StaticTokenAuthenticator};
use gateway_core::cancel::CancelToken;
use gateway_core::dispatch::{FinishReason, GenerationDispatcher, GenerationStream, StreamChunk};
use gateway_core::error::GatewayError;
use gateway_core::fileparser::PlainTextFileParser;
use gateway_core::model::{LLMModel, RemoteChatModel, UserGptContext};
use gateway_core::tokenizer::Tokenizer;
use gateway_core::vector::{Embedder, RetrievedChunk, VectorStore};
use gateway_service::commands;
use gateway_service::connection::handle_websocket_connection;
use gateway_service::state::ServerState;
use gateway_store::{InMemoryConversationStore, SqliteRoomDirectory};
use gateway_vector::InMemoryVectorStore;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Splits whitespace-separated tokens so test inputs can be sized to a
/// model's token budget deterministically.
struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.split_whitespace().enumerate().map(|(i, _)| i as u32).collect()
    }
}

/// Replays a fixed script of stream chunks, optionally pausing before each
/// one so cancellation can be observed mid-stream.
struct ScriptedDispatcher {
    chunks: Vec<Result<StreamChunk, GatewayError>>,
    delay: Option<Duration>,
}

fn clone_chunk(chunk: &Result<StreamChunk, GatewayError>) -> Result<StreamChunk, GatewayError> {
    match chunk {
        Ok(StreamChunk::Delta(s)) => Ok(StreamChunk::Delta(s.clone())),
        Ok(StreamChunk::Done { finish_reason }) => Ok(StreamChunk::Done { finish_reason: *finish_reason }),
        Err(_) => Err(GatewayError::GenerationFailed("scripted failure".into())),
    }
}

#[async_trait]
impl GenerationDispatcher for ScriptedDispatcher {
    async fn generate(&self, _ctx: &UserGptContext, _cancel: CancelToken) -> Result<GenerationStream, GatewayError> {
        let items: Vec<_> = self.chunks.iter().map(clone_chunk).collect();
        let delay = self.delay;
        let stream = futures::stream::iter(items).then(move |item| async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            item
        });
        Ok(Box::pin(stream))
    }
}

struct WordLengthEmbedder;

#[async_trait]
impl Embedder for WordLengthEmbedder {
    async fn embed(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>, GatewayError> {
        Ok(input.iter().map(|s| vec![s.len() as f32, 1.0]).collect())
    }
}

struct NullVectorStore;

#[async_trait]
impl VectorStore for NullVectorStore {
    async fn add_texts(&self, _collection: &str, _texts: Vec<String>) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn similarity_search(&self, _collection: &str, _query: &str, _k: usize) -> Result<Vec<RetrievedChunk>, GatewayError> {
        Ok(Vec::new())
    }
}

async fn build_test_state(
    model: LLMModel,
    dispatcher: Arc<dyn GenerationDispatcher>,
    tokenizer: Arc<dyn Tokenizer>,
    vector_store: Arc<dyn VectorStore>,
) -> ServerState {
    let store: Arc<dyn gateway_core::store::ConversationStore> = Arc::new(InMemoryConversationStore::new());
    let rooms: Arc<dyn gateway_core::store::RoomDirectory> = Arc::new(SqliteRoomDirectory::connect("sqlite::memory:").await.unwrap());

    let mut models = HashMap::new();
    let mut dispatchers: HashMap<String, Arc<dyn GenerationDispatcher>> = HashMap::new();
    let mut tokenizers: HashMap<String, Arc<dyn Tokenizer>> = HashMap::new();
    let name = model.name().to_string();
    dispatchers.insert(name.clone(), dispatcher);
    tokenizers.insert(name.clone(), tokenizer);
    models.insert(name, model);
    let models = Arc::new(models);

    let commands = Arc::new(commands::build_registry(store.clone(), vector_store.clone(), models.clone()));

    ServerState {
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
    }
}

fn remote_model(name: &str, max_total_tokens: i32) -> LLMModel {
    LLMModel::Remote(RemoteChatModel {
        name: name.to_string(),
        api_url: "http://unused.invalid".to_string(),
        api_key_env: "UNUSED".to_string(),
        max_total_tokens,
        max_tokens_per_request: 256,
        token_margin: 8,
    })
}

#[derive(Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

async fn ws_upgrade(State(state): State<ServerState>, Query(query): Query<ConnectQuery>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let handshake = HandshakeInfo { bearer_token: query.token };
    match state.authenticator.authenticate(&handshake).await {
        Ok(user_id) => ws.on_upgrade(move |socket| handle_websocket_connection(socket, state, user_id)),
        Err(_) => (axum::http::StatusCode::UNAUTHORIZED, "unauthorized").into_response(),
    }
}

/// Starts the router on a loopback port and returns its base `ws://` URL.
async fn spawn_server(state: ServerState) -> String {
    let app = Router::new().route("/ws", get(ws_upgrade)).with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{}/ws", addr)
}

async fn connect(base_url: &str, token: &str) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let url = format!("{}?token={}", base_url, token);
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn next_json(ws: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

#[tokio::test]
async fn simple_turn_streams_the_full_reply_back_to_the_client() {
    let model = remote_model("test-model", 4096);
    let dispatcher = Arc::new(ScriptedDispatcher {
        chunks: vec![
            Ok(StreamChunk::Delta("Hi".into())),
            Ok(StreamChunk::Delta(" there".into())),
            Ok(StreamChunk::Done { finish_reason: FinishReason::Stop }),
        ],
        delay: None,
    });
    let vector_store = Arc::new(InMemoryVectorStore::new(Arc::new(WordLengthEmbedder)));
    let state = build_test_state(model, dispatcher, Arc::new(WordTokenizer), vector_store).await;
    let base_url = spawn_server(state).await;

    let mut ws = connect(&base_url, "alice").await;
    let init = next_json(&mut ws).await;
    assert_eq!(init["type"], "init");

    ws.send(WsMessage::Text(r#"{"msg":"hello there"}"#.to_string())).await.unwrap();

    let mut full_text = String::new();
    loop {
        let frame = next_json(&mut ws).await;
        assert_eq!(frame["type"], "delta");
        full_text.push_str(frame["text"].as_str().unwrap());
        if frame["finish"].as_bool().unwrap() {
            break;
        }
    }

    assert_eq!(full_text, "Hi there");
}

#[tokio::test]
async fn stop_frame_cancels_a_turn_before_every_chunk_is_delivered() {
    let model = remote_model("test-model", 4096);
    let dispatcher = Arc::new(ScriptedDispatcher {
        chunks: vec![
            Ok(StreamChunk::Delta("one".into())),
            Ok(StreamChunk::Delta("two".into())),
            Ok(StreamChunk::Delta("three".into())),
            Ok(StreamChunk::Delta("four".into())),
            Ok(StreamChunk::Delta("five".into())),
            Ok(StreamChunk::Done { finish_reason: FinishReason::Stop }),
        ],
        delay: Some(Duration::from_millis(150)),
    });
    let vector_store = Arc::new(InMemoryVectorStore::new(Arc::new(WordLengthEmbedder)));
    let state = build_test_state(model, dispatcher, Arc::new(WordTokenizer), vector_store).await;
    let base_url = spawn_server(state).await;

    let mut ws = connect(&base_url, "bob").await;
    let _init = next_json(&mut ws).await;

    ws.send(WsMessage::Text(r#"{"msg":"go slow"}"#.to_string())).await.unwrap();

    // Wait long enough for the stream to start, then cancel.
    tokio::time::sleep(Duration::from_millis(200)).await;
    ws.send(WsMessage::Text("stop".to_string())).await.unwrap();

    let mut full_text = String::new();
    loop {
        let frame = next_json(&mut ws).await;
        assert_eq!(frame["type"], "delta");
        full_text.push_str(frame["text"].as_str().unwrap());
        if frame["finish"].as_bool().unwrap() {
            break;
        }
    }

    assert!(!full_text.contains("five"), "expected cancellation before the final chunk, got {:?}", full_text);
}

#[tokio::test]
async fn oversize_message_is_rejected_without_starting_generation() {
    let model = remote_model("test-model", 4);
    let dispatcher = Arc::new(ScriptedDispatcher {
        chunks: vec![Ok(StreamChunk::Done { finish_reason: FinishReason::Stop })],
        delay: None,
    });
    let vector_store = Arc::new(InMemoryVectorStore::new(Arc::new(WordLengthEmbedder)));
    let state = build_test_state(model, dispatcher, Arc::new(WordTokenizer), vector_store).await;
    let base_url = spawn_server(state).await;

    let mut ws = connect(&base_url, "carol").await;
    let _init = next_json(&mut ws).await;

    ws.send(WsMessage::Text(r#"{"msg":"this message has way too many words in it"}"#.to_string())).await.unwrap();

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "delta");
    assert!(frame["text"].as_str().unwrap().contains("Message too long"));
    assert!(frame["finish"].as_bool().unwrap());
}

#[tokio::test]
async fn switching_rooms_sends_a_fresh_init_frame_for_the_new_room() {
    let model = remote_model("test-model", 4096);
    let dispatcher = Arc::new(ScriptedDispatcher {
        chunks: vec![Ok(StreamChunk::Done { finish_reason: FinishReason::Stop })],
        delay: None,
    });
    let vector_store = Arc::new(InMemoryVectorStore::new(Arc::new(WordLengthEmbedder)));
    let state = build_test_state(model, dispatcher, Arc::new(WordTokenizer), vector_store).await;
    let base_url = spawn_server(state).await;

    let mut ws = connect(&base_url, "dana").await;
    let first_init = next_json(&mut ws).await;
    assert_eq!(first_init["type"], "init");
    let first_room = first_init["chatroom_id"].as_str().unwrap().to_string();

    ws.send(WsMessage::Text(r#"{"msg":"ignored","chatroom_id":"second-room"}"#.to_string())).await.unwrap();

    let second_init = next_json(&mut ws).await;
    assert_eq!(second_init["type"], "init");
    assert_eq!(second_init["chatroom_id"], "second-room");
    assert_ne!(first_room, "second-room");
}

#[tokio::test]
async fn query_command_augments_the_turn_with_retrieved_context() {
    let model = remote_model("test-model", 4096);
    let dispatcher = Arc::new(ScriptedDispatcher {
        chunks: vec![
            Ok(StreamChunk::Delta("answer".into())),
            Ok(StreamChunk::Done { finish_reason: FinishReason::Stop }),
        ],
        delay: None,
    });
    let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(Arc::new(WordLengthEmbedder)));
    vector_store.add_texts("user:erin", vec!["the sky is blue because of Rayleigh scattering".to_string()]).await.unwrap();

    let state = build_test_state(model, dispatcher, Arc::new(WordTokenizer), vector_store).await;
    let base_url = spawn_server(state.clone()).await;

    let mut ws = connect(&base_url, "erin").await;
    let _init = next_json(&mut ws).await;

    ws.send(WsMessage::Text(r#"{"msg":"/query why is the sky blue"}"#.to_string())).await.unwrap();

    let mut full_text = String::new();
    loop {
        let frame = next_json(&mut ws).await;
        assert_eq!(frame["type"], "delta");
        full_text.push_str(frame["text"].as_str().unwrap());
        if frame["finish"].as_bool().unwrap() {
            break;
        }
    }
    assert_eq!(full_text, "answer");

    let ctx = state.store.read(&"erin".to_string(), &"default".to_string()).await.unwrap().unwrap();
    let augmented = &ctx.user_message_histories.last().unwrap().content;
    assert!(augmented.contains("Rayleigh scattering"));
}
