//! WebSocket connection handling: the per-connection duplex message pump.
//!
//! Three tasks per connection: a send task draining an outbound `mpsc`
//! channel to the socket, a receive task that does nothing but decode
//! frames and enqueue [`WorkItem`]s onto a bounded queue, and a worker
//! task that drains that queue and runs commands/generation. Keeping
//! generation off the receive task means the receiver is always free to
//! observe a `"stop"` frame the instant it arrives, even mid-stream.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use gateway_core::cancel::CancelToken;
use gateway_core::command::ResponseType;
use gateway_core::message_manager;
use gateway_core::model::{MessageHistory, UserGptContext, UserId};
use gateway_core::store::Role;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::messages::{ClientFrame, HistoryEntry, ServerFrame};
use crate::state::ServerState;
use crate::streaming::stream_to_client;

/// Decoded off the socket by the receive task, queued for the worker
/// task. Only well-formed frames make it onto the queue: `"stop"` and
/// malformed text are handled by the receiver directly.
enum WorkItem {
    Frame(ClientFrame),
    Binary(Vec<u8>),
}

const WORK_QUEUE_CAPACITY: usize = 32;

pub async fn handle_websocket_connection(socket: WebSocket, state: ServerState, user_id: UserId) {
    let conn_id = Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(100);

    let mut ctx = match load_or_create_default_room(&state, &user_id).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize room for connection");
            return;
        }
    };
    send_init(&tx, &ctx).await;

    // One cancel flag for the whole connection: the worker task clears it
    // at the start of every turn so a `"stop"` observed between turns
    // can't cancel the next one before it starts.
    let cancel = CancelToken::new();
    {
        let mut flags = state.cancel_flags.lock().await;
        flags.insert((user_id.clone(), conn_id.clone()), cancel.clone());
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let (work_tx, mut work_rx) = mpsc::channel::<WorkItem>(WORK_QUEUE_CAPACITY);

    let receive_cancel = cancel.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if text.trim() == "stop" {
                        receive_cancel.trip();
                        continue;
                    }

                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => {
                            if work_tx.send(WorkItem::Frame(frame)).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => {
                            // Any shape the client/server frame contract
                            // doesn't recognize is treated like `"stop"`:
                            // cancel whatever turn is in flight rather
                            // than silently drop it.
                            receive_cancel.trip();
                        }
                    }
                }
                Ok(Message::Binary(bytes)) => {
                    if work_tx.send(WorkItem::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    tracing::error!(error = %e, "gateway websocket error");
                    break;
                }
            }
        }
    });

    let worker_state = state.clone();
    let worker_user_id = user_id.clone();
    let worker_tx = tx.clone();
    let worker_cancel = cancel.clone();
    let worker_task = tokio::spawn(async move {
        let mut pending_filename: Option<String> = None;

        while let Some(item) = work_rx.recv().await {
            match item {
                WorkItem::Frame(ClientFrame::FileUpload { filename }) => {
                    pending_filename = Some(filename);
                }
                WorkItem::Frame(ClientFrame::Chat { msg: _, chatroom_id: Some(room_id) }) if room_id != ctx.user_profile.room_id => {
                    match switch_room(&worker_state, &worker_user_id, &room_id).await {
                        Ok(new_ctx) => {
                            ctx = new_ctx;
                            send_init(&worker_tx, &ctx).await;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to switch room");
                        }
                    }
                }
                WorkItem::Frame(ClientFrame::Chat { msg, .. }) => {
                    worker_cancel.test_and_clear();
                    handle_turn(&worker_state, &worker_user_id, &worker_tx, &mut ctx, &worker_cancel, msg).await;
                }
                WorkItem::Binary(bytes) => {
                    let Some(filename) = pending_filename.take() else {
                        send_text(&worker_tx, &ctx.user_profile.room_id, "Invalid file type.").await;
                        continue;
                    };
                    match worker_state.file_parser.parse(&filename, bytes).await {
                        Ok(text) => {
                            let collection = format!("user:{}", worker_user_id);
                            if let Err(e) = worker_state.vector_store.add_texts(&collection, vec![text.clone()]).await {
                                tracing::error!(error = %e, "embedding failed");
                                send_text(&worker_tx, &ctx.user_profile.room_id, "Something's wrong. Please try again.").await;
                                continue;
                            }
                            let preview: String = text.chars().take(50).collect();
                            send_text(
                                &worker_tx,
                                &ctx.user_profile.room_id,
                                &format!("Successfully embedded documents. You uploaded file begins with...\n\n```{}```...", preview),
                            )
                            .await;
                        }
                        Err(_) => {
                            send_text(&worker_tx, &ctx.user_profile.room_id, "Invalid file type.").await;
                        }
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = receive_task => {},
        _ = worker_task => {},
    }

    let mut flags = state.cancel_flags.lock().await;
    flags.remove(&(user_id, conn_id));
}

async fn load_or_create_default_room(state: &ServerState, user_id: &UserId) -> Result<UserGptContext, gateway_core::GatewayError> {
    let rooms = state.rooms.list_rooms(user_id).await?;
    let room_id = match rooms.first() {
        Some(room_id) => room_id.clone(),
        None => {
            let room_id = "default".to_string();
            state.rooms.create_room(user_id, &room_id).await?;
            room_id
        }
    };

    if let Some(ctx) = state.store.read(user_id, &room_id).await? {
        return Ok(ctx);
    }

    let mut profile = gateway_core::model::UserGptProfile::default();
    profile.user_id = user_id.clone();
    profile.room_id = room_id.clone();
    let model = state
        .models
        .values()
        .next()
        .cloned()
        .ok_or_else(|| gateway_core::GatewayError::InvalidState("no models configured".into()))?;
    let ctx = UserGptContext::new(profile, model);
    state.store.create(&ctx).await?;
    Ok(ctx)
}

async fn switch_room(state: &ServerState, user_id: &UserId, room_id: &str) -> Result<UserGptContext, gateway_core::GatewayError> {
    if let Some(ctx) = state.store.read(user_id, &room_id.to_string()).await? {
        return Ok(ctx);
    }
    state.rooms.create_room(user_id, &room_id.to_string()).await?;
    let mut profile = gateway_core::model::UserGptProfile::default();
    profile.user_id = user_id.clone();
    profile.room_id = room_id.to_string();
    let model = state
        .models
        .values()
        .next()
        .cloned()
        .ok_or_else(|| gateway_core::GatewayError::InvalidState("no models configured".into()))?;
    let ctx = UserGptContext::new(profile, model);
    state.store.create(&ctx).await?;
    Ok(ctx)
}

async fn send_init(tx: &mpsc::Sender<String>, ctx: &UserGptContext) {
    let mut history = Vec::new();
    for m in &ctx.system_message_histories {
        history.push(HistoryEntry { role: m.role.clone(), content: m.content.clone(), is_user: m.is_user, tokens: m.tokens });
    }
    let user_len = ctx.user_message_histories.len();
    let gpt_len = ctx.gpt_message_histories.len();
    for i in 0..user_len.max(gpt_len) {
        if let Some(u) = ctx.user_message_histories.get(i) {
            history.push(HistoryEntry { role: u.role.clone(), content: u.content.clone(), is_user: u.is_user, tokens: u.tokens });
        }
        if let Some(g) = ctx.gpt_message_histories.get(i) {
            history.push(HistoryEntry { role: g.role.clone(), content: g.content.clone(), is_user: g.is_user, tokens: g.tokens });
        }
    }
    let frame = ServerFrame::Init {
        chatroom_id: ctx.user_profile.room_id.clone(),
        history,
    };
    if let Ok(encoded) = serde_json::to_string(&frame) {
        let _ = tx.send(encoded).await;
    }
}

async fn send_text(tx: &mpsc::Sender<String>, chatroom_id: &str, text: &str) {
    let frame = ServerFrame::Delta {
        chatroom_id: chatroom_id.to_string(),
        text: text.to_string(),
        finish: true,
        model_name: None,
    };
    if let Ok(encoded) = serde_json::to_string(&frame) {
        let _ = tx.send(encoded).await;
    }
}

/// One full turn: either a slash-command or a plain chat message,
/// followed by generation.
async fn handle_turn(
    state: &ServerState,
    user_id: &UserId,
    tx: &mpsc::Sender<String>,
    ctx: &mut UserGptContext,
    cancel: &CancelToken,
    msg: String,
) {
    if msg.starts_with('/') {
        let response = state.commands.dispatch(user_id, &ctx.user_profile.room_id, &msg).await;
        // Commands mutate the store directly (they only see `user_id`/
        // `room_id`, not this connection's live context), so refresh it
        // before acting on the response.
        match state.store.read(user_id, &ctx.user_profile.room_id).await {
            Ok(Some(refreshed)) => *ctx = refreshed,
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "failed to refresh context after command"),
        }
        apply_command_response(state, user_id, tx, ctx, cancel, response).await;
        return;
    }

    handle_user_message(state, user_id, tx, ctx, cancel, msg).await;
}

async fn apply_command_response(
    state: &ServerState,
    user_id: &UserId,
    tx: &mpsc::Sender<String>,
    ctx: &mut UserGptContext,
    cancel: &CancelToken,
    response: gateway_core::command::CommandResponse,
) {
    match response.response_type {
        ResponseType::SendAndStop | ResponseType::Nothing => {
            if let Some(text) = response.text {
                send_text(tx, &ctx.user_profile.room_id, &text).await;
            }
        }
        ResponseType::SendAndContinueAsUser | ResponseType::HandleBoth => {
            if let Some(text) = response.text {
                send_text(tx, &ctx.user_profile.room_id, &text).await;
                Box::pin(handle_user_message(state, user_id, tx, ctx, cancel, text)).await;
            }
        }
        ResponseType::HandleUser => {
            if let Some(text) = response.text {
                Box::pin(handle_user_message(state, user_id, tx, ctx, cancel, text)).await;
            }
        }
        ResponseType::HandleGpt => {
            // The command has already mutated the store (e.g. `/retry`
            // popped the last gpt reply, `/query` appended an augmented
            // user message); just run generation against the refreshed
            // context.
            Box::pin(run_generation(state, user_id, tx, ctx, cancel)).await;
        }
        ResponseType::Repeat => {
            if let Some(text) = response.text {
                let line = text.trim_start_matches('/');
                let mut parts = line.split_whitespace();
                if let Some(name) = parts.next() {
                    let rebuilt = format!("/{} {}", name, parts.collect::<Vec<_>>().join(" "));
                    Box::pin(handle_turn(state, user_id, tx, ctx, cancel, rebuilt)).await;
                }
            }
        }
    }
}

async fn handle_user_message(
    state: &ServerState,
    user_id: &UserId,
    tx: &mpsc::Sender<String>,
    ctx: &mut UserGptContext,
    cancel: &CancelToken,
    msg: String,
) {
    let Some(tokenizer) = state.tokenizer_for(ctx.model.name()) else {
        send_text(tx, &ctx.user_profile.room_id, "Something's wrong. Please try again.").await;
        return;
    };
    let tokens = tokenizer.count(&msg);
    let user_message = MessageHistory::new(ctx.user_profile.user_role.clone(), msg, tokens, true);

    if let Err(gateway_core::GatewayError::TooManyTokens { left, requested }) =
        message_manager::append_checked(ctx, Role::User, user_message.clone())
    {
        send_text(
            tx,
            &ctx.user_profile.room_id,
            &format!("Message too long. Now {} tokens, but {} tokens allowed.", requested, left),
        )
        .await;
        return;
    }

    if let Err(e) = state.store.append(user_id, &ctx.user_profile.room_id, Role::User, user_message).await {
        tracing::error!(error = %e, "failed to persist user message");
        send_text(tx, &ctx.user_profile.room_id, "Something's wrong. Please try again.").await;
        message_manager::pop_safely(ctx, Role::User);
        return;
    }

    run_generation(state, user_id, tx, ctx, cancel).await;
}

/// Runs the configured dispatcher for `ctx`'s model and streams the reply
/// back to the client, applying the same failure/cancellation recovery
/// regardless of whether the turn started from a plain message or a
/// command that ends in [`ResponseType::HandleGpt`].
async fn run_generation(state: &ServerState, user_id: &UserId, tx: &mpsc::Sender<String>, ctx: &mut UserGptContext, cancel: &CancelToken) {
    let Some(dispatcher) = state.dispatcher_for(ctx.model.name()) else {
        send_text(tx, &ctx.user_profile.room_id, "Text generation failure. Please try again.").await;
        let _ = state.store.pop_right(user_id, &ctx.user_profile.room_id, Role::User).await;
        message_manager::pop_safely(ctx, Role::User);
        return;
    };

    let chunk_size = match ctx.model {
        gateway_core::model::LLMModel::Remote(_) => 2,
        gateway_core::model::LLMModel::Local(_) => 1,
    };

    match dispatcher.generate(ctx, cancel.clone()).await {
        Ok(stream) => {
            match stream_to_client(tx, &ctx.user_profile.room_id, ctx.model.name(), stream, chunk_size, cancel).await {
                Ok(outcome) if outcome.cancelled => {
                    let _ = state.store.pop_right(user_id, &ctx.user_profile.room_id, Role::User).await;
                    message_manager::pop_safely(ctx, Role::User);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "generation failed mid-stream");
                    send_text(tx, &ctx.user_profile.room_id, "Text generation failure. Please try again.").await;
                    let _ = state.store.pop_right(user_id, &ctx.user_profile.room_id, Role::User).await;
                    message_manager::pop_safely(ctx, Role::User);
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start generation");
            send_text(tx, &ctx.user_profile.room_id, "Text generation failure. Please try again.").await;
            let _ = state.store.pop_right(user_id, &ctx.user_profile.room_id, Role::User).await;
            message_manager::pop_safely(ctx, Role::User);
        }
    }
}
