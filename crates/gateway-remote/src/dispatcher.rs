use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::cancel::CancelToken;
use gateway_core::dispatch::{FinishReason, GenerationDispatcher, GenerationStream, StreamChunk};
use gateway_core::error::GatewayError;
use gateway_core::model::{MessageHistory, UserGptContext};
use gateway_core::store::{ConversationStore, Role};
use gateway_core::tokenizer::Tokenizer;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::organizer::organize_messages;
use crate::sse::{drain_sse_lines, SseEvent};

const READ_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Drives one turn of generation against an SSE chat-completion API,
/// including length-truncation continuation recovery: a `finish_reason ==
/// "length"` response appends (first truncation) or replaces in place
/// (subsequent truncations of the same turn) the partial assistant reply
/// and restarts the request with `ctx.is_continuation` set; a
/// content-filter finish reason pops the pending user message and
/// surfaces a terminal error; a network timeout sleeps and retries; any
/// other failure pops the user message and surfaces a generic error.
pub struct RemoteDispatcher {
    client: reqwest::Client,
    store: Arc<dyn ConversationStore>,
    tokenizer: Arc<dyn Tokenizer>,
    api_key: String,
}

impl RemoteDispatcher {
    pub fn new(store: Arc<dyn ConversationStore>, tokenizer: Arc<dyn Tokenizer>, api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(READ_TIMEOUT)
                .build()
                .expect("reqwest client"),
            store,
            tokenizer,
            api_key,
        }
    }
}

#[async_trait]
impl GenerationDispatcher for RemoteDispatcher {
    async fn generate(&self, ctx: &UserGptContext, cancel: CancelToken) -> Result<GenerationStream, GatewayError> {
        let gateway_core::model::LLMModel::Remote(model) = &ctx.model else {
            return Err(GatewayError::InvalidState(
                "RemoteDispatcher invoked with a non-remote model".into(),
            ));
        };

        let (tx, rx) = mpsc::channel::<Result<StreamChunk, GatewayError>>(32);
        let client = self.client.clone();
        let store = self.store.clone();
        let tokenizer = self.tokenizer.clone();
        let api_key = self.api_key.clone();
        let mut ctx = ctx.clone();
        let model = model.clone();

        tokio::spawn(async move {
            let user_id = ctx.user_profile.user_id.clone();
            let room_id = ctx.user_profile.room_id.clone();
            let mut content_buffer = String::new();
            let mut already_appended = false;

            'retry: loop {
                if cancel.is_tripped() {
                    let _ = tx
                        .send(Ok(StreamChunk::Done {
                            finish_reason: FinishReason::Cancelled,
                        }))
                        .await;
                    break 'retry;
                }

                if !ctx.is_continuation {
                    content_buffer.clear();
                }

                let body = serde_json::json!({
                    "model": model.name,
                    "messages": organize_messages(&ctx),
                    "temperature": ctx.user_profile.temperature,
                    "top_p": ctx.user_profile.top_p,
                    "n": 1,
                    "stream": true,
                    "presence_penalty": ctx.user_profile.presence_penalty,
                    "frequency_penalty": ctx.user_profile.frequency_penalty,
                    "max_tokens": ctx.left_tokens().min(model.max_tokens_per_request),
                    "user": user_id,
                });

                let response = match client
                    .post(&model.api_url)
                    .bearer_auth(&api_key)
                    .json(&body)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) if e.is_timeout() => {
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue 'retry;
                    }
                    Err(e) => {
                        let _ = store.pop_right(&user_id, &room_id, Role::User).await;
                        let _ = tx.send(Err(GatewayError::GenerationFailed(e.to_string()))).await;
                        break 'retry;
                    }
                };

                if !response.status().is_success() {
                    let status = response.status();
                    let message = response.text().await.unwrap_or_default();
                    let _ = store.pop_right(&user_id, &room_id, Role::User).await;
                    let _ = tx
                        .send(Err(GatewayError::GenerationFailed(format!(
                            "remote API returned {}: {}",
                            status, message
                        ))))
                        .await;
                    break 'retry;
                }

                let mut stream = response.bytes_stream();
                let mut buffer = String::new();
                let mut truncated = false;
                let mut content_filtered = false;

                loop {
                    if cancel.is_tripped() {
                        let _ = tx
                            .send(Ok(StreamChunk::Done {
                                finish_reason: FinishReason::Cancelled,
                            }))
                            .await;
                        return;
                    }

                    use futures::StreamExt;
                    let next = stream.next().await;
                    let Some(chunk) = next else { break };
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(_) => {
                            tokio::time::sleep(RECONNECT_DELAY).await;
                            continue 'retry;
                        }
                    };
                    buffer.push_str(&String::from_utf8_lossy(&chunk));

                    for event in drain_sse_lines(&mut buffer) {
                        match event {
                            SseEvent::Delta(text) => {
                                content_buffer.push_str(&text);
                                if tx.send(Ok(StreamChunk::Delta(text))).await.is_err() {
                                    return;
                                }
                            }
                            SseEvent::Finish(reason) if reason == "length" => {
                                truncated = true;
                            }
                            SseEvent::Finish(reason) if reason == "content_filter" => {
                                content_filtered = true;
                            }
                            SseEvent::Finish(_) | SseEvent::StreamEnd => {}
                        }
                    }

                    if truncated || content_filtered {
                        break;
                    }
                }

                if truncated {
                    let gpt_role = ctx.user_profile.gpt_role.clone();
                    let tokens = tokenizer.count(&content_buffer);
                    let message = MessageHistory::new(gpt_role, content_buffer.clone(), tokens, false);
                    if already_appended {
                        if let Some(idx) = gateway_core::message_manager::last_index(&ctx, Role::Gpt) {
                            let _ = store.set_at(&user_id, &room_id, Role::Gpt, idx as i64, message.clone()).await;
                            gateway_core::message_manager::set_safely(&mut ctx, Role::Gpt, idx, message);
                        }
                    } else {
                        let _ = store.append(&user_id, &room_id, Role::Gpt, message.clone()).await;
                        gateway_core::message_manager::append_safely(&mut ctx, Role::Gpt, message);
                        already_appended = true;
                    }
                    ctx.is_continuation = true;
                    continue 'retry;
                }

                if content_filtered {
                    let _ = store.pop_right(&user_id, &room_id, Role::User).await;
                    let _ = tx
                        .send(Ok(StreamChunk::Done {
                            finish_reason: FinishReason::ContentFilter,
                        }))
                        .await;
                    break 'retry;
                }

                let tokens = tokenizer.count(&content_buffer);
                let gpt_role = ctx.user_profile.gpt_role.clone();
                let message = MessageHistory::new(gpt_role, content_buffer.clone(), tokens, false);
                if already_appended {
                    if let Some(idx) = gateway_core::message_manager::last_index(&ctx, Role::Gpt) {
                        let _ = store.set_at(&user_id, &room_id, Role::Gpt, idx as i64, message).await;
                    }
                } else {
                    let _ = store.append(&user_id, &room_id, Role::Gpt, message).await;
                }
                let _ = tx
                    .send(Ok(StreamChunk::Done {
                        finish_reason: FinishReason::Stop,
                    }))
                    .await;
                break 'retry;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
