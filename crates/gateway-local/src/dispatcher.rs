use std::sync::Arc;

use async_trait::async_trait;
use gateway_core::cancel::CancelToken;
use gateway_core::dispatch::{FinishReason, GenerationDispatcher, GenerationStream, StreamChunk};
use gateway_core::error::GatewayError;
use gateway_core::model::{MessageHistory, UserGptContext};
use gateway_core::store::{ConversationStore, Role};
use gateway_core::tokenizer::Tokenizer;
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::prompt::render_prompt;
use crate::worker::{self, LoadedModel};

/// Drives one turn of generation against a locally hosted model via a
/// bounded pool of OS threads, each running a blocking decode loop.
///
/// A `tokio::sync::Semaphore` bounds how many of those blocking loops may
/// run concurrently (the pool's `max_workers`), and a
/// `std::thread::spawn`'d worker streams tokens back over an unbounded
/// channel, bridging the blocking `llama-cpp-2` decode loop into an
/// async `Stream`.
pub struct LocalDispatcher {
    model: Arc<LoadedModel>,
    store: Arc<dyn ConversationStore>,
    tokenizer: Arc<dyn Tokenizer>,
    permits: Arc<Semaphore>,
}

impl LocalDispatcher {
    pub fn new(model: Arc<LoadedModel>, store: Arc<dyn ConversationStore>, tokenizer: Arc<dyn Tokenizer>, max_workers: usize) -> Self {
        Self {
            model,
            store,
            tokenizer,
            permits: Arc::new(Semaphore::new(max_workers)),
        }
    }
}

#[async_trait]
impl GenerationDispatcher for LocalDispatcher {
    async fn generate(&self, ctx: &UserGptContext, cancel: CancelToken) -> Result<GenerationStream, GatewayError> {
        let gateway_core::model::LLMModel::Local(local_model) = &ctx.model else {
            return Err(GatewayError::InvalidState(
                "LocalDispatcher invoked with a non-local model".into(),
            ));
        };

        let mut ctx = ctx.clone();
        let local_model = local_model.clone();
        let user_id = ctx.user_profile.user_id.clone();
        let room_id = ctx.user_profile.room_id.clone();

        // Evict oldest user/gpt turns in lockstep until the rendered
        // prompt fits the model's budget, counting how many pairs were
        // dropped.
        let mut deleted_histories = 0i32;
        loop {
            let prompt = render_prompt(&ctx, &local_model);
            let prompt_tokens = self.tokenizer.count(&prompt);
            if prompt_tokens + local_model.token_margin <= local_model.max_total_tokens {
                break;
            }
            if ctx.user_message_histories.is_empty() || ctx.gpt_message_histories.is_empty() {
                break;
            }
            ctx.user_message_histories.remove(0);
            let _ = self.store.pop_left(&user_id, &room_id, Role::User).await;
            ctx.gpt_message_histories.remove(0);
            let _ = self.store.pop_left(&user_id, &room_id, Role::Gpt).await;
            deleted_histories += 1;
        }

        let prompt = render_prompt(&ctx, &local_model);
        let max_tokens = ctx.left_tokens().min(local_model.max_tokens_per_request) as u32;

        let (out_tx, out_rx) = mpsc::unbounded_channel::<Result<StreamChunk, GatewayError>>();
        let model = self.model.clone();
        let store = self.store.clone();
        let tokenizer = self.tokenizer.clone();
        let permits = self.permits.clone();
        let stop = build_stop_strings(&local_model.stop, &ctx.user_profile.user_role, &ctx.user_profile.gpt_role);
        let gpt_role = ctx.user_profile.gpt_role.clone();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            // A streamed reply that collapses to only whitespace/zero-width
            // content is retried with identical params, bounded to 10
            // attempts. Deltas are still forwarded live as they're sampled
            // (a blank attempt's whitespace is invisible to the client);
            // only the terminal accounting waits for a non-blank attempt.
            const MAX_EMPTY_RETRIES: u32 = 10;
            let mut generated_text = String::new();
            let mut output_tokens = 0i32;
            let mut settled = false;

            for attempt in 0..=MAX_EMPTY_RETRIES {
                if cancel.is_tripped() {
                    let _ = out_tx.send(Ok(StreamChunk::Done {
                        finish_reason: FinishReason::Cancelled,
                    }));
                    return;
                }

                let (text_tx, mut text_rx) = mpsc::unbounded_channel::<Result<String, GatewayError>>();
                let worker_model = model.clone();
                let worker_prompt = prompt.clone();
                let worker_stop = stop.clone();
                let worker_cancel = cancel.clone();
                let handle = std::thread::spawn(move || {
                    worker::generate_streaming(&worker_model, &worker_prompt, max_tokens, &worker_stop, &text_tx, &worker_cancel)
                });

                let mut attempt_text = String::new();
                while let Some(piece) = text_rx.recv().await {
                    if cancel.is_tripped() {
                        break;
                    }
                    match piece {
                        Ok(text) => {
                            attempt_text.push_str(&text);
                            if out_tx.send(Ok(StreamChunk::Delta(text))).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = out_tx.send(Err(e));
                            return;
                        }
                    }
                }

                let attempt_tokens = match handle.join() {
                    Ok(Ok(n)) => n as i32,
                    Ok(Err(e)) => {
                        let _ = out_tx.send(Err(e));
                        return;
                    }
                    Err(_) => {
                        let _ = out_tx.send(Err(GatewayError::GenerationFailed("worker thread panicked".into())));
                        return;
                    }
                };

                if cancel.is_tripped() {
                    let _ = out_tx.send(Ok(StreamChunk::Done {
                        finish_reason: FinishReason::Cancelled,
                    }));
                    return;
                }

                if attempt_text.trim().is_empty() && attempt != MAX_EMPTY_RETRIES {
                    tracing::debug!(attempt, "local generation collapsed to whitespace, retrying");
                    continue;
                }

                if attempt_text.trim().is_empty() {
                    let _ = out_tx.send(Err(GatewayError::GenerationFailed(
                        "local model produced only whitespace after 10 retries".into(),
                    )));
                    return;
                }

                generated_text = attempt_text;
                output_tokens = attempt_tokens;
                settled = true;
                break;
            }

            if !settled {
                return;
            }

            if deleted_histories > 0 {
                tracing::debug!(deleted_histories, "evicted oldest turns to fit local context window");
            }

            let tokens = if output_tokens > 0 { output_tokens } else { tokenizer.count(&generated_text) };
            let message = MessageHistory::new(gpt_role, generated_text, tokens, false);
            let _ = store.append(&user_id, &room_id, Role::Gpt, message).await;

            let _ = out_tx.send(Ok(StreamChunk::Done {
                finish_reason: FinishReason::Stop,
            }));
        });

        Ok(Box::pin(UnboundedReceiverStream::new(out_rx)))
    }
}

/// Appends the assistant- and user-role labels, each suffixed with `:` in
/// four casings (verbatim, upper, lower, title), to the model's declared
/// stop list, so the local model halts before it starts hallucinating the
/// other side's turn.
fn build_stop_strings(declared: &[String], user_role: &str, gpt_role: &str) -> Vec<String> {
    let mut stop = declared.to_vec();
    for role in [user_role, gpt_role] {
        for casing in role_casings(role) {
            stop.push(format!("{}:", casing));
        }
    }
    stop
}

fn role_casings(role: &str) -> [String; 4] {
    [
        role.to_string(),
        role.to_uppercase(),
        role.to_lowercase(),
        title_case(role),
    ]
}

fn title_case(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_strings_include_all_four_casings_for_both_roles() {
        let stop = build_stop_strings(&["</s>".to_string()], "user", "assistant");
        assert!(stop.contains(&"</s>".to_string()));
        for expected in ["user:", "USER:", "user:", "User:", "assistant:", "ASSISTANT:", "assistant:", "Assistant:"] {
            assert!(stop.contains(&expected.to_string()), "missing {}", expected);
        }
    }
}
