use std::num::NonZeroU32;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use once_cell::sync::OnceCell;
use tokio::sync::mpsc::UnboundedSender;

use gateway_core::cancel::CancelToken;
use gateway_core::error::GatewayError;

static BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

fn backend() -> Result<&'static LlamaBackend, GatewayError> {
    BACKEND.get_or_try_init(|| LlamaBackend::init().map_err(|e| GatewayError::GenerationFailed(e.to_string())))
}

pub struct LoadedModel {
    model: LlamaModel,
}

impl LoadedModel {
    pub fn load(path: &str) -> Result<Self, GatewayError> {
        let backend = backend()?;
        let model = LlamaModel::load_from_file(backend, path, &LlamaModelParams::default())
            .map_err(|e| GatewayError::GenerationFailed(e.to_string()))?;
        Ok(Self { model })
    }
}

/// One blocking generation pass, run on a dedicated OS thread from the
/// bounded pool in [`crate::dispatcher::LocalDispatcher`]. Streams text
/// deltas on `tx` as they're sampled; the caller is responsible for
/// sending the final accounting message once this returns.
///
/// Tokenizes the prompt, decodes it as a single batch, then samples one
/// token at a time, feeding each accepted token back through the context
/// until an end-of-generation token, `max_tokens` is reached, or `cancel`
/// trips — checked on every iteration so the loop exits on the cancel
/// flag's next observation, matching the pool-worker side of the
/// async/thread-pool cancellation bridge.
pub fn generate_streaming(
    model: &LoadedModel,
    prompt: &str,
    max_tokens: u32,
    stop: &[String],
    tx: &UnboundedSender<Result<String, GatewayError>>,
    cancel: &CancelToken,
) -> Result<u32, GatewayError> {
    let backend = backend()?;
    let tokens = model
        .model
        .str_to_token(prompt, AddBos::Always)
        .map_err(|e| GatewayError::GenerationFailed(e.to_string()))?;

    if tokens.is_empty() {
        return Err(GatewayError::GenerationFailed("prompt tokenized to nothing".into()));
    }

    let ctx_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(4096));
    let mut ctx = model
        .model
        .new_context(backend, ctx_params)
        .map_err(|e| GatewayError::GenerationFailed(e.to_string()))?;

    let n_len_total = tokens.len() as i32 + max_tokens as i32;
    let mut batch = LlamaBatch::new(512, 1);
    let last_index = tokens.len().saturating_sub(1) as i32;
    for (i, token) in (0_i32..).zip(tokens.iter().copied()) {
        batch
            .add(token, i, &[0], i == last_index)
            .map_err(|e| GatewayError::GenerationFailed(e.to_string()))?;
    }
    ctx.decode(&mut batch).map_err(|e| GatewayError::GenerationFailed(e.to_string()))?;

    let mut sampler = LlamaSampler::greedy();
    let mut n_cur = batch.n_tokens();
    let mut output_tokens = 0u32;
    let mut tail = String::new();

    while n_cur < n_len_total {
        if cancel.is_tripped() {
            break;
        }

        let token = sampler.sample(&ctx, batch.n_tokens() - 1);
        if model.model.is_eog_token(token) {
            break;
        }

        let piece = model
            .model
            .token_to_str(token, Special::Tokenize)
            .unwrap_or_default();
        if !piece.is_empty() {
            tail.push_str(&piece);
            if stop.iter().any(|s| !s.is_empty() && tail.to_lowercase().contains(&s.to_lowercase())) {
                break;
            }
            if tx.send(Ok(piece)).is_err() {
                break;
            }
        }

        batch.clear();
        batch
            .add(token, n_cur, &[0], true)
            .map_err(|e| GatewayError::GenerationFailed(e.to_string()))?;
        n_cur += 1;
        output_tokens += 1;
        ctx.decode(&mut batch).map_err(|e| GatewayError::GenerationFailed(e.to_string()))?;
    }

    Ok(output_tokens)
}
