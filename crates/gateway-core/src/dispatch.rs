use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::GatewayError;
use crate::model::UserGptContext;

/// Why a generation stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Cancelled,
}

/// One incremental slice of a generation stream.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// An incremental token/delta string to append to the running buffer.
    Delta(String),
    /// Terminal chunk: the backend finished (or was stopped) producing.
    Done { finish_reason: FinishReason },
}

pub type GenerationStream = BoxStream<'static, Result<StreamChunk, GatewayError>>;

/// Drives one turn of generation against a specific backend family.
///
/// `gateway-remote::RemoteDispatcher` implements this for SSE chat-completion
/// APIs (with length-truncation continuation recovery); `gateway-local::LocalDispatcher`
/// implements it for a bounded worker-thread pool running a quantized model.
#[async_trait]
pub trait GenerationDispatcher: Send + Sync {
    /// Begin streaming a response for the current turn. `ctx` reflects the
    /// histories as they stood immediately after the user's message was
    /// appended; implementations are responsible for assembling whatever
    /// wire format (message array vs. rendered prompt string) their backend
    /// expects from it.
    ///
    /// `cancel` is the connection's cancel flag, already cleared for this
    /// turn; implementations must observe it at every suspension point
    /// (network read, decode iteration) and end the stream with
    /// `StreamChunk::Done { finish_reason: FinishReason::Cancelled }`
    /// without appending a partial assistant reply once it trips.
    async fn generate(&self, ctx: &UserGptContext, cancel: CancelToken) -> Result<GenerationStream, GatewayError>;
}
