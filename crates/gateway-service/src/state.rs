use std::collections::HashMap;
use std::sync::Arc;

use gateway_core::auth::Authenticator;
use gateway_core::command::CommandRegistry;
use gateway_core::dispatch::GenerationDispatcher;
use gateway_core::fileparser::FileParser;
use gateway_core::model::{LLMModel, UserId};
use gateway_core::store::{ConversationStore, RoomDirectory};
use gateway_core::tokenizer::Tokenizer;
use gateway_core::vector::VectorStore;
use tokio::sync::Mutex;

use crate::streaming::CancelFlag;

/// Everything a connection handler needs, shared across every open
/// WebSocket. Cheap to clone: every field is already `Arc`-backed.
#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<dyn ConversationStore>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub vector_store: Arc<dyn VectorStore>,
    pub file_parser: Arc<dyn FileParser>,
    pub authenticator: Arc<dyn Authenticator>,
    pub commands: Arc<CommandRegistry>,
    pub models: Arc<HashMap<String, LLMModel>>,
    pub dispatchers: Arc<HashMap<String, Arc<dyn GenerationDispatcher>>>,
    pub tokenizers: Arc<HashMap<String, Arc<dyn Tokenizer>>>,
    /// One cancel flag per `(user_id, connection_id)`, so a `"stop"`
    /// frame only ever cancels the turn it was sent for.
    pub cancel_flags: Arc<Mutex<HashMap<(UserId, String), CancelFlag>>>,
}

impl ServerState {
    pub fn dispatcher_for(&self, model_name: &str) -> Option<Arc<dyn GenerationDispatcher>> {
        self.dispatchers.get(model_name).cloned()
    }

    pub fn tokenizer_for(&self, model_name: &str) -> Option<Arc<dyn Tokenizer>> {
        self.tokenizers.get(model_name).cloned()
    }

    pub fn model_by_name(&self, name: &str) -> Option<LLMModel> {
        self.models.get(name).cloned()
    }
}
