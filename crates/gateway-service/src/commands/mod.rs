//! Built-in slash commands: `help`, `clear`, `reset`, `retry`, `codex`,
//! `redx`, `codeblock`, `query`, `embed`, `ping`, `changemodel`.
//!
//! Each command only has `(user_id, room_id)` to work with, not the live
//! in-memory context a connection is holding, so every command reads and
//! writes through the [`ConversationStore`] directly; `connection.rs`
//! re-reads its context after every dispatch to pick up the change.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_core::command::{BoundArgs, Command, CommandResponse, ParamKind, ParamSpec, PrimType};
use gateway_core::error::GatewayError;
use gateway_core::model::{LLMModel, MessageHistory};
use gateway_core::store::{ConversationStore, Role};
use gateway_core::vector::VectorStore;

/// Whitespace token count, used as a token estimate by commands that add
/// messages directly to the store without going through a room's model
/// tokenizer. Recomputed precisely the next time the room is read.
fn approx_tokens(text: &str) -> i32 {
    text.split_whitespace().count() as i32
}

fn room_err() -> GatewayError {
    GatewayError::NotFound("room has no conversation state".into())
}

pub struct HelpCommand {
    text: String,
}

impl HelpCommand {
    pub fn new(text: String) -> Self {
        Self { text }
    }
}

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }

    fn help(&self) -> &'static str {
        "List every available command"
    }

    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn call(&self, _user_id: &str, _room_id: &str, _args: BoundArgs) -> Result<CommandResponse, GatewayError> {
        Ok(CommandResponse::send_and_stop(self.text.clone()))
    }
}

pub struct ClearCommand {
    store: Arc<dyn ConversationStore>,
}

impl ClearCommand {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Command for ClearCommand {
    fn name(&self) -> &'static str {
        "clear"
    }

    fn help(&self) -> &'static str {
        "Clear user and gpt message histories, and return the number of tokens removed"
    }

    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn call(&self, user_id: &str, room_id: &str, _args: BoundArgs) -> Result<CommandResponse, GatewayError> {
        let user_id = user_id.to_string();
        let room_id = room_id.to_string();
        let ctx = self.store.read(&user_id, &room_id).await?.ok_or_else(room_err)?;

        let n_system: i32 = ctx.system_message_histories.iter().map(|m| m.tokens).sum();
        let n_user: i32 = ctx.user_message_histories.iter().map(|m| m.tokens).sum();
        let n_gpt: i32 = ctx.gpt_message_histories.iter().map(|m| m.tokens).sum();

        for role in [Role::System, Role::User, Role::Gpt] {
            self.store.clear_role(&user_id, &room_id, role).await?;
        }

        Ok(CommandResponse::send_and_stop(format!(
            "## Total Token Removed: **{}**\n- User: {}\n- GPT: {}\n- System: {}",
            n_user + n_gpt + n_system,
            n_user,
            n_gpt,
            n_system
        )))
    }
}

pub struct ResetCommand {
    store: Arc<dyn ConversationStore>,
}

impl ResetCommand {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Command for ResetCommand {
    fn name(&self) -> &'static str {
        "reset"
    }

    fn help(&self) -> &'static str {
        "Reset the room's conversation state"
    }

    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn call(&self, user_id: &str, room_id: &str, _args: BoundArgs) -> Result<CommandResponse, GatewayError> {
        let user_id = user_id.to_string();
        let room_id = room_id.to_string();
        for role in [Role::System, Role::User, Role::Gpt] {
            self.store.clear_role(&user_id, &room_id, role).await?;
        }
        Ok(CommandResponse::send_and_stop("Context reset success"))
    }
}

pub struct RetryCommand {
    store: Arc<dyn ConversationStore>,
}

impl RetryCommand {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Command for RetryCommand {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn help(&self) -> &'static str {
        "Retry last message"
    }

    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn call(&self, user_id: &str, room_id: &str, _args: BoundArgs) -> Result<CommandResponse, GatewayError> {
        let user_id = user_id.to_string();
        let room_id = room_id.to_string();
        let ctx = self.store.read(&user_id, &room_id).await?.ok_or_else(room_err)?;
        if ctx.user_message_histories.is_empty() || ctx.gpt_message_histories.is_empty() {
            return Ok(CommandResponse::send_and_stop("There is no message to retry."));
        }
        self.store.pop_right(&user_id, &room_id, Role::Gpt).await?;
        Ok(CommandResponse {
            text: None,
            response_type: gateway_core::command::ResponseType::HandleGpt,
        })
    }
}

const CODEX_SYSTEM_MESSAGE: &str = r#"Act as CODEX ("COding DEsign eXpert"), an expert coder with experience in multiple coding languages.
Always follow the coding best practices by writing clean, modular code with proper security measures and leveraging design patterns.
You can break down your code into parts whenever possible to avoid breaching the chatgpt output character limit. Write code part by part when I send "continue". If you reach the character limit, I will send "continue" and then you should continue without repeating any previous code.
Do not assume anything from your side; please ask me a numbered list of essential questions before starting.
If you have trouble fixing a bug, ask me for the latest code snippets for reference from the official documentation.
I am using [MacOS], [VSCode] and prefer [brew] package manager.
Start a conversation as "CODEX: Hi, what are we coding today?""#;

const REDX_SYSTEM_MESSAGE: &str = "compress the following text in a way that fits in a tweet (ideally) and such that you (GPT) can reconstruct the intention of the human who wrote text as close as possible to the original intention. This is for yourself. It does not need to be human readable or understandable. Abuse of language mixing, abbreviations, symbols (unicode and emoji), or any other encodings or internal representations is all permissible, as long as it, if pasted in a new inference cycle, will yield near-identical results as the original text: ";

pub struct CodexCommand {
    store: Arc<dyn ConversationStore>,
}

impl CodexCommand {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Command for CodexCommand {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn help(&self) -> &'static str {
        "Let GPT act as CODEX (\"COding DEsign eXpert\")"
    }

    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn call(&self, user_id: &str, room_id: &str, _args: BoundArgs) -> Result<CommandResponse, GatewayError> {
        set_system_prompt(&self.store, user_id, room_id, CODEX_SYSTEM_MESSAGE).await?;
        Ok(CommandResponse::send_and_stop("CODEX mode ON"))
    }
}

pub struct RedxCommand {
    store: Arc<dyn ConversationStore>,
}

impl RedxCommand {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Command for RedxCommand {
    fn name(&self) -> &'static str {
        "redx"
    }

    fn help(&self) -> &'static str {
        "Let GPT reduce your message as much as possible"
    }

    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn call(&self, user_id: &str, room_id: &str, _args: BoundArgs) -> Result<CommandResponse, GatewayError> {
        set_system_prompt(&self.store, user_id, room_id, REDX_SYSTEM_MESSAGE).await?;
        Ok(CommandResponse::send_and_stop("REDX mode ON"))
    }
}

async fn set_system_prompt(
    store: &Arc<dyn ConversationStore>,
    user_id: &str,
    room_id: &str,
    text: &str,
) -> Result<(), GatewayError> {
    let user_id = user_id.to_string();
    let room_id = room_id.to_string();
    store.clear_role(&user_id, &room_id, Role::System).await?;
    let ctx = store.read(&user_id, &room_id).await?.ok_or_else(room_err)?;
    let message = MessageHistory::new(ctx.user_profile.system_role.clone(), text, approx_tokens(text), false);
    store.append(&user_id, &room_id, Role::System, message).await
}

pub struct CodeblockCommand;

#[async_trait]
impl Command for CodeblockCommand {
    fn name(&self) -> &'static str {
        "codeblock"
    }

    fn help(&self) -> &'static str {
        "Send codeblock: /codeblock <language> <codes>"
    }

    fn params(&self) -> &[ParamSpec] {
        &[
            ParamSpec {
                name: "language",
                kind: ParamKind::Positional(PrimType::Str),
            },
            ParamSpec {
                name: "codes",
                kind: ParamKind::TrailingText,
            },
        ]
    }

    async fn call(&self, _user_id: &str, _room_id: &str, args: BoundArgs) -> Result<CommandResponse, GatewayError> {
        let language = args["language"].as_str().unwrap_or_default().to_lowercase();
        let codes = args["codes"].as_str().unwrap_or_default();
        Ok(CommandResponse::send_and_stop(format!("```{}\n{}\n```", language, codes)))
    }
}

pub struct PingCommand;

#[async_trait]
impl Command for PingCommand {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn help(&self) -> &'static str {
        "Ping! Pong!"
    }

    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn call(&self, _user_id: &str, _room_id: &str, _args: BoundArgs) -> Result<CommandResponse, GatewayError> {
        Ok(CommandResponse::send_and_stop("pong"))
    }
}

pub struct EmbedCommand {
    vector_store: Arc<dyn VectorStore>,
}

impl EmbedCommand {
    pub fn new(vector_store: Arc<dyn VectorStore>) -> Self {
        Self { vector_store }
    }
}

#[async_trait]
impl Command for EmbedCommand {
    fn name(&self) -> &'static str {
        "embed"
    }

    fn help(&self) -> &'static str {
        "Embed the text and save its vectors in the vectorstore: /embed <text_to_embed>"
    }

    fn params(&self) -> &[ParamSpec] {
        &[ParamSpec {
            name: "text",
            kind: ParamKind::TrailingText,
        }]
    }

    async fn call(&self, user_id: &str, _room_id: &str, args: BoundArgs) -> Result<CommandResponse, GatewayError> {
        let text = args["text"].as_str().unwrap_or_default().to_string();
        let collection = format!("user:{}", user_id);
        self.vector_store.add_texts(&collection, vec![text]).await?;
        Ok(CommandResponse::send_and_stop("Embedding successful!"))
    }
}

pub struct QueryCommand {
    store: Arc<dyn ConversationStore>,
    vector_store: Arc<dyn VectorStore>,
}

impl QueryCommand {
    pub fn new(store: Arc<dyn ConversationStore>, vector_store: Arc<dyn VectorStore>) -> Self {
        Self { store, vector_store }
    }
}

#[async_trait]
impl Command for QueryCommand {
    fn name(&self) -> &'static str {
        "query"
    }

    fn help(&self) -> &'static str {
        "Query from the vectorstore: /query <query>"
    }

    fn params(&self) -> &[ParamSpec] {
        &[ParamSpec {
            name: "query",
            kind: ParamKind::TrailingText,
        }]
    }

    async fn call(&self, user_id: &str, room_id: &str, args: BoundArgs) -> Result<CommandResponse, GatewayError> {
        const NUM_DOCUMENTS: usize = 3;
        let query = args["query"].as_str().unwrap_or_default().to_string();
        let collection = format!("user:{}", user_id);
        let found = self.vector_store.similarity_search(&collection, &query, NUM_DOCUMENTS).await?;

        let augmented = if found.is_empty() {
            query
        } else {
            let context: String = found.iter().map(|c| format!("...{}...", c.text)).collect::<Vec<_>>().join("\n\n");
            format!(
                "please answer my question\nquestion: `{}`\nrelated context from my vectorstore:```{}```\nanswer:",
                query, context
            )
        };

        let user_id = user_id.to_string();
        let room_id = room_id.to_string();
        let ctx = self.store.read(&user_id, &room_id).await?.ok_or_else(room_err)?;
        let message = MessageHistory::new(
            ctx.user_profile.user_role.clone(),
            augmented,
            approx_tokens(&query),
            true,
        );
        self.store.append(&user_id, &room_id, Role::User, message).await?;

        Ok(CommandResponse {
            text: None,
            response_type: gateway_core::command::ResponseType::HandleGpt,
        })
    }
}

pub struct ChangeModelCommand {
    store: Arc<dyn ConversationStore>,
    models: Arc<HashMap<String, LLMModel>>,
}

impl ChangeModelCommand {
    pub fn new(store: Arc<dyn ConversationStore>, models: Arc<HashMap<String, LLMModel>>) -> Self {
        Self { store, models }
    }
}

#[async_trait]
impl Command for ChangeModelCommand {
    fn name(&self) -> &'static str {
        "changemodel"
    }

    fn help(&self) -> &'static str {
        "/changemodel <model>"
    }

    fn params(&self) -> &[ParamSpec] {
        &[ParamSpec {
            name: "model",
            kind: ParamKind::Positional(PrimType::Str),
        }]
    }

    async fn call(&self, user_id: &str, room_id: &str, args: BoundArgs) -> Result<CommandResponse, GatewayError> {
        let requested = args["model"].as_str().unwrap_or_default().to_string();
        let Some(model) = self.models.get(&requested) else {
            let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
            names.sort();
            return Ok(CommandResponse::send_and_stop(format!(
                "Model must be one of {}",
                names.join(", ")
            )));
        };

        let user_id = user_id.to_string();
        let room_id = room_id.to_string();
        let ctx = self.store.read(&user_id, &room_id).await?.ok_or_else(room_err)?;
        self.store
            .update_profile_and_model(&user_id, &room_id, &ctx.user_profile, model)
            .await?;

        Ok(CommandResponse::send_and_stop(format!(
            "Model changed to {}. Actual model: {}",
            requested,
            model.name()
        )))
    }
}

/// Wires every built-in command into a registry, deriving `help`'s text
/// from each command's own `help()` string, assembled once at
/// registry-build time.
pub fn build_registry(
    store: Arc<dyn ConversationStore>,
    vector_store: Arc<dyn VectorStore>,
    models: Arc<HashMap<String, LLMModel>>,
) -> gateway_core::command::CommandRegistry {
    let mut registry = gateway_core::command::CommandRegistry::new();
    registry.register(Box::new(ClearCommand::new(store.clone())));
    registry.register(Box::new(ResetCommand::new(store.clone())));
    registry.register(Box::new(RetryCommand::new(store.clone())));
    registry.register(Box::new(CodexCommand::new(store.clone())));
    registry.register(Box::new(RedxCommand::new(store.clone())));
    registry.register(Box::new(CodeblockCommand));
    registry.register(Box::new(PingCommand));
    registry.register(Box::new(EmbedCommand::new(vector_store.clone())));
    registry.register(Box::new(QueryCommand::new(store.clone(), vector_store)));
    registry.register(Box::new(ChangeModelCommand::new(store.clone(), models)));

    let help_text = registry.help_text();
    registry.register(Box::new(HelpCommand::new(help_text)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::model::{LLMModel, RemoteChatModel, UserGptContext, UserGptProfile};
    use gateway_store::InMemoryConversationStore;

    fn test_model() -> LLMModel {
        LLMModel::Remote(RemoteChatModel {
            name: "test-model".into(),
            api_url: "http://localhost".into(),
            api_key_env: "TEST_KEY".into(),
            max_total_tokens: 4096,
            max_tokens_per_request: 1024,
            token_margin: 64,
        })
    }

    #[tokio::test]
    async fn reset_twice_is_the_same_as_reset_once() {
        let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
        let mut profile = UserGptProfile::default();
        profile.user_id = "u1".into();
        profile.room_id = "r1".into();
        let ctx = UserGptContext::new(profile, test_model());
        store.create(&ctx).await.unwrap();
        store
            .append(&"u1".to_string(), &"r1".to_string(), Role::User, MessageHistory::new("user", "hi", 1, true))
            .await
            .unwrap();

        let reset = ResetCommand::new(store.clone());
        reset.call("u1", "r1", BoundArgs::default()).await.unwrap();
        let once = store.read(&"u1".to_string(), &"r1".to_string()).await.unwrap().unwrap();

        reset.call("u1", "r1", BoundArgs::default()).await.unwrap();
        let twice = store.read(&"u1".to_string(), &"r1".to_string()).await.unwrap().unwrap();

        assert!(once.user_message_histories.is_empty());
        assert!(once.gpt_message_histories.is_empty());
        assert_eq!(once.user_message_histories.len(), twice.user_message_histories.len());
        assert_eq!(once.gpt_message_histories.len(), twice.gpt_message_histories.len());
        assert_eq!(once.system_message_histories.len(), twice.system_message_histories.len());
    }
}

