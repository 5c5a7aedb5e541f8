use async_trait::async_trait;

use crate::error::GatewayError;
use crate::model::{LLMModel, MessageHistory, RoomId, UserGptContext, UserGptProfile, UserId};

/// Which of the three per-room logs an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Gpt,
}

/// Durable conversation state keyed by `(user_id, room_id)`.
///
/// The key-space and command mapping mirror a Redis list-per-role layout
/// (`chat:{user}:{room}:{profile,model,system,user,gpt}`); see
/// `gateway-store::RedisConversationStore`.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn read(&self, user_id: &UserId, room_id: &RoomId) -> Result<Option<UserGptContext>, GatewayError>;

    /// Fails if a context already exists for this key (`SET NX` semantics).
    async fn create(&self, ctx: &UserGptContext) -> Result<(), GatewayError>;

    /// Fails if no context exists yet for this key (`SET XX` semantics).
    /// Takes the full model, not just its name, so the persisted `model`
    /// key reflects the change on the next `read`.
    async fn update_profile_and_model(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        profile: &UserGptProfile,
        model: &LLMModel,
    ) -> Result<(), GatewayError>;

    async fn append(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
        message: MessageHistory,
    ) -> Result<(), GatewayError>;

    /// Removes and returns the first entry of `role`'s log, or `None` if empty.
    async fn pop_left(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
    ) -> Result<Option<MessageHistory>, GatewayError>;

    /// Removes and returns the last entry of `role`'s log, or `None` if empty.
    async fn pop_right(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
    ) -> Result<Option<MessageHistory>, GatewayError>;

    /// Overwrites the entry at `index` in place (used by length-recovery
    /// continuation, which replaces rather than appends on the second and
    /// later truncation of the same turn).
    async fn set_at(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
        index: i64,
        message: MessageHistory,
    ) -> Result<(), GatewayError>;

    async fn clear_role(&self, user_id: &UserId, room_id: &RoomId, role: Role) -> Result<(), GatewayError>;

    /// Deletes every key under this room, including the profile and model.
    async fn delete_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<(), GatewayError>;
}

/// Room lifecycle metadata: an external collaborator backed by the
/// relational store, outside the scope of conversation state itself.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<RoomId>, GatewayError>;
    async fn get_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<Option<RoomId>, GatewayError>;
    async fn create_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<(), GatewayError>;
}
