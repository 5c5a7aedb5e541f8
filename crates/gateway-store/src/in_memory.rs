use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_core::error::GatewayError;
use gateway_core::model::{LLMModel, MessageHistory, RoomId, UserGptContext, UserId};
use gateway_core::store::{ConversationStore, Role};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// In-memory conversation store for tests and local development.
pub struct InMemoryConversationStore {
    contexts: Arc<Mutex<HashMap<(UserId, RoomId), UserGptContext>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            contexts: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn histories_mut(ctx: &mut UserGptContext, role: Role) -> &mut Vec<MessageHistory> {
    match role {
        Role::System => &mut ctx.system_message_histories,
        Role::User => &mut ctx.user_message_histories,
        Role::Gpt => &mut ctx.gpt_message_histories,
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn read(&self, user_id: &UserId, room_id: &RoomId) -> Result<Option<UserGptContext>, GatewayError> {
        let contexts = self.contexts.lock().await;
        Ok(contexts.get(&(user_id.clone(), room_id.clone())).cloned())
    }

    async fn create(&self, ctx: &UserGptContext) -> Result<(), GatewayError> {
        let mut contexts = self.contexts.lock().await;
        let k = (ctx.user_profile.user_id.clone(), ctx.user_profile.room_id.clone());
        if contexts.contains_key(&k) {
            return Err(StoreError::AlreadyExists.into());
        }
        contexts.insert(k, ctx.clone());
        Ok(())
    }

    async fn update_profile_and_model(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        profile: &gateway_core::model::UserGptProfile,
        model: &LLMModel,
    ) -> Result<(), GatewayError> {
        let mut contexts = self.contexts.lock().await;
        let ctx = contexts
            .get_mut(&(user_id.clone(), room_id.clone()))
            .ok_or(StoreError::DoesNotExist)?;
        ctx.user_profile = profile.clone();
        ctx.model = model.clone();
        Ok(())
    }

    async fn append(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
        message: MessageHistory,
    ) -> Result<(), GatewayError> {
        let mut contexts = self.contexts.lock().await;
        let ctx = contexts
            .get_mut(&(user_id.clone(), room_id.clone()))
            .ok_or(StoreError::DoesNotExist)?;
        histories_mut(ctx, role).push(message);
        Ok(())
    }

    async fn pop_left(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
    ) -> Result<Option<MessageHistory>, GatewayError> {
        let mut contexts = self.contexts.lock().await;
        let ctx = contexts
            .get_mut(&(user_id.clone(), room_id.clone()))
            .ok_or(StoreError::DoesNotExist)?;
        let log = histories_mut(ctx, role);
        Ok(if log.is_empty() { None } else { Some(log.remove(0)) })
    }

    async fn pop_right(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
    ) -> Result<Option<MessageHistory>, GatewayError> {
        let mut contexts = self.contexts.lock().await;
        let ctx = contexts
            .get_mut(&(user_id.clone(), room_id.clone()))
            .ok_or(StoreError::DoesNotExist)?;
        Ok(histories_mut(ctx, role).pop())
    }

    async fn set_at(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
        index: i64,
        message: MessageHistory,
    ) -> Result<(), GatewayError> {
        let mut contexts = self.contexts.lock().await;
        let ctx = contexts
            .get_mut(&(user_id.clone(), room_id.clone()))
            .ok_or(StoreError::DoesNotExist)?;
        let log = histories_mut(ctx, role);
        let idx = index as usize;
        if idx < log.len() {
            log[idx] = message;
        } else {
            log.push(message);
        }
        Ok(())
    }

    async fn clear_role(&self, user_id: &UserId, room_id: &RoomId, role: Role) -> Result<(), GatewayError> {
        let mut contexts = self.contexts.lock().await;
        let ctx = contexts
            .get_mut(&(user_id.clone(), room_id.clone()))
            .ok_or(StoreError::DoesNotExist)?;
        histories_mut(ctx, role).clear();
        Ok(())
    }

    async fn delete_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<(), GatewayError> {
        let mut contexts = self.contexts.lock().await;
        contexts.remove(&(user_id.clone(), room_id.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::model::{LLMModel, RemoteChatModel, UserGptProfile};

    fn ctx(user: &str, room: &str) -> UserGptContext {
        let mut profile = UserGptProfile::default();
        profile.user_id = user.to_string();
        profile.room_id = room.to_string();
        let model = LLMModel::Remote(RemoteChatModel {
            name: "test".into(),
            api_url: "http://x".into(),
            api_key_env: "X".into(),
            max_total_tokens: 4096,
            max_tokens_per_request: 1024,
            token_margin: 256,
        });
        UserGptContext::new(profile, model)
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let store = InMemoryConversationStore::new();
        store.create(&ctx("u1", "r1")).await.unwrap();
        let read = store.read(&"u1".to_string(), &"r1".to_string()).await.unwrap();
        assert!(read.is_some());
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let store = InMemoryConversationStore::new();
        store.create(&ctx("u1", "r1")).await.unwrap();
        assert!(store.create(&ctx("u1", "r1")).await.is_err());
    }

    #[tokio::test]
    async fn append_then_pop_left_is_fifo() {
        let store = InMemoryConversationStore::new();
        store.create(&ctx("u1", "r1")).await.unwrap();
        let user = "u1".to_string();
        let room = "r1".to_string();
        store
            .append(&user, &room, Role::User, MessageHistory::new("user", "a", 1, true))
            .await
            .unwrap();
        store
            .append(&user, &room, Role::User, MessageHistory::new("user", "b", 1, true))
            .await
            .unwrap();
        let popped = store.pop_left(&user, &room, Role::User).await.unwrap().unwrap();
        assert_eq!(popped.content, "a");
    }
}
