use async_trait::async_trait;
use gateway_core::error::GatewayError;
use gateway_core::model::{LLMModel, MessageHistory, RoomId, UserGptContext, UserGptProfile, UserId};
use gateway_core::store::{ConversationStore, Role};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::StoreError;

fn role_field(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Gpt => "gpt",
    }
}

fn key(user_id: &str, room_id: &str, field: &str) -> String {
    format!("chat:{}:{}:{}", user_id, room_id, field)
}

/// Conversation store backed by Redis, one list per role and one string
/// each for the profile and the model: `SET` with `NX`/`XX` for create
/// and update, `LRANGE`/`RPUSH`/`LPOP`/`RPOP`/`LSET` for the three role
/// logs, `SCAN`+`DEL` for room deletion.
#[derive(Clone)]
pub struct RedisConversationStore {
    conn: ConnectionManager,
}

impl RedisConversationStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl ConversationStore for RedisConversationStore {
    async fn read(&self, user_id: &UserId, room_id: &RoomId) -> Result<Option<UserGptContext>, GatewayError> {
        let mut conn = self.conn.clone();

        let profile_raw: Option<String> = conn.get(key(user_id, room_id, "profile")).await.map_err(StoreError::from)?;
        let model_raw: Option<String> = conn.get(key(user_id, room_id, "model")).await.map_err(StoreError::from)?;

        let (Some(profile_raw), Some(model_raw)) = (profile_raw, model_raw) else {
            return Ok(None);
        };

        let profile: UserGptProfile = serde_json::from_str(&profile_raw).map_err(StoreError::from)?;
        let model = serde_json::from_str(&model_raw).map_err(StoreError::from)?;

        let mut ctx = UserGptContext::new(profile, model);
        for role in [Role::System, Role::User, Role::Gpt] {
            let raw: Vec<String> = conn
                .lrange(key(user_id, room_id, role_field(role)), 0, -1)
                .await
                .map_err(StoreError::from)?;
            let histories = raw
                .iter()
                .map(|s| serde_json::from_str::<MessageHistory>(s).map_err(StoreError::from))
                .collect::<Result<Vec<_>, _>>()?;
            match role {
                Role::System => ctx.system_message_histories = histories,
                Role::User => ctx.user_message_histories = histories,
                Role::Gpt => ctx.gpt_message_histories = histories,
            }
        }

        Ok(Some(ctx))
    }

    async fn create(&self, ctx: &UserGptContext) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        let user_id = &ctx.user_profile.user_id;
        let room_id = &ctx.user_profile.room_id;

        let profile_json = serde_json::to_string(&ctx.user_profile).map_err(StoreError::from)?;
        let model_json = serde_json::to_string(&ctx.model).map_err(StoreError::from)?;

        let created: bool = redis::cmd("SET")
            .arg(key(user_id, room_id, "profile"))
            .arg(&profile_json)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)?;
        if !created {
            return Err(StoreError::AlreadyExists.into());
        }
        conn.set::<_, _, ()>(key(user_id, room_id, "model"), &model_json)
            .await
            .map_err(StoreError::from)?;

        for (role, histories) in [
            (Role::System, &ctx.system_message_histories),
            (Role::User, &ctx.user_message_histories),
            (Role::Gpt, &ctx.gpt_message_histories),
        ] {
            if !histories.is_empty() {
                let encoded = histories
                    .iter()
                    .map(serde_json::to_string)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(StoreError::from)?;
                conn.rpush::<_, _, ()>(key(user_id, room_id, role_field(role)), encoded)
                    .await
                    .map_err(StoreError::from)?;
            }
        }

        Ok(())
    }

    async fn update_profile_and_model(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        profile: &UserGptProfile,
        model: &LLMModel,
    ) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        let profile_json = serde_json::to_string(profile).map_err(StoreError::from)?;
        let model_json = serde_json::to_string(model).map_err(StoreError::from)?;

        let updated: bool = redis::cmd("SET")
            .arg(key(user_id, room_id, "profile"))
            .arg(&profile_json)
            .arg("XX")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)?;
        if !updated {
            return Err(StoreError::DoesNotExist.into());
        }

        conn.set::<_, _, ()>(key(user_id, room_id, "model"), &model_json)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn append(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
        message: MessageHistory,
    ) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(&message).map_err(StoreError::from)?;
        conn.rpush::<_, _, ()>(key(user_id, room_id, role_field(role)), encoded)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn pop_left(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
    ) -> Result<Option<MessageHistory>, GatewayError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .lpop(key(user_id, room_id, role_field(role)), None)
            .await
            .map_err(StoreError::from)?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| StoreError::from(e).into()))
            .transpose()
    }

    async fn pop_right(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
    ) -> Result<Option<MessageHistory>, GatewayError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .rpop(key(user_id, room_id, role_field(role)), None)
            .await
            .map_err(StoreError::from)?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| StoreError::from(e).into()))
            .transpose()
    }

    async fn set_at(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        role: Role,
        index: i64,
        message: MessageHistory,
    ) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(&message).map_err(StoreError::from)?;
        conn.lset::<_, _, ()>(key(user_id, room_id, role_field(role)), index, encoded)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn clear_role(&self, user_id: &UserId, room_id: &RoomId, role: Role) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key(user_id, room_id, role_field(role)))
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn delete_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        let pattern = format!("chat:{}:{}:*", user_id, room_id);
        let mut keys_to_delete: Vec<String> = Vec::new();
        let mut iter: redis::AsyncIter<String> = conn.scan_match(&pattern).await.map_err(StoreError::from)?;
        while let Some(found) = futures::StreamExt::next(&mut iter).await {
            keys_to_delete.push(found);
        }
        drop(iter);
        if !keys_to_delete.is_empty() {
            conn.del::<_, ()>(keys_to_delete).await.map_err(StoreError::from)?;
        }
        Ok(())
    }
}
