use async_trait::async_trait;
use gateway_core::error::GatewayError;
use gateway_core::model::{RoomId, UserId};
use gateway_core::store::RoomDirectory;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::StoreError;

/// Room lifecycle metadata backed by SQLite. Only room existence and
/// listing live here; the conversation state itself is owned by
/// whichever `ConversationStore` is configured (normally Redis).
pub struct SqliteRoomDirectory {
    pool: SqlitePool,
}

impl SqliteRoomDirectory {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new().max_connections(5).connect(url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rooms (
                user_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (user_id, room_id)
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RoomDirectory for SqliteRoomDirectory {
    async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<RoomId>, GatewayError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT room_id FROM rooms WHERE user_id = ? ORDER BY created_at")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(rows.into_iter().map(|(r,)| r).collect())
    }

    async fn get_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<Option<RoomId>, GatewayError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT room_id FROM rooms WHERE user_id = ? AND room_id = ?")
            .bind(user_id)
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.map(|(r,)| r))
    }

    async fn create_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<(), GatewayError> {
        sqlx::query("INSERT OR IGNORE INTO rooms (user_id, room_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(room_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_list_round_trips() {
        let dir = SqliteRoomDirectory::connect("sqlite::memory:").await.unwrap();
        dir.create_room(&"u1".to_string(), &"r1".to_string()).await.unwrap();
        let rooms = dir.list_rooms(&"u1".to_string()).await.unwrap();
        assert_eq!(rooms, vec!["r1".to_string()]);
    }
}
