//! Conversation state and room-directory storage backends.

pub mod error;
pub mod in_memory;
pub mod redis_store;
pub mod sqlite_rooms;

pub use error::StoreError;
pub use in_memory::InMemoryConversationStore;
pub use redis_store::RedisConversationStore;
pub use sqlite_rooms::SqliteRoomDirectory;
