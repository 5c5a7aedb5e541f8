use gateway_core::error::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("context already exists for this room")]
    AlreadyExists,
    #[error("no context exists for this room")]
    DoesNotExist,
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::StoreError(err.to_string())
    }
}
