use async_trait::async_trait;

use crate::error::GatewayError;
use crate::model::UserId;

/// Whatever the transport layer can give us about the upgrade request;
/// kept minimal since decoding sessions/cookies is explicitly out of scope.
pub struct HandshakeInfo {
    pub bearer_token: Option<String>,
}

/// Maps a connection's handshake to a user id. Session/cookie decoding is
/// out of scope; this trait only names the seam.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, handshake: &HandshakeInfo) -> Result<UserId, GatewayError>;
}

/// Treats the bearer token itself as the user id. Suitable for local
/// development and the test harness; real deployments provide their own
/// `Authenticator`.
pub struct StaticTokenAuthenticator;

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, handshake: &HandshakeInfo) -> Result<UserId, GatewayError> {
        handshake
            .bearer_token
            .clone()
            .ok_or_else(|| GatewayError::InvalidState("missing bearer token".into()))
    }
}
