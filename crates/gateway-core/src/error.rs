use std::fmt;

/// Error types surfaced by the core gateway domain.
#[derive(Debug)]
pub enum GatewayError {
    /// The room or message index referenced does not exist.
    NotFound(String),
    /// A command or file upload exceeded the context's token budget.
    TooManyTokens { left: i32, requested: i32 },
    /// A slash-command was malformed or referenced an unknown command.
    InvalidCommand(String),
    /// The backend (remote API or local model) returned a fatal error.
    GenerationFailed(String),
    /// The backend timed out waiting for a response.
    Timeout,
    /// The underlying conversation/vector/room store failed.
    StoreError(String),
    /// JSON encoding/decoding of a client or provider frame failed.
    JsonError(String),
    /// Caller attempted an operation outside a connection's lifecycle
    /// (e.g. generation requested with no active room).
    InvalidState(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::NotFound(e) => write!(f, "Not Found: {}", e),
            GatewayError::TooManyTokens { left, requested } => write!(
                f,
                "Token budget exceeded: {} left, {} requested",
                left, requested
            ),
            GatewayError::InvalidCommand(e) => write!(f, "Invalid Command: {}", e),
            GatewayError::GenerationFailed(e) => write!(f, "Generation Failed: {}", e),
            GatewayError::Timeout => write!(f, "Generation timed out"),
            GatewayError::StoreError(e) => write!(f, "Store Error: {}", e),
            GatewayError::JsonError(e) => write!(f, "JSON Error: {}", e),
            GatewayError::InvalidState(e) => write!(f, "Invalid State: {}", e),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::JsonError(format!(
            "{} at line {} column {}",
            err,
            err.line(),
            err.column()
        ))
    }
}
