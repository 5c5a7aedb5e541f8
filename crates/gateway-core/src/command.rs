use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::GatewayError;

/// What the connection pump should do after a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// Send the text to the client and stop; do not touch any log.
    SendAndStop,
    /// Send the text to the client, then re-run the pump as if the text
    /// had arrived as a fresh user message (used by `/retry`).
    SendAndContinueAsUser,
    /// Append the text to the user log, then dispatch generation.
    HandleUser,
    /// Treat the text as if it were the assistant's reply: append to the
    /// gpt log without calling the generation dispatcher.
    HandleGpt,
    /// Append to both the user and gpt logs (a scripted exchange).
    HandleBoth,
    /// The command already performed all necessary side effects; send
    /// nothing further.
    Nothing,
    /// Re-run the command handler loop without consuming a turn (used
    /// internally by commands implemented in terms of other commands).
    Repeat,
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub text: Option<String>,
    pub response_type: ResponseType,
}

impl CommandResponse {
    pub fn send_and_stop(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            response_type: ResponseType::SendAndStop,
        }
    }

    pub fn nothing() -> Self {
        Self {
            text: None,
            response_type: ResponseType::Nothing,
        }
    }
}

/// Declared shape of one command parameter, used by the binder to coerce
/// whitespace-split tokens the way `arguments_provider` inspected a Python
/// function's signature by parameter kind.
#[derive(Debug, Clone)]
pub enum ParamKind {
    /// A required positional token, coerced to the given primitive.
    Positional(PrimType),
    /// An optional positional token with a default if the caller ran out
    /// of tokens.
    OptionalPositional(PrimType, String),
    /// Consumes every remaining token, re-joined with single spaces. Must
    /// be the last parameter declared.
    TrailingText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimType {
    Str,
    Int,
    Float,
    Bool,
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

#[derive(Debug, Clone)]
pub enum BoundValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl BoundValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BoundValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            BoundValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

pub type BoundArgs = HashMap<&'static str, BoundValue>;

fn coerce(token: &str, ty: PrimType) -> Result<BoundValue, GatewayError> {
    Ok(match ty {
        PrimType::Str => BoundValue::Str(token.to_string()),
        PrimType::Int => BoundValue::Int(
            token
                .parse()
                .map_err(|_| GatewayError::InvalidCommand(format!("expected an integer, got '{}'", token)))?,
        ),
        PrimType::Float => BoundValue::Float(
            token
                .parse()
                .map_err(|_| GatewayError::InvalidCommand(format!("expected a number, got '{}'", token)))?,
        ),
        PrimType::Bool => BoundValue::Bool(
            token
                .parse()
                .map_err(|_| GatewayError::InvalidCommand(format!("expected true/false, got '{}'", token)))?,
        ),
    })
}

/// Binds whitespace-split `tokens` against a command's declared parameter
/// list. A `TrailingText` parameter swallows everything left, joined by a
/// single space.
pub fn bind_args(tokens: &[&str], specs: &[ParamSpec]) -> Result<BoundArgs, GatewayError> {
    let mut bound = BoundArgs::new();
    let mut cursor = 0usize;

    for (i, spec) in specs.iter().enumerate() {
        match &spec.kind {
            ParamKind::TrailingText => {
                if i != specs.len() - 1 {
                    return Err(GatewayError::InvalidCommand(
                        "trailing-text parameter must be declared last".into(),
                    ));
                }
                let rest = tokens[cursor.min(tokens.len())..].join(" ");
                bound.insert(spec.name, BoundValue::Str(rest));
                cursor = tokens.len();
            }
            ParamKind::Positional(ty) => {
                let token = tokens.get(cursor).ok_or_else(|| {
                    GatewayError::InvalidCommand(format!("missing required argument '{}'", spec.name))
                })?;
                bound.insert(spec.name, coerce(token, *ty)?);
                cursor += 1;
            }
            ParamKind::OptionalPositional(ty, default) => {
                let value = match tokens.get(cursor) {
                    Some(token) => {
                        cursor += 1;
                        coerce(token, *ty)?
                    }
                    None => coerce(default, *ty)?,
                };
                bound.insert(spec.name, value);
            }
        }
    }

    Ok(bound)
}

/// One slash-command. Implementations hold whatever store/dispatcher
/// handles they need; `gateway-service::commands` wires up the built-ins
/// (`help`, `clear`, `reset`, `retry`, `changemodel`, `embed`, `query`,
/// `codex`, `redx`, `codeblock`, `ping`).
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;
    fn help(&self) -> &'static str;
    fn params(&self) -> &[ParamSpec];

    async fn call(&self, user_id: &str, room_id: &str, args: BoundArgs) -> Result<CommandResponse, GatewayError>;
}

/// Looks up commands by name and dispatches through the binder. Unknown
/// command names fall back to a fixed apology.
pub struct CommandRegistry {
    commands: HashMap<&'static str, Box<dyn Command>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    pub fn register(&mut self, command: Box<dyn Command>) {
        self.commands.insert(command.name(), command);
    }

    pub fn help_text(&self) -> String {
        let mut names: Vec<_> = self.commands.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| format!("/{} - {}", name, self.commands[name].help()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `line` is the full command line as typed, including the leading `/`.
    pub async fn dispatch(&self, user_id: &str, room_id: &str, line: &str) -> CommandResponse {
        let trimmed = line.trim_start_matches('/');
        let mut parts = trimmed.split_whitespace();
        let Some(name) = parts.next() else {
            return CommandResponse::send_and_stop("I'm sorry, I couldn't understand your command.");
        };
        let tokens: Vec<&str> = parts.collect();

        if name.starts_with('_') {
            return CommandResponse::send_and_stop("I'm sorry, I couldn't understand your command.");
        }

        match self.commands.get(name) {
            Some(command) => match bind_args(&tokens, command.params()) {
                Ok(args) => command
                    .call(user_id, room_id, args)
                    .await
                    .unwrap_or_else(|e| CommandResponse::send_and_stop(format!("Error: {}", e))),
                Err(e) => CommandResponse::send_and_stop(format!("Error: {}", e)),
            },
            None => CommandResponse::send_and_stop("I'm sorry, I couldn't understand your command."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_text_joins_remaining_tokens_with_single_space() {
        let specs = [ParamSpec {
            name: "text",
            kind: ParamKind::TrailingText,
        }];
        let tokens = ["hello", "  there", "world"];
        let bound = bind_args(&tokens, &specs).unwrap();
        assert_eq!(bound["text"].as_str(), Some("hello   there world"));
    }

    #[test]
    fn optional_positional_falls_back_to_default() {
        let specs = [ParamSpec {
            name: "count",
            kind: ParamKind::OptionalPositional(PrimType::Int, "1".into()),
        }];
        let bound = bind_args(&[], &specs).unwrap();
        assert_eq!(bound["count"].as_i64(), Some(1));
    }

    #[test]
    fn missing_required_positional_is_an_error() {
        let specs = [ParamSpec {
            name: "query",
            kind: ParamKind::Positional(PrimType::Str),
        }];
        assert!(bind_args(&[], &specs).is_err());
    }

    struct PingCommand;

    #[async_trait]
    impl Command for PingCommand {
        fn name(&self) -> &'static str {
            "ping"
        }
        fn help(&self) -> &'static str {
            "pong"
        }
        fn params(&self) -> &[ParamSpec] {
            &[]
        }
        async fn call(&self, _user_id: &str, _room_id: &str, _args: BoundArgs) -> Result<CommandResponse, GatewayError> {
            Ok(CommandResponse::send_and_stop("pong"))
        }
    }

    #[tokio::test]
    async fn underscore_prefixed_command_names_are_rejected() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(PingCommand));
        let response = registry.dispatch("u1", "r1", "/_ping").await;
        assert_eq!(response.response_type, ResponseType::SendAndStop);
        assert!(response.text.unwrap().contains("couldn't understand"));
    }
}
