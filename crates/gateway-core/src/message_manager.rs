use crate::error::GatewayError;
use crate::model::{MessageHistory, UserGptContext};
use crate::store::Role;

fn histories_mut<'a>(ctx: &'a mut UserGptContext, role: Role) -> &'a mut Vec<MessageHistory> {
    match role {
        Role::System => &mut ctx.system_message_histories,
        Role::User => &mut ctx.user_message_histories,
        Role::Gpt => &mut ctx.gpt_message_histories,
    }
}

fn histories<'a>(ctx: &'a UserGptContext, role: Role) -> &'a Vec<MessageHistory> {
    match role {
        Role::System => &ctx.system_message_histories,
        Role::User => &ctx.user_message_histories,
        Role::Gpt => &ctx.gpt_message_histories,
    }
}

/// Appends `message` to `role`'s in-memory log, evicting from the left of
/// every log in lockstep until the context fits under the model's budget
/// again. Returns the number of messages evicted per log touched.
pub fn append_safely(ctx: &mut UserGptContext, role: Role, message: MessageHistory) {
    histories_mut(ctx, role).push(message);
    evict_to_fit(ctx);
}

/// Checked append: refuses the message entirely (no mutation) if it alone
/// would not fit even after evicting everything else.
pub fn append_checked(ctx: &mut UserGptContext, role: Role, message: MessageHistory) -> Result<(), GatewayError> {
    let requested = message.tokens;
    let budget = ctx.model.max_total_tokens() - ctx.model.token_margin() - ctx.preamble_tokens;
    if requested > budget {
        return Err(GatewayError::TooManyTokens {
            left: budget.max(0),
            requested,
        });
    }
    append_safely(ctx, role, message);
    Ok(())
}

fn evict_to_fit(ctx: &mut UserGptContext) {
    while ctx.would_exceed_budget(0) {
        let evicted = evict_oldest(ctx);
        if !evicted {
            break;
        }
    }
}

/// Evicts the oldest user/gpt turn as a pair, leaving `System` untouched.
/// Only pops when both logs are non-empty, matching the original's
/// `while user_message_histories and gpt_message_histories` eviction
/// loop: the canned system prompt (`/codex`, `/redx`) must survive an
/// eviction pass even when it alone pushed the context over budget.
fn evict_oldest(ctx: &mut UserGptContext) -> bool {
    if ctx.user_message_histories.is_empty() || ctx.gpt_message_histories.is_empty() {
        return false;
    }
    ctx.user_message_histories.remove(0);
    ctx.gpt_message_histories.remove(0);
    true
}

pub fn pop_safely(ctx: &mut UserGptContext, role: Role) -> Option<MessageHistory> {
    histories_mut(ctx, role).pop()
}

pub fn pop_left_safely(ctx: &mut UserGptContext, role: Role) -> Option<MessageHistory> {
    let log = histories_mut(ctx, role);
    if log.is_empty() {
        None
    } else {
        Some(log.remove(0))
    }
}

pub fn set_safely(ctx: &mut UserGptContext, role: Role, index: usize, message: MessageHistory) {
    let log = histories_mut(ctx, role);
    if index < log.len() {
        log[index] = message;
    } else {
        log.push(message);
    }
}

pub fn clear_safely(ctx: &mut UserGptContext, role: Role) {
    histories_mut(ctx, role).clear();
}

pub fn last_index(ctx: &UserGptContext, role: Role) -> Option<usize> {
    let len = histories(ctx, role).len();
    if len == 0 {
        None
    } else {
        Some(len - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LLMModel, RemoteChatModel, UserGptProfile};

    fn small_ctx() -> UserGptContext {
        let model = LLMModel::Remote(RemoteChatModel {
            name: "test-model".into(),
            api_url: "http://localhost".into(),
            api_key_env: "TEST_KEY".into(),
            max_total_tokens: 20,
            max_tokens_per_request: 10,
            token_margin: 2,
        });
        UserGptContext::new(UserGptProfile::default(), model)
    }

    #[test]
    fn append_evicts_oldest_across_all_logs_in_lockstep() {
        let mut ctx = small_ctx();
        append_safely(&mut ctx, Role::User, MessageHistory::new("user", "a", 5, true));
        append_safely(&mut ctx, Role::Gpt, MessageHistory::new("assistant", "b", 5, false));
        // total = 10, fits. Now push something that forces eviction.
        append_safely(&mut ctx, Role::User, MessageHistory::new("user", "c", 10, true));
        assert!(ctx.total_tokens() + ctx.model.token_margin() <= ctx.model.max_total_tokens());
    }

    #[test]
    fn append_checked_rejects_oversize_message_without_mutating() {
        let mut ctx = small_ctx();
        let before = ctx.total_tokens();
        let err = append_checked(&mut ctx, Role::User, MessageHistory::new("user", "huge", 100, true));
        assert!(err.is_err());
        assert_eq!(ctx.total_tokens(), before);
    }
}
