use gateway_core::model::UserGptContext;
use serde_json::{json, Value};

/// Builds the `messages` array sent to a remote chat-completion API:
/// every system message first, then the user/gpt logs interleaved
/// turn-by-turn. When `ctx.is_continuation` is set, the last assistant
/// message gets a `...[CONTINUATION]` suffix so the model knows to pick
/// up where a previous, length-truncated response left off.
pub fn organize_messages(ctx: &UserGptContext) -> Vec<Value> {
    let mut messages = Vec::new();

    for system in &ctx.system_message_histories {
        messages.push(json!({ "role": system.role, "content": system.content }));
    }

    let user_len = ctx.user_message_histories.len();
    let gpt_len = ctx.gpt_message_histories.len();
    for i in 0..user_len.max(gpt_len) {
        if let Some(u) = ctx.user_message_histories.get(i) {
            messages.push(json!({ "role": u.role, "content": u.content }));
        }
        if let Some(g) = ctx.gpt_message_histories.get(i) {
            messages.push(json!({ "role": g.role, "content": g.content }));
        }
    }

    if ctx.is_continuation {
        for message in messages.iter_mut().rev() {
            if message["role"] == ctx.user_profile.gpt_role {
                let content = message["content"].as_str().unwrap_or_default().to_string();
                message["content"] = json!(format!("{}...[CONTINUATION]", content));
                break;
            }
        }
    }

    messages
}
