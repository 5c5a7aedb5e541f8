use gateway_core::model::{LocalModel, UserGptContext};

/// Renders the context's three logs into a single labeled-transcript
/// prompt string, the format a locally hosted base model expects instead
/// of a structured message array: a preamble built from the model's
/// description template, followed by `ROLE: content` lines for every
/// message in system-then-interleaved-user/gpt order, ending in an open
/// `GPT_PREFIX: ` line for the model to continue.
pub fn render_prompt(ctx: &UserGptContext, model: &LocalModel) -> String {
    let user_role = ctx.user_profile.user_role.to_uppercase();
    let gpt_role = ctx.user_profile.gpt_role.to_uppercase();
    let system_role = ctx.user_profile.system_role.to_uppercase();

    let mut prompt = model
        .description
        .replace("{user}", &user_role)
        .replace("{USER}", &user_role)
        .replace("{gpt}", &gpt_role)
        .replace("{GPT}", &gpt_role)
        .replace("{system}", &system_role)
        .replace("{SYSTEM}", &system_role);

    for system in &ctx.system_message_histories {
        prompt.push_str(&format!("{}: {}\n", system_role, system.content));
    }

    let user_len = ctx.user_message_histories.len();
    let gpt_len = ctx.gpt_message_histories.len();
    for i in 0..user_len.max(gpt_len) {
        if let Some(u) = ctx.user_message_histories.get(i) {
            prompt.push_str(&format!("{}: {}\n", user_role, u.content.trim()));
        }
        if let Some(g) = ctx.gpt_message_histories.get(i) {
            prompt.push_str(&format!("{}: {}\n", gpt_role, g.content.trim()));
        }
    }

    prompt.push_str(&format!("{}: ", gpt_role));
    prompt
}
