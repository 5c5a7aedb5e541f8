use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type RoomId = String;

/// Static, per-user generation settings. Cloned into a [`UserGptContext`]
/// when a room is created; never mutated by generation itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGptProfile {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub user_role: String,
    pub gpt_role: String,
    pub system_role: String,
}

impl Default for UserGptProfile {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            room_id: String::new(),
            temperature: 0.7,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            user_role: "user".to_string(),
            gpt_role: "assistant".to_string(),
            system_role: "system".to_string(),
        }
    }
}

/// One message of one role's log, paired with its pre-computed token count
/// so budget checks never re-tokenize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHistory {
    pub role: String,
    pub content: String,
    pub tokens: i32,
    pub is_user: bool,
}

impl MessageHistory {
    pub fn new(role: impl Into<String>, content: impl Into<String>, tokens: i32, is_user: bool) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tokens,
            is_user,
        }
    }
}

/// Remote, SSE-streamed chat-completion backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChatModel {
    pub name: String,
    pub api_url: String,
    pub api_key_env: String,
    pub max_total_tokens: i32,
    pub max_tokens_per_request: i32,
    pub token_margin: i32,
}

/// Locally hosted, thread-pool-bridged generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModel {
    pub name: String,
    pub model_path: String,
    pub max_total_tokens: i32,
    pub max_tokens_per_request: i32,
    pub token_margin: i32,
    pub description: String,
    pub user_prefix: String,
    pub gpt_prefix: String,
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum LLMModel {
    Remote(RemoteChatModel),
    Local(LocalModel),
}

impl LLMModel {
    pub fn name(&self) -> &str {
        match self {
            LLMModel::Remote(m) => &m.name,
            LLMModel::Local(m) => &m.name,
        }
    }

    pub fn max_total_tokens(&self) -> i32 {
        match self {
            LLMModel::Remote(m) => m.max_total_tokens,
            LLMModel::Local(m) => m.max_total_tokens,
        }
    }

    pub fn max_tokens_per_request(&self) -> i32 {
        match self {
            LLMModel::Remote(m) => m.max_tokens_per_request,
            LLMModel::Local(m) => m.max_tokens_per_request,
        }
    }

    pub fn token_margin(&self) -> i32 {
        match self {
            LLMModel::Remote(m) => m.token_margin,
            LLMModel::Local(m) => m.token_margin,
        }
    }
}

/// Durable per-room state: the three logs plus live token accounting.
///
/// Invariants:
/// 1. `user_message_histories.len() == gpt_message_histories.len()` always
///    after a turn completes (mid-turn they may differ by one).
/// 2. `total_tokens` is always the exact sum of every message's `tokens`
///    field across all three logs plus `preamble_tokens`.
/// 3. `left_tokens == model.max_total_tokens() - total_tokens`, clamped to
///    never be reported negative to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGptContext {
    pub user_profile: UserGptProfile,
    pub model: LLMModel,
    pub system_message_histories: Vec<MessageHistory>,
    pub user_message_histories: Vec<MessageHistory>,
    pub gpt_message_histories: Vec<MessageHistory>,
    pub preamble_tokens: i32,
    pub is_continuation: bool,
}

impl UserGptContext {
    pub fn new(user_profile: UserGptProfile, model: LLMModel) -> Self {
        Self {
            user_profile,
            model,
            system_message_histories: Vec::new(),
            user_message_histories: Vec::new(),
            gpt_message_histories: Vec::new(),
            preamble_tokens: 0,
            is_continuation: false,
        }
    }

    pub fn total_tokens(&self) -> i32 {
        self.preamble_tokens
            + sum_tokens(&self.system_message_histories)
            + sum_tokens(&self.user_message_histories)
            + sum_tokens(&self.gpt_message_histories)
    }

    pub fn left_tokens(&self) -> i32 {
        (self.model.max_total_tokens() - self.total_tokens()).max(0)
    }

    /// True once adding `additional` tokens would breach the model's
    /// request budget once the token margin is reserved.
    pub fn would_exceed_budget(&self, additional: i32) -> bool {
        self.total_tokens() + self.model.token_margin() + additional > self.model.max_total_tokens()
    }
}

fn sum_tokens(histories: &[MessageHistory]) -> i32 {
    histories.iter().map(|h| h.tokens).sum()
}

/// One user's set of rooms, kept in stable insertion order with a pointer
/// to whichever room is currently attached to a connection.
#[derive(Debug, Default)]
pub struct BufferedUserContext {
    pub user_id: UserId,
    sorted_ctxts: Vec<UserGptContext>,
    current_index: usize,
}

impl BufferedUserContext {
    pub fn new(user_id: UserId, sorted_ctxts: Vec<UserGptContext>) -> Self {
        Self {
            user_id,
            sorted_ctxts,
            current_index: 0,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.sorted_ctxts.len()
    }

    pub fn sorted_room_ids(&self) -> Vec<RoomId> {
        self.sorted_ctxts
            .iter()
            .map(|c| c.user_profile.room_id.clone())
            .collect()
    }

    pub fn current_room_id(&self) -> Option<&RoomId> {
        self.sorted_ctxts
            .get(self.current_index)
            .map(|c| &c.user_profile.room_id)
    }

    pub fn current_context(&self) -> Option<&UserGptContext> {
        self.sorted_ctxts.get(self.current_index)
    }

    pub fn current_context_mut(&mut self) -> Option<&mut UserGptContext> {
        self.sorted_ctxts.get_mut(self.current_index)
    }

    pub fn find_index_of_room(&self, room_id: &str) -> Option<usize> {
        self.sorted_ctxts
            .iter()
            .position(|c| c.user_profile.room_id == room_id)
    }

    pub fn change_context_to(&mut self, room_id: &str) -> bool {
        match self.find_index_of_room(room_id) {
            Some(idx) => {
                self.current_index = idx;
                true
            }
            None => false,
        }
    }

    pub fn insert_context(&mut self, ctx: UserGptContext) {
        let room_id = ctx.user_profile.room_id.clone();
        self.sorted_ctxts.push(ctx);
        self.current_index = self.sorted_ctxts.len() - 1;
        let _ = room_id;
    }

    pub fn delete_context(&mut self, room_id: &str) -> bool {
        if let Some(idx) = self.find_index_of_room(room_id) {
            self.sorted_ctxts.remove(idx);
            if self.current_index >= self.sorted_ctxts.len() && !self.sorted_ctxts.is_empty() {
                self.current_index = self.sorted_ctxts.len() - 1;
            } else if self.sorted_ctxts.is_empty() {
                self.current_index = 0;
            }
            true
        } else {
            false
        }
    }
}
