use serde::{Deserialize, Serialize};

/// Inbound frames, matching the external client/server interface.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    /// A chat turn or slash-command. `chatroom_id` absent means "the
    /// room currently attached to this connection"; present switches
    /// rooms without treating `msg` as a message to send.
    Chat {
        msg: String,
        #[serde(default)]
        chatroom_id: Option<String>,
    },
    /// Announces an upcoming binary frame carrying the named file's
    /// bytes, to be embedded into the vector store via `/embed`.
    FileUpload { filename: String },
}

/// Outbound frames streamed back to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Sent once, immediately after a connection attaches to a room:
    /// the full three-log transcript so the client can render history.
    #[serde(rename = "init")]
    Init { chatroom_id: String, history: Vec<HistoryEntry> },
    /// One coalesced slice of the streaming reply. `finish` is only
    /// ever `true` on the terminal frame of a turn. `model_name` is set
    /// on the opening frame of a turn (spec §8 scenario 1's
    /// `{msg:null,finish:false,is_user:false,model_name}`) and omitted
    /// from every later frame of the same turn.
    #[serde(rename = "delta")]
    Delta {
        chatroom_id: String,
        text: String,
        finish: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        model_name: Option<String>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
    pub is_user: bool,
    pub tokens: i32,
}
