use futures::StreamExt;
use gateway_core::dispatch::{GenerationStream, StreamChunk};
use gateway_core::error::GatewayError;
use tokio::sync::mpsc;

use crate::messages::ServerFrame;

/// The connection's cancel signal, shared with whichever dispatcher is
/// driving the current turn. Checked at every suspension point in the
/// streaming loop; tripped by the receiver task when the client sends a
/// `"stop"` frame.
pub use gateway_core::cancel::CancelToken as CancelFlag;

pub struct StreamOutcome {
    pub full_text: String,
    pub cancelled: bool,
}

/// Drains a generation stream to the client socket, coalescing `chunk_size`
/// deltas per frame: an opening empty frame, periodic coalesced frames
/// every `chunk_size` deltas, and a final frame carrying whatever remains
/// plus `finish: true`.
///
/// Returns the full accumulated text regardless of how the stream ended,
/// so callers can record it even on cancellation.
pub async fn stream_to_client(
    tx: &mpsc::Sender<String>,
    chatroom_id: &str,
    model_name: &str,
    mut stream: GenerationStream,
    chunk_size: usize,
    cancel: &CancelFlag,
) -> Result<StreamOutcome, GatewayError> {
    send_frame(
        tx,
        &ServerFrame::Delta {
            chatroom_id: chatroom_id.to_string(),
            text: String::new(),
            finish: false,
            model_name: Some(model_name.to_string()),
        },
    )
    .await;

    let mut full_text = String::new();
    let mut coalesce_buffer = String::new();
    let mut iteration = 0usize;
    let mut cancelled = false;

    while let Some(item) = stream.next().await {
        if cancel.is_tripped() {
            cancelled = true;
            break;
        }

        match item? {
            StreamChunk::Delta(text) => {
                full_text.push_str(&text);
                coalesce_buffer.push_str(&text);
                iteration += 1;
                if iteration % chunk_size == 0 {
                    send_frame(
                        tx,
                        &ServerFrame::Delta {
                            chatroom_id: chatroom_id.to_string(),
                            text: std::mem::take(&mut coalesce_buffer),
                            finish: false,
                            model_name: None,
                        },
                    )
                    .await;
                }
            }
            StreamChunk::Done { .. } => break,
        }
    }

    send_frame(
        tx,
        &ServerFrame::Delta {
            chatroom_id: chatroom_id.to_string(),
            text: coalesce_buffer,
            finish: true,
            model_name: None,
        },
    )
    .await;

    Ok(StreamOutcome { full_text, cancelled })
}

async fn send_frame(tx: &mpsc::Sender<String>, frame: &ServerFrame) {
    if let Ok(encoded) = serde_json::to_string(frame) {
        let _ = tx.send(encoded).await;
    }
}
