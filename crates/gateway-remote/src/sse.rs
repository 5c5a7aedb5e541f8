use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StreamChunkWire {
    choices: Vec<StreamChoiceWire>,
}

#[derive(Debug, Deserialize)]
struct StreamChoiceWire {
    delta: StreamDeltaWire,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDeltaWire {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SseEvent {
    Delta(String),
    Finish(String),
    StreamEnd,
}

/// Pulls complete `data: ...` lines out of `buffer`, leaving any trailing
/// partial line for the next network read.
pub fn drain_sse_lines(buffer: &mut String) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut consumed = 0;

    for line in buffer.split_inclusive('\n') {
        if !line.ends_with('\n') {
            break; // partial line, wait for more bytes
        }
        consumed += line.len();
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            events.push(SseEvent::StreamEnd);
            continue;
        }

        match serde_json::from_str::<StreamChunkWire>(data) {
            Ok(chunk) => {
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            events.push(SseEvent::Delta(content));
                        }
                    }
                    if let Some(reason) = choice.finish_reason {
                        events.push(SseEvent::Finish(reason));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse stream chunk, skipping");
            }
        }
    }

    buffer.drain(..consumed);
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delta_and_finish_reason() {
        let mut buffer = String::from(
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n",
        );
        let events = drain_sse_lines(&mut buffer);
        assert!(matches!(&events[0], SseEvent::Delta(s) if s == "hi"));
    }

    #[test]
    fn leaves_partial_trailing_line_for_next_read() {
        let mut buffer = String::from("data: {\"choices\":[{\"delta\":{},\"finish_reason\":null}]}\ndata: {\"cho");
        let _ = drain_sse_lines(&mut buffer);
        assert_eq!(buffer, "data: {\"cho");
    }

    #[test]
    fn recognizes_done_sentinel() {
        let mut buffer = String::from("data: [DONE]\n");
        let events = drain_sse_lines(&mut buffer);
        assert!(matches!(events[0], SseEvent::StreamEnd));
    }
}
