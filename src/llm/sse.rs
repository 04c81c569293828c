//! Server-sent event decoding for OpenAI-compatible chat completion streams.

use serde::Deserialize;

use super::provider::{ChatIncrement, LlmError, LlmResult, ToolCallFragment};

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Splits a byte stream into `data:` payloads. Bytes are buffered until a full
/// line is available so multi-byte characters split across reads survive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line)
    }
}

fn decode_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);

    if data.trim() == DONE_SENTINEL {
        Some(SseEvent::Done)
    } else if data.trim().is_empty() {
        None
    } else {
        Some(SseEvent::Data(data.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Parses one `data:` payload into an increment. Only the first choice is read.
pub fn parse_chunk(data: &str) -> LlmResult<ChatIncrement> {
    let payload: ChunkPayload =
        serde_json::from_str(data).map_err(|err| LlmError::Parse(err.to_string()))?;

    if let Some(error) = payload.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| error.to_string());
        return Err(LlmError::Stream(message));
    }

    let Some(delta) = payload.choices.into_iter().next().and_then(|c| c.delta) else {
        return Ok(ChatIncrement::default());
    };

    let tool_calls = delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(position, call)| {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            ToolCallFragment {
                index: call.index.unwrap_or(position),
                id: call.id,
                name,
                arguments,
            }
        })
        .collect();

    Ok(ChatIncrement {
        text: delta.content.filter(|text| !text.is_empty()),
        tool_calls,
    })
}
