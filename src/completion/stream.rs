//! Server-sent event decoding and tool-call reassembly
//!
//! Streaming completions arrive as `data: {...}` lines terminated by
//! `data: [DONE]`. Tool calls are split across frames and must be
//! reassembled by index before they can be dispatched:
//!
//! ```text
//! delta {index:0, id:"call_1", name:"read_"}      ┐
//! delta {index:0, name:"file", arguments:"{\"fi"}  ├──► ToolCall { id: call_1,
//! delta {index:0, arguments:"le_path\":\"a\"}"}    ┘      read_file({"file_path":"a"}) }
//! finish_reason: "tool_calls"  ──► Complete
//! ```

use std::collections::BTreeMap;

use futures_util::StreamExt;
use serde_json::Value;

use super::types::{StreamChunk, StreamFrame, ToolCall, ToolCallDelta};
use super::{ChunkStream, CompletionError};

/// One decoded SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// JSON payload of a `data:` line
    Data(String),
    /// The `[DONE]` sentinel
    Done,
}

/// Incremental line decoder for an SSE byte stream
///
/// Network chunks may split lines anywhere, including inside a UTF-8
/// sequence, so bytes are buffered until a newline arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every event completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that had no newline
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line).into_iter().collect()
    }
}

fn parse_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        Some(SseEvent::Done)
    } else {
        Some(SseEvent::Data(payload.to_string()))
    }
}

/// Decode one `data:` payload into a chunk
///
/// An `{"error": {...}}` frame becomes a provider error.
pub fn parse_chunk(payload: &str) -> Result<StreamChunk, CompletionError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| CompletionError::Decode(e.to_string()))?;
    if value.get("error").is_some() {
        return Err(CompletionError::from_error_body(None, &value));
    }

    let frame: StreamFrame =
        serde_json::from_value(value).map_err(|e| CompletionError::Decode(e.to_string()))?;
    Ok(match frame.choices.into_iter().next() {
        Some(choice) => StreamChunk {
            content: choice.delta.content,
            tool_calls: choice.delta.tool_calls,
            finish_reason: choice.finish_reason,
        },
        // usage-only frames carry no choices
        None => StreamChunk::default(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Empty,
    Accumulating,
    Complete,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Reassembles streamed tool-call deltas, keyed by tool-call index
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    partials: BTreeMap<usize, PartialToolCall>,
    complete: bool,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AccumulatorState {
        if self.complete {
            AccumulatorState::Complete
        } else if self.partials.is_empty() {
            AccumulatorState::Empty
        } else {
            AccumulatorState::Accumulating
        }
    }

    /// Merge one delta; fragments of name and arguments are concatenated
    pub fn push(&mut self, delta: &ToolCallDelta) -> Result<(), CompletionError> {
        if self.complete {
            return Err(CompletionError::Stream(format!(
                "tool call delta for index {} after the terminal chunk",
                delta.index
            )));
        }

        let partial = self.partials.entry(delta.index).or_default();
        if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
            partial.id.get_or_insert_with(|| id.to_string());
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                partial.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                partial.arguments.push_str(arguments);
            }
        }
        Ok(())
    }

    /// Merge every delta of a chunk; a terminal chunk completes the accumulator
    pub fn apply(&mut self, chunk: &StreamChunk) -> Result<(), CompletionError> {
        for delta in &chunk.tool_calls {
            self.push(delta)?;
        }
        if chunk.finish_reason.is_some() {
            self.complete = true;
        }
        Ok(())
    }

    /// Mark the stream as ended (e.g. on `[DONE]` without a finish reason)
    pub fn close(&mut self) {
        self.complete = true;
    }

    /// Produce the reassembled calls in index order
    ///
    /// Fails if the stream never completed or a call lacks an id or name.
    pub fn finish(self) -> Result<Vec<ToolCall>, CompletionError> {
        if !self.complete && !self.partials.is_empty() {
            return Err(CompletionError::Stream(
                "stream ended while tool calls were still accumulating".to_string(),
            ));
        }

        self.partials
            .into_iter()
            .map(|(index, partial)| {
                let id = partial
                    .id
                    .ok_or(CompletionError::IncompleteToolCall { index, missing: "id" })?;
                if partial.name.is_empty() {
                    return Err(CompletionError::IncompleteToolCall { index, missing: "name" });
                }
                let arguments = if partial.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    partial.arguments
                };
                Ok(ToolCall::new(id, partial.name, arguments))
            })
            .collect()
    }
}

/// Everything a stream produced, folded together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedStream {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

/// Drain a chunk stream, concatenating content and reassembling tool calls
pub async fn collect_stream(mut stream: ChunkStream) -> Result<CollectedStream, CompletionError> {
    let mut content = String::new();
    let mut accumulator = ToolCallAccumulator::new();
    let mut finish_reason = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if let Some(text) = &chunk.content {
            content.push_str(text);
        }
        accumulator.apply(&chunk)?;
        if chunk.finish_reason.is_some() {
            finish_reason = chunk.finish_reason;
        }
    }
    accumulator.close();

    Ok(CollectedStream {
        content,
        tool_calls: accumulator.finish()?,
        finish_reason,
    })
}
