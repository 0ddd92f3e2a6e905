//! Append-only conversation transcript

use std::collections::HashSet;

use thiserror::Error;

use crate::completion::{Message, Role};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    /// A tool round must start with an assistant message that requests tools
    #[error("tool round must start with an assistant message requesting tools")]
    NotAToolRequest,
    #[error("tool message at position {position} has no tool_call_id")]
    MissingToolCallId { position: usize },
    /// The id is not among the preceding assistant message's tool calls
    #[error("tool message at position {position} answers unknown call '{id}'")]
    UnmatchedToolCall { position: usize, id: String },
}

/// Ordered history exchanged with the completion provider
///
/// Entries are never mutated or removed. Tool messages can only be
/// appended together with the assistant message that requested them,
/// through [`push_tool_round`](Self::push_tool_round).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcript that starts with a system message
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    /// Append an assistant tool request followed by the tool messages answering it
    ///
    /// Nothing is appended when any result does not answer one of the
    /// requested calls.
    pub fn push_tool_round(&mut self, request: Message, results: Vec<Message>) -> Result<(), TranscriptError> {
        if request.role != Role::Assistant || request.requested_tools().is_empty() {
            return Err(TranscriptError::NotAToolRequest);
        }

        let requested: HashSet<&str> = request.requested_tools().iter().map(|c| c.id.as_str()).collect();
        let first = self.messages.len() + 1;
        for (offset, result) in results.iter().enumerate() {
            let position = first + offset;
            let id = result
                .tool_call_id
                .as_deref()
                .ok_or(TranscriptError::MissingToolCallId { position })?;
            if result.role != Role::Tool || !requested.contains(id) {
                return Err(TranscriptError::UnmatchedToolCall {
                    position,
                    id: id.to_string(),
                });
            }
        }

        self.messages.push(request);
        self.messages.extend(results);
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Check that every tool message answers a call of the nearest
    /// preceding assistant message
    pub fn validate(&self) -> Result<(), TranscriptError> {
        let mut open_calls: HashSet<&str> = HashSet::new();

        for (position, message) in self.messages.iter().enumerate() {
            match message.role {
                Role::Tool => {
                    let id = message
                        .tool_call_id
                        .as_deref()
                        .ok_or(TranscriptError::MissingToolCallId { position })?;
                    if !open_calls.contains(id) {
                        return Err(TranscriptError::UnmatchedToolCall {
                            position,
                            id: id.to_string(),
                        });
                    }
                }
                Role::Assistant => {
                    open_calls = message.requested_tools().iter().map(|c| c.id.as_str()).collect();
                }
                Role::User | Role::System => open_calls.clear(),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ToolCall;

    fn request(ids: &[&str]) -> Message {
        let calls = ids.iter().map(|id| ToolCall::new(*id, "check_disk_usage", "{}")).collect();
        Message::assistant_tool_calls(None, calls)
    }

    #[test]
    fn test_round_is_appended_in_order() {
        let mut transcript = Transcript::with_system_prompt("be brief");
        transcript.push_user("disk?");
        transcript
            .push_tool_round(
                request(&["a", "b"]),
                vec![Message::tool("a", "check_disk_usage", "1"), Message::tool("b", "check_disk_usage", "2")],
            )
            .unwrap();
        transcript.push_assistant("Plenty of space.");

        assert_eq!(transcript.len(), 6);
        assert_eq!(transcript.messages()[3].tool_call_id.as_deref(), Some("a"));
        assert_eq!(transcript.messages()[4].tool_call_id.as_deref(), Some("b"));
        assert!(transcript.validate().is_ok());
    }

    #[test]
    fn test_unmatched_result_appends_nothing() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");

        let err = transcript
            .push_tool_round(request(&["a"]), vec![Message::tool("zzz", "check_disk_usage", "x")])
            .unwrap_err();
        assert_eq!(err, TranscriptError::UnmatchedToolCall { position: 2, id: "zzz".to_string() });
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn test_round_needs_tool_request() {
        let mut transcript = Transcript::new();
        let err = transcript
            .push_tool_round(Message::assistant("no tools"), vec![])
            .unwrap_err();
        assert_eq!(err, TranscriptError::NotAToolRequest);
    }

    #[test]
    fn test_validate_rejects_tool_after_user() {
        let mut transcript = Transcript::new();
        transcript
            .push_tool_round(request(&["a"]), vec![Message::tool("a", "t", "x")])
            .unwrap();
        transcript.push_user("next");
        // Rebuild with a stray tool message to exercise the check.
        let mut messages = transcript.messages().to_vec();
        messages.push(Message::tool("a", "t", "late"));
        let stray = Transcript { messages };

        assert!(matches!(
            stray.validate(),
            Err(TranscriptError::UnmatchedToolCall { position: 3, .. })
        ));
    }
}
