//! Conversation turn state machine

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::transcript::{Transcript, TranscriptError};
use crate::completion::{
    CompletionError, CompletionProvider, CompletionRequest, Message, ToolCall, ToolCallAccumulator,
};
use crate::config::AppConfig;
use crate::metrics::CONVERSATION_TURNS;
use crate::rate_limit::{RateLimited, RateLimiter};
use crate::tools::ToolRegistry;

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Leading system message, if any
    pub system_prompt: Option<String>,
    /// Tool rounds per turn before the forced no-tools completion
    pub max_tool_rounds: usize,
    /// Calls of one round dispatched at the same time
    pub max_concurrent_tools: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_tool_rounds: 1,
            max_concurrent_tools: 5,
        }
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            max_tool_rounds: config.max_tool_rounds,
            max_concurrent_tools: config.max_concurrent_tools,
        }
    }
}

/// Failure that ends a turn early; rendered into the assistant reply
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    RateLimited(#[from] RateLimited),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Transcript(#[from] TranscriptError),
}

/// Drives one conversation
///
/// ```text
/// Idle ──user text──► AwaitingFirstCompletion (tools attached, tool_choice auto)
///                          │
///             tool_calls?  ├── no ──► reply ──► Idle
///                          ▼
///                     ToolDispatch (bounded fan-out, call order kept)
///                          │
///                          ▼
///                 AwaitingFinalCompletion (no tools) ──► reply ──► Idle
/// ```
///
/// Every turn appends exactly one user message and one terminal assistant
/// message, even when a completion fails or the turn is cancelled. Calls
/// on the same conversation must not overlap; `&mut self` enforces that.
pub struct Orchestrator {
    provider: Arc<dyn CompletionProvider>,
    registry: Arc<ToolRegistry>,
    transcript: Transcript,
    config: OrchestratorConfig,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn CompletionProvider>, registry: Arc<ToolRegistry>, config: OrchestratorConfig) -> Self {
        let transcript = match config.system_prompt.as_deref() {
            Some(prompt) => Transcript::with_system_prompt(prompt),
            None => Transcript::new(),
        };
        Self {
            provider,
            registry,
            transcript,
            config,
            rate_limiter: None,
        }
    }

    /// Limit how often turns may start; denied turns get an error reply
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one turn and return the assistant's reply
    ///
    /// Never fails: an error during the turn becomes the reply
    /// `Error processing message: ...`.
    pub async fn send_message(&mut self, text: &str) -> String {
        let trace_id = Uuid::now_v7();
        let span = info_span!(
            "conversation_turn",
            trace_id = %trace_id,
            mode = "send",
            model = %self.provider.model(),
            otel.name = "conversation_turn"
        );

        let Orchestrator {
            ref provider,
            ref registry,
            ref mut transcript,
            ref config,
            ref rate_limiter,
        } = *self;
        let mut turn = Turn::begin(transcript, text);

        let outcome = async {
            admit(rate_limiter.as_deref())?;
            let answer = resolve_tools(&**provider, registry, config, turn.transcript()).await?;
            match answer {
                Some(reply) => Ok(reply),
                None => final_answer(&**provider, turn.transcript()).await,
            }
        }
        .instrument(span.clone())
        .await;

        let reply = match outcome {
            Ok(reply) => {
                CONVERSATION_TURNS.with_label_values(&["send", "answered"]).inc();
                reply
            }
            Err(e) => {
                record_failure("send", &e, &span);
                format!("Error processing message: {e}")
            }
        };
        turn.finish(&reply);
        reply
    }

    /// Run one turn, streaming the final answer as text fragments
    ///
    /// Tool calls are resolved first without streaming; the answer is then
    /// streamed without tools attached. An error ends the stream with an
    /// `Error: ...` fragment. Dropping the stream closes the provider
    /// connection, and the text yielded so far is recorded as the reply.
    pub fn stream_message<'a>(&'a mut self, text: &'a str) -> impl Stream<Item = String> + Send + 'a {
        let trace_id = Uuid::now_v7();
        let span = info_span!(
            "conversation_turn",
            trace_id = %trace_id,
            mode = "stream",
            model = %self.provider.model(),
            otel.name = "conversation_turn"
        );

        let Orchestrator {
            ref provider,
            ref registry,
            ref mut transcript,
            ref config,
            ref rate_limiter,
        } = *self;

        async_stream::stream! {
            let mut turn = Turn::begin(transcript, text);

            let prepared = async {
                admit(rate_limiter.as_deref())?;
                resolve_tools(&**provider, registry, config, turn.transcript()).await?;
                let request = CompletionRequest::new(turn.transcript().messages().to_vec());
                Ok::<_, TurnError>(provider.stream(request).await?)
            }
            .instrument(span.clone())
            .await;

            let mut chunks = match prepared {
                Ok(chunks) => chunks,
                Err(e) => {
                    record_failure("stream", &e, &span);
                    let fragment = format!("Error: {e}");
                    turn.append(&fragment);
                    yield fragment;
                    return;
                }
            };

            let mut late_calls = ToolCallAccumulator::new();
            while let Some(item) = chunks.next().await {
                match item {
                    Ok(chunk) => {
                        if let Err(e) = late_calls.apply(&chunk) {
                            debug!(parent: &span, error = %e, "ignoring streamed tool call delta");
                        }
                        if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                            turn.append(&content);
                            yield content;
                        }
                    }
                    Err(e) => {
                        let e = TurnError::from(e);
                        record_failure("stream", &e, &span);
                        let fragment = format!("Error: {e}");
                        turn.append(&fragment);
                        yield fragment;
                        return;
                    }
                }
            }

            late_calls.close();
            match late_calls.finish() {
                Ok(calls) if !calls.is_empty() => {
                    let names: Vec<&str> = calls.iter().map(ToolCall::name).collect();
                    warn!(parent: &span, tools = ?names, "tool calls requested while streaming are not executed");
                }
                Ok(_) => {}
                Err(e) => debug!(parent: &span, error = %e, "discarding partial streamed tool call"),
            }
            CONVERSATION_TURNS.with_label_values(&["stream", "answered"]).inc();
            turn.commit();
        }
    }
}

/// Take a token from the limiter, if one is configured
fn admit(limiter: Option<&RateLimiter>) -> Result<(), TurnError> {
    match limiter {
        Some(limiter) => Ok(limiter.check()?),
        None => Ok(()),
    }
}

fn record_failure(mode: &str, error: &TurnError, span: &Span) {
    let outcome = match error {
        TurnError::RateLimited(_) => "rate_limited",
        _ => "error",
    };
    CONVERSATION_TURNS.with_label_values(&[mode, outcome]).inc();
    warn!(parent: span, error = %error, outcome, "conversation turn failed");
}

/// Run up to `max_tool_rounds` completions with tools attached
///
/// # Returns
/// `Some(text)` when the model answered without requesting tools, or
/// `None` when the rounds were spent on tool calls and a final answer is
/// still needed.
async fn resolve_tools(
    provider: &dyn CompletionProvider,
    registry: &ToolRegistry,
    config: &OrchestratorConfig,
    transcript: &mut Transcript,
) -> Result<Option<String>, TurnError> {
    for round in 0..config.max_tool_rounds.max(1) {
        let request =
            CompletionRequest::new(transcript.messages().to_vec()).with_tools(registry.list_definitions());
        let result = provider.complete(request).await?;
        let message = result.message().cloned().ok_or(CompletionError::EmptyResponse)?;

        if message.requested_tools().is_empty() {
            return Ok(Some(message.content.unwrap_or_default()));
        }

        let calls = message.requested_tools().to_vec();
        info!(round, tool_calls = calls.len(), "dispatching tool calls");
        let results: Vec<Message> = futures_util::stream::iter(calls)
            .map(|call: ToolCall| async move { registry.respond(&call).await })
            .buffered(config.max_concurrent_tools.max(1))
            .collect()
            .await;
        transcript.push_tool_round(message, results)?;
    }
    Ok(None)
}

/// Completion over the transcript with no tools attached
async fn final_answer(provider: &dyn CompletionProvider, transcript: &Transcript) -> Result<String, TurnError> {
    let request = CompletionRequest::new(transcript.messages().to_vec());
    let result = provider.complete(request).await?;
    let message = result.message().ok_or(CompletionError::EmptyResponse)?;
    Ok(message.text().to_string())
}

/// One turn's hold on the transcript
///
/// The user message is appended on creation. The assistant reply is
/// appended by [`finish`](Self::finish) or [`commit`](Self::commit), or
/// on drop with whatever text was gathered.
struct Turn<'a> {
    transcript: &'a mut Transcript,
    reply: String,
    done: bool,
}

impl<'a> Turn<'a> {
    fn begin(transcript: &'a mut Transcript, text: &str) -> Self {
        transcript.push_user(text);
        Self {
            transcript,
            reply: String::new(),
            done: false,
        }
    }

    fn transcript(&mut self) -> &mut Transcript {
        &mut *self.transcript
    }

    fn append(&mut self, fragment: &str) {
        self.reply.push_str(fragment);
    }

    fn finish(&mut self, reply: &str) {
        self.reply = reply.to_string();
        self.commit();
    }

    fn commit(&mut self) {
        if !self.done {
            self.done = true;
            self.transcript.push_assistant(std::mem::take(&mut self.reply));
        }
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.commit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::completion::{
        ChunkStream, Choice, CompletionMetadata, CompletionResult, Role, StreamChunk, Usage,
    };
    use crate::health::HealthStatus;
    use crate::tools::ToolGroup;

    /// Plays back canned completions and records every request
    #[derive(Default)]
    struct ScriptedProvider {
        completions: Mutex<VecDeque<Result<Message, CompletionError>>>,
        chunks: Mutex<Vec<StreamChunk>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(completions: Vec<Result<Message, CompletionError>>) -> Self {
            Self {
                completions: Mutex::new(completions.into()),
                ..Self::default()
            }
        }

        fn with_chunks(self, chunks: Vec<StreamChunk>) -> Self {
            *self.chunks.lock().unwrap() = chunks;
            self
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult, CompletionError> {
            self.requests.lock().unwrap().push(request);
            let next = self
                .completions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(CompletionError::EmptyResponse))?;
            Ok(CompletionResult {
                choices: vec![Choice {
                    index: 0,
                    message: next,
                    finish_reason: Some("stop".to_string()),
                }],
                usage: Usage::default(),
                metadata: CompletionMetadata {
                    duration: 0.0,
                    model: "scripted".to_string(),
                    id: "cmpl-test".to_string(),
                    created: 0,
                },
            })
        }

        async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, CompletionError> {
            self.requests.lock().unwrap().push(request);
            let chunks: Vec<Result<StreamChunk, CompletionError>> =
                self.chunks.lock().unwrap().drain(..).map(Ok).collect();
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus::healthy(0.0)
        }
    }

    #[derive(serde::Deserialize, schemars::JsonSchema)]
    struct LookupParams {
        key: String,
    }

    fn registry() -> Arc<ToolRegistry> {
        let group = ToolGroup::new("test").tool("lookup", "Look a key up", |p: LookupParams| async move {
            format!("value of {}", p.key)
        });
        Arc::new(ToolRegistry::new(vec![group]).unwrap())
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> Orchestrator {
        Orchestrator::new(provider, registry(), OrchestratorConfig::default())
    }

    fn tool_request(calls: &[(&str, &str, &str)]) -> Message {
        Message::assistant_tool_calls(
            None,
            calls.iter().map(|(id, name, args)| ToolCall::new(*id, *name, *args)).collect(),
        )
    }

    #[tokio::test]
    async fn test_direct_answer_uses_one_completion() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(Message::assistant("Hi there"))]));
        let mut agent = orchestrator(provider.clone());

        assert_eq!(agent.send_message("hello").await, "Hi there");
        assert_eq!(agent.messages().len(), 2);
        assert_eq!(provider.requests().len(), 1);
        assert_eq!(provider.requests()[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_then_final_answer_without_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_request(&[("call_1", "lookup", r#"{"key":"a"}"#), ("call_2", "lookup", r#"{"key":"b"}"#)])),
            Ok(Message::assistant("a and b looked up")),
        ]));
        let mut agent = orchestrator(provider.clone());

        assert_eq!(agent.send_message("look up a and b").await, "a and b looked up");

        let roles: Vec<Role> = agent.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]);
        assert_eq!(agent.messages()[2].text(), "value of a");
        assert_eq!(agent.messages()[3].tool_call_id.as_deref(), Some("call_2"));
        assert!(agent.transcript().validate().is_ok());

        let requests = provider.requests();
        assert!(requests[1].tools.is_empty());
        assert_eq!(requests[1].messages.len(), 4);
    }

    fn multi_round(provider: Arc<ScriptedProvider>) -> Orchestrator {
        let config = OrchestratorConfig {
            max_tool_rounds: 2,
            ..OrchestratorConfig::default()
        };
        Orchestrator::new(provider, registry(), config)
    }

    /// Every allowed round requests tools, so the turn ends with a forced no-tools completion
    #[tokio::test]
    async fn test_tool_rounds_exhausted_force_final_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_request(&[("call_1", "lookup", r#"{"key":"a"}"#)])),
            Ok(tool_request(&[("call_2", "lookup", r#"{"key":"b"}"#)])),
            Ok(Message::assistant("a then b")),
        ]));
        let mut agent = multi_round(provider.clone());

        assert_eq!(agent.send_message("look up a, then b").await, "a then b");

        let roles: Vec<Role> = agent.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(agent.messages()[4].text(), "value of b");
        assert!(agent.transcript().validate().is_ok());

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert!(!requests[0].tools.is_empty());
        assert!(!requests[1].tools.is_empty());
        assert!(requests[2].tools.is_empty());
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[2].messages.len(), 5);
    }

    /// A direct answer in a later round ends the turn without a forced completion
    #[tokio::test]
    async fn test_second_round_direct_answer_ends_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_request(&[("call_1", "lookup", r#"{"key":"a"}"#)])),
            Ok(Message::assistant("a is known")),
        ]));
        let mut agent = multi_round(provider.clone());

        assert_eq!(agent.send_message("look up a").await, "a is known");

        let roles: Vec<Role> = agent.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert!(agent.transcript().validate().is_ok());

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| !r.tools.is_empty()));
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_abort_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_request(&[("call_x", "does_not_exist", "{}")])),
            Ok(Message::assistant("That tool is unavailable.")),
        ]));
        let mut agent = orchestrator(provider);

        assert_eq!(agent.send_message("try it").await, "That tool is unavailable.");
        let tool = &agent.messages()[2];
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_x"));
        assert!(tool.text().contains("not found"));
    }

    #[tokio::test]
    async fn test_provider_failure_becomes_reply() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(CompletionError::Provider {
            status: Some(429),
            code: Some("rate_limit_exceeded".to_string()),
            message: "Rate limit reached".to_string(),
        })]));
        let mut agent = orchestrator(provider);

        let reply = agent.send_message("hello").await;
        assert_eq!(
            reply,
            "Error processing message: Rate limit reached (status: 429, code: rate_limit_exceeded)"
        );
        assert_eq!(agent.messages().len(), 2);
        assert_eq!(agent.messages()[1].text(), reply);
    }

    #[tokio::test]
    async fn test_one_user_and_one_terminal_reply_per_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(Message::assistant("first")),
            Ok(tool_request(&[("c1", "lookup", r#"{"key":"k"}"#)])),
            Err(CompletionError::EmptyResponse),
        ]));
        let mut agent = orchestrator(provider);

        agent.send_message("one").await;
        agent.send_message("two").await;

        let users = agent.messages().iter().filter(|m| m.role == Role::User).count();
        let replies = agent
            .messages()
            .iter()
            .filter(|m| m.role == Role::Assistant && m.requested_tools().is_empty())
            .count();
        assert_eq!((users, replies), (2, 2));
        assert!(agent.messages().last().unwrap().text().starts_with("Error processing message:"));
        assert!(agent.transcript().validate().is_ok());
    }

    #[tokio::test]
    async fn test_system_prompt_leads_transcript() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(Message::assistant("ok"))]));
        let config = OrchestratorConfig {
            system_prompt: Some("You are terse.".to_string()),
            ..OrchestratorConfig::default()
        };
        let mut agent = Orchestrator::new(provider.clone(), registry(), config);
        agent.send_message("hi").await;

        assert_eq!(provider.requests()[0].messages[0].role, Role::System);
        assert_eq!(agent.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_denied_turn_still_gets_reply() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(Message::assistant("ok"))]));
        let limiter = Arc::new(RateLimiter::new(1, 0.001));
        let mut agent = orchestrator(provider.clone()).with_rate_limiter(limiter);

        assert_eq!(agent.send_message("first").await, "ok");
        let reply = agent.send_message("second").await;

        assert!(reply.starts_with("Error processing message: rate limited"));
        assert_eq!(agent.messages().len(), 4);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_yields_content_and_records_reply() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![Ok(Message::assistant("unused"))]).with_chunks(vec![
                StreamChunk {
                    content: Some("Hel".to_string()),
                    ..StreamChunk::default()
                },
                StreamChunk {
                    content: Some("lo".to_string()),
                    finish_reason: Some("stop".to_string()),
                    ..StreamChunk::default()
                },
            ]),
        );
        let mut agent = orchestrator(provider.clone());

        let fragments: Vec<String> = agent.stream_message("greet me").collect().await;
        assert_eq!(fragments, vec!["Hel", "lo"]);
        assert_eq!(agent.messages().len(), 2);
        assert_eq!(agent.messages()[1].text(), "Hello");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].tools.is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_yields_error_fragment() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(CompletionError::EmptyResponse)]));
        let mut agent = orchestrator(provider);

        let fragments: Vec<String> = agent.stream_message("hello").collect().await;
        assert_eq!(fragments, vec!["Error: completion response contained no choices"]);
        assert_eq!(agent.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_stream_still_records_reply() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![Ok(Message::assistant("unused"))]).with_chunks(vec![
                StreamChunk {
                    content: Some("partial".to_string()),
                    ..StreamChunk::default()
                },
                StreamChunk {
                    content: Some(" never read".to_string()),
                    ..StreamChunk::default()
                },
            ]),
        );
        let mut agent = orchestrator(provider);

        {
            let mut stream = Box::pin(agent.stream_message("go"));
            assert_eq!(stream.next().await.as_deref(), Some("partial"));
        }

        assert_eq!(agent.messages().len(), 2);
        assert_eq!(agent.messages()[1].text(), "partial");
    }
}
