//! Conversation orchestration
//!
//! Turns a user message into zero or more tool calls against the sandbox
//! and a final natural-language answer.
//!
//! # Architecture
//!
//! ```text
//! User text → Orchestrator → CompletionProvider (tools attached)
//!                  ↓
//!           tool_calls? ── no ──► reply
//!                  ↓
//!           ToolRegistry.respond(each call, bounded fan-out)
//!                  ↓
//!           SandboxClient.acquire() → session → REST call → release
//!                  ↓
//!           tool messages appended in call order
//!                  ↓
//!           CompletionProvider (no tools) → reply (or streamed fragments)
//! ```

pub mod orchestrator;
pub mod transcript;

pub use orchestrator::{Orchestrator, OrchestratorConfig, TurnError};
pub use transcript::{Transcript, TranscriptError};
