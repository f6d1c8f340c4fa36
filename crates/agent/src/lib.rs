//! Conversation orchestration for the operations gateway.
//!
//! One chat turn runs a constrained loop:
//! 1. **Guardrail** (`guardrails`) screens the message and counts violations per session.
//! 2. **Capabilities** short-circuit with the operation catalog.
//! 3. **Intent routing** (`intent`) maps keywords to at most one read operation.
//! 4. **Resource read** goes through an `OperationExecutor`; failures become a
//!    data-unavailable note, never an error to the caller.
//! 5. **Generation** (`llm`) produces the reply from the system prompt, bounded history
//!    (`conversation`) and the current message.
//!
//! The language backend only phrases answers. Which data is read, and whether a request is
//! allowed at all, is decided before it is called.

pub mod conversation;
pub mod guardrails;
pub mod intent;
pub mod llm;
pub mod runtime;

pub use conversation::{ChatMessage, ChatRole, ConversationHistory};
pub use guardrails::{
    GuardrailDecision, GuardrailPolicy, GuardrailState, ViolationClass, ViolationCounter,
};
pub use intent::{IntentMatch, IntentRouter, RouterDefaults};
pub use llm::{LlmClient, LlmError, OpenAiCompatibleClient};
pub use runtime::{AgentRuntime, SessionContext, TurnOutcome, TurnReply};
