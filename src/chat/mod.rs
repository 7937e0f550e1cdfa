//! Chat 모듈 - 대화 메모리, 프롬프트, 대화 엔진, 엔진 캐시

mod engine;
mod memory;
mod prompt;
mod service;

// Re-exports
pub use engine::{collect_citations, is_refusal, ChatEngine, ChatResponse, ChatSession, ChatState};
pub use memory::{estimate_tokens, ChatMemory, ChatMessage, ChatRole};
pub use prompt::{build_context, condense_prompt, qa_prompt, REFUSAL_MESSAGE, SYSTEM_PROMPT};
pub use service::{build_engine, EngineService};
