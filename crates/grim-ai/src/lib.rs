//! LLM provider clients for the narrator benchmark.
//!
//! Each provider is an opaque text-completion capability: system prompt plus
//! user prompt in, text plus latency and token usage out. Two dialects cover
//! the benchmarked providers: Google `generateContent` (Gemini) and the
//! OpenAI-compatible `chat/completions` shape (DeepSeek).

mod gemini;
mod openai_compat;
mod retry;
mod types;

pub use gemini::{GeminiClient, GeminiConfig};
pub use openai_compat::{OpenAiCompatClient, OpenAiCompatConfig};
pub use types::{AiError, Completion, CompletionRequest, LlmClient, TokenUsage};
