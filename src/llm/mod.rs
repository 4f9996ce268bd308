//! LLM integration for java-migrator.
//!
//! The reasoning engine talks to any OpenAI-compatible chat-completions
//! endpoint (OpenRouter by default, or a LiteLLM proxy) through the
//! [`LlmProvider`] trait. The driver never sees this module directly: it only
//! sees [`crate::engine::ReasoningEngine`].
//!
//! ```ignore
//! use java_migrator::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::new_with_defaults("sk-or-...".to_string())?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello")]);
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_API_BASE, DEFAULT_MODEL,
};
