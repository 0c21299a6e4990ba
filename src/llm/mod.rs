//! LLM client module for interacting with language models.
//!
//! Uses RIG with the Groq provider for hosted inference.

mod client;

pub use client::{JsonAgent, LlmClient, LlmError};
