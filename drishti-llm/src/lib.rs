//! drishti-llm: vision-language chat for drishti
//!
//! A thin client for OpenAI-compatible multimodal chat endpoints. drishti uses
//! it to ask questions about a single camera frame, sent inline as a data URI.

pub mod client;
pub mod config;
pub mod error;

pub use client::{extract_text, VisionChatClient};
pub use config::ChatConfig;
pub use error::{LLMError, Result};
