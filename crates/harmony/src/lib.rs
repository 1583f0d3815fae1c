//! Harmony prompt/response codec for gpt-oss class models.
//!
//! Harmony is the multi-channel wire format these models are trained on.
//! Every message is framed as `<|start|>ROLE … <|message|> … <|end|>` with an
//! optional `<|channel|>NAME` header; assistant turns split their output into
//! named channels (`analysis`, `commentary`, `final`) and terminate with a
//! stop-kind token (`<|return|>` for a finished turn, `<|call|>` for a tool
//! call). This crate builds prompts in that framing and parses channel-tagged
//! token streams back out of it, tolerating the malformed output a local
//! model produces under truncation.

mod builder;
mod encoding;
mod parser;
mod tokens;

pub use builder::{HarmonyPrompt, Message, PromptBuilder, PromptMetadata, PromptRequest, ReasoningEffort, ToolDef};
pub use encoding::{HarmonyEncoding, Tokenizer};
pub use parser::{
    FinishReason, ParseMeta, ParsedMessage, ParsedResponse, StreamEvent, StreamParser, extract_channel, is_valid,
    parse_text, parse_tokens, strip_special_tokens,
};
pub use tokens::{CHANNEL_ANALYSIS, CHANNEL_COMMENTARY, CHANNEL_FINAL, CHANNEL_TOOL_USE, Role, SpecialToken, TokenId};

/// Errors produced by the Harmony codec.
///
/// Parsing is deliberately infallible past the empty-input check; only the
/// builder rejects bad input.
#[derive(Debug, thiserror::Error)]
pub enum HarmonyError {
    /// The caller supplied input the codec cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, HarmonyError>;
