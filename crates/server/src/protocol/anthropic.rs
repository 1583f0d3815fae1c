use harmony::FinishReason;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_max_tokens() -> u32 {
    1024
}

/// Request body for the Anthropic Messages API.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    /// The model to use for the completion.
    pub model: String,

    /// Conversation messages, alternating user and assistant turns.
    pub messages: Vec<InputMessage>,

    /// System prompt, a string or a list of typed text blocks. Folded into
    /// a synthetic first system message.
    #[serde(default)]
    pub system: Option<SystemPrompt>,

    /// Maximum number of tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Nucleus sampling threshold.
    #[serde(default)]
    pub top_p: Option<f32>,

    /// Top-k sampling limit.
    #[serde(default)]
    pub top_k: Option<u32>,

    /// Sequences that stop generation.
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,

    /// Stream the response as Server-Sent Events.
    #[serde(default)]
    pub stream: Option<bool>,

    /// Opaque request metadata; accepted and ignored.
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// An incoming message whose content is a string or a list of blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct InputMessage {
    /// "user" or "assistant".
    pub role: String,
    /// Message content.
    pub content: MessageContent,
}

/// String-or-blocks content container.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Typed blocks; only `type: "text"` is honored.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Extract the text, joining text blocks and dropping everything else.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Blocks(blocks) => blocks
                .into_iter()
                .filter(|block| block.kind == "text")
                .filter_map(|block| block.text)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// A typed content block. Unknown types deserialize but carry no text.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    /// Block type; only "text" is honored.
    #[serde(rename = "type")]
    pub kind: String,
    /// Text payload for text blocks.
    #[serde(default)]
    pub text: Option<String>,
}

/// The `system` field: a string or a list of typed text blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// Plain text.
    Text(String),
    /// Typed text blocks.
    Blocks(Vec<ContentBlock>),
}

impl SystemPrompt {
    /// Flatten to plain text.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Blocks(blocks) => blocks
                .into_iter()
                .filter(|block| block.kind == "text")
                .filter_map(|block| block.text)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Response body for the Anthropic Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Message id, `msg_*`.
    pub id: String,
    /// Always "message".
    pub r#type: String,
    /// Always "assistant".
    pub role: String,
    /// Response content blocks.
    pub content: Vec<ResponseBlock>,
    /// The model that produced the response.
    pub model: String,
    /// Why generation stopped.
    pub stop_reason: Option<String>,
    /// Stop sequence that triggered, if any.
    pub stop_sequence: Option<String>,
    /// Token accounting.
    pub usage: Usage,
}

/// A text block in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBlock {
    /// Always "text".
    pub r#type: String,
    /// The text.
    pub text: String,
}

impl ResponseBlock {
    /// A text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            r#type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Token usage in Anthropic terms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub input_tokens: usize,
    /// Tokens in the response.
    pub output_tokens: usize,
}

/// Map an internal finish reason onto the dialect's `stop_reason`.
pub fn stop_reason(finish_reason: FinishReason) -> &'static str {
    match finish_reason {
        FinishReason::Stop => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolUse => "tool_use",
        FinishReason::Cancelled => "cancelled",
        FinishReason::Error => "error",
    }
}

/// Streaming event frames for the Messages API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamFrame {
    /// Start of a message.
    #[serde(rename = "message_start")]
    MessageStart {
        /// Initial message metadata.
        message: MessageStart,
    },

    /// A content block begins.
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        /// Block index.
        index: u32,
        /// The block being started.
        content_block: ResponseBlock,
    },

    /// Incremental text.
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        /// Block index.
        index: u32,
        /// The delta payload.
        delta: TextDelta,
    },

    /// A content block is finished.
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {
        /// Block index.
        index: u32,
    },

    /// Final message metadata.
    #[serde(rename = "message_delta")]
    MessageDelta {
        /// Stop reason update.
        delta: MessageDelta,
        /// Final token accounting.
        usage: Usage,
    },

    /// End of the stream.
    #[serde(rename = "message_stop")]
    MessageStop,

    /// An error occurred mid-stream.
    #[serde(rename = "error")]
    Error {
        /// Error details.
        error: ErrorDetails,
    },
}

/// Initial message metadata for `message_start`.
#[derive(Debug, Clone, Serialize)]
pub struct MessageStart {
    /// Message id.
    pub id: String,
    /// Always "message".
    pub r#type: String,
    /// Always "assistant".
    pub role: String,
    /// Initially empty.
    pub content: Vec<ResponseBlock>,
    /// The model producing the response.
    pub model: String,
    /// Accounting known at start.
    pub usage: Usage,
}

/// Text delta payload.
#[derive(Debug, Clone, Serialize)]
pub struct TextDelta {
    /// Always "text_delta".
    pub r#type: String,
    /// Incremental text.
    pub text: String,
}

impl TextDelta {
    /// A text delta.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            r#type: "text_delta".to_string(),
            text: text.into(),
        }
    }
}

/// `message_delta` payload.
#[derive(Debug, Clone, Serialize)]
pub struct MessageDelta {
    /// Final stop reason.
    pub stop_reason: Option<String>,
    /// Stop sequence that triggered, if any.
    pub stop_sequence: Option<String>,
}

/// Error details in the dialect's format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable message.
    pub message: String,
}
