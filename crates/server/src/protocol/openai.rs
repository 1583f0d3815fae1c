use serde::{Deserialize, Serialize};

/// Request body for the OpenAI chat completions API.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    /// The model to use for the completion.
    pub model: String,

    /// The conversation so far.
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature, 0.0 to 2.0.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Nucleus sampling threshold.
    #[serde(default)]
    pub top_p: Option<f32>,

    /// Maximum number of tokens to generate.
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Stop sequences; a single string or a list.
    #[serde(default)]
    pub stop: Option<StopSequences>,

    /// Presence penalty, -2.0 to 2.0.
    #[serde(default)]
    pub presence_penalty: Option<f32>,

    /// Frequency penalty, -2.0 to 2.0.
    #[serde(default)]
    pub frequency_penalty: Option<f32>,

    /// Stream the response as Server-Sent Events.
    #[serde(default)]
    pub stream: Option<bool>,
}

/// A chat message with a role string and text content.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    /// "system", "developer", "user" or "assistant".
    pub role: String,
    /// Message text.
    pub content: String,
}

/// The `stop` field accepts a single string or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    /// One stop sequence.
    One(String),
    /// Several stop sequences.
    Many(Vec<String>),
}

impl StopSequences {
    /// Normalize to a list.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(stop) => vec![stop],
            Self::Many(stops) => stops,
        }
    }
}

/// Non-streaming chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Completion id, `chatcmpl-*`.
    pub id: String,
    /// Always "chat.completion".
    pub object: String,
    /// Unix timestamp of creation.
    pub created: u64,
    /// The model that produced the completion.
    pub model: String,
    /// Generated choices; always exactly one.
    pub choices: Vec<ChatChoice>,
    /// Token accounting.
    pub usage: Usage,
}

/// One generated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Choice index, always 0.
    pub index: u32,
    /// The generated message.
    pub message: ChatMessage,
    /// Why generation stopped.
    pub finish_reason: String,
}

/// Token usage accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: usize,
    /// Tokens in the completion.
    pub completion_tokens: usize,
    /// Sum of both.
    pub total_tokens: usize,
}

/// One streamed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Completion id, shared by every chunk of one response.
    pub id: String,
    /// Always "chat.completion.chunk".
    pub object: String,
    /// Unix timestamp of creation.
    pub created: u64,
    /// The model producing the completion.
    pub model: String,
    /// Incremental choices; always exactly one.
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    /// A chunk with the given delta and optional finish reason.
    pub fn new(id: &str, created: u64, model: &str, delta: Delta, finish_reason: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}

/// One incremental choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Choice index, always 0.
    pub index: u32,
    /// Incremental update.
    pub delta: Delta,
    /// Present on the last chunk only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Incremental message update. The first chunk carries the role, middle
/// chunks carry content, the last chunk is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    /// Present on the first chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Present on content chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Delta {
    /// First-chunk delta carrying the assistant role.
    pub fn role() -> Self {
        Self {
            role: Some("assistant".to_string()),
            content: None,
        }
    }

    /// Content-chunk delta.
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            role: None,
            content: Some(text.into()),
        }
    }
}

/// Model metadata for `/v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier.
    pub id: String,
    /// Always "model".
    pub object: String,
    /// Unix timestamp of creation.
    pub created: u64,
    /// Owner; always "local".
    pub owned_by: String,
}

/// Response for `/v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    /// Always "list".
    pub object: String,
    /// Available models.
    pub data: Vec<Model>,
}
