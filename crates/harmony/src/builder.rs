use std::{fmt, sync::Arc};

use serde_json::Value;

use crate::{
    HarmonyError, Result,
    encoding::Tokenizer,
    tokens::{Role, TokenId},
};

/// Fixed identity line the model family is trained against. Changing it
/// degrades channel adherence.
const IDENTITY: &str = "You are ChatGPT, a large language model trained by OpenAI.";

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful AI assistant.";

/// An incoming conversation message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Author of the message.
    pub role: Role,
    /// Message text. Must be non-empty after trimming.
    pub content: String,
}

impl Message {
    /// Convenience constructor.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Reasoning effort tier declared in the system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    /// Fast, shallow reasoning.
    Low,
    /// Balanced depth.
    Medium,
    /// Deep chain-of-thought.
    High,
}

impl ReasoningEffort {
    /// Derive the effort tier from the public temperature knob.
    ///
    /// Low temperatures ask for terse factual output, high temperatures for
    /// thorough open-ended output; the tier follows.
    pub fn from_temperature(temperature: f32) -> Self {
        if temperature <= 0.3 {
            Self::Low
        } else if temperature >= 0.8 {
            Self::High
        } else {
            Self::Medium
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
        }
    }
}

/// A tool exposed to the model, rendered into the developer message as a
/// function-like signature.
#[derive(Debug, Clone)]
pub struct ToolDef {
    /// Function name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON-schema object with `properties` and `required`.
    pub parameters: Value,
}

/// Everything needed to build the prompt for one generation turn.
#[derive(Debug, Clone)]
pub struct PromptRequest<'a> {
    /// Effort tier for the system message.
    pub reasoning: ReasoningEffort,
    /// Knowledge cutoff, `YYYY-MM`.
    pub knowledge_cutoff: &'a str,
    /// Current date, `YYYY-MM-DD`.
    pub current_date: &'a str,
    /// Conversation so far.
    pub messages: &'a [Message],
    /// Tools to expose, if any.
    pub tools: Option<&'a [ToolDef]>,
}

/// Metadata attached to a built prompt, for logging and usage accounting.
#[derive(Debug, Clone)]
pub struct PromptMetadata {
    /// Number of conversation messages rendered.
    pub message_count: usize,
    /// Whether a tools section was rendered.
    pub has_tools: bool,
    /// Effort tier declared in the system message.
    pub reasoning: ReasoningEffort,
}

/// A prompt ready for the engine.
///
/// `token_ids` is the sole engine input; `text` exists for debug logging.
#[derive(Debug, Clone)]
pub struct HarmonyPrompt {
    /// Encoded prompt.
    pub token_ids: Vec<TokenId>,
    /// Rendered wire text, for logs only.
    pub text: String,
    /// Build metadata.
    pub meta: PromptMetadata,
}

/// Builds Harmony prompts: system block, developer block, conversation, and
/// the open `<|start|>assistant` generation prompt.
///
/// Stateless and cheap to clone; all methods are safe to call concurrently.
#[derive(Clone)]
pub struct PromptBuilder {
    tokenizer: Arc<dyn Tokenizer>,
}

impl PromptBuilder {
    /// Create a builder over the given tokenizer.
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    /// Build the prompt for the upcoming generation turn.
    pub fn build(&self, request: &PromptRequest<'_>) -> Result<HarmonyPrompt> {
        validate(request)?;

        let mut text = render_system(request);
        text.push_str(&render_developer(request));
        text.push_str(&render_conversation(request.messages));

        // Generation prompt: the engine continues inside this open
        // assistant turn, so there is no closing token.
        text.push_str("<|start|>assistant");

        let token_ids = self.tokenizer.encode(&text, true);

        log::debug!(
            "built Harmony prompt: {tokens} tokens, {chars} chars, reasoning={reasoning}",
            tokens = token_ids.len(),
            chars = text.len(),
            reasoning = request.reasoning,
        );

        Ok(HarmonyPrompt {
            token_ids,
            text,
            meta: PromptMetadata {
                message_count: request.messages.len(),
                has_tools: request.tools.is_some_and(|tools| !tools.is_empty()),
                reasoning: request.reasoning,
            },
        })
    }
}

fn validate(request: &PromptRequest<'_>) -> Result<()> {
    if request.knowledge_cutoff.trim().is_empty() {
        return Err(HarmonyError::InvalidInput("knowledge_cutoff cannot be empty".into()));
    }

    if request.current_date.trim().is_empty() {
        return Err(HarmonyError::InvalidInput("current_date cannot be empty".into()));
    }

    if request.messages.is_empty() {
        return Err(HarmonyError::InvalidInput("messages list cannot be empty".into()));
    }

    for (index, message) in request.messages.iter().enumerate() {
        if message.content.trim().is_empty() {
            return Err(HarmonyError::InvalidInput(format!(
                "message at index {index} has empty content"
            )));
        }
    }

    for tool in request.tools.unwrap_or_default() {
        if tool.name.trim().is_empty() {
            return Err(HarmonyError::InvalidInput("tool definition missing a name".into()));
        }
    }

    Ok(())
}

fn render_system(request: &PromptRequest<'_>) -> String {
    let mut text = format!(
        "<|start|>system<|message|>{IDENTITY}\n\
         Knowledge cutoff: {cutoff}\n\
         Current date: {date}\n\n\
         Reasoning: {reasoning}\n\n\
         # Valid channels: analysis, commentary, final. Channel must be included for every message.",
        cutoff = request.knowledge_cutoff,
        date = request.current_date,
        reasoning = request.reasoning,
    );

    if request.tools.is_some_and(|tools| !tools.is_empty()) {
        text.push_str("\nCalls to tools must be routed to the 'tool_use' channel.");
    }

    text.push_str("<|end|>");
    text
}

fn render_developer(request: &PromptRequest<'_>) -> String {
    // The outer API's "system prompt" becomes the developer instructions.
    let instructions = request
        .messages
        .iter()
        .find(|message| message.role == Role::System)
        .map(|message| message.content.trim())
        .unwrap_or(DEFAULT_INSTRUCTIONS);

    let mut text = format!("<|start|>developer<|message|># Instructions\n\n{instructions}");

    if let Some(tools) = request.tools.filter(|tools| !tools.is_empty()) {
        text.push_str("\n\n# Tools\n\nYou have access to the following functions:\n");

        for tool in tools {
            text.push('\n');
            text.push_str(&render_tool(tool));
        }
    }

    text.push_str("<|end|>");
    text
}

fn render_tool(tool: &ToolDef) -> String {
    let mut signature = format!("function {}(\n", tool.name);

    let required: Vec<&str> = tool
        .parameters
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if let Some(properties) = tool.parameters.get("properties").and_then(Value::as_object) {
        for (name, schema) in properties {
            let kind = schema.get("type").and_then(Value::as_str).unwrap_or("any");
            let optional = if required.contains(&name.as_str()) { "" } else { "?" };

            match schema.get("description").and_then(Value::as_str) {
                Some(description) => {
                    signature.push_str(&format!("  {name}{optional}: {kind}  // {description}\n"));
                }
                None => signature.push_str(&format!("  {name}{optional}: {kind}\n")),
            }
        }
    }

    signature.push_str(")\n");

    let description = if tool.description.trim().is_empty() {
        "No description provided"
    } else {
        tool.description.trim()
    };

    signature.push_str(&format!("// {description}\n"));
    signature
}

fn render_conversation(messages: &[Message]) -> String {
    let mut text = String::new();

    for message in messages {
        match message.role {
            // Already folded into the developer block.
            Role::System | Role::Developer => {}
            Role::User => {
                text.push_str(&format!("<|start|>user<|message|>{}<|end|>", message.content));
            }
            // Prior assistant turns are post-filtered final content.
            Role::Assistant => {
                text.push_str(&format!(
                    "<|start|>assistant<|channel|>final<|message|>{}<|end|>",
                    message.content
                ));
            }
            Role::Tool => {
                text.push_str(&format!("<|start|>tool<|message|>{}<|end|>", message.content));
            }
        }
    }

    text
}
