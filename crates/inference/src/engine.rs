use harmony::TokenId;

use crate::{Result, sampling::SamplingParams};

/// One token emitted by a streaming engine.
///
/// Engines decode incrementally, so `text` is the authoritative decoded form
/// of this step; the id feeds the channel parser.
#[derive(Debug, Clone)]
pub struct EngineToken {
    /// Vocabulary id.
    pub id: TokenId,
    /// Decoded text for this token.
    pub text: String,
}

/// Complete output of a non-streaming generation.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// Generated token ids, control tokens included.
    pub token_ids: Vec<TokenId>,
    /// Engine-reported finish reason, if the engine tracks one. Normalized
    /// by the mediator: anything but "length" is treated as a natural stop,
    /// and Harmony terminal tokens override it either way.
    pub finish_reason: Option<String>,
}

/// Blocking iterator over streamed tokens.
pub type TokenStream = Box<dyn Iterator<Item = Result<EngineToken>> + Send>;

/// The opaque inference runtime.
///
/// Implementations are synchronous and blocking; the mediator dispatches
/// them to a worker thread and serializes every call through the
/// process-wide engine lock.
pub trait Engine: Send + Sync {
    /// Whether the model is loaded and ready to generate.
    fn is_ready(&self) -> bool;

    /// The model's context window in tokens.
    fn context_window(&self) -> usize;

    /// Generate a complete response for the prompt.
    fn generate(&self, prompt: &[TokenId], params: &SamplingParams) -> Result<EngineOutput>;

    /// Generate a response token by token.
    fn generate_stream(&self, prompt: &[TokenId], params: &SamplingParams) -> Result<TokenStream>;

    /// Drop accelerator caches left over from the last generation.
    ///
    /// KV-cache buildup degrades throughput severely across successive
    /// generations, so this runs after every one. Failures are logged and
    /// swallowed by the caller.
    fn clear_cache(&self) -> Result<()>;
}
