use harmony::HarmonyError;
use thiserror::Error;

/// What the recovery layer is allowed to do with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No retry. The request is wrong or the engine is absent.
    Fatal,
    /// Retry once with reduced parameters.
    Degradable,
    /// Retry with backoff.
    Recoverable,
    /// Report to the caller as-is, without retrying.
    Surface,
}

/// Inference errors, classified for the recovery layer.
#[derive(Debug, Error)]
pub enum Error {
    /// No engine is loaded.
    #[error("model not loaded")]
    NotReady,

    /// The request itself is invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The prompt does not fit the model's context window.
    #[error("prompt length ({prompt_tokens} tokens) exceeds maximum context length ({context_window} tokens)")]
    ContextOverflow {
        /// Tokens in the offending prompt.
        prompt_tokens: usize,
        /// The model's context window.
        context_window: usize,
    },

    /// The accelerator ran out of memory.
    #[error("out of memory: {0}")]
    Memory(String),

    /// A transient failure worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The caller cancelled generation.
    #[error("generation was cancelled")]
    Cancelled,

    /// Anything else. Retried once, then treated as fatal.
    #[error("generation failed: {0}")]
    Unknown(String),
}

impl Error {
    /// Classify this error for the recovery layer.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::NotReady | Self::InvalidInput(_) => Disposition::Fatal,
            Self::ContextOverflow { .. } | Self::Memory(_) => Disposition::Degradable,
            Self::Transient(_) | Self::Unknown(_) => Disposition::Recoverable,
            Self::Cancelled => Disposition::Surface,
        }
    }

    /// Classify an engine-reported failure message by keyword.
    ///
    /// Engines behind the trait boundary report failures as strings; this is
    /// the only place those strings are interpreted.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_ascii_lowercase();

        if lowered.contains("context length") || lowered.contains("context window") {
            return Self::ContextOverflow {
                prompt_tokens: 0,
                context_window: 0,
            };
        }

        if lowered.contains("memory") || lowered.contains("oom") {
            return Self::Memory(message);
        }

        const TRANSIENT: [&str; 5] = ["timeout", "temporary", "busy", "connection", "unavailable"];
        if TRANSIENT.iter().any(|keyword| lowered.contains(keyword)) {
            return Self::Transient(message);
        }

        Self::Unknown(message)
    }

    /// Machine-readable error code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotReady => "model_not_loaded",
            Self::InvalidInput(_) => "invalid_request",
            Self::ContextOverflow { .. } => "context_length_exceeded",
            Self::Memory(_) => "out_of_memory",
            Self::Transient(_) => "transient_failure",
            Self::Cancelled => "cancelled",
            Self::Unknown(_) => "generation_error",
        }
    }
}

impl From<HarmonyError> for Error {
    fn from(error: HarmonyError) -> Self {
        match error {
            HarmonyError::InvalidInput(message) => Self::InvalidInput(message),
        }
    }
}
