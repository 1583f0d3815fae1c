use std::{fmt, str::FromStr};

use crate::HarmonyError;

/// A vocabulary entry identifier.
pub type TokenId = u32;

/// Channel carrying the user-facing answer. The only channel that is safe to
/// return to clients without an explicit opt-in.
pub const CHANNEL_FINAL: &str = "final";

/// Channel carrying chain-of-thought. Must never reach a client unless the
/// request explicitly enables reasoning capture.
pub const CHANNEL_ANALYSIS: &str = "analysis";

/// Channel carrying meta-narration such as tool-call preambles.
pub const CHANNEL_COMMENTARY: &str = "commentary";

/// Channel carrying tool-call payloads.
pub const CHANNEL_TOOL_USE: &str = "tool_use";

/// Harmony control tokens and their fixed ids in the o200k-harmony
/// vocabulary.
///
/// The tokenizer cannot resolve these by name, so the codec ships the table
/// at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialToken {
    /// `<|start|>` — opens a message, followed by a role marker.
    Start,
    /// `<|end|>` — closes the current message. Not a terminal marker.
    End,
    /// `<|message|>` — separates the message header from its content.
    Message,
    /// `<|channel|>` — introduces a channel name in the header.
    Channel,
    /// `<|return|>` — terminal: the model finished its turn.
    Return,
    /// `<|call|>` — terminal: the model requests a tool call.
    Call,
}

impl SpecialToken {
    /// Every control token, in scan order for the encoder.
    pub const ALL: [SpecialToken; 6] = [
        SpecialToken::Start,
        SpecialToken::End,
        SpecialToken::Message,
        SpecialToken::Channel,
        SpecialToken::Return,
        SpecialToken::Call,
    ];

    /// The literal wire form of this control token.
    pub fn literal(self) -> &'static str {
        match self {
            Self::Start => "<|start|>",
            Self::End => "<|end|>",
            Self::Message => "<|message|>",
            Self::Channel => "<|channel|>",
            Self::Return => "<|return|>",
            Self::Call => "<|call|>",
        }
    }

    /// The fixed o200k-harmony token id.
    pub fn id(self) -> TokenId {
        match self {
            Self::Start => 200006,
            Self::End => 200007,
            Self::Message => 200008,
            Self::Channel => 200005,
            Self::Return => 200002,
            Self::Call => 200012,
        }
    }

    /// Reverse lookup from a token id.
    pub fn from_id(id: TokenId) -> Option<Self> {
        Self::ALL.into_iter().find(|token| token.id() == id)
    }
}

impl fmt::Display for SpecialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.literal())
    }
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Model identity, dates and channel declarations.
    System,
    /// Deployment instructions. What OpenAI-style APIs call the
    /// "system prompt" lands here.
    Developer,
    /// End-user turns.
    User,
    /// Model turns.
    Assistant,
    /// Tool results fed back into the conversation.
    Tool,
}

impl Role {
    /// The wire form used after `<|start|>`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Developer => "developer",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HarmonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "developer" => Ok(Self::Developer),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(HarmonyError::InvalidInput(format!("unrecognized role '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_token_ids_round_trip() {
        for token in SpecialToken::ALL {
            assert_eq!(SpecialToken::from_id(token.id()), Some(token));
        }
        assert_eq!(SpecialToken::from_id(42), None);
    }

    #[test]
    fn role_parsing_accepts_known_roles() {
        assert_eq!(Role::from_str("system").unwrap(), Role::System);
        assert_eq!(Role::from_str("ASSISTANT").unwrap(), Role::Assistant);
        assert_eq!(Role::from_str(" user ").unwrap(), Role::User);
    }

    #[test]
    fn role_parsing_rejects_unknown_roles() {
        let error = Role::from_str("moderator").unwrap_err();
        assert!(error.to_string().contains("moderator"));
    }
}
