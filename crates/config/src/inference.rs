use std::{fmt, str::FromStr};

use anyhow::bail;
use serde::Deserialize;

/// Reasoning effort tier declared in the Harmony system message.
///
/// When no explicit level is configured, the tier is derived from the
/// request temperature instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    /// Fast responses, minimal chain-of-thought.
    Low,
    /// Balanced quality and speed.
    Medium,
    /// Maximum reasoning depth.
    High,
}

impl fmt::Display for ReasoningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
        }
    }
}

impl FromStr for ReasoningLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => bail!("invalid reasoning level '{other}', expected low, medium or high"),
        }
    }
}

/// Default inference parameters and Harmony prompt settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    /// Default sampling temperature when the request omits one.
    pub temperature: f32,
    /// Default nucleus sampling threshold.
    pub top_p: f32,
    /// Default maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Default stop sequences.
    pub stop_sequences: Vec<String>,
    /// Explicit reasoning effort override. Absent means the tier is derived
    /// from the request temperature.
    pub reasoning: Option<ReasoningLevel>,
    /// Capture the `analysis` channel and expose it to dialects that opt in.
    pub capture_reasoning: bool,
    /// Knowledge cutoff declared in the system message, `YYYY-MM`.
    pub knowledge_cutoff: String,
    /// Current date declared in the system message, `YYYY-MM-DD`.
    /// Absent means today's date is used.
    pub current_date: Option<String>,
    /// Operator-side streaming override for the Anthropic dialect.
    pub streaming: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 512,
            stop_sequences: Vec::new(),
            reasoning: None,
            capture_reasoning: false,
            knowledge_cutoff: "2024-06".to_string(),
            current_date: None,
            streaming: false,
        }
    }
}

impl InferenceConfig {
    /// The current date to declare in the system message.
    pub fn current_date_or_today(&self) -> String {
        self.current_date
            .clone()
            .unwrap_or_else(|| jiff::Zoned::now().strftime("%Y-%m-%d").to_string())
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!("inference.temperature must be 0.0-2.0, got {}", self.temperature);
        }

        if !(0.0..=1.0).contains(&self.top_p) {
            bail!("inference.top_p must be 0.0-1.0, got {}", self.top_p);
        }

        if self.max_tokens == 0 {
            bail!("inference.max_tokens must be positive");
        }

        if self.knowledge_cutoff.trim().is_empty() {
            bail!("inference.knowledge_cutoff cannot be empty");
        }

        // YYYY-MM at minimum.
        if self.knowledge_cutoff.len() < 7 {
            bail!(
                "inference.knowledge_cutoff must be in YYYY-MM format, got '{}'",
                self.knowledge_cutoff
            );
        }

        if let Some(ref date) = self.current_date
            && date.trim().is_empty()
        {
            bail!("inference.current_date cannot be empty when set");
        }

        Ok(())
    }
}
