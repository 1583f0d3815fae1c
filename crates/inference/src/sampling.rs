use crate::{Error, Result};

/// Validated bundle of sampling knobs.
///
/// Construction and every mutation path go through [`SamplingParams::validate`],
/// so a value of this type is always in range.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    /// Sampling temperature, 0.0-2.0. Higher is more random.
    pub temperature: f32,
    /// Nucleus sampling threshold, 0.0-1.0.
    pub top_p: f32,
    /// Top-k sampling limit. 0 disables it.
    pub top_k: u32,
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Minimum number of tokens before stop sequences apply.
    pub min_tokens: u32,
    /// Penalty for repeating tokens. 1.0 is no penalty.
    pub repetition_penalty: f32,
    /// Penalty for tokens that have appeared at all, -2.0-2.0.
    pub presence_penalty: f32,
    /// Penalty scaled by token frequency, -2.0-2.0.
    pub frequency_penalty: f32,
    /// Sequences that stop generation when emitted.
    pub stop_sequences: Vec<String>,
    /// Seed for reproducible generation.
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            top_k: 0,
            max_tokens: 512,
            min_tokens: 0,
            repetition_penalty: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            stop_sequences: Vec::new(),
            seed: None,
        }
    }
}

/// Field overrides applied to an existing [`SamplingParams`] value.
#[derive(Debug, Clone, Default)]
pub struct SamplingOverrides {
    /// Replacement temperature.
    pub temperature: Option<f32>,
    /// Replacement top-p.
    pub top_p: Option<f32>,
    /// Replacement max_tokens.
    pub max_tokens: Option<u32>,
    /// Replacement presence penalty.
    pub presence_penalty: Option<f32>,
    /// Replacement frequency penalty.
    pub frequency_penalty: Option<f32>,
    /// Replacement stop sequences.
    pub stop_sequences: Option<Vec<String>>,
}

impl SamplingParams {
    /// Preset for exploratory, varied output.
    pub fn creative() -> Self {
        Self {
            temperature: 1.2,
            top_p: 0.95,
            top_k: 50,
            repetition_penalty: 1.1,
            ..Self::default()
        }
    }

    /// Preset for focused, factual output.
    pub fn precise() -> Self {
        Self {
            temperature: 0.3,
            top_p: 0.9,
            top_k: 20,
            repetition_penalty: 1.05,
            ..Self::default()
        }
    }

    /// Preset for reproducible output.
    pub fn deterministic() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            top_k: 0,
            seed: Some(42),
            ..Self::default()
        }
    }

    /// Check every knob against its domain.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::InvalidInput(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            )));
        }

        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(Error::InvalidInput(format!(
                "top_p must be between 0.0 and 1.0, got {}",
                self.top_p
            )));
        }

        if self.max_tokens == 0 {
            return Err(Error::InvalidInput("max_tokens must be positive".into()));
        }

        if self.min_tokens > self.max_tokens {
            return Err(Error::InvalidInput(format!(
                "min_tokens ({}) cannot exceed max_tokens ({})",
                self.min_tokens, self.max_tokens
            )));
        }

        if self.repetition_penalty < 0.0 {
            return Err(Error::InvalidInput(format!(
                "repetition_penalty must be non-negative, got {}",
                self.repetition_penalty
            )));
        }

        if !(-2.0..=2.0).contains(&self.presence_penalty) {
            return Err(Error::InvalidInput(format!(
                "presence_penalty must be between -2.0 and 2.0, got {}",
                self.presence_penalty
            )));
        }

        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return Err(Error::InvalidInput(format!(
                "frequency_penalty must be between -2.0 and 2.0, got {}",
                self.frequency_penalty
            )));
        }

        Ok(())
    }

    /// Apply overrides and re-validate.
    pub fn with_overrides(&self, overrides: SamplingOverrides) -> Result<Self> {
        let mut params = self.clone();

        if let Some(temperature) = overrides.temperature {
            params.temperature = temperature;
        }
        if let Some(top_p) = overrides.top_p {
            params.top_p = top_p;
        }
        if let Some(max_tokens) = overrides.max_tokens {
            params.max_tokens = max_tokens;
        }
        if let Some(presence_penalty) = overrides.presence_penalty {
            params.presence_penalty = presence_penalty;
        }
        if let Some(frequency_penalty) = overrides.frequency_penalty {
            params.frequency_penalty = frequency_penalty;
        }
        if let Some(stop_sequences) = overrides.stop_sequences {
            params.stop_sequences = stop_sequences;
        }

        params.validate()?;
        Ok(params)
    }

    /// Copy with a new token budget, re-validated.
    pub fn with_max_tokens(&self, max_tokens: u32) -> Result<Self> {
        let mut params = self.clone();
        params.max_tokens = max_tokens;
        params.min_tokens = params.min_tokens.min(max_tokens);
        params.validate()?;
        Ok(params)
    }
}
