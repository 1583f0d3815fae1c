use std::{path::Path, str::FromStr};

use anyhow::Context;

use crate::{Config, InferenceConfig, ReasoningLevel};

pub(crate) fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse configuration file {}", path.display()))?;

    apply_env(&mut config.inference)?;
    config.validate()?;

    Ok(config)
}

/// Overlay the process environment onto the inference defaults.
///
/// The knobs mirror the original deployment scripts, so an operator can tune
/// the gateway without touching the configuration file.
pub(crate) fn apply_env(inference: &mut InferenceConfig) -> anyhow::Result<()> {
    if let Some(value) = env_var("TEMPERATURE") {
        inference.temperature = value
            .parse()
            .with_context(|| format!("invalid TEMPERATURE value '{value}'"))?;
    }

    if let Some(value) = env_var("TOP_P") {
        inference.top_p = value.parse().with_context(|| format!("invalid TOP_P value '{value}'"))?;
    }

    if let Some(value) = env_var("MAX_TOKENS") {
        inference.max_tokens = value
            .parse()
            .with_context(|| format!("invalid MAX_TOKENS value '{value}'"))?;
    }

    if let Some(value) = env_var("STOP_SEQUENCES") {
        inference.stop_sequences = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }

    if let Some(value) = env_var("REASONING_LEVEL") {
        inference.reasoning = Some(ReasoningLevel::from_str(&value)?);
    }

    if let Some(value) = env_var("CAPTURE_REASONING") {
        inference.capture_reasoning = parse_bool(&value);
    }

    if let Some(value) = env_var("KNOWLEDGE_CUTOFF") {
        inference.knowledge_cutoff = value;
    }

    if let Some(value) = env_var("CURRENT_DATE") {
        inference.current_date = Some(value);
    }

    if let Some(value) = env_var("STREAMING") {
        inference.streaming = parse_bool(&value);
    }

    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
