//! Dialect request normalization.
//!
//! Both dialects reduce to the same internal call: a list of typed messages
//! plus validated sampling parameters. Defaults come from the gateway
//! configuration; the request overrides them field by field.

use std::str::FromStr;

use config::InferenceConfig;
use harmony::{Message, Role};
use inference::{Error, SamplingParams};

use crate::protocol::{anthropic, openai};

/// Normalize an OpenAI chat completions request.
pub fn openai_request(
    request: openai::ChatCompletionRequest,
    defaults: &InferenceConfig,
) -> Result<(Vec<Message>, SamplingParams), Error> {
    let mut messages = Vec::with_capacity(request.messages.len());

    for message in request.messages {
        messages.push(Message::new(Role::from_str(&message.role)?, message.content));
    }

    let params = SamplingParams {
        temperature: request.temperature.unwrap_or(defaults.temperature),
        top_p: request.top_p.unwrap_or(defaults.top_p),
        max_tokens: request.max_tokens.unwrap_or(defaults.max_tokens),
        presence_penalty: request.presence_penalty.unwrap_or(0.0),
        frequency_penalty: request.frequency_penalty.unwrap_or(0.0),
        stop_sequences: request
            .stop
            .map(openai::StopSequences::into_vec)
            .unwrap_or_else(|| defaults.stop_sequences.clone()),
        ..SamplingParams::default()
    };

    params.validate()?;
    Ok((messages, params))
}

/// Normalize an Anthropic messages request.
///
/// The `system` field becomes a synthetic first system message; block
/// content is flattened to text, dropping non-text blocks.
pub fn anthropic_request(
    request: anthropic::MessagesRequest,
    defaults: &InferenceConfig,
) -> Result<(Vec<Message>, SamplingParams), Error> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.system {
        messages.push(Message::new(Role::System, system.into_text()));
    }

    for message in request.messages {
        messages.push(Message::new(
            Role::from_str(&message.role)?,
            message.content.into_text(),
        ));
    }

    let params = SamplingParams {
        temperature: request.temperature.unwrap_or(defaults.temperature),
        top_p: request.top_p.unwrap_or(defaults.top_p),
        top_k: request.top_k.unwrap_or(0),
        max_tokens: request.max_tokens,
        stop_sequences: request.stop_sequences.unwrap_or_else(|| defaults.stop_sequences.clone()),
        ..SamplingParams::default()
    };

    params.validate()?;
    Ok((messages, params))
}
