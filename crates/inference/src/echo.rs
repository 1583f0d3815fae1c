use std::sync::Arc;

use harmony::{Tokenizer, TokenId};

use crate::{
    Result,
    engine::{Engine, EngineOutput, EngineToken, TokenStream},
    sampling::SamplingParams,
};

const USER_TURN: &str = "<|start|>user<|message|>";

/// Deterministic development backend.
///
/// Replies in well-formed Harmony with a short analysis turn and a final
/// turn echoing the last user message, terminated by `<|return|>`. Useful
/// for driving the gateway end to end without model weights; the reply is a
/// pure function of the prompt.
pub struct EchoEngine {
    tokenizer: Arc<dyn Tokenizer>,
    context_window: usize,
}

impl EchoEngine {
    /// Create an echo backend over the given tokenizer.
    pub fn new(tokenizer: Arc<dyn Tokenizer>, context_window: usize) -> Self {
        Self {
            tokenizer,
            context_window,
        }
    }

    fn reply_tokens(&self, prompt: &[TokenId], params: &SamplingParams) -> Vec<TokenId> {
        let prompt_text = self.tokenizer.decode(prompt);

        let echo = prompt_text
            .rfind(USER_TURN)
            .map(|at| {
                let content = &prompt_text[at + USER_TURN.len()..];
                content.split("<|end|>").next().unwrap_or(content)
            })
            .unwrap_or("I received no user input.");

        let reply = format!(
            "<|channel|>analysis<|message|>Echoing the last user turn.<|end|>\
             <|start|>assistant<|channel|>final<|message|>{echo}<|return|>"
        );

        let mut ids = self.tokenizer.encode(&reply, true);
        // Honor the token budget; a truncated reply loses its terminal
        // marker, which maps to a length finish downstream.
        ids.truncate(params.max_tokens as usize);
        ids
    }
}

impl Engine for EchoEngine {
    fn is_ready(&self) -> bool {
        true
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn generate(&self, prompt: &[TokenId], params: &SamplingParams) -> Result<EngineOutput> {
        Ok(EngineOutput {
            token_ids: self.reply_tokens(prompt, params),
            finish_reason: None,
        })
    }

    fn generate_stream(&self, prompt: &[TokenId], params: &SamplingParams) -> Result<TokenStream> {
        let tokenizer = Arc::clone(&self.tokenizer);
        let ids = self.reply_tokens(prompt, params);

        Ok(Box::new(ids.into_iter().map(move |id| {
            Ok(EngineToken {
                id,
                text: tokenizer.decode(&[id]),
            })
        })))
    }

    fn clear_cache(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use harmony::{HarmonyEncoding, parse_tokens, FinishReason};

    use super::*;

    fn tokenizer() -> Arc<dyn Tokenizer> {
        Arc::new(HarmonyEncoding::o200k().expect("o200k encoding should load"))
    }

    #[test]
    fn echoes_the_last_user_turn() {
        let tokenizer = tokenizer();
        let engine = EchoEngine::new(Arc::clone(&tokenizer), 8192);

        let prompt = tokenizer.encode(
            "<|start|>user<|message|>first<|end|><|start|>user<|message|>second<|end|><|start|>assistant",
            true,
        );

        let output = engine
            .generate(&prompt, &SamplingParams::default())
            .expect("echo should generate");
        let parsed = parse_tokens(&tokenizer, &output.token_ids, false).expect("reply should parse");

        assert_eq!(parsed.final_text, "second");
        assert_eq!(parsed.finish_reason, Some(FinishReason::Stop));
        assert!(parsed.analysis.is_some());
    }

    #[test]
    fn tight_budget_truncates_the_reply() {
        let tokenizer = tokenizer();
        let engine = EchoEngine::new(Arc::clone(&tokenizer), 8192);

        let prompt = tokenizer.encode("<|start|>user<|message|>hello world<|end|><|start|>assistant", true);

        let params = SamplingParams::default().with_max_tokens(4).expect("params");
        let output = engine.generate(&prompt, &params).expect("echo should generate");

        assert_eq!(output.token_ids.len(), 4);
        let parsed = parse_tokens(&tokenizer, &output.token_ids, false).expect("reply should parse");
        assert_eq!(parsed.finish_reason, Some(FinishReason::Length));
    }

    #[test]
    fn stream_matches_batch_output() {
        let tokenizer = tokenizer();
        let engine = EchoEngine::new(Arc::clone(&tokenizer), 8192);

        let prompt = tokenizer.encode("<|start|>user<|message|>ping<|end|><|start|>assistant", true);
        let params = SamplingParams::default();

        let batch = engine.generate(&prompt, &params).expect("generate");
        let streamed: Vec<TokenId> = engine
            .generate_stream(&prompt, &params)
            .expect("stream")
            .map(|token| token.expect("token").id)
            .collect();

        assert_eq!(batch.token_ids, streamed);
    }
}
