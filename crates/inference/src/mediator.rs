use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use harmony::{
    FinishReason, HarmonyPrompt, Message, PromptBuilder, PromptRequest, ReasoningEffort, Role, StreamEvent,
    StreamParser, ToolDef, Tokenizer, parse_tokens,
};

use crate::{
    Error, Result,
    engine::Engine,
    gpu::{self, EngineGuard},
    memory::MemoryBudget,
    metrics::{GenerationMetrics, MetricsSummary, MetricsTracker},
    recovery::Recovery,
    sampling::SamplingParams,
};

/// Prompt-level settings the mediator applies to every request.
#[derive(Debug, Clone)]
pub struct MediatorSettings {
    /// Knowledge cutoff declared in the system message, `YYYY-MM`.
    pub knowledge_cutoff: String,
    /// Current date declared in the system message. `None` means today.
    pub current_date: Option<String>,
    /// Explicit reasoning tier. `None` derives it from the temperature.
    pub reasoning: Option<ReasoningEffort>,
    /// Extract analysis and commentary channels from responses.
    pub capture_reasoning: bool,
    /// Tools to expose to the model.
    pub tools: Vec<ToolDef>,
}

impl Default for MediatorSettings {
    fn default() -> Self {
        Self {
            knowledge_cutoff: "2024-06".to_string(),
            current_date: None,
            reasoning: None,
            capture_reasoning: false,
            tools: Vec::new(),
        }
    }
}

/// Complete result of a non-streaming generation.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// User-facing text from the `final` channel.
    pub text: String,
    /// Chain-of-thought, when reasoning capture is enabled.
    pub analysis: Option<String>,
    /// Meta-narration, when reasoning capture is enabled.
    pub commentary: Option<String>,
    /// Other channels keyed by name, when reasoning capture is enabled.
    pub channels: Option<BTreeMap<String, String>>,
    /// Tokens the engine emitted, control tokens included.
    pub tokens_generated: usize,
    /// Tokens in the built prompt.
    pub prompt_tokens: usize,
    /// Wall-clock engine latency in milliseconds.
    pub latency_ms: u64,
    /// Generation throughput.
    pub tokens_per_second: f64,
    /// How the generation ended.
    pub finish_reason: FinishReason,
    /// Full metrics record, attempts included.
    pub metrics: GenerationMetrics,
}

/// Client-facing stream of final-channel events, ending with one terminal
/// event carrying the finish reason.
pub type EventStream = UnboundedReceiver<StreamEvent>;

/// A started streaming generation.
#[derive(Debug)]
pub struct StreamHandle {
    /// Tokens in the built prompt, for usage reporting.
    pub prompt_tokens: usize,
    /// The event stream itself.
    pub events: EventStream,
}

/// The inference orchestrator.
///
/// Builds the Harmony prompt, serializes engine access through the
/// process-wide lock, parses engine output into channels, and applies the
/// retry/degradation policy. One mediator fronts one engine.
pub struct Mediator {
    engine: Arc<dyn Engine>,
    tokenizer: Arc<dyn Tokenizer>,
    builder: PromptBuilder,
    metrics: Arc<MetricsTracker>,
    memory: MemoryBudget,
    recovery: Recovery,
    settings: MediatorSettings,
    cancelled: Arc<AtomicBool>,
}

impl Mediator {
    /// Create a mediator over an engine and its tokenizer.
    pub fn new(
        engine: Arc<dyn Engine>,
        tokenizer: Arc<dyn Tokenizer>,
        settings: MediatorSettings,
        memory: MemoryBudget,
        recovery: Recovery,
    ) -> Self {
        Self {
            engine,
            builder: PromptBuilder::new(Arc::clone(&tokenizer)),
            tokenizer,
            metrics: Arc::new(MetricsTracker::default()),
            memory,
            recovery,
            settings,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the underlying engine is loaded and ready.
    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    /// Rolling metrics summary across completed generations.
    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    /// Request cancellation. Takes effect at the next token boundary of the
    /// running stream; in-flight engine kernels are not interrupted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        log::info!("generation cancellation requested");
    }

    /// Generate a complete response.
    pub async fn generate(&self, messages: &[Message], params: SamplingParams) -> Result<GenerationResult> {
        params.validate()?;

        if !self.engine.is_ready() {
            return Err(Error::NotReady);
        }

        let prompt = Arc::new(self.build_prompt(messages, &params)?);

        let (mut result, attempts) = self
            .recovery
            .execute(params, |params, attempt| {
                let prompt = Arc::clone(&prompt);
                async move {
                    if attempt > 1 {
                        log::info!("generation attempt {attempt} with max_tokens={}", params.max_tokens);
                    }
                    self.generate_once(&prompt, params).await
                }
            })
            .await?;

        result.metrics.attempts = attempts;
        self.metrics.record(result.metrics.clone());

        Ok(result)
    }

    /// Generate a response as a stream of final-channel events.
    ///
    /// The returned stream yields only `final`-channel deltas followed by
    /// exactly one terminal event; `analysis` and `commentary` never reach
    /// it. The engine lock is held for the lifetime of the underlying
    /// generation.
    pub async fn generate_stream(&self, messages: &[Message], params: SamplingParams) -> Result<StreamHandle> {
        params.validate()?;

        if !self.engine.is_ready() {
            return Err(Error::NotReady);
        }

        let prompt = self.build_prompt(messages, &params)?;
        self.check_context(&prompt, &params)?;
        let params = self.memory.clamp(&params, prompt.token_ids.len())?;

        // A fresh stream starts uncancelled.
        self.cancelled.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded();

        let engine = Arc::clone(&self.engine);
        let tokenizer = Arc::clone(&self.tokenizer);
        let cancelled = Arc::clone(&self.cancelled);
        let tracker = Arc::clone(&self.metrics);
        let prompt_tokens = prompt.token_ids.len();
        let token_ids = prompt.token_ids;

        tokio::task::spawn_blocking(move || {
            stream_worker(engine, tokenizer, token_ids, params, cancelled, tracker, prompt_tokens, tx);
        });

        Ok(StreamHandle {
            prompt_tokens,
            events: rx,
        })
    }

    async fn generate_once(&self, prompt: &HarmonyPrompt, params: SamplingParams) -> Result<GenerationResult> {
        self.check_context(prompt, &params)?;
        let params = self.memory.clamp(&params, prompt.token_ids.len())?;
        let max_tokens = params.max_tokens;

        let engine = Arc::clone(&self.engine);
        let token_ids = prompt.token_ids.clone();
        let started = Instant::now();

        let output = tokio::task::spawn_blocking(move || {
            let _guard = EngineGuard::acquire();
            engine.generate(&token_ids, &params)
        })
        .await
        .map_err(|error| Error::Unknown(format!("engine task failed: {error}")))??;

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        gpu::clear_cache(self.engine.as_ref());

        if output.token_ids.is_empty() {
            return Err(Error::Unknown("engine returned no tokens".to_string()));
        }

        let parsed = parse_tokens(&self.tokenizer, &output.token_ids, !self.settings.capture_reasoning)?;

        let tokens_generated = output.token_ids.len();
        let finish_reason = resolve_finish_reason(
            parsed.finish_reason,
            output.finish_reason.as_deref(),
            tokens_generated,
            max_tokens,
        );

        let metrics = GenerationMetrics::new(prompt.token_ids.len(), tokens_generated, latency_ms, None, finish_reason);

        Ok(GenerationResult {
            text: parsed.final_text,
            analysis: parsed.analysis.filter(|_| self.settings.capture_reasoning),
            commentary: parsed.commentary.filter(|_| self.settings.capture_reasoning),
            channels: parsed.channels.filter(|_| self.settings.capture_reasoning),
            tokens_generated,
            prompt_tokens: prompt.token_ids.len(),
            latency_ms,
            tokens_per_second: metrics.tokens_per_second,
            finish_reason,
            metrics,
        })
    }

    fn build_prompt(&self, messages: &[Message], params: &SamplingParams) -> Result<HarmonyPrompt> {
        let reasoning = self
            .settings
            .reasoning
            .unwrap_or_else(|| ReasoningEffort::from_temperature(params.temperature));

        let current_date = self
            .settings
            .current_date
            .clone()
            .unwrap_or_else(|| jiff::Zoned::now().strftime("%Y-%m-%d").to_string());

        let prompt = self.builder.build(&PromptRequest {
            reasoning,
            knowledge_cutoff: &self.settings.knowledge_cutoff,
            current_date: &current_date,
            messages,
            tools: (!self.settings.tools.is_empty()).then_some(&self.settings.tools),
        })?;

        log::debug!(
            "built prompt: {} tokens, reasoning={reasoning}, {} messages",
            prompt.token_ids.len(),
            messages.len()
        );

        Ok(prompt)
    }

    fn check_context(&self, prompt: &HarmonyPrompt, params: &SamplingParams) -> Result<()> {
        let window = self.engine.context_window();

        if prompt.token_ids.len() + params.max_tokens as usize > window {
            return Err(Error::ContextOverflow {
                prompt_tokens: prompt.token_ids.len(),
                context_window: window,
            });
        }

        Ok(())
    }
}

/// Map the parser's stop kind, the engine's self-reported reason and the
/// token budget onto one finish reason.
///
/// Harmony terminal tokens are authoritative. Without one, hitting the
/// budget means `length`; any engine-reported reason other than "length"
/// (e.g. "eos") normalizes to `stop`.
fn resolve_finish_reason(
    parsed: Option<FinishReason>,
    engine_reported: Option<&str>,
    tokens_generated: usize,
    max_tokens: u32,
) -> FinishReason {
    match parsed {
        Some(FinishReason::Stop) => FinishReason::Stop,
        Some(FinishReason::ToolUse) => FinishReason::ToolUse,
        _ => {
            if tokens_generated >= max_tokens as usize || engine_reported == Some("length") {
                FinishReason::Length
            } else {
                FinishReason::Stop
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn stream_worker(
    engine: Arc<dyn Engine>,
    tokenizer: Arc<dyn Tokenizer>,
    prompt: Vec<harmony::TokenId>,
    params: SamplingParams,
    cancelled: Arc<AtomicBool>,
    tracker: Arc<MetricsTracker>,
    prompt_tokens: usize,
    tx: UnboundedSender<StreamEvent>,
) {
    let started = Instant::now();
    let max_tokens = params.max_tokens;

    let mut parser = StreamParser::new(Arc::clone(&tokenizer), Role::Assistant);
    let mut tokens_generated = 0usize;
    let mut ttft_ms = None;
    let mut interrupted: Option<FinishReason> = None;

    let run = (|| -> Result<()> {
        let _guard = EngineGuard::acquire();
        let stream = engine.generate_stream(&prompt, &params)?;

        for item in stream {
            // Cancellation takes effect between tokens; the engine itself
            // is never interrupted mid-kernel.
            if cancelled.load(Ordering::SeqCst) {
                interrupted = Some(FinishReason::Cancelled);
                break;
            }

            let token = item?;

            if ttft_ms.is_none() {
                ttft_ms = Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
            }

            tokens_generated += 1;

            let Some(event) = parser.process_with_text(token.id, &token.text) else {
                continue;
            };

            // Only the user-facing channel leaves the process; terminal
            // markers are reported through the final event below.
            if event.finish_reason.is_none()
                && event.is_final
                && tx.unbounded_send(event).is_err()
            {
                // Receiver dropped: the client went away.
                interrupted = Some(FinishReason::Cancelled);
                break;
            }
        }

        Ok(())
    })();

    parser.process_eos();
    gpu::clear_cache(engine.as_ref());

    let finish_reason = match run {
        Err(error) => {
            log::error!("streaming generation failed: {error}");
            FinishReason::Error
        }
        Ok(()) => interrupted
            .unwrap_or_else(|| resolve_finish_reason(parser.finish_reason(), None, tokens_generated, max_tokens)),
    };

    tracker.record(GenerationMetrics::new(
        prompt_tokens,
        tokens_generated,
        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        ttft_ms,
        finish_reason,
    ));

    let _ = tx.unbounded_send(StreamEvent {
        channel: harmony::CHANNEL_FINAL.to_string(),
        delta: String::new(),
        is_final: true,
        finish_reason: Some(finish_reason),
    });
}
