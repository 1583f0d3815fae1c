//! Inference pipeline for the local engine.
//!
//! The mediator in this crate drives one generation end to end: it builds a
//! Harmony prompt, serializes accelerator access through the process-wide
//! engine lock, feeds the engine's token stream through the incremental
//! parser, and produces either a complete [`GenerationResult`] or an async
//! stream of final-channel [`StreamEvent`]s. Failures are classified and,
//! where possible, retried or degraded instead of surfaced.

mod echo;
mod engine;
mod error;
mod gpu;
mod mediator;
mod memory;
mod metrics;
mod recovery;
mod sampling;

pub use echo::EchoEngine;
pub use engine::{Engine, EngineOutput, EngineToken, TokenStream};
pub use error::{Disposition, Error};
pub use gpu::{EngineGuard, clear_cache, in_flight};
pub use mediator::{EventStream, GenerationResult, Mediator, MediatorSettings, StreamHandle};
pub use memory::MemoryBudget;
pub use metrics::{GenerationMetrics, MetricsSummary, MetricsTracker};
pub use recovery::{Recovery, RetryConfig, TruncationPolicy, truncate_prompt};
pub use sampling::{SamplingOverrides, SamplingParams};

/// Result alias for inference operations.
pub type Result<T> = std::result::Result<T, Error>;
