use anyhow::bail;
use serde::Deserialize;

/// Which inference backend the gateway should drive.
///
/// Real engines are linked in by downstream builds through the `Engine`
/// trait; this repository ships only the deterministic development backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Deterministic development backend that echoes the last user turn
    /// through the Harmony wire format.
    #[default]
    Echo,
    /// No backend. The server starts, reports the model as not loaded,
    /// and answers completion requests with 503.
    None,
}

/// Local model and backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Model identifier reported by `/v1/models` and the health endpoint.
    pub name: String,
    /// Maximum context window in tokens. Prompts exceeding this fail with
    /// a context-overflow error before the engine is invoked.
    pub context_window: usize,
    /// Backend selection.
    pub backend: Backend,
    /// Memory available to the accelerator, in GB. When absent the
    /// memory-aware clamp on `max_tokens` is skipped.
    pub available_memory_gb: Option<f64>,
    /// Memory to keep free when clamping `max_tokens`, in GB.
    pub safety_margin_gb: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-oss-20b".to_string(),
            context_window: 8192,
            backend: Backend::default(),
            available_memory_gb: None,
            safety_margin_gb: 2.0,
        }
    }
}

impl ModelConfig {
    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            bail!("model.name cannot be empty");
        }

        if self.context_window == 0 {
            bail!("model.context_window must be positive");
        }

        if self.safety_margin_gb < 0.0 {
            bail!("model.safety_margin_gb cannot be negative, got {}", self.safety_margin_gb);
        }

        if let Some(available) = self.available_memory_gb
            && available <= 0.0
        {
            bail!("model.available_memory_gb must be positive, got {available}");
        }

        Ok(())
    }
}
