use crate::{Error, Result, sampling::SamplingParams};

// Conservative fp16-with-overhead estimate.
const BYTES_PER_TOKEN: u64 = 8;

// Never clamp below this; a response this short is still useful.
const MIN_MAX_TOKENS: u32 = 32;

/// Memory-aware bound on the generation budget.
///
/// Before each generation the requested `max_tokens` is clamped to what the
/// accelerator can hold, so the engine is never asked for an allocation that
/// must fail. With no configured capacity the clamp is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBudget {
    /// Memory available to the accelerator, in bytes. `None` disables the
    /// clamp.
    pub available_bytes: Option<u64>,
    /// Bytes to keep free on top of the estimate.
    pub safety_margin_bytes: u64,
}

impl MemoryBudget {
    /// Budget from GB figures, as configured.
    pub fn from_gb(available_gb: Option<f64>, safety_margin_gb: f64) -> Self {
        let gb = 1024.0 * 1024.0 * 1024.0;

        Self {
            available_bytes: available_gb.map(|v| (v * gb) as u64),
            safety_margin_bytes: (safety_margin_gb.max(0.0) * gb) as u64,
        }
    }

    /// Clamp `max_tokens` to the largest value that fits.
    ///
    /// Estimated need is `(prompt_tokens + max_tokens) * 8` bytes. If even
    /// the floor of 32 tokens does not fit, generation is refused with a
    /// memory error before the engine is touched.
    pub fn clamp(&self, params: &SamplingParams, prompt_tokens: usize) -> Result<SamplingParams> {
        let Some(available) = self.available_bytes else {
            return Ok(params.clone());
        };

        let usable = available.saturating_sub(self.safety_margin_bytes);
        let budget_tokens = usable / BYTES_PER_TOKEN;
        let safe_max = budget_tokens.saturating_sub(prompt_tokens as u64);

        if safe_max < u64::from(MIN_MAX_TOKENS) {
            return Err(Error::Memory(format!(
                "insufficient memory for generation: {prompt_tokens} prompt tokens leave room for \
                 {safe_max} output tokens (floor is {MIN_MAX_TOKENS})"
            )));
        }

        let safe_max = u32::try_from(safe_max).unwrap_or(u32::MAX);

        if safe_max >= params.max_tokens {
            return Ok(params.clone());
        }

        log::warn!(
            "reducing max_tokens from {requested} to {safe_max} due to memory constraints",
            requested = params.max_tokens,
        );

        params.with_max_tokens(safe_max.max(MIN_MAX_TOKENS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_capacity_means_no_clamp() {
        let budget = MemoryBudget::default();
        let params = SamplingParams::default();

        let clamped = budget.clamp(&params, 1_000_000).expect("clamp should pass through");
        assert_eq!(clamped.max_tokens, params.max_tokens);
    }

    #[test]
    fn ample_memory_leaves_params_untouched() {
        let budget = MemoryBudget::from_gb(Some(16.0), 2.0);
        let params = SamplingParams::default();

        let clamped = budget.clamp(&params, 1000).expect("clamp should pass through");
        assert_eq!(clamped.max_tokens, 512);
    }

    #[test]
    fn tight_memory_reduces_max_tokens() {
        // 4096 bytes usable => 512 token budget, 400 of it prompt.
        let budget = MemoryBudget {
            available_bytes: Some(4096),
            safety_margin_bytes: 0,
        };
        let params = SamplingParams::default();

        let clamped = budget.clamp(&params, 400).expect("clamp should reduce");
        assert_eq!(clamped.max_tokens, 112);
    }

    #[test]
    fn infeasible_generation_is_refused() {
        let budget = MemoryBudget {
            available_bytes: Some(1024),
            safety_margin_bytes: 0,
        };
        let params = SamplingParams::default();

        // 128 token budget, all eaten by the prompt.
        let error = budget.clamp(&params, 120).unwrap_err();
        assert!(matches!(error, Error::Memory(_)));
    }

    #[test]
    fn safety_margin_is_reserved() {
        let gb = 1024 * 1024 * 1024;
        let budget = MemoryBudget::from_gb(Some(2.0), 2.0);

        assert_eq!(budget.available_bytes, Some(2 * gb));
        // Margin consumes everything; nothing left to generate with.
        assert!(budget.clamp(&SamplingParams::default(), 10).is_err());
    }
}
