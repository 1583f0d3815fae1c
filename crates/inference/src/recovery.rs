use std::time::Duration;

use rand::Rng;

use crate::{
    Error, Result,
    error::Disposition,
    sampling::SamplingParams,
};

/// Retry strategy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts after the first try.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier per attempt.
    pub exponential_base: f64,
    /// Add ±25% uniform jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retry `attempt` (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let base = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent as i32);
        let mut delay = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            delay *= rand::rng().random_range(0.75..=1.25);
        }

        Duration::from_secs_f64(delay)
    }
}

/// Where to cut when truncating a prompt to a character budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationPolicy {
    /// Keep the end, drop the start.
    Start,
    /// Keep both ends, drop the middle.
    Middle,
    /// Keep the start, drop the end.
    End,
}

/// Truncate `prompt` to at most `max_chars` characters with an ellipsis
/// marker at the cut.
pub fn truncate_prompt(prompt: &str, max_chars: usize, policy: TruncationPolicy) -> String {
    if prompt.chars().count() <= max_chars {
        return prompt.to_string();
    }

    log::warn!(
        "truncating prompt from {} to {max_chars} characters",
        prompt.chars().count()
    );

    let keep = max_chars.saturating_sub(3);
    let chars: Vec<char> = prompt.chars().collect();

    match policy {
        TruncationPolicy::Start => {
            let tail: String = chars[chars.len() - keep..].iter().collect();
            format!("...{tail}")
        }
        TruncationPolicy::Middle => {
            let half = keep / 2;
            let head: String = chars[..half].iter().collect();
            let tail: String = chars[chars.len() - half..].iter().collect();
            format!("{head}...{tail}")
        }
        TruncationPolicy::End => {
            let head: String = chars[..keep].iter().collect();
            format!("{head}...")
        }
    }
}

/// Retry plus graceful degradation around a generation attempt.
///
/// Recoverable errors back off and retry; degradable errors get one more
/// round with a reduced token budget; fatal and surfaced errors pass
/// through untouched.
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    /// Backoff configuration.
    pub retry: RetryConfig,
    /// Disable to surface degradable errors instead of adjusting params.
    pub disable_degradation: bool,
}

impl Recovery {
    /// Degraded parameters for the given error, if degradation applies.
    ///
    /// Context overflow keeps 70% of the budget (more room for the prompt);
    /// memory pressure keeps 50%.
    pub fn degraded_params(&self, params: &SamplingParams, error: &Error) -> Option<SamplingParams> {
        if self.disable_degradation {
            return None;
        }

        let factor = match error {
            Error::ContextOverflow { .. } => 0.7,
            Error::Memory(_) => 0.5,
            _ => return None,
        };

        let reduced = ((f64::from(params.max_tokens) * factor) as u32).max(1);
        log::info!(
            "degrading max_tokens from {} to {reduced} after: {error}",
            params.max_tokens
        );

        params.with_max_tokens(reduced).ok()
    }

    /// Run `attempt` with retry and one degradation round.
    ///
    /// The closure receives the parameters to use and the 1-indexed attempt
    /// number, and is invoked again on recoverable failures after a backoff
    /// delay. Returns the first success, or the last error once retries and
    /// degradation are exhausted.
    pub async fn execute<F, Fut, T>(&self, params: SamplingParams, mut attempt: F) -> Result<(T, u32)>
    where
        F: FnMut(SamplingParams, u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut current = params;
        let mut degraded = false;
        let mut tries = 0u32;
        let mut retries = 0u32;

        loop {
            tries += 1;

            let error = match attempt(current.clone(), tries).await {
                Ok(value) => return Ok((value, tries)),
                Err(error) => error,
            };

            match error.disposition() {
                Disposition::Fatal | Disposition::Surface => return Err(error),
                Disposition::Degradable => {
                    if degraded {
                        return Err(error);
                    }

                    match self.degraded_params(&current, &error) {
                        Some(params) => {
                            current = params;
                            degraded = true;
                        }
                        None => return Err(error),
                    }
                }
                Disposition::Recoverable => {
                    // Unknown errors get a single retry; classified
                    // transient errors use the full budget.
                    let budget = match error {
                        Error::Unknown(_) => 1,
                        _ => self.retry.max_retries,
                    };

                    if retries >= budget {
                        return Err(error);
                    }

                    retries += 1;
                    let delay = self.retry.delay(retries);
                    log::warn!(
                        "attempt {tries} failed ({error}); retrying in {:.2}s",
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn no_backoff() -> Recovery {
        Recovery {
            retry: RetryConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: false,
                ..RetryConfig::default()
            },
            disable_degradation: false,
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };

        assert_eq!(config.delay(1), Duration::from_secs(1));
        assert_eq!(config.delay(2), Duration::from_secs(2));
        assert_eq!(config.delay(3), Duration::from_secs(4));
        assert_eq!(config.delay(10), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let config = RetryConfig::default();

        for _ in 0..50 {
            let delay = config.delay(2).as_secs_f64();
            assert!((1.5..=2.5).contains(&delay), "delay {delay} out of jitter range");
        }
    }

    #[test]
    fn truncation_policies_keep_the_right_half() {
        let prompt = "abcdefghijklmnopqrstuvwxyz";

        assert_eq!(truncate_prompt(prompt, 30, TruncationPolicy::End), prompt);
        assert_eq!(truncate_prompt(prompt, 13, TruncationPolicy::End), "abcdefghij...");
        assert_eq!(truncate_prompt(prompt, 13, TruncationPolicy::Start), "...qrstuvwxyz");
        assert_eq!(truncate_prompt(prompt, 13, TruncationPolicy::Middle), "abcde...vwxyz");
    }

    #[test]
    fn degradation_factors_match_the_error() {
        let recovery = Recovery::default();
        let params = SamplingParams::default();

        let overflow = recovery
            .degraded_params(
                &params,
                &Error::ContextOverflow {
                    prompt_tokens: 9000,
                    context_window: 8192,
                },
            )
            .expect("overflow should degrade");
        assert_eq!(overflow.max_tokens, 358);

        let memory = recovery
            .degraded_params(&params, &Error::Memory("oom".into()))
            .expect("memory should degrade");
        assert_eq!(memory.max_tokens, 256);

        assert!(recovery.degraded_params(&params, &Error::NotReady).is_none());
    }

    #[tokio::test]
    async fn transient_errors_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let (value, attempts) = no_backoff()
            .execute(SamplingParams::default(), move |_, _| {
                let calls = Arc::clone(&counted);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Transient("busy".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .expect("should eventually succeed");

        assert_eq!(value, 42);
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_do_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let error = no_backoff()
            .execute(SamplingParams::default(), move |_, _| {
                let calls = Arc::clone(&counted);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::InvalidInput("bad role".into()))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(error, Error::InvalidInput(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_surfaces_immediately() {
        let error = no_backoff()
            .execute(SamplingParams::default(), |_, _| async { Err::<(), _>(Error::Cancelled) })
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Cancelled));
    }

    #[tokio::test]
    async fn overflow_degrades_once_then_succeeds() {
        let (params, attempts) = no_backoff()
            .execute(SamplingParams::default(), |params, _| async move {
                if params.max_tokens == 512 {
                    Err(Error::ContextOverflow {
                        prompt_tokens: 9000,
                        context_window: 8192,
                    })
                } else {
                    Ok(params)
                }
            })
            .await
            .expect("degraded attempt should succeed");

        // 30% reduction on overflow.
        assert_eq!(params.max_tokens, 358);
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn repeated_overflow_gives_up_after_one_degradation() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let error = no_backoff()
            .execute(SamplingParams::default(), move |_, _| {
                let calls = Arc::clone(&counted);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::Memory("oom".into()))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Memory(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_errors_retry_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let error = no_backoff()
            .execute(SamplingParams::default(), move |_, _| {
                let calls = Arc::clone(&counted);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::Unknown("???".into()))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Unknown(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
