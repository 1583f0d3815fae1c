use std::sync::Mutex;

use harmony::FinishReason;

/// Metrics for a single generation.
#[derive(Debug, Clone)]
pub struct GenerationMetrics {
    /// Tokens in the input prompt.
    pub prompt_tokens: usize,
    /// Tokens generated.
    pub tokens_generated: usize,
    /// Total generation time in milliseconds.
    pub latency_ms: u64,
    /// Time to first token, streaming only.
    pub ttft_ms: Option<u64>,
    /// Generation throughput.
    pub tokens_per_second: f64,
    /// How the generation ended.
    pub finish_reason: FinishReason,
    /// Engine invocations it took, >1 when the recovery layer retried.
    pub attempts: u32,
    /// When the generation finished.
    pub timestamp: jiff::Timestamp,
}

impl GenerationMetrics {
    /// Build a record, deriving throughput from the raw measurements.
    pub fn new(
        prompt_tokens: usize,
        tokens_generated: usize,
        latency_ms: u64,
        ttft_ms: Option<u64>,
        finish_reason: FinishReason,
    ) -> Self {
        let tokens_per_second = if latency_ms > 0 && tokens_generated > 0 {
            tokens_generated as f64 / latency_ms as f64 * 1000.0
        } else {
            0.0
        };

        Self {
            prompt_tokens,
            tokens_generated,
            latency_ms,
            ttft_ms,
            tokens_per_second,
            finish_reason,
            attempts: 1,
            timestamp: jiff::Timestamp::now(),
        }
    }
}

/// Rolling summary across tracked generations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    /// Number of generations recorded.
    pub total_generations: usize,
    /// Total tokens generated.
    pub total_tokens_generated: usize,
    /// Average latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Minimum latency in milliseconds.
    pub min_latency_ms: u64,
    /// Maximum latency in milliseconds.
    pub max_latency_ms: u64,
    /// Average throughput over generations that produced tokens.
    pub avg_tokens_per_second: f64,
    /// Average time to first token over streaming generations.
    pub avg_ttft_ms: f64,
}

/// Tracks generation metrics across requests.
///
/// Mutations are internally locked; share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct MetricsTracker {
    generations: Mutex<Vec<GenerationMetrics>>,
}

impl MetricsTracker {
    /// Record one finished generation.
    pub fn record(&self, metrics: GenerationMetrics) {
        log::debug!(
            "generation complete: {tokens} tokens in {latency}ms ({tps:.2} tokens/sec, {reason}, attempt {attempts})",
            tokens = metrics.tokens_generated,
            latency = metrics.latency_ms,
            tps = metrics.tokens_per_second,
            reason = metrics.finish_reason,
            attempts = metrics.attempts,
        );

        if let Ok(mut generations) = self.generations.lock() {
            generations.push(metrics);
        }
    }

    /// Summarize everything recorded so far.
    pub fn summary(&self) -> MetricsSummary {
        let Ok(generations) = self.generations.lock() else {
            return MetricsSummary::default();
        };

        if generations.is_empty() {
            return MetricsSummary::default();
        }

        let total_tokens: usize = generations.iter().map(|g| g.tokens_generated).sum();
        let total_latency: u64 = generations.iter().map(|g| g.latency_ms).sum();

        let tps: Vec<f64> = generations
            .iter()
            .map(|g| g.tokens_per_second)
            .filter(|&tps| tps > 0.0)
            .collect();

        let ttft: Vec<u64> = generations.iter().filter_map(|g| g.ttft_ms).collect();

        MetricsSummary {
            total_generations: generations.len(),
            total_tokens_generated: total_tokens,
            avg_latency_ms: total_latency as f64 / generations.len() as f64,
            min_latency_ms: generations.iter().map(|g| g.latency_ms).min().unwrap_or(0),
            max_latency_ms: generations.iter().map(|g| g.latency_ms).max().unwrap_or(0),
            avg_tokens_per_second: if tps.is_empty() {
                0.0
            } else {
                tps.iter().sum::<f64>() / tps.len() as f64
            },
            avg_ttft_ms: if ttft.is_empty() {
                0.0
            } else {
                ttft.iter().sum::<u64>() as f64 / ttft.len() as f64
            },
        }
    }

    /// The most recent `n` generations.
    pub fn recent(&self, n: usize) -> Vec<GenerationMetrics> {
        self.generations
            .lock()
            .map(|generations| generations.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all recorded metrics.
    pub fn reset(&self) {
        if let Ok(mut generations) = self.generations.lock() {
            generations.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_throughput() {
        let metrics = GenerationMetrics::new(100, 50, 2000, Some(150), FinishReason::Stop);
        assert_eq!(metrics.tokens_per_second, 25.0);
        assert_eq!(metrics.attempts, 1);
    }

    #[test]
    fn zero_latency_means_zero_throughput() {
        let metrics = GenerationMetrics::new(10, 10, 0, None, FinishReason::Stop);
        assert_eq!(metrics.tokens_per_second, 0.0);
    }

    #[test]
    fn empty_tracker_summarizes_to_defaults() {
        let tracker = MetricsTracker::default();
        assert_eq!(tracker.summary(), MetricsSummary::default());
    }

    #[test]
    fn summary_aggregates_generations() {
        let tracker = MetricsTracker::default();
        tracker.record(GenerationMetrics::new(10, 100, 1000, Some(100), FinishReason::Stop));
        tracker.record(GenerationMetrics::new(20, 200, 3000, None, FinishReason::Length));

        let summary = tracker.summary();
        assert_eq!(summary.total_generations, 2);
        assert_eq!(summary.total_tokens_generated, 300);
        assert_eq!(summary.avg_latency_ms, 2000.0);
        assert_eq!(summary.min_latency_ms, 1000);
        assert_eq!(summary.max_latency_ms, 3000);
        assert_eq!(summary.avg_ttft_ms, 100.0);

        // (100/s + 66.67/s) / 2
        assert!((summary.avg_tokens_per_second - 83.33).abs() < 0.01);
    }

    #[test]
    fn reset_clears_history() {
        let tracker = MetricsTracker::default();
        tracker.record(GenerationMetrics::new(10, 10, 100, None, FinishReason::Stop));
        tracker.reset();
        assert_eq!(tracker.summary().total_generations, 0);
        assert!(tracker.recent(5).is_empty());
    }
}
