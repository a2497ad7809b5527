//! Orchestrator tuning knobs.

use std::time::Duration;

/// Timeouts, retry bounds and model names used by a plan server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Longest gap between model tokens before the stream is failed
    pub stream_inactivity_timeout: Duration,
    /// Longest a delivery may wait on one subscriber's full queue
    pub subscriber_delivery_timeout: Duration,
    pub subscriber_queue_capacity: usize,
    /// How long a stopped plan waits for a revision before it is canceled
    pub revise_window: Duration,
    /// Attempts after the first for a failed builder model call
    pub max_transport_retries: usize,
    /// Corrective resubmissions after replacements fail to match
    pub max_correction_retries: usize,
    /// Retry `n` (0-based) waits `(n + 1)^2 * retry_backoff_base`
    pub retry_backoff_base: Duration,
    /// Budget for system prompt, contexts, conversation and prompt
    pub max_tokens: usize,
    pub planner_model: String,
    pub builder_model: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stream_inactivity_timeout: Duration::from_secs(30),
            subscriber_delivery_timeout: Duration::from_secs(5),
            subscriber_queue_capacity: 256,
            revise_window: Duration::from_secs(300),
            max_transport_retries: 3,
            max_correction_retries: 1,
            retry_backoff_base: Duration::from_secs(1),
            max_tokens: 128_000,
            planner_model: "gpt-4o".to_string(),
            builder_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Backoff before transport retry `attempt` (0-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = u32::try_from((attempt + 1).pow(2)).unwrap_or(u32::MAX);
        self.retry_backoff_base.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_quadratic() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.backoff(0), Duration::from_secs(1));
        assert_eq!(config.backoff(1), Duration::from_secs(4));
        assert_eq!(config.backoff(2), Duration::from_secs(9));
    }
}
