//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Provider quota tiers.
///
/// The tier jointly fixes the limiter refill rate, the burst capacity and
/// the dispatcher pool size; individual values can still be overridden.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[derive(Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Tier {
    /// Paid tier: rate=15/s, burst=20, 15 concurrent workers.
    #[default]
    Standard,
    /// Free tier: rate=1/s, burst=1, single worker.
    Free,
}

impl Tier {
    /// Limiter refill rate in tokens per second.
    pub fn rate(self) -> f64 {
        match self {
            Self::Standard => 15.0,
            Self::Free => 1.0,
        }
    }

    /// Limiter burst capacity.
    pub fn burst(self) -> u32 {
        match self {
            Self::Standard => 20,
            Self::Free => 1,
        }
    }

    /// Dispatcher worker pool size.
    pub fn max_concurrent(self) -> usize {
        match self {
            Self::Standard => 15,
            Self::Free => 1,
        }
    }
}

/// Tunable pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Provider quota tier.
    pub tier: Tier,
    /// Limiter refill rate, tokens per second.
    pub rate: f64,
    /// Limiter burst capacity.
    pub burst: u32,
    /// Dispatcher worker pool size.
    pub max_concurrent: usize,
    /// Minimum spacing between polls of one operation.
    pub poll_interval_min: Duration,
    /// Cap on total polling duration per page.
    pub poll_deadline: Duration,
    /// Session retention window.
    pub retention: Duration,
    /// Per-file upload size cap in bytes.
    pub max_file_size: usize,
    /// Upload count cap per session.
    pub max_files_per_session: usize,
    /// Canonical filename template.
    pub naming_template: String,
    /// Retry attempts for transient extractor failures.
    pub retry_attempts: u32,
    /// Exponential backoff base.
    pub retry_base: Duration,
    /// Exponential backoff cap.
    pub retry_cap: Duration,
}

impl PipelineConfig {
    /// Default filename template.
    pub const DEFAULT_TEMPLATE: &'static str = "{company}_{ticket}_{date}";

    /// Builds the defaults for a tier.
    pub fn for_tier(tier: Tier) -> Self {
        Self {
            tier,
            rate: tier.rate(),
            burst: tier.burst(),
            max_concurrent: tier.max_concurrent(),
            poll_interval_min: Duration::from_secs(2),
            poll_deadline: Duration::from_secs(600),
            retention: Duration::from_secs(24 * 60 * 60),
            max_file_size: 4 * 1024 * 1024,
            max_files_per_session: 20,
            naming_template: Self::DEFAULT_TEMPLATE.to_string(),
            retry_attempts: 3,
            retry_base: Duration::from_secs(2),
            retry_cap: Duration::from_secs(30),
        }
    }

    /// Backoff delay before retry number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base
            .saturating_mul(factor)
            .min(self.retry_cap)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_tier(Tier::Standard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_defaults() {
        let standard = PipelineConfig::for_tier(Tier::Standard);
        assert_eq!(standard.rate, 15.0);
        assert_eq!(standard.burst, 20);
        assert_eq!(standard.max_concurrent, 15);

        let free = PipelineConfig::for_tier(Tier::Free);
        assert_eq!(free.rate, 1.0);
        assert_eq!(free.burst, 1);
        assert_eq!(free.max_concurrent, 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = PipelineConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(config.backoff_delay(6), Duration::from_secs(30));
    }

    #[test]
    fn tier_parses_case_insensitively() {
        assert_eq!("free".parse::<Tier>().unwrap(), Tier::Free);
        assert_eq!("STANDARD".parse::<Tier>().unwrap(), Tier::Standard);
    }
}
