pub mod bucket;
pub mod clock;
pub mod key;
pub mod registry;

use std::time::Duration;

use http::HeaderName;
use thiserror::Error;

use crate::config::RateLimitConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("rate limit capacity must be > 0 (got {0})")]
    NonPositiveCapacity(i64),
    #[error("rate limit refill tokens must be > 0 (got {0})")]
    NonPositiveRefillTokens(i64),
    #[error("rate limit refill period must be > 0 seconds (got {0})")]
    NonPositiveRefillPeriod(i64),
    #[error("invalid rate limit key header: {0}")]
    InvalidKeyHeader(String),
}

/// Which request attribute a bucket is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Caller credential header, falling back to network origin when absent.
    Identity,
    /// Network origin only.
    Origin,
}

/// Immutable rate limit settings, validated once at startup.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub capacity: u64,
    pub refill_tokens: u64,
    pub refill_period: Duration,
    pub key_strategy: KeyStrategy,
    pub identity_header: HeaderName,
    pub include_headers: bool,
    pub skip_path_prefixes: Vec<String>,
    pub idle_eviction: Option<Duration>,
}

impl RateLimitPolicy {
    pub fn from_config(cfg: &RateLimitConfig) -> Result<Self, PolicyError> {
        if cfg.capacity <= 0 {
            return Err(PolicyError::NonPositiveCapacity(cfg.capacity));
        }
        if cfg.refill_tokens <= 0 {
            return Err(PolicyError::NonPositiveRefillTokens(cfg.refill_tokens));
        }
        if cfg.refill_period_seconds <= 0 {
            return Err(PolicyError::NonPositiveRefillPeriod(
                cfg.refill_period_seconds,
            ));
        }

        let identity_header = HeaderName::from_bytes(cfg.key_header.as_bytes())
            .map_err(|_| PolicyError::InvalidKeyHeader(cfg.key_header.clone()))?;

        let key_strategy = if cfg.per_api_key {
            KeyStrategy::Identity
        } else {
            KeyStrategy::Origin
        };

        Ok(Self {
            enabled: cfg.enabled,
            capacity: cfg.capacity as u64,
            refill_tokens: cfg.refill_tokens as u64,
            refill_period: Duration::from_secs(cfg.refill_period_seconds as u64),
            key_strategy,
            identity_header,
            include_headers: cfg.include_headers,
            skip_path_prefixes: cfg.skip_paths.clone(),
            idle_eviction: (cfg.idle_evict_seconds > 0)
                .then(|| Duration::from_secs(cfg.idle_evict_seconds)),
        })
    }

    /// True when the request must bypass limiting entirely.
    pub fn is_skipped(&self, path: &str) -> bool {
        !self.enabled
            || self
                .skip_path_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Outcome of a single consume attempt against a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumptionProbe {
    pub consumed: bool,
    pub remaining_tokens: u64,
    pub nanos_to_wait_for_refill: u64,
}

impl ConsumptionProbe {
    /// Wait hint in whole seconds, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        self.nanos_to_wait_for_refill.div_ceil(1_000_000_000)
    }
}

#[cfg(test)]
pub(crate) fn test_policy(capacity: u64, refill_tokens: u64, period: Duration) -> RateLimitPolicy {
    RateLimitPolicy {
        enabled: true,
        capacity,
        refill_tokens,
        refill_period: period,
        key_strategy: KeyStrategy::Identity,
        identity_header: HeaderName::from_static("x-api-key"),
        include_headers: true,
        skip_path_prefixes: vec!["/health".to_string()],
        idle_eviction: None,
    }
}
