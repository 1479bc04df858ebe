use std::{sync::Arc, time::Duration};

use dashmap::DashMap;

use crate::ratelimit::{
    ConsumptionProbe, RateLimitPolicy, bucket::TokenBucket, clock::Clock,
};

/// Process-wide key → bucket map. Each key gets exactly one bucket, even when
/// many requests for a new key arrive together.
pub struct BucketRegistry {
    policy: Arc<RateLimitPolicy>,
    clock: Arc<dyn Clock>,
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl BucketRegistry {
    pub fn new(policy: Arc<RateLimitPolicy>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            buckets: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, key: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return bucket.clone();
        }

        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(&self.policy, self.clock.now())))
            .clone()
    }

    /// Consumes one token for `key`. A bucket retired by a concurrent sweep is
    /// already gone from the map, so the retry lands on a fresh bucket.
    pub fn try_consume(&self, key: &str) -> ConsumptionProbe {
        loop {
            let bucket = self.get_or_create(key);
            if let Some(probe) = bucket.try_consume(1, self.clock.now()) {
                return probe;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Retires and drops buckets idle for at least `idle` that have refilled to
    /// capacity. Returns how many were removed.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;
        self.buckets.retain(|_, bucket| {
            let retired = bucket.retire_if_idle(now, idle);
            evicted += usize::from(retired);
            !retired
        });
        evicted
    }
}

/// Periodically reclaims idle buckets when the policy enables eviction.
pub fn spawn_eviction_sweeper(registry: Arc<BucketRegistry>, every: Duration) {
    let Some(idle) = registry.policy.idle_eviction else {
        return;
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = registry.evict_idle(idle);
            if evicted > 0 {
                tracing::debug!(
                    evicted,
                    remaining = registry.len(),
                    "reclaimed idle rate limit buckets"
                );
            }
        }
    });
}
