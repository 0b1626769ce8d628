use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::config::ProxyConfig;
use crate::utils::error::ApiError;

/// Flat pre-charge per call; the actual result size tops the bucket up
/// after execution
pub const CALL_TOKEN_ESTIMATE: u64 = 100;

#[derive(Debug, Clone)]
struct Bucket {
    count: u32,
    tokens: u64,
    window_start: Instant,
}

impl Bucket {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            tokens: 0,
            window_start: now,
        }
    }
}

/// Per (tenant, doc) call + token bucket over a sliding period. One mutex,
/// held only for check-and-update, never across I/O.
#[derive(Default)]
pub struct ToolRateLimiter {
    table: Mutex<HashMap<String, Bucket>>,
}

impl ToolRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket_key(tenant_id: &str, doc_id: Option<&str>) -> String {
        format!("{tenant_id}:{}", doc_id.unwrap_or("global"))
    }

    /// Count the call and pre-charge the token estimate; rejects when
    /// either limit would be crossed
    pub fn check_and_count(&self, key: &str, config: &ProxyConfig) -> Result<(), ApiError> {
        self.check_at(
            key,
            config.rate_limit_calls,
            config.rate_limit_tokens,
            config.rate_limit_period_seconds,
            Instant::now(),
        )
    }

    /// Call-count-only variant used by the public gateway
    pub fn check_calls(
        &self,
        key: &str,
        max_calls: u32,
        period_seconds: u64,
    ) -> Result<(), ApiError> {
        self.check_at(key, max_calls, u64::MAX, period_seconds, Instant::now())
    }

    fn check_at(
        &self,
        key: &str,
        max_calls: u32,
        max_tokens: u64,
        period_seconds: u64,
        now: Instant,
    ) -> Result<(), ApiError> {
        let mut table = self.table.lock();
        let bucket = table
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(now));

        let period = Duration::from_secs(period_seconds.max(1));
        if now.duration_since(bucket.window_start) >= period {
            *bucket = Bucket::new(now);
        }

        if bucket.count + 1 > max_calls
            || bucket.tokens.saturating_add(CALL_TOKEN_ESTIMATE) > max_tokens
        {
            warn!(
                key,
                count = bucket.count,
                tokens = bucket.tokens,
                "tool_rate_limited"
            );
            return Err(ApiError::RateLimited(format!(
                "count={} tokens={}",
                bucket.count, bucket.tokens
            )));
        }

        bucket.count += 1;
        bucket.tokens += CALL_TOKEN_ESTIMATE;
        Ok(())
    }

    /// Top the bucket up with the actual result size once known; the
    /// pre-charge already covers the first `CALL_TOKEN_ESTIMATE` tokens
    pub fn record_result_tokens(&self, key: &str, actual_tokens: u64) {
        let extra = actual_tokens.saturating_sub(CALL_TOKEN_ESTIMATE);
        if extra == 0 {
            return;
        }
        let mut table = self.table.lock();
        if let Some(bucket) = table.get_mut(key) {
            bucket.tokens = bucket.tokens.saturating_add(extra);
        }
    }

    pub fn reset(&self, key: &str) {
        self.table.lock().remove(key);
    }
}
