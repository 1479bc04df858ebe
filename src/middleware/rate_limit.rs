use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
};

use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    middleware::{ControlFlow, RequestMiddleware},
    ratelimit::{RateLimitPolicy, key::KeyResolver, registry::BucketRegistry},
};

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

const REMAINING_META: &str = "ratelimit.remaining";

/// Token-bucket admission in front of the downstream API.
///
/// Skipped requests (limiter disabled or a skip prefix matches) never touch the
/// registry. Allowed requests continue and, when headers are enabled, get the
/// limit and remaining count stamped on the downstream response. Denied
/// requests are answered here with a 429 and never reach the handler.
pub struct RateLimitMiddleware {
    policy: Arc<RateLimitPolicy>,
    resolver: KeyResolver,
    registry: Arc<BucketRegistry>,
}

impl RateLimitMiddleware {
    pub fn new(policy: Arc<RateLimitPolicy>, registry: Arc<BucketRegistry>) -> Self {
        Self {
            resolver: KeyResolver::new(&policy),
            policy,
            registry,
        }
    }

    fn insert_limit_headers(&self, response: &mut Response<Body>, remaining: u64) {
        let headers = response.headers_mut();
        headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(self.policy.capacity));
        headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
    }

    fn limited_response(&self, retry_after_secs: u64) -> Response<Body> {
        let mut response = AppError::RateLimited.into_response();

        if self.policy.include_headers {
            self.insert_limit_headers(&mut response, 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }

        response
    }
}

#[async_trait]
impl RequestMiddleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> AppResult<ControlFlow> {
        if self.policy.is_skipped(ctx.path()) {
            return Ok(ControlFlow::Continue);
        }

        let key = self.resolver.resolve(&ctx.headers, ctx.client_ip);
        let probe = self.registry.try_consume(&key);

        if probe.consumed {
            if self.policy.include_headers {
                ctx.metadata
                    .insert(REMAINING_META, probe.remaining_tokens.to_string());
            }
            return Ok(ControlFlow::Continue);
        }

        let wait_seconds = probe.retry_after_secs();
        tracing::warn!(
            request_id = %ctx.request_id,
            key = %key,
            path = %ctx.path(),
            wait_seconds,
            "rate limit exceeded"
        );

        Ok(ControlFlow::ShortCircuit(self.limited_response(wait_seconds)))
    }

    async fn on_response(&self, ctx: &RequestContext, response: &mut Response<Body>) {
        if let Some(remaining) = ctx
            .metadata
            .get(REMAINING_META)
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.insert_limit_headers(response, remaining);
        }
    }
}
