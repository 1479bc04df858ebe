use async_trait::async_trait;

use crate::{
    context::RequestContext,
    error::AppResult,
    middleware::{ControlFlow, RequestMiddleware},
};

pub struct RequestLoggingMiddleware;

#[async_trait]
impl RequestMiddleware for RequestLoggingMiddleware {
    fn name(&self) -> &'static str {
        "request-logging"
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> AppResult<ControlFlow> {
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path(),
            client_ip = ?ctx.client_ip,
            "incoming request"
        );
        Ok(ControlFlow::Continue)
    }

    async fn on_response(&self, ctx: &RequestContext, response: &mut axum::response::Response) {
        let latency_ms = ctx.started_at.elapsed().as_millis();
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path(),
            status = %response.status(),
            latency_ms = latency_ms,
            "request completed"
        );
    }
}
