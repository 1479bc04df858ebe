use std::{
    net::IpAddr,
    sync::Arc,
};

use axum::{
    Router,
    body::Body,
    http::{
        HeaderName,
        HeaderValue,
        Request,
    },
    response::{
        IntoResponse,
        Response,
    },
};
use tower::ServiceExt;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    context::RequestContext,
    middleware::{
        ControlFlow,
        RequestMiddleware,
        auth::ApiKeyAuthMiddleware,
        logging::RequestLoggingMiddleware,
        rate_limit::RateLimitMiddleware,
    },
    ratelimit::{
        RateLimitPolicy,
        registry::BucketRegistry,
    },
};

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Runs the guard chain in order and hands surviving requests, untouched, to
/// the downstream router. Response hooks run in reverse for every middleware
/// that let the request through.
pub struct Pipeline {
    middlewares: Vec<Arc<dyn RequestMiddleware>>,
    downstream: Router,
}

impl Pipeline {
    pub fn new(middlewares: Vec<Arc<dyn RequestMiddleware>>, downstream: Router) -> Self {
        Self {
            middlewares,
            downstream,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        policy: Arc<RateLimitPolicy>,
        registry: Arc<BucketRegistry>,
        downstream: Router,
    ) -> Self {
        let middlewares: Vec<Arc<dyn RequestMiddleware>> = vec![
            Arc::new(RequestLoggingMiddleware),
            Arc::new(ApiKeyAuthMiddleware::new(
                config.api_key.clone(),
                config.auth_exempt_prefixes.clone(),
            )),
            Arc::new(RateLimitMiddleware::new(policy, registry)),
        ];

        Self::new(middlewares, downstream)
    }

    pub async fn handle_http(
        &self,
        request: Request<Body>,
        client_ip: Option<IpAddr>,
    ) -> Response<Body> {
        let (parts, body) = request.into_parts();

        let request_id = parts
            .headers
            .get(&REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut ctx = RequestContext::new(
            request_id,
            parts.method.clone(),
            parts.uri.clone(),
            parts.headers.clone(),
            client_ip,
        );

        let mut executed = Vec::new();

        for (idx, middleware) in self.middlewares.iter().enumerate() {
            match middleware.on_request(&mut ctx).await {
                Ok(ControlFlow::Continue) => executed.push(idx),
                Ok(ControlFlow::ShortCircuit(mut response)) => {
                    self.finish(&executed, &ctx, &mut response).await;
                    return response;
                }
                Err(err) => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        middleware = middleware.name(),
                        error = %err,
                        "middleware rejected request"
                    );
                    let mut response = err.into_response();
                    self.finish(&executed, &ctx, &mut response).await;
                    return response;
                }
            }
        }

        let request = Request::from_parts(parts, body);
        let mut response = match self.downstream.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        self.finish(&executed, &ctx, &mut response).await;
        response
    }

    async fn finish(&self, executed: &[usize], ctx: &RequestContext, response: &mut Response<Body>) {
        for idx in executed.iter().rev() {
            self.middlewares[*idx].on_response(ctx, response).await;
        }

        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            response.headers_mut().insert(REQUEST_ID, value);
        }
    }
}
