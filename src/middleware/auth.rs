use async_trait::async_trait;
use http::HeaderName;

use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    middleware::{ControlFlow, RequestMiddleware},
};

pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// Static shared-secret check on `X-API-KEY`.
pub struct ApiKeyAuthMiddleware {
    api_key: Vec<u8>,
    exempt_prefixes: Vec<String>,
}

impl ApiKeyAuthMiddleware {
    pub fn new(api_key: String, exempt_prefixes: Vec<String>) -> Self {
        Self {
            api_key: api_key.into_bytes(),
            exempt_prefixes,
        }
    }

    fn is_exempt_path(&self, path: &str) -> bool {
        self.exempt_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[async_trait]
impl RequestMiddleware for ApiKeyAuthMiddleware {
    fn name(&self) -> &'static str {
        "api-key-auth"
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> AppResult<ControlFlow> {
        if self.is_exempt_path(ctx.path()) {
            return Ok(ControlFlow::Continue);
        }

        let provided = ctx
            .headers
            .get(&API_KEY_HEADER)
            .map(|v| v.as_bytes())
            .ok_or(AppError::Unauthorized)?;

        if !timing_safe_eq(&self.api_key, provided) {
            return Err(AppError::Unauthorized);
        }

        Ok(ControlFlow::Continue)
    }
}

fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    let max = a.len().max(b.len());
    let mut diff = u8::from(a.len() != b.len());

    for idx in 0..max {
        let av = *a.get(idx).unwrap_or(&0);
        let bv = *b.get(idx).unwrap_or(&0);
        diff |= av ^ bv;
    }

    diff == 0
}

#[cfg(test)]
mod tests {
    use http::{HeaderMap, HeaderValue, Method};

    use super::*;

    fn ctx(path: &str, key: Option<&'static str>) -> RequestContext {
        let mut headers = HeaderMap::new();
        if let Some(key) = key {
            headers.insert(API_KEY_HEADER, HeaderValue::from_static(key));
        }
        RequestContext::new(
            "req-1".to_string(),
            Method::GET,
            path.parse().unwrap(),
            headers,
            None,
        )
    }

    fn middleware() -> ApiKeyAuthMiddleware {
        ApiKeyAuthMiddleware::new("s3cret".to_string(), vec!["/health".to_string()])
    }

    #[tokio::test]
    async fn accepts_matching_key() {
        let flow = middleware()
            .on_request(&mut ctx("/api/v1/session", Some("s3cret")))
            .await
            .unwrap();
        assert!(matches!(flow, ControlFlow::Continue));
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_key() {
        let mw = middleware();
        assert!(matches!(
            mw.on_request(&mut ctx("/api/v1/session", None)).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            mw.on_request(&mut ctx("/api/v1/session", Some("s3cret-but-longer"))).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            mw.on_request(&mut ctx("/api/v1/session", Some("s3cre"))).await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn exempt_paths_skip_the_check() {
        let flow = middleware().on_request(&mut ctx("/health", None)).await.unwrap();
        assert!(matches!(flow, ControlFlow::Continue));
    }

    #[test]
    fn length_mismatch_never_compares_equal() {
        assert!(timing_safe_eq(b"abc", b"abc"));
        assert!(!timing_safe_eq(b"abc", b"abc\0"));
        assert!(!timing_safe_eq(b"", b"\0"));
    }
}
