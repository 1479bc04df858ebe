use std::net::IpAddr;

use http::{HeaderMap, HeaderName};

use crate::ratelimit::{KeyStrategy, RateLimitPolicy};

const FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Maps a request onto the key of the bucket it draws from. Never fails.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    strategy: KeyStrategy,
    identity_header: HeaderName,
}

impl KeyResolver {
    pub fn new(policy: &RateLimitPolicy) -> Self {
        Self {
            strategy: policy.key_strategy,
            identity_header: policy.identity_header.clone(),
        }
    }

    pub fn resolve(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> String {
        if self.strategy == KeyStrategy::Identity
            && let Some(identity) = non_blank_header(headers, &self.identity_header)
        {
            return format!("identity:{identity}");
        }

        let origin = match non_blank_header(headers, &FORWARDED_FOR) {
            Some(forwarded) => forwarded
                .split(',')
                .next()
                .map(str::trim)
                .filter(|first| !first.is_empty())
                .map(ToString::to_string),
            None => peer.map(|ip| ip.to_string()),
        };

        format!("origin:{}", origin.as_deref().unwrap_or("unknown"))
    }
}

fn non_blank_header<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, time::Duration};

    use http::HeaderValue;

    use super::*;
    use crate::ratelimit::test_policy;

    fn resolver(strategy: KeyStrategy) -> KeyResolver {
        let mut policy = test_policy(10, 10, Duration::from_secs(60));
        policy.key_strategy = strategy;
        KeyResolver::new(&policy)
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    const PEER: Option<IpAddr> = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));

    #[test]
    fn keys_by_identity_header() {
        let key = resolver(KeyStrategy::Identity)
            .resolve(&headers(&[("x-api-key", "secret")]), PEER);
        assert_eq!(key, "identity:secret");
    }

    #[test]
    fn blank_identity_falls_back_to_origin() {
        let key = resolver(KeyStrategy::Identity).resolve(&headers(&[("x-api-key", "   ")]), PEER);
        assert_eq!(key, "origin:10.0.0.7");
    }

    #[test]
    fn origin_strategy_ignores_identity() {
        let key = resolver(KeyStrategy::Origin)
            .resolve(&headers(&[("x-api-key", "secret")]), PEER);
        assert_eq!(key, "origin:10.0.0.7");
    }

    #[test]
    fn prefers_first_forwarded_address() {
        let key = resolver(KeyStrategy::Origin).resolve(
            &headers(&[("x-forwarded-for", " 203.0.113.9 , 10.1.1.1")]),
            PEER,
        );
        assert_eq!(key, "origin:203.0.113.9");
    }

    #[test]
    fn blank_forwarded_header_uses_peer() {
        let key = resolver(KeyStrategy::Origin)
            .resolve(&headers(&[("x-forwarded-for", "  ")]), PEER);
        assert_eq!(key, "origin:10.0.0.7");
    }

    #[test]
    fn falls_back_to_unknown() {
        let resolver = resolver(KeyStrategy::Identity);
        assert_eq!(resolver.resolve(&HeaderMap::new(), None), "origin:unknown");
        assert_eq!(
            resolver.resolve(&headers(&[("x-forwarded-for", ", 10.1.1.1")]), None),
            "origin:unknown"
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = resolver(KeyStrategy::Identity);
        let request = headers(&[("x-forwarded-for", "198.51.100.1")]);
        let first = resolver.resolve(&request, PEER);
        for _ in 0..10 {
            assert_eq!(resolver.resolve(&request, PEER), first);
        }
    }
}
