use anyhow::{Context, Result};
use std::{
    env,
    net::SocketAddr,
    str::FromStr,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub api_key: String,
    pub auth_exempt_prefixes: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub log: LogConfig,
}

/// Raw rate limit settings; validated into a `RateLimitPolicy` at startup.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub capacity: i64,
    pub refill_tokens: i64,
    pub refill_period_seconds: i64,
    pub per_api_key: bool,
    pub key_header: String,
    pub include_headers: bool,
    pub skip_paths: Vec<String>,
    pub idle_evict_seconds: u64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        let api_key = lookup("API_KEY")
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| "change-me-please".to_string());

        let auth_exempt_prefixes = parse_csv(&lookup, "AUTH_EXEMPT_PREFIXES", "/health");

        let rate_limit = RateLimitConfig {
            enabled: parse_flag(&lookup, "RATE_LIMIT_ENABLED", true)?,
            capacity: parse_strict(&lookup, "RATE_LIMIT_CAPACITY", 100)?,
            refill_tokens: parse_strict(&lookup, "RATE_LIMIT_REFILL_TOKENS", 100)?,
            refill_period_seconds: parse_strict(&lookup, "RATE_LIMIT_REFILL_PERIOD_SECONDS", 60)?,
            per_api_key: parse_flag(&lookup, "RATE_LIMIT_PER_API_KEY", true)?,
            key_header: lookup("RATE_LIMIT_KEY_HEADER")
                .unwrap_or_else(|| "x-api-key".to_string())
                .to_ascii_lowercase(),
            include_headers: parse_flag(&lookup, "RATE_LIMIT_INCLUDE_HEADERS", true)?,
            skip_paths: parse_csv(&lookup, "RATE_LIMIT_SKIP_PATHS", "/health"),
            idle_evict_seconds: parse_strict(&lookup, "RATE_LIMIT_IDLE_EVICT_SECONDS", 3600)?,
            sweep_interval_seconds: parse_strict(&lookup, "RATE_LIMIT_SWEEP_SECONDS", 60)?,
        };

        let log = LogConfig {
            level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        };

        Ok(Self {
            bind_addr,
            api_key,
            auth_exempt_prefixes,
            rate_limit,
            log,
        })
    }
}

fn parse_csv<F>(lookup: &F, key: &str, default: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Accepts `true`/`false`, `1`/`0`, `yes`/`no` and `on`/`off` in any case.
fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("invalid {key}: {raw:?} (expected true or false)"),
    }
}

/// A present-and-malformed value is an error rather than the default.
fn parse_strict<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.api_key, "change-me-please");
        assert_eq!(cfg.auth_exempt_prefixes, vec!["/health"]);
        assert!(cfg.rate_limit.enabled);
        assert_eq!(cfg.rate_limit.capacity, 100);
        assert_eq!(cfg.rate_limit.refill_tokens, 100);
        assert_eq!(cfg.rate_limit.refill_period_seconds, 60);
        assert!(cfg.rate_limit.per_api_key);
        assert!(cfg.rate_limit.include_headers);
        assert_eq!(cfg.rate_limit.skip_paths, vec!["/health"]);
        assert_eq!(cfg.rate_limit.idle_evict_seconds, 3600);
        assert!(!cfg.log.json);
    }

    #[test]
    fn reads_overrides() {
        let cfg = load(&[
            ("RATE_LIMIT_ENABLED", "false"),
            ("RATE_LIMIT_CAPACITY", "2"),
            ("RATE_LIMIT_REFILL_TOKENS", " 2 "),
            ("RATE_LIMIT_REFILL_PERIOD_SECONDS", "3600"),
            ("RATE_LIMIT_PER_API_KEY", "false"),
            ("RATE_LIMIT_KEY_HEADER", "X-Client-Id"),
            ("RATE_LIMIT_SKIP_PATHS", "/health, /docs,,"),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();

        assert!(!cfg.rate_limit.enabled);
        assert_eq!(cfg.rate_limit.capacity, 2);
        assert_eq!(cfg.rate_limit.refill_tokens, 2);
        assert_eq!(cfg.rate_limit.refill_period_seconds, 3600);
        assert!(!cfg.rate_limit.per_api_key);
        assert_eq!(cfg.rate_limit.key_header, "x-client-id");
        assert_eq!(cfg.rate_limit.skip_paths, vec!["/health", "/docs"]);
        assert!(cfg.log.json);
    }

    #[test]
    fn malformed_rate_limit_numbers_are_errors() {
        let err = load(&[("RATE_LIMIT_CAPACITY", "lots")]).unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_CAPACITY"));

        assert!(load(&[("RATE_LIMIT_SWEEP_SECONDS", "-1")]).is_err());
    }

    #[test]
    fn rate_limit_flags_accept_common_spellings() {
        let cfg = load(&[
            ("RATE_LIMIT_ENABLED", "False"),
            ("RATE_LIMIT_PER_API_KEY", "0"),
            ("RATE_LIMIT_INCLUDE_HEADERS", " OFF "),
        ])
        .unwrap();
        assert!(!cfg.rate_limit.enabled);
        assert!(!cfg.rate_limit.per_api_key);
        assert!(!cfg.rate_limit.include_headers);

        assert!(load(&[("RATE_LIMIT_ENABLED", "Yes")]).unwrap().rate_limit.enabled);
    }

    #[test]
    fn malformed_rate_limit_flags_are_errors() {
        let err = load(&[("RATE_LIMIT_ENABLED", "flase")]).unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_ENABLED"));

        assert!(load(&[("RATE_LIMIT_INCLUDE_HEADERS", "")]).is_err());
    }

    #[test]
    fn negative_capacity_parses_for_policy_validation() {
        let cfg = load(&[("RATE_LIMIT_CAPACITY", "-3")]).unwrap();
        assert_eq!(cfg.rate_limit.capacity, -3);
    }

    #[test]
    fn invalid_bind_addr_is_an_error() {
        assert!(load(&[("BIND_ADDR", "not-an-addr")]).is_err());
    }
}
