use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::Credential;
use crate::error::ConfigError;

pub const ENV_BIND: &str = "TICKPROXY_BIND";
pub const ENV_PORT: &str = "TICKPROXY_PORT";
pub const ENV_ALLOWED_ORIGINS: &str = "TICKPROXY_ALLOWED_ORIGINS";
pub const ENV_AUTH_USER: &str = "TICKPROXY_BASIC_AUTH_USER";
pub const ENV_AUTH_PASS: &str = "TICKPROXY_BASIC_AUTH_PASS";
pub const ENV_CACHE_DIR: &str = "TICKPROXY_CACHE_DIR";
pub const ENV_SNAPSHOT_DIR: &str = "TICKPROXY_SNAPSHOT_DIR";
pub const ENV_CACHE_TTL: &str = "TICKPROXY_CACHE_TTL";
pub const ENV_RATE_LIMIT_MAX: &str = "TICKPROXY_RATE_LIMIT_MAX";
pub const ENV_RATE_LIMIT_WINDOW: &str = "TICKPROXY_RATE_LIMIT_WINDOW";
pub const ENV_UPSTREAM_TIMEOUT_MS: &str = "TICKPROXY_UPSTREAM_TIMEOUT_MS";
pub const ENV_UPSTREAM_QUOTA: &str = "TICKPROXY_UPSTREAM_QUOTA";

const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 15_000;

const DEFAULT_ORIGINS: [&str; 4] = [
    "http://localhost:8000",
    "http://127.0.0.1:8000",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

/// Cross-origin policy for browser callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    fn parse(raw: &str) -> Self {
        let origins: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_owned)
            .collect();

        if origins.iter().any(|origin| origin == "*") {
            Self::Any
        } else if origins.is_empty() {
            Self::default()
        } else {
            Self::List(origins)
        }
    }
}

impl Default for AllowedOrigins {
    fn default() -> Self {
        Self::List(DEFAULT_ORIGINS.iter().map(|origin| (*origin).to_owned()).collect())
    }
}

/// Process configuration, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub allowed_origins: AllowedOrigins,
    /// `None` disables authentication.
    pub credentials: Option<Credential>,
    pub cache_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub cache_ttl: Duration,
    pub rate_limit_max: usize,
    pub rate_limit_window: Duration,
    pub upstream_timeout: Duration,
    /// Upstream calls per minute across all clients; 0 disables the budget.
    pub upstream_quota_per_minute: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8001,
            allowed_origins: AllowedOrigins::default(),
            credentials: None,
            cache_dir: PathBuf::from("data/cache"),
            snapshot_dir: PathBuf::from("data"),
            cache_ttl: Duration::from_secs(3600),
            rate_limit_max: 60,
            rate_limit_window: Duration::from_secs(60),
            upstream_timeout: Duration::from_millis(DEFAULT_UPSTREAM_TIMEOUT_MS),
            upstream_quota_per_minute: 120,
        }
    }
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let bind = match get(ENV_BIND) {
            Some(value) => IpAddr::from_str(&value).map_err(|_| ConfigError::InvalidBind { value })?,
            None => defaults.bind,
        };

        let credentials = match (get(ENV_AUTH_USER), get(ENV_AUTH_PASS)) {
            (Some(user), Some(pass)) => Some(Credential::new(user, pass)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::PartialCredentials {
                    present: ENV_AUTH_USER,
                    missing: ENV_AUTH_PASS,
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::PartialCredentials {
                    present: ENV_AUTH_PASS,
                    missing: ENV_AUTH_USER,
                })
            }
        };

        Ok(Self {
            bind,
            port: parse_or(get(ENV_PORT), ENV_PORT, defaults.port),
            allowed_origins: get(ENV_ALLOWED_ORIGINS)
                .map_or(defaults.allowed_origins, |raw| AllowedOrigins::parse(&raw)),
            credentials,
            cache_dir: get(ENV_CACHE_DIR).map_or(defaults.cache_dir, PathBuf::from),
            snapshot_dir: get(ENV_SNAPSHOT_DIR).map_or(defaults.snapshot_dir, PathBuf::from),
            cache_ttl: Duration::from_secs(parse_or(
                get(ENV_CACHE_TTL),
                ENV_CACHE_TTL,
                defaults.cache_ttl.as_secs(),
            )),
            rate_limit_max: parse_or(get(ENV_RATE_LIMIT_MAX), ENV_RATE_LIMIT_MAX, defaults.rate_limit_max),
            rate_limit_window: Duration::from_secs(parse_or(
                get(ENV_RATE_LIMIT_WINDOW),
                ENV_RATE_LIMIT_WINDOW,
                defaults.rate_limit_window.as_secs(),
            )),
            upstream_timeout: Duration::from_millis(parse_or(
                get(ENV_UPSTREAM_TIMEOUT_MS),
                ENV_UPSTREAM_TIMEOUT_MS,
                DEFAULT_UPSTREAM_TIMEOUT_MS,
            )),
            upstream_quota_per_minute: parse_or(
                get(ENV_UPSTREAM_QUOTA),
                ENV_UPSTREAM_QUOTA,
                defaults.upstream_quota_per_minute,
            ),
        })
    }

    pub fn auth_enabled(&self) -> bool {
        self.credentials.is_some()
    }
}

fn parse_or<T>(raw: Option<String>, name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, %default, "unparseable value; using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ProxyConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ProxyConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = config_from(&[]).expect("defaults are valid");
        assert_eq!(config.port, 8001);
        assert_eq!(config.cache_dir, PathBuf::from("data/cache"));
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.rate_limit_max, 60);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert!(!config.auth_enabled());
        assert_eq!(config.allowed_origins, AllowedOrigins::default());
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            (ENV_PORT, "9100"),
            (ENV_CACHE_DIR, "/var/cache/tickproxy"),
            (ENV_CACHE_TTL, "10"),
            (ENV_RATE_LIMIT_MAX, "2"),
            (ENV_RATE_LIMIT_WINDOW, "2"),
            (ENV_ALLOWED_ORIGINS, "https://a.test, https://b.test"),
            (ENV_AUTH_USER, "alice"),
            (ENV_AUTH_PASS, "s3cret"),
        ])
        .expect("valid config");

        assert_eq!(config.port, 9100);
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/tickproxy"));
        assert_eq!(config.cache_ttl, Duration::from_secs(10));
        assert_eq!(config.rate_limit_max, 2);
        assert_eq!(
            config.allowed_origins,
            AllowedOrigins::List(vec![
                String::from("https://a.test"),
                String::from("https://b.test")
            ])
        );
        assert_eq!(config.credentials, Some(Credential::new("alice", "s3cret")));
    }

    #[test]
    fn wildcard_origin_means_any() {
        let config = config_from(&[(ENV_ALLOWED_ORIGINS, "https://a.test,*")]).expect("valid");
        assert_eq!(config.allowed_origins, AllowedOrigins::Any);
    }

    #[test]
    fn half_configured_credentials_are_rejected() {
        let error = config_from(&[(ENV_AUTH_USER, "alice")]).expect_err("password missing");
        assert!(matches!(
            error,
            ConfigError::PartialCredentials {
                missing: ENV_AUTH_PASS,
                ..
            }
        ));
        assert!(config_from(&[(ENV_AUTH_PASS, "s3cret")]).is_err());
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let config = config_from(&[(ENV_CACHE_TTL, "soon"), (ENV_PORT, "99999")]).expect("valid");
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.port, 8001);
    }

    #[test]
    fn bad_bind_address_is_an_error() {
        assert!(matches!(
            config_from(&[(ENV_BIND, "localhost:80")]),
            Err(ConfigError::InvalidBind { .. })
        ));
    }
}
