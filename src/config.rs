//! Service configuration from `WARDEN_`-prefixed environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Address that is not `host:port`
    #[error("invalid address for {name}: {reason}")]
    InvalidAddr { name: &'static str, reason: String },

    /// Value that does not parse as its type
    #[error("failed to parse environment variable {name}: {reason}")]
    ParseError { name: &'static str, reason: String },

    /// Timeouts must be positive
    #[error("invalid timeout {name}: must be greater than 0")]
    ZeroTimeout { name: &'static str },

    /// Body limit must be positive
    #[error("invalid body limit {name}: must be greater than 0")]
    ZeroBodyLimit { name: &'static str },

    /// Only RSA signing is supported
    #[error(
        "unsupported signing method {0:?}: expected one of RS256, RS384, RS512, PS256, PS384, PS512"
    )]
    UnsupportedAlgorithm(String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub web: WebConfig,
    pub auth: AuthConfig,
    /// Build tag; `development` selects human-readable logs.
    pub build: String,
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub api_host: SocketAddr,
    pub debug_host: SocketAddr,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Largest request body accepted, in bytes.
    pub body_limit: usize,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub keys_dir: PathBuf,
    pub signing_method: Algorithm,
    pub issuer: String,
}

impl Config {
    /// Loads configuration from the environment, after an optional `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_owned());
        let addr = |name: &'static str, default: &str| parse_addr(name, &var(name, default));
        let secs = |name: &'static str, default: &str| parse_secs(name, &var(name, default));
        let bytes = |name: &'static str, default: &str| parse_bytes(name, &var(name, default));

        let config = Self {
            web: WebConfig {
                api_host: addr("WARDEN_WEB_API_HOST", "0.0.0.0:8000")?,
                debug_host: addr("WARDEN_WEB_DEBUG_HOST", "0.0.0.0:3000")?,
                read_timeout: secs("WARDEN_WEB_READ_TIMEOUT", "5")?,
                write_timeout: secs("WARDEN_WEB_WRITE_TIMEOUT", "10")?,
                shutdown_timeout: secs("WARDEN_WEB_SHUTDOWN_TIMEOUT", "20")?,
                body_limit: bytes("WARDEN_WEB_BODY_LIMIT", "1048576")?,
            },
            auth: AuthConfig {
                keys_dir: PathBuf::from(var("WARDEN_AUTH_KEYS_DIR", "keys")),
                signing_method: parse_algorithm(&var("WARDEN_AUTH_SIGNING_METHOD", "RS256"))?,
                issuer: var("WARDEN_AUTH_ISSUER", "auth-service"),
            },
            build: var("WARDEN_BUILD", "development"),
        };

        Ok(config)
    }

    pub fn is_development(&self) -> bool {
        self.build == "development"
    }
}

fn parse_addr(name: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|e: std::net::AddrParseError| ConfigError::InvalidAddr {
            name,
            reason: e.to_string(),
        })
}

fn parse_secs(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs = u64::from_str(value.trim())
        .map_err(|e| ConfigError::ParseError { name, reason: e.to_string() })?;
    if secs == 0 {
        return Err(ConfigError::ZeroTimeout { name });
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bytes(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    let bytes = usize::from_str(value.trim())
        .map_err(|e| ConfigError::ParseError { name, reason: e.to_string() })?;
    if bytes == 0 {
        return Err(ConfigError::ZeroBodyLimit { name });
    }
    Ok(bytes)
}

fn parse_algorithm(value: &str) -> Result<Algorithm, ConfigError> {
    let alg = Algorithm::from_str(value)
        .map_err(|_| ConfigError::UnsupportedAlgorithm(value.to_owned()))?;
    match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => Ok(alg),
        _ => Err(ConfigError::UnsupportedAlgorithm(value.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.web.api_host, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(cfg.web.debug_host, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(cfg.web.read_timeout, Duration::from_secs(5));
        assert_eq!(cfg.web.write_timeout, Duration::from_secs(10));
        assert_eq!(cfg.web.shutdown_timeout, Duration::from_secs(20));
        assert_eq!(cfg.web.body_limit, 1024 * 1024);
        assert_eq!(cfg.auth.keys_dir, PathBuf::from("keys"));
        assert_eq!(cfg.auth.signing_method, Algorithm::RS256);
        assert_eq!(cfg.auth.issuer, "auth-service");
        assert!(cfg.is_development());
    }

    #[test]
    fn overrides() {
        let cfg = load(&[
            ("WARDEN_WEB_API_HOST", "127.0.0.1:9000"),
            ("WARDEN_AUTH_SIGNING_METHOD", "PS384"),
            ("WARDEN_WEB_BODY_LIMIT", "4096"),
            ("WARDEN_BUILD", "1.4.2"),
        ])
        .unwrap();
        assert_eq!(cfg.web.api_host.port(), 9000);
        assert_eq!(cfg.web.body_limit, 4096);
        assert_eq!(cfg.auth.signing_method, Algorithm::PS384);
        assert!(!cfg.is_development());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            load(&[("WARDEN_WEB_API_HOST", "localhost")]),
            Err(ConfigError::InvalidAddr { name: "WARDEN_WEB_API_HOST", .. })
        ));
        assert!(matches!(
            load(&[("WARDEN_WEB_WRITE_TIMEOUT", "ten")]),
            Err(ConfigError::ParseError { .. })
        ));
        assert!(matches!(
            load(&[("WARDEN_WEB_SHUTDOWN_TIMEOUT", "0")]),
            Err(ConfigError::ZeroTimeout { .. })
        ));
        assert!(matches!(
            load(&[("WARDEN_WEB_BODY_LIMIT", "0")]),
            Err(ConfigError::ZeroBodyLimit { .. })
        ));
        assert!(matches!(
            load(&[("WARDEN_AUTH_SIGNING_METHOD", "HS256")]),
            Err(ConfigError::UnsupportedAlgorithm(_))
        ));
    }
}
