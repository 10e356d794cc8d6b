use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use url::Url;

/// One year.
pub const MAX_TOKEN_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;
pub const MAX_SESSION_INACTIVITY_HOURS: i64 = 365 * 24;

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub site: SiteConfig,
    pub caller: CallerConfig,
    pub token: TokenConfig,
    pub rate_limit: RateLimitConfig,
    pub directory: DirectoryConfig,
    pub store: StoreConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Public base URL of this service; redemption links are built from it.
    pub url: String,
    /// Where a redeemed token lands when the visit was to `/`.
    pub landing_path: String,
    /// Shop admin origins allowed to embed the dashboard.
    pub frame_ancestors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallerConfig {
    pub shared_secret: Secret<String>,
    /// `host` or `host:port` entries accepted in Origin / Referer.
    pub allowed_hosts: Vec<String>,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub nonce_secret: Secret<String>,
    pub ttl_seconds: i64,
    pub single_use: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub provision_limit: u64,
    pub provision_window_seconds: u64,
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Postgres,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    pub backend: Backend,
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: Backend,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secure_cookie: bool,
    pub inactivity_hours: i64,
}

impl ConnectorConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let directory_backend: Backend = get_env("DIRECTORY_BACKEND", Some("memory"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let database = if directory_backend == Backend::Postgres {
            Some(DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            })
        } else {
            None
        };

        let store_backend: Backend = get_env("STORE_BACKEND", Some("memory"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let redis_url = if store_backend == Backend::Redis {
            Some(get_env("REDIS_URL", None, is_prod)?)
        } else {
            None
        };

        let config = ConnectorConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("connector-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            site: SiteConfig {
                url: get_env("SITE_URL", Some("http://localhost:8080"), is_prod)?,
                landing_path: get_env("LANDING_PATH", Some("/dashboard/"), is_prod)?,
                frame_ancestors: split_list(&get_env(
                    "FRAME_ANCESTORS",
                    Some("https://admin.shopify.com,https://*.myshopify.com"),
                    is_prod,
                )?),
            },
            caller: CallerConfig {
                // no development fallback: without it nothing signed is accepted
                shared_secret: Secret::new(get_env("CALLER_SHARED_SECRET", None, true)?),
                allowed_hosts: split_list(&get_env(
                    "CALLER_ALLOWED_HOSTS",
                    Some("localhost:3000,127.0.0.1:3000"),
                    is_prod,
                )?),
                max_body_bytes: parse_env("MAX_BODY_BYTES", "65536", is_prod)?,
            },
            token: TokenConfig {
                nonce_secret: Secret::new(get_env("TOKEN_NONCE_SECRET", None, true)?),
                ttl_seconds: parse_env("TOKEN_TTL_SECONDS", "86400", is_prod)?,
                single_use: parse_env("TOKEN_SINGLE_USE", "false", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                provision_limit: parse_env("RATE_LIMIT_PROVISION_LIMIT", "10", is_prod)?,
                provision_window_seconds: parse_env(
                    "RATE_LIMIT_PROVISION_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
                trust_forwarded_for: parse_env("RATE_LIMIT_TRUST_FORWARDED_FOR", "false", is_prod)?,
            },
            directory: DirectoryConfig {
                backend: directory_backend,
                database,
            },
            store: StoreConfig {
                backend: store_backend,
                redis_url,
            },
            session: SessionConfig {
                secure_cookie: parse_env("SESSION_SECURE_COOKIE", "false", is_prod)?,
                inactivity_hours: parse_env("SESSION_INACTIVITY_HOURS", "24", is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.caller.shared_secret.expose_secret().trim().is_empty() {
            return Err(config_error("CALLER_SHARED_SECRET must not be empty"));
        }

        if self.token.nonce_secret.expose_secret().trim().is_empty() {
            return Err(config_error("TOKEN_NONCE_SECRET must not be empty"));
        }

        let site = Url::parse(&self.site.url)
            .map_err(|e| config_error(&format!("SITE_URL is not a valid URL: {}", e)))?;
        if !matches!(site.scheme(), "http" | "https") || site.host_str().is_none() {
            return Err(config_error("SITE_URL must be an absolute http(s) URL"));
        }

        if !is_local_path(&self.site.landing_path) {
            return Err(config_error("LANDING_PATH must be an absolute local path"));
        }

        if self.caller.allowed_hosts.is_empty() {
            return Err(config_error("CALLER_ALLOWED_HOSTS must name at least one host"));
        }

        if self.token.ttl_seconds <= 0 || self.token.ttl_seconds > MAX_TOKEN_TTL_SECONDS {
            return Err(config_error(&format!(
                "TOKEN_TTL_SECONDS must be between 1 and {}",
                MAX_TOKEN_TTL_SECONDS
            )));
        }

        if self.rate_limit.provision_limit == 0 || self.rate_limit.provision_window_seconds == 0 {
            return Err(config_error(
                "RATE_LIMIT_PROVISION_LIMIT and RATE_LIMIT_PROVISION_WINDOW_SECONDS must be positive",
            ));
        }

        if self.caller.max_body_bytes == 0 {
            return Err(config_error("MAX_BODY_BYTES must be positive"));
        }

        if self.session.inactivity_hours <= 0
            || self.session.inactivity_hours > MAX_SESSION_INACTIVITY_HOURS
        {
            return Err(config_error(&format!(
                "SESSION_INACTIVITY_HOURS must be between 1 and {}",
                MAX_SESSION_INACTIVITY_HOURS
            )));
        }

        if self.directory.backend == Backend::Redis {
            return Err(config_error("DIRECTORY_BACKEND must be 'memory' or 'postgres'"));
        }
        if self.store.backend == Backend::Postgres {
            return Err(config_error("STORE_BACKEND must be 'memory' or 'redis'"));
        }

        if self.environment == Environment::Prod {
            if site.scheme() != "https" {
                return Err(config_error("SITE_URL must use https in production"));
            }

            if !self.session.secure_cookie {
                tracing::error!("SESSION_SECURE_COOKIE is disabled in production");
            }

            if self.directory.backend == Backend::Memory {
                tracing::warn!("In-memory directory in production loses accounts on restart");
            }
        }

        Ok(())
    }
}

/// True for `/path` but not `//host` or anything with a backslash.
pub fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, Some(default), is_prod)?;
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e))
    })
}

/// Reads `key`. Production requires every variable to be set explicitly;
/// in development the default applies.
fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "postgres" => Ok(Backend::Postgres),
            "redis" => Ok(Backend::Redis),
            _ => Err(format!("Invalid backend: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ConnectorConfig {
        ConnectorConfig {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "connector-service".into(),
            service_version: "test".into(),
            log_level: "info".into(),
            otlp_endpoint: None,
            site: SiteConfig {
                url: "http://localhost:8080".into(),
                landing_path: "/dashboard/".into(),
                frame_ancestors: vec![],
            },
            caller: CallerConfig {
                shared_secret: Secret::new("caller-secret".into()),
                allowed_hosts: vec!["localhost:3000".into()],
                max_body_bytes: 65536,
            },
            token: TokenConfig {
                nonce_secret: Secret::new("nonce-secret".into()),
                ttl_seconds: 86400,
                single_use: false,
            },
            rate_limit: RateLimitConfig {
                provision_limit: 10,
                provision_window_seconds: 60,
                trust_forwarded_for: false,
            },
            directory: DirectoryConfig {
                backend: Backend::Memory,
                database: None,
            },
            store: StoreConfig {
                backend: Backend::Memory,
                redis_url: None,
            },
            session: SessionConfig {
                secure_cookie: false,
                inactivity_hours: 24,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn blank_shared_secret_fails_startup() {
        let mut config = valid();
        config.caller.shared_secret = Secret::new("  ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn landing_path_must_be_local() {
        for bad in ["dashboard", "//evil.example", "/\\evil.example", "https://evil.example/"] {
            let mut config = valid();
            config.site.landing_path = bad.into();
            assert!(config.validate().is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn production_requires_https_site() {
        let mut config = valid();
        config.environment = Environment::Prod;
        assert!(config.validate().is_err());

        config.site.url = "https://connector.example.com".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lifetimes_are_bounded() {
        let mut config = valid();
        config.token.ttl_seconds = MAX_TOKEN_TTL_SECONDS;
        config.session.inactivity_hours = MAX_SESSION_INACTIVITY_HOURS;
        assert!(config.validate().is_ok());

        for ttl in [0, MAX_TOKEN_TTL_SECONDS + 1, 10_000_000_000_000, i64::MAX] {
            let mut config = valid();
            config.token.ttl_seconds = ttl;
            assert!(config.validate().is_err(), "ttl {} accepted", ttl);
        }

        for hours in [0, MAX_SESSION_INACTIVITY_HOURS + 1, i64::MAX] {
            let mut config = valid();
            config.session.inactivity_hours = hours;
            assert!(config.validate().is_err(), "inactivity {} accepted", hours);
        }
    }

    #[test]
    fn list_values_are_trimmed() {
        assert_eq!(
            split_list(" a.com , localhost:3000,,"),
            vec!["a.com".to_string(), "localhost:3000".to_string()]
        );
    }
}
