use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub connector: ConnectorSettings,
    pub session_token: SessionTokenSettings,
}

#[derive(Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

#[derive(Deserialize, Clone)]
pub struct ConnectorSettings {
    /// Base URL of the connector API, e.g. `https://connector.example.com/connector/v1`.
    pub api_url: String,
    /// Origin header sent with every call.
    pub app_origin: String,
    /// Secret shared with the connector for body MACs.
    #[serde(default)]
    pub shared_secret: Option<Secret<String>>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl ConnectorSettings {
    /// The secret, or `None` when unset or blank.
    pub fn secret(&self) -> Option<&str> {
        self.shared_secret
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Credentials the shop admin signs embedded-app session tokens with.
#[derive(Deserialize, Clone)]
pub struct SessionTokenSettings {
    pub api_key: String,
    #[serde(default)]
    pub api_secret: Option<Secret<String>>,
    #[serde(default = "default_leeway_seconds")]
    pub leeway_seconds: u64,
}

impl SessionTokenSettings {
    pub fn secret(&self) -> Option<&str> {
        self.api_secret
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

fn default_service_name() -> String {
    "shop-app".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_leeway_seconds() -> u64 {
    5
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("Failed to determine the current directory: {}", e)))?;

    let configuration_directory = config_directory(base_path);

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")).required(true))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

// works from the workspace root and from inside shop-app/
fn config_directory(base_path: PathBuf) -> PathBuf {
    if base_path.ends_with("shop-app") {
        base_path.join("config")
    } else {
        base_path.join("shop-app").join("config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(secret: Option<&str>) -> ConnectorSettings {
        ConnectorSettings {
            api_url: "http://localhost:8080/connector/v1".to_string(),
            app_origin: "http://localhost:3000".to_string(),
            shared_secret: secret.map(|s| Secret::new(s.to_string())),
            timeout_seconds: 10,
        }
    }

    #[test]
    fn blank_secret_counts_as_missing() {
        assert_eq!(settings(None).secret(), None);
        assert_eq!(settings(Some("  ")).secret(), None);
        assert_eq!(settings(Some("shpss_x")).secret(), Some("shpss_x"));
    }

    #[test]
    fn config_directory_from_either_root() {
        assert_eq!(
            config_directory(PathBuf::from("/src/shop-app")),
            PathBuf::from("/src/shop-app/config")
        );
        assert_eq!(
            config_directory(PathBuf::from("/src")),
            PathBuf::from("/src/shop-app/config")
        );
    }
}
