use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "kpiserver.toml";
pub const CONFIG_PATH_VAR: &str = "KPI_CONFIG";
pub const ENV_PREFIX: &str = "KPI_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub llm: LlmConfig,
    pub auth: AuthConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            pool_size: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Email whose login is made an Admin at start-up unless it already has a permission record.
    pub bootstrap_admin: Option<String>,
}

impl AppConfig {
    /// Defaults, then the TOML file, then `KPI_`-prefixed environment variables
    /// (nested keys separated by `__`, e.g. `KPI_SERVER__PORT`).
    pub fn figment(path: Option<&Path>) -> Figment {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| {
            std::env::var(CONFIG_PATH_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
        });

        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must not be 0".to_string()));
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "llm.timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(email) = self.auth.bootstrap_admin.as_deref() {
            if !email.contains('@') {
                return Err(ConfigError::Invalid(format!(
                    "auth.bootstrap_admin must be an email address, got {email:?}"
                )));
            }
        }
        if self.store.backend == StoreBackend::Postgres {
            if !cfg!(feature = "postgres") {
                return Err(ConfigError::Invalid(
                    "store.backend = \"postgres\" needs a build with the postgres feature"
                        .to_string(),
                ));
            }
            if self.store.database_url.as_deref().unwrap_or("").is_empty() {
                return Err(ConfigError::Invalid(
                    "store.database_url is required for the postgres backend".to_string(),
                ));
            }
        }
        Ok(self)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_only(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::file(path))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default().validate().unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.llm.timeout_secs, 60);
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 9100\n\n[llm]\nmodel = \"local-model\"\n\n[auth]\nbootstrap_admin = \"owner@example.com\""
        )
        .unwrap();

        let config = AppConfig::from_figment(file_only(file.path())).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.auth.bootstrap_admin.as_deref(), Some("owner@example.com"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::from_figment(file_only(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_postgres_without_url_is_rejected() {
        let mut config = AppConfig::default();
        config.store.backend = StoreBackend::Postgres;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut config = AppConfig::default();
        config.llm.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bootstrap_admin_must_be_an_email() {
        let mut config = AppConfig::default();
        config.auth.bootstrap_admin = Some("E001".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
