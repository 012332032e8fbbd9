//! Server configuration.
//!
//! A [`ServerConfig`] is an immutable snapshot read once at startup. It can
//! be built directly, parsed from a TOML file, or obtained from a
//! [`ConfigProvider`]. The default provider reads:
//! - the table named after the namespace in `clientevent.toml`
//! - environment variables (`CLIENTEVENT_*`), which take precedence

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No port was configured.
    #[error("Missing required setting `port` in namespace `{0}`")]
    MissingPort(String),

    /// Port 0 was configured.
    #[error("Invalid port 0 in namespace `{0}`")]
    InvalidPort(String),

    /// The host does not resolve to an address.
    #[error("Invalid host `{0}`")]
    InvalidHost(String),

    /// A setting failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The configuration file could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        /// Path of the file.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration source could not be loaded or deserialized.
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on. `0` binds an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// TLS configuration.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// TLS configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Serve connections over TLS.
    #[serde(default)]
    pub enabled: bool,

    /// PEM key store holding the certificate chain and private key.
    /// Relative paths are resolved against the working directory.
    #[serde(default)]
    pub key_store: PathBuf,

    /// Key store password. Unused for unencrypted PEM key stores.
    #[serde(default)]
    pub key_store_password: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: TlsConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl TlsConfig {
    /// Whether a password is configured that will not be used. PEM key
    /// stores are read unencrypted.
    #[must_use]
    pub fn ignores_password(&self) -> bool {
        self.enabled && !self.key_store_password.is_empty()
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl ServerConfig {
    /// Plain WebSocket configuration for `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Enable TLS with the given key store.
    #[must_use]
    pub fn with_tls(mut self, key_store: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        self.tls = TlsConfig {
            enabled: true,
            key_store: key_store.into(),
            key_store_password: password.into(),
        };
        self
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid TOML for this schema.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check the settings that cannot be expressed in the type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.limits.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_connections must be at least 1".into(),
            ));
        }
        if self.limits.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_message_size must be at least 1".into(),
            ));
        }
        if self.tls.enabled && self.tls.key_store.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "tls.key_store is required when TLS is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHost`] if the host does not resolve.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::InvalidHost(self.host.clone()))
    }
}

/// Supplies server configuration by namespace.
pub trait ConfigProvider: Send + Sync {
    /// Load the configuration stored under `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingPort`] or [`ConfigError::InvalidPort`]
    /// if no usable port is configured, or a source error.
    fn get_config(&self, namespace: &str) -> Result<ServerConfig, ConfigError>;
}

/// Flat settings as they appear in a namespace table or the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamespaceSettings {
    port: Option<u16>,
    use_secure_transport: Option<bool>,
    key_store_file_name: Option<String>,
    key_store_password: Option<String>,
    host: Option<String>,
    max_connections: Option<usize>,
    max_message_size: Option<usize>,
    metrics_enabled: Option<bool>,
    metrics_port: Option<u16>,
}

impl NamespaceSettings {
    /// Overlay `other` on top of `self`.
    fn merge(self, other: Self) -> Self {
        Self {
            port: other.port.or(self.port),
            use_secure_transport: other.use_secure_transport.or(self.use_secure_transport),
            key_store_file_name: other.key_store_file_name.or(self.key_store_file_name),
            key_store_password: other.key_store_password.or(self.key_store_password),
            host: other.host.or(self.host),
            max_connections: other.max_connections.or(self.max_connections),
            max_message_size: other.max_message_size.or(self.max_message_size),
            metrics_enabled: other.metrics_enabled.or(self.metrics_enabled),
            metrics_port: other.metrics_port.or(self.metrics_port),
        }
    }

    fn into_server_config(self, namespace: &str) -> Result<ServerConfig, ConfigError> {
        let port = match self.port {
            None => return Err(ConfigError::MissingPort(namespace.to_string())),
            Some(0) => return Err(ConfigError::InvalidPort(namespace.to_string())),
            Some(port) => port,
        };

        let defaults = ServerConfig::default();
        Ok(ServerConfig {
            host: self.host.unwrap_or(defaults.host),
            port,
            tls: TlsConfig {
                enabled: self.use_secure_transport.unwrap_or(false),
                key_store: self.key_store_file_name.map(PathBuf::from).unwrap_or_default(),
                key_store_password: self.key_store_password.unwrap_or_default(),
            },
            limits: LimitsConfig {
                max_connections: self
                    .max_connections
                    .unwrap_or(defaults.limits.max_connections),
                max_message_size: self
                    .max_message_size
                    .unwrap_or(defaults.limits.max_message_size),
            },
            metrics: MetricsConfig {
                enabled: self.metrics_enabled.unwrap_or(defaults.metrics.enabled),
                port: self.metrics_port.unwrap_or(defaults.metrics.port),
            },
        })
    }
}

/// Reads configuration from a TOML file and the process environment.
///
/// Given namespace `clientevent`, the file's `[clientevent]` table supplies
/// the base settings and `CLIENTEVENT_PORT`, `CLIENTEVENT_HOST`, ... override
/// them.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
    env: Option<HashMap<String, String>>,
}

impl Default for FileConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FileConfigProvider {
    /// Default config file name, resolved against the working directory.
    pub const DEFAULT_FILE: &'static str = "clientevent.toml";

    /// Read `clientevent.toml` and the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_file(Self::DEFAULT_FILE)
    }

    /// Read the given file instead of `clientevent.toml`. A missing file is
    /// treated as empty.
    #[must_use]
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env: None,
        }
    }

    /// Use `vars` in place of the process environment.
    #[must_use]
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    fn env_prefix(namespace: &str) -> String {
        namespace.to_uppercase().replace(['-', '.'], "_")
    }

    fn file_settings(&self, namespace: &str) -> Result<NamespaceSettings, ConfigError> {
        let file = config::Config::builder()
            .add_source(
                config::File::from(self.path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .build()?;

        match file.get::<NamespaceSettings>(namespace) {
            Ok(settings) => Ok(settings),
            Err(config::ConfigError::NotFound(_)) => Ok(NamespaceSettings::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn env_settings(&self, namespace: &str) -> Result<NamespaceSettings, ConfigError> {
        let env = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(&Self::env_prefix(namespace))
                    .try_parsing(true)
                    .source(self.env.clone()),
            )
            .build()?;

        Ok(env.try_deserialize()?)
    }
}

impl ConfigProvider for FileConfigProvider {
    fn get_config(&self, namespace: &str) -> Result<ServerConfig, ConfigError> {
        let settings = self
            .file_settings(namespace)?
            .merge(self.env_settings(namespace)?);
        let config = settings.into_server_config(namespace)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clientevent.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert!(!config.tls.enabled);
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let addr = ServerConfig::new("0.0.0.0", 9000).bind_addr().unwrap();
        assert_eq!(addr, "0.0.0.0:9000".parse().unwrap());

        let addr = ServerConfig::new("localhost", 9001).bind_addr().unwrap();
        assert_eq!(addr.port(), 9001);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [tls]
            enabled = true
            key_store = "certs/server.pem"

            [limits]
            max_connections = 50000
        "#;

        let config = ServerConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert!(config.tls.enabled);
        assert_eq!(config.tls.key_store, PathBuf::from("certs/server.pem"));
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.limits.max_message_size, 64 * 1024);
    }

    #[test]
    fn test_validate_rejects_tls_without_key_store() {
        let mut config = ServerConfig::default();
        config.tls.enabled = true;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_provider_reads_namespace_table() {
        let (_dir, path) = write_config(
            r#"
            [clientevent]
            port = 4000
            use_secure_transport = true
            key_store_file_name = "keystore.pem"
            key_store_password = "secret"

            [other]
            port = 5000
            "#,
        );

        let config = FileConfigProvider::with_file(&path)
            .with_env(HashMap::new())
            .get_config("clientevent")
            .unwrap();
        assert_eq!(config.port, 4000);
        assert!(config.tls.enabled);
        assert_eq!(config.tls.key_store, PathBuf::from("keystore.pem"));
        assert_eq!(config.tls.key_store_password, "secret");
        assert!(config.tls.ignores_password());
    }

    #[test]
    fn test_password_only_ignored_when_tls_enabled() {
        let config = ServerConfig::new("127.0.0.1", 0).with_tls("keystore.pem", "");
        assert!(!config.tls.ignores_password());

        let mut config = ServerConfig::new("127.0.0.1", 0).with_tls("keystore.pem", "secret");
        assert!(config.tls.ignores_password());
        config.tls.enabled = false;
        assert!(!config.tls.ignores_password());
    }

    #[test]
    fn test_environment_overrides_file() {
        let (_dir, path) = write_config(
            r#"
            [clientevent]
            port = 4000
            host = "127.0.0.1"
            "#,
        );

        let config = FileConfigProvider::with_file(&path)
            .with_env(env(&[
                ("CLIENTEVENT_PORT", "4100"),
                ("CLIENTEVENT_METRICS_ENABLED", "true"),
            ]))
            .get_config("clientevent")
            .unwrap();
        assert_eq!(config.port, 4100);
        assert_eq!(config.host, "127.0.0.1");
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_missing_file_uses_environment() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfigProvider::with_file(dir.path().join("absent.toml"))
            .with_env(env(&[("CLIENTEVENT_PORT", "4200")]))
            .get_config("clientevent")
            .unwrap();
        assert_eq!(config.port, 4200);
        assert!(!config.tls.enabled);
    }

    #[test]
    fn test_missing_port_fails() {
        let (_dir, path) = write_config("[clientevent]\nhost = \"0.0.0.0\"\n");

        let result = FileConfigProvider::with_file(&path)
            .with_env(HashMap::new())
            .get_config("clientevent");
        assert!(matches!(result, Err(ConfigError::MissingPort(ns)) if ns == "clientevent"));
    }

    #[test]
    fn test_zero_port_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileConfigProvider::with_file(dir.path().join("absent.toml"))
            .with_env(env(&[("CLIENTEVENT_PORT", "0")]))
            .get_config("clientevent");
        assert!(matches!(result, Err(ConfigError::InvalidPort(_))));
    }

    #[test]
    fn test_unparseable_port_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileConfigProvider::with_file(dir.path().join("absent.toml"))
            .with_env(env(&[("CLIENTEVENT_PORT", "eighty")]))
            .get_config("clientevent");
        assert!(matches!(result, Err(ConfigError::Source(_))));
    }
}
