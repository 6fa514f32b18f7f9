//! Settings file management

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::SecretValue;
use crate::errors::StormError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Default file name looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "storm_config.json";

/// Control-plane settings, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Image registry the builds are pushed to
    pub registry: RegistrySettings,

    /// Shared secret expected in the `X-Server-Code` header
    pub server_auth_token: SecretValue,

    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Cluster reconciliation configuration
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Image build configuration
    #[serde(default)]
    pub build: BuildSettings,

    /// Logging configuration
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Read and validate a settings file
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StormError> {
        let file = File::new(path);
        let settings: Settings = file.read_json().await.map_err(|e| {
            StormError::ConfigError(format!(
                "failed to read {}: {}",
                file.path().display(),
                e
            ))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a JSON string
    pub fn from_json(contents: &str) -> Result<Self, StormError> {
        let settings: Settings = serde_json::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings with a freshly generated server token
    pub fn generate_default() -> Self {
        let token = base64::engine::general_purpose::STANDARD
            .encode(uuid::Uuid::new_v4().to_string().as_bytes());
        Self {
            registry: RegistrySettings::default(),
            server_auth_token: SecretValue::new(token),
            server: ServerSettings::default(),
            cluster: ClusterSettings::default(),
            build: BuildSettings::default(),
            log: LogSettings::default(),
        }
    }

    /// Write a default settings file, refusing to replace an existing one
    pub async fn write_default(path: &Path) -> Result<Self, StormError> {
        let file = File::new(path);
        if file.exists().await {
            return Err(StormError::ConfigError(format!(
                "{} already exists",
                path.display()
            )));
        }
        let settings = Self::generate_default();
        file.write_json(&settings).await?;
        file.set_permissions_600().await?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), StormError> {
        if self.registry.url.trim().is_empty() {
            return Err(StormError::ConfigError("registry.url is empty".to_string()));
        }
        if self.server_auth_token.is_empty() {
            return Err(StormError::ConfigError(
                "server_auth_token is empty".to_string(),
            ));
        }
        if self.cluster.max_port_attempts == 0 {
            return Err(StormError::ConfigError(
                "cluster.max_port_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Registry endpoint, e.g. `localhost:5000`
    pub url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: SecretValue,
}

impl RegistrySettings {
    /// Registry host as it appears in image references (scheme and
    /// trailing slash stripped)
    pub fn host(&self) -> &str {
        let url = self.url.trim();
        let url = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        url.trim_end_matches('/')
    }
}

fn default_password() -> SecretValue {
    SecretValue::new("")
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            url: "localhost:5000".to_string(),
            username: "username".to_string(),
            password: SecretValue::new("password"),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Upper bound on a deploy request body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Grace period for in-flight requests at shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl ServerSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    9870
}

fn default_max_upload_bytes() -> usize {
    512 << 20
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            max_upload_bytes: default_max_upload_bytes(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Cluster settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Shared namespace every application is deployed into
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Name of the registry pull secret
    #[serde(default = "default_pull_secret_name")]
    pub pull_secret_name: String,

    /// Local/dev cluster: services are NodePort instead of LoadBalancer
    #[serde(default = "default_true")]
    pub local: bool,

    /// Host the free-port check connects to
    #[serde(default = "default_port_check_host")]
    pub port_check_host: String,

    /// Connect timeout of a single port check
    #[serde(default = "default_port_check_timeout_ms")]
    pub port_check_timeout_ms: u64,

    /// Check+create attempts before a service port conflict is fatal
    #[serde(default = "default_max_port_attempts")]
    pub max_port_attempts: u32,

    /// How long to wait for deleted objects to disappear
    #[serde(default = "default_delete_timeout_secs")]
    pub delete_timeout_secs: u64,
}

impl ClusterSettings {
    pub fn port_check_timeout(&self) -> Duration {
        Duration::from_millis(self.port_check_timeout_ms)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "namespace-storm".to_string()
}

fn default_pull_secret_name() -> String {
    "storm-secret".to_string()
}

fn default_port_check_host() -> String {
    "localhost".to_string()
}

fn default_port_check_timeout_ms() -> u64 {
    5000
}

fn default_max_port_attempts() -> u32 {
    5
}

fn default_delete_timeout_secs() -> u64 {
    60
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            pull_secret_name: default_pull_secret_name(),
            local: true,
            port_check_host: default_port_check_host(),
            port_check_timeout_ms: default_port_check_timeout_ms(),
            max_port_attempts: default_max_port_attempts(),
            delete_timeout_secs: default_delete_timeout_secs(),
        }
    }
}

/// Image build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Directory build contexts are materialized under
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Docker CLI executable
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Remove the build context after a successful build
    #[serde(default)]
    pub cleanup_context: bool,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/tmp/mnt/build")
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            docker_bin: default_docker_bin(),
            cleanup_context: false,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub level: LogLevel,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Also write daily-rotated log files into this directory
    #[serde(default)]
    pub dir: Option<PathBuf>,
}
