use crate::qr_encoder::{MAX_MODULE_SIZE, MAX_QUIET_ZONE};
use crate::site::PublicUrls;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Route prefixes served by the API router itself
const RESERVED_ROUTE_PREFIXES: &[&str] = &["/download/", "/api/"];

/// Errors raised while validating a loaded configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the document service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Public site configuration (base address used in QR codes)
    pub site: SiteConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Blob storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// QR rendering configuration
    #[serde(default)]
    pub qr: QrConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Lifecycle tuning
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Externally reachable site settings
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment origin, e.g. `https://docs.example.org`
    pub base_address: String,
    /// Route prefix of the public viewing page
    #[serde(default = "default_public_path")]
    pub public_path: String,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Which blob backend holds uploaded files and QR images
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Local,
    S3,
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,
    /// Root directory for the local backend
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    /// Required when `backend = "s3"`
    pub s3: Option<S3Config>,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding documents and QR images
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// QR rendering parameters. Changing any of them changes every generated image.
#[derive(Debug, Clone, Deserialize)]
pub struct QrConfig {
    /// Error correction level: L, M, Q or H
    #[serde(default = "default_error_correction")]
    pub error_correction: String,
    /// Pixels per module
    #[serde(default = "default_module_size")]
    pub module_size: u32,
    /// Quiet border width in modules
    #[serde(default = "default_quiet_zone")]
    pub quiet_zone: u32,
}

/// An administrator allowed to use the admin API
#[derive(Debug, Clone, Deserialize)]
pub struct AdminCredential {
    pub name: String,
    pub token: String,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Upper bound for a single upload body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Bearer tokens accepted for administrative operations
    #[serde(default)]
    pub admins: Vec<AdminCredential>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Documents re-encoded in parallel during bulk regeneration
    #[serde(default = "default_regeneration_concurrency")]
    pub regeneration_concurrency: usize,
}

// Default value functions
fn default_service_name() -> String {
    "qrdocs-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_public_path() -> String {
    "/view/".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_local_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_error_correction() -> String {
    "L".to_string()
}

fn default_module_size() -> u32 {
    10
}

fn default_quiet_zone() -> u32 {
    4
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024 // 100MB
}

fn default_regeneration_concurrency() -> usize {
    4
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::builder()?
            // Add config file if present
            .add_source(config::File::with_name("config/documents").required(false))
            .add_source(config::File::with_name("/etc/qrdocs/documents").required(false))
            // Override with environment variables
            // QRDOCS__SITE__BASE_ADDRESS -> site.base_address
            .add_source(
                config::Environment::with_prefix("QRDOCS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the built-in defaults
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let config: Self = Self::builder()?
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Builder seeded with the built-in defaults
    fn builder(
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        config::Config::builder()
            .set_default("service.name", default_service_name())?
            .set_default("service.log_level", default_log_level())?
            .set_default("site.public_path", default_public_path())
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.site.base_address.trim();
        if base.is_empty() {
            return Err(ConfigError::MissingRequired("site.base_address".to_string()));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "site.base_address".to_string(),
                message: format!("expected an http(s) origin, got {base:?}"),
            });
        }
        if !self.site.public_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "site.public_path".to_string(),
                message: "must start with '/'".to_string(),
            });
        }
        let public_path = PublicUrls::new(&self.site.public_path);
        let public_path = public_path.public_path();
        if public_path.contains([':', '*', '{', '}']) {
            return Err(ConfigError::InvalidValue {
                key: "site.public_path".to_string(),
                message: "must not contain route parameters".to_string(),
            });
        }
        if let Some(reserved) = RESERVED_ROUTE_PREFIXES
            .iter()
            .find(|prefix| public_path.starts_with(*prefix))
        {
            return Err(ConfigError::InvalidValue {
                key: "site.public_path".to_string(),
                message: format!("{public_path:?} collides with the built-in {reserved} routes"),
            });
        }
        if self.storage.backend == StorageBackendKind::S3 && self.storage.s3.is_none() {
            return Err(ConfigError::MissingRequired("storage.s3".to_string()));
        }
        if !matches!(self.qr.error_correction.to_ascii_uppercase().as_str(), "L" | "M" | "Q" | "H") {
            return Err(ConfigError::InvalidValue {
                key: "qr.error_correction".to_string(),
                message: format!("unknown level {:?}", self.qr.error_correction),
            });
        }
        if !(1..=MAX_MODULE_SIZE).contains(&self.qr.module_size) {
            return Err(ConfigError::InvalidValue {
                key: "qr.module_size".to_string(),
                message: format!("must be between 1 and {MAX_MODULE_SIZE}"),
            });
        }
        if self.qr.quiet_zone > MAX_QUIET_ZONE {
            return Err(ConfigError::InvalidValue {
                key: "qr.quiet_zone".to_string(),
                message: format!("must be at most {MAX_QUIET_ZONE}"),
            });
        }
        if self.lifecycle.regeneration_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "lifecycle.regeneration_concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            local_root: default_local_root(),
            s3: None,
        }
    }
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            error_correction: default_error_correction(),
            module_size: default_module_size(),
            quiet_zone: default_quiet_zone(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
            admins: Vec::new(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            regeneration_concurrency: default_regeneration_concurrency(),
        }
    }
}
