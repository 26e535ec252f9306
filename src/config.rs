use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_BACKEND: &str = "in-memory";
const DEFAULT_CART_TTL_SECS: u64 = 30 * 60;
const DEFAULT_CART_KEY_PREFIX: &str = "cart";
const DEFAULT_REFUND_WINDOW_SECS: u64 = 5 * 60;
const DEFAULT_REFUND_QUEUE_NAME: &str = "refund-disable-queue";
const DEFAULT_REFUND_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_REFUND_BATCH_SIZE: usize = 100;
const MIN_JWT_SECRET_LEN: usize = 32;

/// Cart cache configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CartConfig {
    /// "in-memory" or "redis"
    #[serde(default = "default_backend")]
    #[validate(custom = "validate_backend")]
    pub backend: String,

    /// Lifetime of a cached cart, refreshed on every write
    #[serde(default = "default_cart_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_cart_key_prefix")]
    pub key_prefix: String,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            ttl_secs: default_cart_ttl_secs(),
            key_prefix: default_cart_key_prefix(),
        }
    }
}

impl CartConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Refund window scheduler configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RefundWindowConfig {
    /// Delayed queue backend: "in-memory" or "redis"
    #[serde(default = "default_backend")]
    #[validate(custom = "validate_backend")]
    pub backend: String,

    /// How long after checkout a customer may still cancel
    #[serde(default = "default_refund_window_secs")]
    #[validate(range(min = 1))]
    pub window_secs: u64,

    #[serde(default = "default_refund_queue_name")]
    #[validate(length(min = 1))]
    pub queue_name: String,

    #[serde(default = "default_refund_poll_interval_ms")]
    #[validate(range(min = 10))]
    pub poll_interval_ms: u64,

    #[serde(default = "default_refund_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: usize,
}

impl Default for RefundWindowConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            window_secs: default_refund_window_secs(),
            queue_name: default_refund_queue_name(),
            poll_interval_ms: default_refund_poll_interval_ms(),
            batch_size: default_refund_batch_size(),
        }
    }
}

impl RefundWindowConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL, used when a redis backend is selected
    pub redis_url: String,

    /// HS256 secret the bearer tokens are signed with
    #[validate(custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub cart: CartConfig,

    #[serde(default)]
    #[validate]
    pub refund_window: RefundWindowConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the connection details.
    pub fn new(database_url: String, redis_url: String, jwt_secret: String) -> Self {
        Self {
            database_url,
            redis_url,
            jwt_secret,
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            cart: CartConfig::default(),
            refund_window: RefundWindowConfig::default(),
        }
    }

    /// Whether any component needs a redis connection
    pub fn uses_redis(&self) -> bool {
        self.cart.backend.eq_ignore_ascii_case("redis")
            || self.refund_window.backend.eq_ignore_ascii_case("redis")
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_cart_ttl_secs() -> u64 {
    DEFAULT_CART_TTL_SECS
}

fn default_cart_key_prefix() -> String {
    DEFAULT_CART_KEY_PREFIX.to_string()
}

fn default_refund_window_secs() -> u64 {
    DEFAULT_REFUND_WINDOW_SECS
}

fn default_refund_queue_name() -> String {
    DEFAULT_REFUND_QUEUE_NAME.to_string()
}

fn default_refund_poll_interval_ms() -> u64 {
    DEFAULT_REFUND_POLL_INTERVAL_MS
}

fn default_refund_batch_size() -> usize {
    DEFAULT_REFUND_BATCH_SIZE
}

fn default_db_max_connections() -> u32 {
    16
}

fn default_db_min_connections() -> u32 {
    2
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn validate_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "redis" => Ok(()),
        _ => {
            let mut err = ValidationError::new("backend");
            err.message = Some("Must be one of: in-memory, redis".into());
            Err(err)
        }
    }
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();
    if trimmed.len() < MIN_JWT_SECRET_LEN {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be at least 32 characters".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("food_order_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());

    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret has no default and must come from a file or APP__JWT_SECRET.
    let config = Config::builder()
        .set_default("database_url", "sqlite://food_order.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to a random string of at least 32 characters.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
