use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Master switch for remote hydration. Off means every pass is a no-op.
    pub sync_enabled: bool,
    /// Base URL of the remote answer authority. Absent means hydration is
    /// effectively disabled even when the switch is on.
    pub base_url: Option<String>,
    /// Directory holding both local answer namespaces.
    pub data_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    /// Upper bound on a serialized namespace, the local quota. None is
    /// unbounded.
    pub max_store_bytes: Option<usize>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            // Fallback to current directory .env for backward compatibility
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env_name = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            // Load base config from TOML file
            .add_source(
                config::File::with_name(&format!("config/{}", env_name)).required(false), // Allow missing config file, fallback to ENV
            )
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        // Extract values with fallbacks to ENV or defaults
        let sync_enabled = settings
            .get_bool("sync.enabled")
            .ok()
            .or_else(|| env_flag("SYNC_ENABLED"))
            .unwrap_or(true);

        let base_url = settings
            .get_string("sync.base_url")
            .or_else(|_| env::var("SYNC_BASE_URL"))
            .ok()
            .filter(|v| !v.trim().is_empty());

        let data_dir = settings
            .get_string("storage.data_dir")
            .or_else(|_| env::var("SYNC_DATA_DIR"))
            .unwrap_or_else(|_| "data".to_string());

        let request_timeout_secs = settings
            .get_int("sync.request_timeout_secs")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .or_else(|| env_parse("SYNC_REQUEST_TIMEOUT_SECS"))
            .filter(|v| *v > 0)
            .unwrap_or(5);

        let retry_max_attempts = settings
            .get_int("sync.retry_max_attempts")
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .or_else(|| env_parse("SYNC_RETRY_MAX_ATTEMPTS"))
            .filter(|v| *v > 0)
            .unwrap_or(3);

        let retry_base_delay_ms = settings
            .get_int("sync.retry_base_delay_ms")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .or_else(|| env_parse("SYNC_RETRY_BASE_DELAY_MS"))
            .unwrap_or(500);

        let max_store_bytes = settings
            .get_int("storage.max_store_bytes")
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .or_else(|| env_parse("SYNC_MAX_STORE_BYTES"))
            .filter(|v| *v > 0);

        Ok(Config {
            sync_enabled,
            base_url,
            data_dir: PathBuf::from(data_dir),
            request_timeout_secs,
            retry_max_attempts,
            retry_base_delay_ms,
            max_store_bytes,
        })
    }

    /// True when a hydration pass could actually reach the remote authority.
    pub fn hydration_enabled(&self) -> bool {
        self.sync_enabled && self.base_url.is_some()
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
