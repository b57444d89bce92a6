use std::path::PathBuf;
use std::sync::OnceLock;

/// Default loopback port for the OAuth redirect listener.
pub const DEFAULT_OAUTH_PORT: u16 = 3359;

/// Default number of seconds to wait for the browser authorization.
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 60;

/// Immutable process settings initialized once at startup from environment variables.
///
/// Access via `Settings::get()` which returns a `&'static Settings`.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Holds `connections.json` and the file-based secret store.
    pub config_dir: PathBuf,
    /// Per-read timeout for provider requests.
    pub read_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
    pub default_port: u16,
    pub default_auth_timeout_secs: u64,
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

impl Settings {
    /// Returns the global settings, reading the environment on first call.
    pub fn get() -> &'static Settings {
        SETTINGS.get_or_init(Settings::from_env)
    }

    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            config_dir: std::env::var("CLOUDFS_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_dir),
            read_timeout_secs: env_or("CLOUDFS_READ_TIMEOUT", defaults.read_timeout_secs),
            connect_timeout_secs: env_or("CLOUDFS_CONNECT_TIMEOUT", defaults.connect_timeout_secs),
            pool_max_idle_per_host: env_or("CLOUDFS_POOL_MAX_IDLE", defaults.pool_max_idle_per_host),
            pool_idle_timeout_secs: env_or("CLOUDFS_POOL_IDLE_TIMEOUT", defaults.pool_idle_timeout_secs),
            default_port: env_or("CLOUDFS_OAUTH_PORT", defaults.default_port),
            default_auth_timeout_secs: env_or("CLOUDFS_AUTH_TIMEOUT", defaults.default_auth_timeout_secs),
        }
    }

    /// Path of the connections document inside `config_dir`.
    pub fn connections_file(&self) -> PathBuf {
        self.config_dir.join("connections.json")
    }

    /// Root of the file-based secret store.
    pub fn secrets_dir(&self) -> PathBuf {
        self.config_dir.join("secrets")
    }
}

impl Default for Settings {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            config_dir: PathBuf::from(home).join(".cloudfs"),
            read_timeout_secs: 30,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 8,
            pool_idle_timeout_secs: 90,
            default_port: DEFAULT_OAUTH_PORT,
            default_auth_timeout_secs: DEFAULT_AUTH_TIMEOUT_SECS,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}
