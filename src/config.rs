use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// How long a writer waits for the database lock before failing.
    pub busy_timeout: Duration,
    /// Device limit used when the caller does not pass one.
    pub default_device_limit: i64,
    /// Upper bound accepted for any license's device limit.
    pub max_devices_per_license: i64,
    /// Number of history entries returned with license details.
    pub history_page_limit: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "licensepro.db".to_string(),
            pool_size: 10,
            busy_timeout: Duration::from_millis(5000),
            default_device_limit: 5,
            max_devices_per_license: 20,
            history_page_limit: 50,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        Self {
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            pool_size: env_parse("DB_POOL_SIZE")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.pool_size),
            busy_timeout: env_parse("DB_BUSY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.busy_timeout),
            default_device_limit: env_parse("DEFAULT_DEVICE_LIMIT")
                .filter(|n: &i64| *n > 0)
                .unwrap_or(defaults.default_device_limit),
            max_devices_per_license: env_parse("MAX_DEVICES_PER_LICENSE")
                .filter(|n: &i64| *n > 0)
                .unwrap_or(defaults.max_devices_per_license),
            history_page_limit: env_parse("HISTORY_PAGE_LIMIT")
                .filter(|n: &i64| *n > 0)
                .unwrap_or(defaults.history_page_limit),
        }
    }

    /// Config for a database at `path`, everything else default.
    pub fn with_database(path: impl Into<String>) -> Self {
        Self {
            database_path: path.into(),
            ..Self::default()
        }
    }
}
