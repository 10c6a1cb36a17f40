// src/config.rs
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::import::upsert::RetryPolicy;
use crate::import::ImportSettings;
use crate::notify::DeliveryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub host: IpAddr,
    pub port: u16,
    pub cors_origin: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// Uploads accepted per client per minute; 0 disables the limit.
    pub upload_rate_per_minute: u32,
    pub import: ImportSettings,
    pub delivery: DeliveryPolicy,
    pub task_retention: chrono::Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source. Unset keys take
    /// their defaults; values that do not parse are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());

        fn parse<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
            match raw {
                None => Ok(default),
                Some(value) => match value.trim().parse() {
                    Ok(parsed) => Ok(parsed),
                    Err(_) => Err(ConfigError::Invalid { key, value }),
                },
            }
        }

        let import = ImportSettings {
            chunk_size: parse::<usize>("IMPORT_CHUNK_SIZE", get("IMPORT_CHUNK_SIZE"), 3000)?.max(1),
            workers: parse::<usize>("IMPORT_WORKERS", get("IMPORT_WORKERS"), 2)?.max(1),
            precount: parse("IMPORT_PRECOUNT", get("IMPORT_PRECOUNT"), true)?,
            retry: RetryPolicy {
                attempts: parse::<u32>("STORE_RETRY_ATTEMPTS", get("STORE_RETRY_ATTEMPTS"), 3)?.max(1),
                backoff: Duration::from_millis(parse("STORE_RETRY_BACKOFF_MS", get("STORE_RETRY_BACKOFF_MS"), 200)?),
            },
            notify_on_failure: parse("NOTIFY_ON_FAILURE", get("NOTIFY_ON_FAILURE"), false)?,
        };

        let delivery = DeliveryPolicy {
            timeout: Duration::from_secs(parse("WEBHOOK_TIMEOUT_SECS", get("WEBHOOK_TIMEOUT_SECS"), 10)?),
            max_attempts: parse::<u32>("WEBHOOK_MAX_ATTEMPTS", get("WEBHOOK_MAX_ATTEMPTS"), 1)?.max(1),
            backoff: Duration::from_secs(1),
        };

        fn retention_hours(raw: Option<String>) -> Result<chrono::Duration, ConfigError> {
            let hours: i64 = parse("TASK_RETENTION_HOURS", raw.clone(), 24)?;
            match chrono::Duration::try_hours(hours) {
                Some(retention) if hours >= 0 => Ok(retention),
                _ => Err(ConfigError::Invalid {
                    key: "TASK_RETENTION_HOURS",
                    value: raw.unwrap_or_default(),
                }),
            }
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            host: parse("HOST", get("HOST"), IpAddr::from([127, 0, 0, 1]))?,
            port: parse("PORT", get("PORT"), 3000)?,
            cors_origin: get("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string()),
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("catalog-importer-uploads")),
            max_upload_bytes: parse("MAX_UPLOAD_BYTES", get("MAX_UPLOAD_BYTES"), 100 * 1024 * 1024)?,
            upload_rate_per_minute: parse("UPLOAD_RATE_PER_MINUTE", get("UPLOAD_RATE_PER_MINUTE"), 5)?,
            import,
            delivery,
            task_retention: retention_hours(get("TASK_RETENTION_HOURS"))?,
        })
    }
}
