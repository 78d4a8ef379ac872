use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr, time::Duration};

use process::CsvLayout;
use tracing::{info, warn};

use crate::error::AppError;

pub const LOCAL_CSV: &str = "datos.csv";
pub const SNAPSHOT_CSV: &str = "datos_descargados.csv";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub redis_prefix: String,
    /// Shared secret for mutating endpoints. Empty rejects every request.
    pub auth_secret: String,
    /// External feed polled by the reconciler. `None` disables polling.
    pub csv_source: Option<String>,
    pub csv_dir: PathBuf,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub upload_limit: usize,
    pub layout: CsvLayout,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_prefix: "covid".to_string(),
            auth_secret: String::new(),
            csv_source: None,
            csv_dir: PathBuf::from("./csv"),
            poll_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(60),
            upload_limit: 32 * 1024 * 1024,
            layout: CsvLayout::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        let defaults = Self::default();

        let auth_secret = read_secret("AUTH").unwrap_or_else(|| {
            warn!("No AUTH secret configured, mutating endpoints are disabled");
            String::new()
        });

        let csv_source = optional("CSV_SOURCE");
        if csv_source.is_none() {
            warn!("CSV_SOURCE not set, feed polling is disabled");
        }

        let poll_secs: u64 = try_load("POLL_INTERVAL_SECS", "30")?;
        if poll_secs == 0 {
            return Err(AppError::Config {
                key: "POLL_INTERVAL_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            port: try_load("PORT", "5000")?,
            redis_url: try_load("REDIS_URL", &defaults.redis_url)?,
            redis_prefix: try_load("REDIS_PREFIX", &defaults.redis_prefix)?,
            auth_secret,
            csv_source,
            csv_dir: try_load("CSV_DIR", "./csv")?,
            poll_interval: Duration::from_secs(poll_secs),
            fetch_timeout: Duration::from_secs(try_load("FETCH_TIMEOUT_SECS", "60")?),
            upload_limit: try_load("UPLOAD_LIMIT_BYTES", "33554432")?,
            layout: CsvLayout {
                date: try_load("CSV_DATE_COLUMN", &defaults.layout.date)?,
                zone: try_load("CSV_ZONE_COLUMN", &defaults.layout.zone)?,
                cumulative: try_load("CSV_CUMULATIVE_COLUMN", &defaults.layout.cumulative)?,
            },
        })
    }

    pub fn local_csv(&self) -> PathBuf {
        self.csv_dir.join(LOCAL_CSV)
    }

    pub fn snapshot_csv(&self) -> PathBuf {
        self.csv_dir.join(SNAPSHOT_CSV)
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, AppError>
where
    T::Err: Display,
{
    optional(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            AppError::Config {
                key,
                reason: e.to_string(),
            }
        })
}

/// Environment first, then a mounted `/run/secrets/<name>` file.
fn read_secret(secret_name: &str) -> Option<String> {
    if let Some(value) = optional(secret_name) {
        return Some(value);
    }

    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
        })
        .ok()
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let config = Config {
            csv_dir: PathBuf::from("/data/csv"),
            ..Config::default()
        };

        assert_eq!(config.local_csv(), PathBuf::from("/data/csv/datos.csv"));
        assert_eq!(
            config.snapshot_csv(),
            PathBuf::from("/data/csv/datos_descargados.csv")
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.port, 5000);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.layout.zone, "Zona Básica");
    }
}
