use process::{CsvRow, parse_rows};
use subtle::ConstantTimeEq;
use tokio::fs;

use crate::{config::Config, error::AppError};

/// Constant-time check of a request's `auth` against the configured secret.
pub fn authorize(config: &Config, provided: Option<&str>) -> Result<(), AppError> {
    let expected = config.auth_secret.as_bytes();
    let provided = provided.unwrap_or_default().as_bytes();

    if expected.is_empty() || !bool::from(expected.ct_eq(provided)) {
        return Err(AppError::Unauthorized);
    }

    Ok(())
}

/// Parses the canonical local copy of the feed.
pub async fn read_local_rows(config: &Config) -> Result<Vec<CsvRow>, AppError> {
    let bytes = fs::read(config.local_csv()).await?;
    let text = String::from_utf8_lossy(&bytes);

    Ok(parse_rows(text.as_bytes(), &config.layout)?)
}
