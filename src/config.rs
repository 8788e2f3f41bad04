use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{ServiceError, ServiceResult};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://survey_export.sqlite?mode=rwc";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3090";

/// Process-wide settings, read once at startup from the environment (and a
/// `.env` file when present).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub bind_addr: String,
    /// Keyset page size for the row source; also the channel capacity between
    /// the row source and the encoder.
    pub export_page_size: usize,
    pub export_dir: PathBuf,
    /// Prefix of export download links. Finished files are served at
    /// `/api/v1/exports/<id>/file`; point this elsewhere only when a proxy
    /// republishes that path.
    pub export_base_url: String,
    pub export_workers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: 5,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            export_page_size: 1000,
            export_dir: PathBuf::from("./exports"),
            export_base_url: "/api/v1/exports".to_string(),
            export_workers: 2,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> ServiceResult<Self> {
        if let Err(e) = dotenv::dotenv() {
            log::debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't have to
    /// touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> ServiceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            export_page_size: parse_or(&lookup, "EXPORT_PAGE_SIZE", defaults.export_page_size)?,
            export_dir: lookup("EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
            export_base_url: lookup("EXPORT_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.export_base_url),
            export_workers: parse_or(&lookup, "EXPORT_WORKERS", defaults.export_workers)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ServiceResult<()> {
        if self.db_max_connections == 0 {
            return Err(ServiceError::Configuration(
                "DB_MAX_CONNECTIONS must be greater than zero".to_string(),
            ));
        }
        if self.export_page_size == 0 {
            return Err(ServiceError::Configuration(
                "EXPORT_PAGE_SIZE must be greater than zero".to_string(),
            ));
        }
        if self.export_workers == 0 {
            return Err(ServiceError::Configuration(
                "EXPORT_WORKERS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> ServiceResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            ServiceError::Configuration(format!("{} has invalid value '{}': {}", key, raw, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.export_page_size, 1000);
        assert_eq!(config.export_workers, 2);
        assert_eq!(config.export_base_url, "/api/v1/exports");
    }

    #[test]
    fn test_overrides_and_trailing_slash() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("EXPORT_PAGE_SIZE", "250"),
            ("EXPORT_BASE_URL", "https://files.example.com/exports/"),
            ("EXPORT_DIR", "/tmp/exports"),
        ]))
        .unwrap();
        assert_eq!(config.export_page_size, 250);
        assert_eq!(config.export_base_url, "https://files.example.com/exports");
        assert_eq!(config.export_dir, PathBuf::from("/tmp/exports"));
    }

    #[test]
    fn test_rejects_bad_numbers() {
        assert!(AppConfig::from_lookup(lookup_from(&[("EXPORT_PAGE_SIZE", "lots")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("EXPORT_PAGE_SIZE", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("DB_MAX_CONNECTIONS", "0")])).is_err());
    }
}
