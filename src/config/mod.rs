//! Configuration module for the Beraber admin backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::db::IndexKey;
use crate::errors::AppError;

/// Secret used when `BERABER_JWT_SECRET` is unset. Only fit for local development.
pub const DEV_JWT_SECRET: &str = "beraber-dev-secret";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key guarding the maintenance routes
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// HMAC secret for credential tokens
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub token_ttl_secs: u64,
    /// How many times a negative claims read is retried before denial
    pub claims_retries: u32,
    pub claims_backoff: Duration,
    /// Reject multi-field queries whose composite index is not declared
    pub enforce_indexes: bool,
    pub declared_indexes: Vec<IndexKey>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("BERABER_API_PSK").ok().filter(|s| !s.is_empty());

        let db_path = env::var("BERABER_DB_PATH")
            .unwrap_or_else(|_| "./data/beraber.sqlite".to_string())
            .into();

        let bind_addr = env::var("BERABER_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid BERABER_BIND_ADDR: {}", e)))?;

        let log_level = env::var("BERABER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let jwt_secret =
            env::var("BERABER_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.to_string());
        let jwt_issuer =
            env::var("BERABER_JWT_ISSUER").unwrap_or_else(|_| "beraber-admin".to_string());
        let token_ttl_secs = parse_var("BERABER_TOKEN_TTL_SECS", 3600)?;

        let claims_retries = parse_var("BERABER_CLAIMS_RETRIES", 3)?;
        let claims_backoff = Duration::from_millis(parse_var("BERABER_CLAIMS_BACKOFF_MS", 700)?);

        let enforce_indexes = parse_var("BERABER_ENFORCE_INDEXES", true)?;
        let declared_indexes = match env::var("BERABER_INDEXES") {
            Ok(list) => parse_index_list(&list)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            jwt_secret,
            jwt_issuer,
            token_ttl_secs,
            claims_retries,
            claims_backoff,
            enforce_indexes,
            declared_indexes,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

/// Parse `collection:fieldA,fieldB;collection:fieldC,fieldD`.
pub fn parse_index_list(list: &str) -> Result<Vec<IndexKey>, AppError> {
    list.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (collection, fields) = entry.split_once(':').ok_or_else(|| {
                AppError::Internal(format!("Invalid index declaration: {}", entry))
            })?;
            let fields: Vec<&str> = fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .collect();
            if collection.trim().is_empty() || fields.len() < 2 {
                return Err(AppError::Internal(format!(
                    "Composite index needs a collection and at least two fields: {}",
                    entry
                )));
            }
            Ok(IndexKey::new(collection.trim(), fields))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        for name in [
            "BERABER_API_PSK",
            "BERABER_DB_PATH",
            "BERABER_BIND_ADDR",
            "BERABER_LOG_LEVEL",
            "BERABER_CLAIMS_RETRIES",
            "BERABER_CLAIMS_BACKOFF_MS",
            "BERABER_ENFORCE_INDEXES",
            "BERABER_INDEXES",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env().unwrap();

        assert!(config.api_psk.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/beraber.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.claims_retries, 3);
        assert_eq!(config.claims_backoff, Duration::from_millis(700));
        assert!(config.enforce_indexes);
        assert!(config.declared_indexes.is_empty());
    }

    #[test]
    fn test_parse_index_list() {
        let indexes =
            parse_index_list("donations:status,createdAt; team_members:active,createdAt;")
                .unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0], IndexKey::new("donations", ["createdAt", "status"]));
    }

    #[test]
    fn test_parse_index_list_rejects_single_field() {
        assert!(parse_index_list("donations:status").is_err());
        assert!(parse_index_list("no-colon").is_err());
    }
}
