//! Configuration module for the Expedientes sync server.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::errors::AppError;
use crate::models::SchemaVariant;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the JSON data file
    pub data_file: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Record schema generation accepted on writes
    pub schema: SchemaVariant,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_file = lookup("EXPEDIENTES_DATA_FILE")
            .unwrap_or_else(|| "./data/expedientes.json".to_string())
            .into();

        let raw_addr =
            lookup("EXPEDIENTES_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_addr = raw_addr.parse().map_err(|e| {
            AppError::Internal(format!("Invalid EXPEDIENTES_BIND_ADDR {:?}: {}", raw_addr, e))
        })?;

        let log_level = lookup("EXPEDIENTES_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let schema = match lookup("EXPEDIENTES_SCHEMA") {
            Some(raw) => SchemaVariant::parse(&raw).ok_or_else(|| {
                AppError::Internal(format!(
                    "Invalid EXPEDIENTES_SCHEMA {:?}, expected single or multi",
                    raw
                ))
            })?,
            None => SchemaVariant::Multi,
        };

        Ok(Self {
            data_file,
            bind_addr,
            log_level,
            schema,
        })
    }
}
