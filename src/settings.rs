//! Process settings from the environment.

use crate::error::ConfigError;
use crate::extractors::REMOTE_USER_HEADER;
use crate::routes::{AppOptions, RequestTiming};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_SCHEMA_PATH: &str = "schema.json";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_MOUNT: &str = "/api";
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub schema_path: PathBuf,
    pub bind: SocketAddr,
    pub mount: String,
    pub user_header: String,
    pub max_body_bytes: usize,
    pub db_max_connections: u32,
    pub log_ajax_only: bool,
    /// Comma-separated in `GRIDSTORE_LOG_PATHS`.
    pub log_paths: Vec<String>,
}

fn parsed<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(s) => s
            .trim()
            .parse()
            .map_err(|e| ConfigError::Settings(format!("{}: {}", name, e))),
    }
}

impl Settings {
    /// Read settings through `lookup` (variable name → value). `DATABASE_URL` is required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::Settings("DATABASE_URL is not set".into()))?;
        let default_bind = SocketAddr::from(([127, 0, 0, 1], 3000));
        Ok(Self {
            database_url,
            schema_path: lookup("GRIDSTORE_SCHEMA").map_or_else(|| PathBuf::from(DEFAULT_SCHEMA_PATH), PathBuf::from),
            bind: parsed("GRIDSTORE_BIND", lookup("GRIDSTORE_BIND"), default_bind)?,
            mount: lookup("GRIDSTORE_MOUNT").unwrap_or_else(|| DEFAULT_MOUNT.into()),
            user_header: lookup("GRIDSTORE_USER_HEADER").unwrap_or_else(|| REMOTE_USER_HEADER.into()),
            max_body_bytes: parsed("GRIDSTORE_MAX_BODY_BYTES", lookup("GRIDSTORE_MAX_BODY_BYTES"), DEFAULT_MAX_BODY_BYTES)?,
            db_max_connections: parsed(
                "GRIDSTORE_DB_MAX_CONNECTIONS",
                lookup("GRIDSTORE_DB_MAX_CONNECTIONS"),
                DEFAULT_DB_MAX_CONNECTIONS,
            )?,
            log_ajax_only: parsed("GRIDSTORE_LOG_AJAX_ONLY", lookup("GRIDSTORE_LOG_AJAX_ONLY"), false)?,
            log_paths: lookup("GRIDSTORE_LOG_PATHS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load `.env` if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(ConfigError::Settings(format!(".env: {}", e)));
            }
        }
        Self::from_env()
    }

    pub fn app_options(&self) -> AppOptions {
        AppOptions {
            mount: self.mount.clone(),
            max_body_bytes: self.max_body_bytes,
            status_checks: Vec::new(),
            timing: RequestTiming {
                ajax_only: self.log_ajax_only,
                path_whitelist: self.log_paths.clone(),
            },
        }
    }
}
