use serde::Deserialize;
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::notifications::senders::email::SmtpSettings;

/// Engine configuration, layered from an optional TOML file with environment
/// variables taking precedence.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub scheduler_interval_seconds: u64,
    pub max_concurrent_checks: usize,
    /// Base URL of the dashboard, used for the "view monitor" link in
    /// notifications. Links are omitted when unset.
    pub action_base_url: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialEngineConfig {
    database_url: Option<String>,
    scheduler_interval_seconds: Option<u64>,
    max_concurrent_checks: Option<usize>,
    action_base_url: Option<String>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    smtp_from: Option<String>,
}

fn default_scheduler_interval_seconds() -> u64 {
    60
}

fn default_max_concurrent_checks() -> usize {
    16
}

fn default_smtp_port() -> u16 {
    587
}

impl EngineConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        // 1. Load from file (optional)
        let file_config: PartialEngineConfig = if let Some(path_str) = config_path {
            let path = Path::new(path_str);
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            } else {
                PartialEngineConfig::default()
            }
        } else {
            PartialEngineConfig::default()
        };

        // 2. Load from environment variables
        let env_config = PartialEngineConfig::from_env()?;

        // 3. Merge: environment overrides file
        merge(env_config, file_config)
    }

    /// SMTP settings when email delivery is configured. A host and a From
    /// address are the minimum; credentials stay optional for relays that
    /// accept unauthenticated mail.
    pub fn smtp(&self) -> Option<SmtpSettings> {
        let host = self.smtp_host.clone()?;
        let from = self.smtp_from.clone()?;
        Some(SmtpSettings {
            host,
            port: self.smtp_port,
            username: self.smtp_username.clone(),
            password: self.smtp_password.clone(),
            from,
        })
    }
}

impl PartialEngineConfig {
    fn from_env() -> Result<Self, String> {
        Ok(PartialEngineConfig {
            database_url: env::var("DATABASE_URL").ok(),
            scheduler_interval_seconds: parsed_var("SCHEDULER_INTERVAL_SECONDS")?,
            max_concurrent_checks: parsed_var("MAX_CONCURRENT_CHECKS")?,
            action_base_url: env::var("ACTION_BASE_URL").ok(),
            smtp_host: env::var("SMTP_HOST").ok(),
            smtp_port: parsed_var("SMTP_PORT")?,
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM").ok(),
        })
    }
}

fn parsed_var<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: {e}")),
        Err(_) => Ok(None),
    }
}

fn merge(
    env_config: PartialEngineConfig,
    file_config: PartialEngineConfig,
) -> Result<EngineConfig, String> {
    Ok(EngineConfig {
        database_url: env_config
            .database_url
            .or(file_config.database_url)
            .ok_or("DATABASE_URL is required")?,
        scheduler_interval_seconds: env_config
            .scheduler_interval_seconds
            .or(file_config.scheduler_interval_seconds)
            .unwrap_or_else(default_scheduler_interval_seconds),
        max_concurrent_checks: env_config
            .max_concurrent_checks
            .or(file_config.max_concurrent_checks)
            .unwrap_or_else(default_max_concurrent_checks),
        action_base_url: env_config.action_base_url.or(file_config.action_base_url),
        smtp_host: env_config.smtp_host.or(file_config.smtp_host),
        smtp_port: env_config
            .smtp_port
            .or(file_config.smtp_port)
            .unwrap_or_else(default_smtp_port),
        smtp_username: env_config.smtp_username.or(file_config.smtp_username),
        smtp_password: env_config.smtp_password.or(file_config.smtp_password),
        smtp_from: env_config.smtp_from.or(file_config.smtp_from),
    })
}
