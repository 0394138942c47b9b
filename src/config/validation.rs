//! Configuration validation module
//! 
//! This module provides validation functions for application configuration
//! to ensure all required settings are properly configured.

use crate::utils::errors::{EventBuddyError, Result};
use super::Settings;

/// Minimum accepted length of the JWT signing secret in bytes
const MIN_SECRET_LENGTH: usize = 32;

/// Validate all configuration settings
pub fn validate_settings(settings: &Settings) -> Result<()> {
    validate_server_config(&settings.server)?;
    validate_database_config(&settings.database)?;
    validate_auth_config(&settings.auth)?;
    validate_smtp_config(&settings.smtp)?;
    validate_scheduler_config(&settings.scheduler)?;
    validate_logging_config(&settings.logging)?;

    if let Some(ref redis_config) = settings.redis {
        validate_redis_config(redis_config)?;
    }

    Ok(())
}

/// Validate server configuration
fn validate_server_config(config: &super::ServerConfig) -> Result<()> {
    if config.bind_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(EventBuddyError::Config(
            format!("Invalid bind address: {}", config.bind_addr)
        ));
    }

    let base = url::Url::parse(&config.public_base_url).map_err(|e| {
        EventBuddyError::Config(format!("Invalid public base URL: {}", e))
    })?;
    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(EventBuddyError::Config(
            "Public base URL must use http or https".to_string()
        ));
    }

    Ok(())
}

/// Validate database configuration
fn validate_database_config(config: &super::DatabaseConfig) -> Result<()> {
    if config.url.is_empty() {
        return Err(EventBuddyError::Config(
            "Database URL is required".to_string()
        ));
    }
    
    if config.max_connections == 0 {
        return Err(EventBuddyError::Config(
            "Max connections must be greater than 0".to_string()
        ));
    }
    
    if config.min_connections > config.max_connections {
        return Err(EventBuddyError::Config(
            "Min connections cannot be greater than max connections".to_string()
        ));
    }
    
    Ok(())
}

/// Validate Redis configuration
fn validate_redis_config(config: &super::RedisConfig) -> Result<()> {
    if config.url.is_empty() {
        return Err(EventBuddyError::Config(
            "Redis URL is required".to_string()
        ));
    }

    if config.ttl_seconds == 0 {
        return Err(EventBuddyError::Config(
            "Redis TTL must be greater than 0".to_string()
        ));
    }
    
    Ok(())
}

/// Validate authentication configuration
fn validate_auth_config(config: &super::AuthConfig) -> Result<()> {
    if config.jwt_secret.len() < MIN_SECRET_LENGTH {
        return Err(EventBuddyError::Config(
            format!("JWT secret must be at least {} bytes", MIN_SECRET_LENGTH)
        ));
    }

    if config.access_token_ttl_minutes <= 0 {
        return Err(EventBuddyError::Config(
            "Access token TTL must be greater than 0".to_string()
        ));
    }

    if config.refresh_token_ttl_days <= 0 {
        return Err(EventBuddyError::Config(
            "Refresh token TTL must be greater than 0".to_string()
        ));
    }

    if config.cookie_name.is_empty() {
        return Err(EventBuddyError::Config(
            "Session cookie name is required".to_string()
        ));
    }

    if config.login_attempts_per_minute == 0 {
        return Err(EventBuddyError::Config(
            "Login attempts per minute must be greater than 0".to_string()
        ));
    }

    Ok(())
}

/// Validate SMTP configuration
fn validate_smtp_config(config: &super::SmtpConfig) -> Result<()> {
    if config.host.is_empty() {
        return Err(EventBuddyError::Config(
            "SMTP host is required".to_string()
        ));
    }

    if !crate::utils::helpers::is_valid_email(&config.from_address) {
        return Err(EventBuddyError::Config(
            format!("Invalid SMTP from address: {}", config.from_address)
        ));
    }

    if config.username.is_some() != config.password.is_some() {
        return Err(EventBuddyError::Config(
            "SMTP username and password must be set together".to_string()
        ));
    }

    Ok(())
}

/// Validate scheduler configuration
fn validate_scheduler_config(config: &super::SchedulerConfig) -> Result<()> {
    if config.run_hour_utc > 23 {
        return Err(EventBuddyError::Config(
            format!("Scheduler run hour must be 0-23, got {}", config.run_hour_utc)
        ));
    }

    if config.reminder_window_hours <= 0 {
        return Err(EventBuddyError::Config(
            "Reminder window must be greater than 0 hours".to_string()
        ));
    }

    Ok(())
}

/// Validate logging configuration
fn validate_logging_config(config: &super::LoggingConfig) -> Result<()> {
    if config.level.is_empty() {
        return Err(EventBuddyError::Config(
            "Log level is required".to_string()
        ));
    }
    
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.level.as_str()) {
        return Err(EventBuddyError::Config(
            format!("Invalid log level: {}. Valid levels: {:?}", config.level, valid_levels)
        ));
    }
    
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;

    fn valid_settings() -> Settings {
        let mut settings = Settings::default();
        settings.auth.jwt_secret = "0123456789abcdef0123456789abcdef".to_string();
        settings.smtp.from_address = "no-reply@example.org".to_string();
        settings
    }

    #[test]
    fn test_valid_settings_pass() {
        assert!(validate_settings(&valid_settings()).is_ok());
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let mut settings = valid_settings();
        settings.auth.jwt_secret = "short".to_string();
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_connection_bounds() {
        let mut settings = valid_settings();
        settings.database.min_connections = 20;
        settings.database.max_connections = 5;
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_scheduler_hour_bounds() {
        let mut settings = valid_settings();
        settings.scheduler.run_hour_utc = 24;
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = valid_settings();
        settings.logging.level = "verbose".to_string();
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_public_base_url_must_be_http() {
        let mut settings = valid_settings();
        settings.server.public_base_url = "ftp://example.org".to_string();
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_smtp_credentials_must_pair() {
        let mut settings = valid_settings();
        settings.smtp.username = Some("mailer".to_string());
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_redis_ttl_checked_when_present() {
        let mut settings = valid_settings();
        settings.redis = Some(RedisConfig {
            url: "redis://localhost:6379".to_string(),
            prefix: "eventbuddy:".to_string(),
            ttl_seconds: 0,
        });
        assert!(validate_settings(&settings).is_err());
    }
}
