//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool size > 0, ports valid, intervals > 0)
//! - Check related fields agree (backoff base <= max)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::ProxyConfig;

/// A single rejected setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `upstream.pool_size`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    }
    if config.listener.port == 0 {
        errors.push(ValidationError::new("listener.port", "must be non-zero"));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.upstream.host.is_empty() {
        errors.push(ValidationError::new("upstream.host", "must not be empty"));
    }
    if config.upstream.port == 0 {
        errors.push(ValidationError::new("upstream.port", "must be non-zero"));
    }
    if config.upstream.pool_size == 0 {
        errors.push(ValidationError::new("upstream.pool_size", "must be greater than 0"));
    }
    if config.upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.connect_timeout_secs", "must be greater than 0"));
    }
    if config.upstream.reconnect_base_delay_ms > config.upstream.reconnect_max_delay_ms {
        errors.push(ValidationError::new(
            "upstream.reconnect_base_delay_ms",
            format!(
                "must not exceed reconnect_max_delay_ms ({})",
                config.upstream.reconnect_max_delay_ms
            ),
        ));
    }

    if config.engine.poll_interval_ms == 0 {
        errors.push(ValidationError::new("engine.poll_interval_ms", "must be greater than 0"));
    }
    if config.engine.read_buffer_size == 0 {
        errors.push(ValidationError::new("engine.read_buffer_size", "must be greater than 0"));
    }

    if config.limits.max_request_bytes == 0 {
        errors.push(ValidationError::new("limits.max_request_bytes", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        config.upstream.pool_size = 0;
        config.listener.port = 0;
        config.engine.read_buffer_size = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["listener.port", "upstream.pool_size", "engine.read_buffer_size"]
        );
    }

    #[test]
    fn backoff_base_must_not_exceed_max() {
        let mut config = ProxyConfig::default();
        config.upstream.reconnect_base_delay_ms = 10_000;
        config.upstream.reconnect_max_delay_ms = 1_000;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "upstream.reconnect_base_delay_ms");
    }

    #[test]
    fn enabled_admin_requires_key() {
        let mut config = ProxyConfig::default();
        config.admin.enabled = true;
        assert!(validate_config(&config).is_err());

        config.admin.api_key = "secret".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn display_names_the_field() {
        let error = ValidationError::new("upstream.port", "must be non-zero");
        assert_eq!(error.to_string(), "upstream.port: must be non-zero");
    }
}
