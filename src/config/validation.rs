//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds ordered)
//! - Warn about values the runtime will raise to a floor
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ConsumerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::{ConsumerConfig, MIN_HEARTBEAT_PERIOD, MIN_RECONNECT_PERIOD};

/// A single semantic problem in a config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a consumer config, collecting every failure.
pub fn validate_config(config: &ConsumerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.interface_id.trim().is_empty() {
        errors.push(ValidationError::new("interface_id", "must not be empty"));
    }
    if config.protocol.trim().is_empty() {
        errors.push(ValidationError::new("protocol", "must not be empty"));
    }
    if config.invoke.timeout_ms == 0 {
        errors.push(ValidationError::new("invoke.timeout_ms", "must be > 0"));
    }
    for (name, method) in &config.methods {
        if method.timeout_ms == Some(0) {
            errors.push(ValidationError::new(format!("methods.{}.timeout_ms", name), "must be > 0"));
        }
    }

    let conn = &config.connection;
    if conn.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("connection.connect_timeout_ms", "must be > 0"));
    }
    if conn.connections_per_provider == 0 {
        errors.push(ValidationError::new("connection.connections_per_provider", "must be >= 1"));
    }
    if conn.parallel_connect_cap == 0 {
        errors.push(ValidationError::new("connection.parallel_connect_cap", "must be >= 1"));
    }

    let hb = &config.heartbeat;
    if hb.sub_health_threshold == 0 {
        errors.push(ValidationError::new("heartbeat.sub_health_threshold", "must be >= 1"));
    }
    if hb.retry_threshold <= hb.sub_health_threshold {
        errors.push(ValidationError::new(
            "heartbeat.retry_threshold",
            format!("must be greater than sub_health_threshold ({})", hb.sub_health_threshold),
        ));
    }
    if hb.period_ms > 0 && hb.timeout_ms == 0 {
        errors.push(ValidationError::new("heartbeat.timeout_ms", "must be > 0"));
    }

    let rc = &config.reconnect;
    if rc.max_coefficient == 0 {
        errors.push(ValidationError::new("reconnect.max_coefficient", "must be >= 1"));
    }
    if rc.soft_failure_coefficient == 0 || rc.soft_failure_coefficient > rc.max_coefficient.max(1) {
        errors.push(ValidationError::new(
            "reconnect.soft_failure_coefficient",
            "must be between 1 and max_coefficient",
        ));
    }

    if config.callback.pool_size == 0 {
        errors.push(ValidationError::new("callback.pool_size", "must be >= 1"));
    }

    for (i, rule) in config.routers.iter().enumerate() {
        if rule.key.trim().is_empty() {
            errors.push(ValidationError::new(format!("routers[{}].key", i), "must not be empty"));
        }
    }

    if hb.period_ms > 0 && (hb.period_ms as u128) < MIN_HEARTBEAT_PERIOD.as_millis() {
        tracing::warn!(
            period_ms = hb.period_ms,
            floor_ms = MIN_HEARTBEAT_PERIOD.as_millis() as u64,
            "Heartbeat period below floor, raising"
        );
    }
    if rc.period_ms > 0 && (rc.period_ms as u128) < MIN_RECONNECT_PERIOD.as_millis() {
        tracing::warn!(
            period_ms = rc.period_ms,
            floor_ms = MIN_RECONNECT_PERIOD.as_millis() as u64,
            "Reconnect period below floor, raising"
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
