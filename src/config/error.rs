//! Configuration Error Types
//!
//! Specific, actionable error messages for configuration loading and validation.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Configuration file could not be read or parsed
    #[error("Failed to load configuration from '{source_name}': {error}")]
    LoadError { source_name: String, error: String },

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Environment variable present but unparsable
    #[error("Invalid environment variable {variable}='{value}': {error}")]
    EnvironmentVariableError {
        variable: String,
        value: String,
        error: String,
    },
}

impl ConfigurationError {
    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    pub fn environment_variable(
        variable: impl Into<String>,
        value: impl Into<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        Self::EnvironmentVariableError {
            variable: variable.into(),
            value: value.into(),
            error: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::LoadError {
            source_name: "layered configuration".to_string(),
            error: err.to_string(),
        }
    }
}

impl From<ConfigurationError> for crate::error::GuardError {
    fn from(err: ConfigurationError) -> Self {
        crate::error::GuardError::Configuration(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
