//! Error types for the connection manager

use std::fmt;
use tracing::{debug, error, warn};

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, ServerError>;

/// How a driver failure should be treated by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Timeouts, refused connections, DNS hiccups; worth another attempt
    Transient,
    /// Malformed URI, invalid options, rejected credentials; retrying cannot help
    Configuration,
}

/// Failure reported by a [`Driver`](crate::driver::Driver) or its transport
#[derive(Debug, Clone, PartialEq)]
pub struct DriverError {
    /// Driver supplied message
    pub message: String,
    /// Backend specific code or code name, if the driver exposes one
    pub code: Option<String>,
    /// Retry classification
    pub kind: DriverErrorKind,
}

impl DriverError {
    /// Create a retryable driver error
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            kind: DriverErrorKind::Transient,
        }
    }

    /// Create a terminal configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            kind: DriverErrorKind::Configuration,
        }
    }

    /// Attach a backend error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Whether the retry loop may try again after this error
    pub fn is_retryable(&self) -> bool {
        self.kind == DriverErrorKind::Transient
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DriverError {}

/// Main error type for the connection manager
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Database access deliberately disabled (test/offline mode)
    Bypass {
        /// Why the connection was refused
        reason: String,
    },
    /// Terminal connection failure after the retry budget was spent
    Connection {
        /// Total attempts made in the failed cycle
        attempts: u32,
        /// User-friendly error message
        message: String,
        /// The final underlying failure
        last_error: DriverError,
    },
    /// Configuration errors
    Configuration {
        /// Configuration parameter that is invalid
        parameter: String,
        /// Error message
        message: String,
    },
    /// Validation errors
    Validation {
        /// The validation error message
        message: String,
        /// The invalid value that caused the error
        invalid_value: Option<String>,
    },
    /// Closing the transport failed; carries the driver error unchanged
    Disconnect {
        /// The underlying driver error
        source: DriverError,
    },
    /// Internal errors
    Internal {
        /// Error message (safe for client)
        message: String,
        /// Internal error details (for logging only)
        details: Option<String>,
    },
}

impl ServerError {
    /// Create a bypass error
    pub fn bypass(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        debug!("Database connection bypassed: {}", reason);

        Self::Bypass { reason }
    }

    /// Create a terminal connection error once retries are exhausted
    pub fn connection_error(attempts: u32, last_error: DriverError) -> Self {
        let message = format!(
            "Failed to connect to MongoDB after {} attempts: {}",
            attempts, last_error.message
        );
        error!("{}", message);

        Self::Connection {
            attempts,
            message,
            last_error,
        }
    }

    /// Create a new configuration error
    pub fn configuration_error(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        let parameter = parameter.into();
        let message = message.into();
        error!("Configuration error for '{}': {}", parameter, message);

        Self::Configuration { parameter, message }
    }

    /// Create a new validation error
    pub fn validation_error(message: impl Into<String>, invalid_value: Option<String>) -> Self {
        let message = message.into();
        warn!("Validation error: {} | Invalid value: {:?}", message, invalid_value);

        Self::Validation {
            message,
            invalid_value,
        }
    }

    /// Wrap a failed close without altering the driver error
    pub fn disconnect_error(source: DriverError) -> Self {
        error!("Disconnect failed: {}", source);

        Self::Disconnect { source }
    }

    /// Create a new internal error
    pub fn internal_error(message: impl Into<String>, details: Option<String>) -> Self {
        let message = message.into();
        error!("Internal error: {} | Details: {:?}", message, details);

        Self::Internal { message, details }
    }

    /// True when the error signals bypass mode rather than a fault
    pub fn is_bypass(&self) -> bool {
        matches!(self, ServerError::Bypass { .. })
    }

    /// Check if the caller can recover, e.g. by serving fallback data or retrying later
    pub fn is_recoverable(&self) -> bool {
        match self {
            ServerError::Bypass { .. } => true,
            ServerError::Connection { .. } => true,
            ServerError::Configuration { .. } => false,
            ServerError::Validation { .. } => false,
            ServerError::Disconnect { .. } => false,
            ServerError::Internal { .. } => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            ServerError::Bypass { reason } => format!("Database connection bypassed: {}", reason),
            ServerError::Connection { message, .. } => message.clone(),
            ServerError::Configuration { parameter, message } => {
                format!("Configuration error for '{}': {}", parameter, message)
            }
            ServerError::Validation { message, .. } => message.clone(),
            ServerError::Disconnect { source } => source.message.clone(),
            ServerError::Internal { message, .. } => message.clone(),
        }
    }

    /// Get detailed error information for logging
    pub fn detailed_message(&self) -> String {
        match self {
            ServerError::Bypass { reason } => format!("Bypass: {}", reason),
            ServerError::Connection {
                attempts,
                message,
                last_error,
            } => format!(
                "Connection error: {} | Attempts: {} | Last error: {} | Code: {:?}",
                message, attempts, last_error.message, last_error.code
            ),
            ServerError::Configuration { parameter, message } => {
                format!("Configuration error for '{}': {}", parameter, message)
            }
            ServerError::Validation {
                message,
                invalid_value,
            } => format!("Validation error: {} | Invalid value: {:?}", message, invalid_value),
            ServerError::Disconnect { source } => {
                format!("Disconnect error: {} | Code: {:?}", source.message, source.code)
            }
            ServerError::Internal { message, details } => {
                format!("Internal error: {} | Details: {:?}", message, details)
            }
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Connection { last_error, .. } => Some(last_error),
            ServerError::Disconnect { source } => Some(source),
            _ => None,
        }
    }
}
