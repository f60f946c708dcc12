use std::panic::Location;

use error_location::ErrorLocation;
use thiserror::Error;

/// Recording session errors with source location tracking.
///
/// Every variant names the failed `operation` so the terminal report reads
/// like `"<operation> failed: <reason>"`. None of them are recoverable: the
/// session that produced one is torn down.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Device or format negotiation failed, or the session was misconfigured.
    #[error("Configuration error during {operation}: {reason} {location}")]
    Configuration {
        /// Name of the operation that failed.
        operation: &'static str,
        /// Description of the failure.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// A capture buffer or the capture engine could not be allocated.
    #[error("Resource error during {operation}: {reason} {location}")]
    Resource {
        /// Name of the operation that failed.
        operation: &'static str,
        /// Description of the failure.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The output container could not be created, written or closed.
    #[error("IO error during {operation}: {reason} {location}")]
    Io {
        /// Name of the operation that failed.
        operation: &'static str,
        /// Description of the failure.
        reason: String,
        /// Underlying filesystem error, when there is one.
        #[source]
        source: Option<std::io::Error>,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The capture engine refused to start, stop or deliver.
    #[error("Engine error during {operation}: {reason} {location}")]
    Engine {
        /// Name of the operation that failed.
        operation: &'static str,
        /// Description of the failure.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },
}

impl RecorderError {
    /// Builds a [`RecorderError::Configuration`] at the caller's location.
    #[track_caller]
    pub fn configuration(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            operation,
            reason: reason.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Builds a [`RecorderError::Resource`] at the caller's location.
    #[track_caller]
    pub fn resource(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Resource {
            operation,
            reason: reason.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Builds a [`RecorderError::Io`] without an underlying `std::io::Error`.
    #[track_caller]
    pub fn io(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Io {
            operation,
            reason: reason.into(),
            source: None,
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Wraps a filesystem error as a [`RecorderError::Io`].
    #[track_caller]
    pub fn from_io(operation: &'static str, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            reason: source.to_string(),
            source: Some(source),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Builds a [`RecorderError::Engine`] at the caller's location.
    #[track_caller]
    pub fn engine(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Engine {
            operation,
            reason: reason.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// The operation this error was raised from.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Configuration { operation, .. }
            | Self::Resource { operation, .. }
            | Self::Io { operation, .. }
            | Self::Engine { operation, .. } => operation,
        }
    }
}

/// Result type alias using [`RecorderError`].
pub type Result<T> = std::result::Result<T, RecorderError>;
